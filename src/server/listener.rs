//! TCP accept loop (spec §1 names "event-loop/acceptor plumbing" as an
//! external collaborator, but a runnable binary needs one). Grounded on
//! the reference stack's `start_health_server`: bind once, then loop
//! `accept` and hand each connection to its own task.
//!
//! Every accepted connection is served with [`tokio::task::spawn_local`]
//! rather than [`tokio::spawn`], because [`Dispatcher`] is shared via
//! `Rc<RefCell<_>>` — this whole server is meant to run on a single
//! `current_thread` runtime inside a [`tokio::task::LocalSet`] (spec §5's
//! single-threaded cooperative scheduling model).

use std::cell::RefCell;
use std::rc::Rc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::Result;
use crate::server::connection::handle_connection;
use crate::server::dispatcher::Dispatcher;

/// Bind `host:port` and serve connections until `shutdown` resolves.
///
/// Must be called from within a [`tokio::task::LocalSet`] (`spawn_local`
/// panics otherwise).
pub async fn serve(
    host: &str,
    port: u16,
    dispatcher: Rc<RefCell<Dispatcher>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "cuckoocached listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let dispatcher = Rc::clone(&dispatcher);
                        tokio::task::spawn_local(async move {
                            handle_connection(stream, dispatcher, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("shutdown signal received, no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}
