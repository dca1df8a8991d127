//! Per-connection state machine (spec §4.D):
//!
//! ```text
//! READ_HEADER → READ_DATA (store commands only) → DISPATCH → WRITE_REPLY → READ_HEADER
//!           ↘ MALFORMED → WRITE_ERROR → CLOSED
//! ```
//!
//! `parse` collapses `READ_HEADER`/`READ_DATA` into a single call (it
//! returns `Incomplete` until the whole request — header and, for store
//! commands, data block — is buffered), so this loop only has to drive
//! read → parse → dispatch → write, grounded on the reference stack's
//! per-connection accept-and-serve loop (`src/health.rs`'s
//! `start_health_server`).

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::protocol::{format_reply, parse, MalformedKind, ParseOutcome, Reply};
use crate::server::dispatcher::{DispatchOutcome, Dispatcher};

const READ_CHUNK: usize = 4096;

/// Drive one accepted connection until the peer disconnects, sends
/// `quit`, or sends a request the parser cannot recover from.
///
/// `dispatcher` is shared (via `Rc<RefCell<_>>`, not `Arc<Mutex<_>>`)
/// across every connection on this event-loop thread: the scheduling
/// model is single-threaded cooperative (spec §5), so no connection ever
/// observes a torn table mutation without paying for a lock.
pub async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Rc<RefCell<Dispatcher>>,
    peer: SocketAddr,
) {
    let mut read_buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut cursor = 0usize;
    let mut write_buf: Vec<u8> = Vec::new();

    loop {
        // Drain every fully-buffered request before asking the socket for
        // more — a pipelining client may have sent several at once.
        loop {
            match parse(&read_buf, cursor) {
                ParseOutcome::Incomplete => break,
                ParseOutcome::Parsed(cmd, new_cursor) => {
                    let outcome = dispatcher.borrow_mut().dispatch(cmd, &mut write_buf);
                    cursor = new_cursor;
                    if !write_buf.is_empty() {
                        if stream.write_all(&write_buf).await.is_err() {
                            return;
                        }
                        write_buf.clear();
                    }
                    if outcome == DispatchOutcome::Close {
                        let _ = stream.shutdown().await;
                        return;
                    }
                }
                ParseOutcome::Malformed(kind) => {
                    let reply = match kind {
                        MalformedKind::UnknownCommand => Reply::Error,
                        MalformedKind::BadFormat(msg) => Reply::ClientError(msg),
                    };
                    format_reply(&mut write_buf, &reply);
                    let _ = stream.write_all(&write_buf).await;
                    let _ = stream.shutdown().await;
                    debug!(peer = %peer, "closing connection after malformed request");
                    return;
                }
            }
        }

        reclaim_parsed_prefix(&mut read_buf, &mut cursor);

        let mut chunk = [0u8; READ_CHUNK];
        let n = match stream.read(&mut chunk).await {
            Ok(0) => return, // client closed the connection
            Ok(n) => n,
            Err(e) => {
                warn!(peer = %peer, error = %e, "read error, closing connection");
                return;
            }
        };
        read_buf.extend_from_slice(&chunk[..n]);
    }
}

/// Drop bytes already consumed by `parse` so a long-lived pipelined
/// connection's read buffer doesn't grow without bound.
fn reclaim_parsed_prefix(read_buf: &mut Vec<u8>, cursor: &mut usize) {
    if *cursor == 0 {
        return;
    }
    if *cursor == read_buf.len() {
        read_buf.clear();
    } else {
        read_buf.drain(..*cursor);
    }
    *cursor = 0;
}
