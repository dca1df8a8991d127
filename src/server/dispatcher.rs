//! Component D — the request dispatcher (spec §4.D).
//!
//! Binds one parsed [`Command`] to storage calls and formats the reply.
//! Stateless across requests: everything that persists between calls
//! lives in the [`Table`] and [`Metrics`] the dispatcher holds, not in
//! any per-request field here.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::EvictionPolicy;
use crate::metrics::Metrics;
use crate::protocol::{
    format_reply, format_stat_line, format_value_line, Command, DeltaVerb, Reply, StoreVerb,
};
use crate::storage::{StorageError, Table};

/// What the connection layer should do after a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    Close,
}

pub struct Dispatcher {
    table: Table,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock + Send + Sync>,
    policy: EvictionPolicy,
    key_maxlen: usize,
}

impl Dispatcher {
    pub fn new(
        table: Table,
        metrics: Arc<Metrics>,
        clock: Arc<dyn Clock + Send + Sync>,
        policy: EvictionPolicy,
        key_maxlen: usize,
    ) -> Self {
        Self {
            table,
            metrics,
            clock,
            policy,
            key_maxlen,
        }
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }

    fn key_too_long(&self, key: &[u8]) -> bool {
        key.len() > self.key_maxlen
    }

    /// Dispatch `cmd`, appending the reply (if any) to `out`.
    pub fn dispatch(&mut self, cmd: Command<'_>, out: &mut Vec<u8>) -> DispatchOutcome {
        match cmd {
            Command::Retrieve(r) => {
                self.metrics.incr("cmd_get", 1);
                let now = self.now();
                for key in r.keys() {
                    if let Some(item) = self.table.get(key, now, &self.metrics) {
                        let cas = if r.with_cas { Some(item.cas) } else { None };
                        format_value_line(out, item.key, item.flags, item.value, cas);
                    }
                }
                format_reply(out, &Reply::End);
                DispatchOutcome::Continue
            }

            Command::Store {
                verb,
                key,
                flags,
                exptime,
                cas_unique,
                noreply,
                data,
            } => {
                if self.key_too_long(key) {
                    self.reply_unless_noreply(
                        out,
                        noreply,
                        Reply::ClientError("bad command line format".to_string()),
                    );
                    return DispatchOutcome::Continue;
                }
                let now = self.now();
                let expire_at = crate::storage::normalize_exptime(exptime, now);
                let reply = self.dispatch_store(verb, key, data, flags, expire_at, cas_unique, now);
                self.reply_unless_noreply(out, noreply, reply);
                DispatchOutcome::Continue
            }

            Command::Delta { verb, key, delta, noreply } => {
                self.metrics.incr("cmd_incr_decr", 1);
                if self.key_too_long(key) {
                    self.reply_unless_noreply(
                        out,
                        noreply,
                        Reply::ClientError("bad command line format".to_string()),
                    );
                    return DispatchOutcome::Continue;
                }
                let now = self.now();
                let result = match verb {
                    DeltaVerb::Incr => self.table.increment(key, delta, now, &self.metrics),
                    DeltaVerb::Decr => self.table.decrement(key, delta, now, &self.metrics),
                };
                let reply = match result {
                    Ok(value) => Reply::Number(value),
                    Err(StorageError::NotFound) => Reply::NotFound,
                    Err(StorageError::NonNumeric) => {
                        Reply::ClientError("cannot increment or decrement non-numeric value".to_string())
                    }
                    Err(StorageError::Overflow) => {
                        Reply::ClientError("incr/decr would overflow".to_string())
                    }
                    Err(other) => unreachable!("arithmetic never returns {other:?}"),
                };
                self.reply_unless_noreply(out, noreply, reply);
                DispatchOutcome::Continue
            }

            Command::Delete { key, noreply } => {
                self.metrics.incr("cmd_delete", 1);
                let now = self.now();
                let reply = if self.table.delete(key, now, &self.metrics) {
                    Reply::Deleted
                } else {
                    Reply::NotFound
                };
                self.reply_unless_noreply(out, noreply, reply);
                DispatchOutcome::Continue
            }

            Command::FlushAll { delay: _, noreply } => {
                // A delayed flush would need a background timer external to
                // this core (spec §1 places the event loop out of scope);
                // an immediate flush is a conservative, spec-silent choice.
                self.metrics.incr("cmd_flush", 1);
                self.table.clear(&self.metrics);
                self.reply_unless_noreply(out, noreply, Reply::Ok);
                DispatchOutcome::Continue
            }

            Command::Version => {
                format_reply(out, &Reply::Version);
                DispatchOutcome::Continue
            }

            Command::Quit => DispatchOutcome::Close,

            Command::Stats => {
                let now = self.now();
                for (name, value) in self.metrics.snapshot() {
                    if name == "curr_items" || name == "bytes" {
                        continue;
                    }
                    format_stat_line(out, name, value);
                }
                format_stat_line(out, "curr_items", self.table.scan_curr_items(now) as u64);
                format_stat_line(out, "bytes", self.table.scan_total_bytes(now) as u64);
                format_reply(out, &Reply::End);
                DispatchOutcome::Continue
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_store(
        &mut self,
        verb: StoreVerb,
        key: &[u8],
        data: &[u8],
        flags: u32,
        expire_at: u64,
        cas_unique: Option<u64>,
        now: u64,
    ) -> Reply {
        self.metrics.incr("cmd_set", 1);
        match verb {
            StoreVerb::Set => {
                // insert() never de-duplicates an existing slot for the same
                // key on its own (spec §4.D's `set` semantics note), so a
                // prior occupant must be deleted first.
                self.table.delete(key, now, &self.metrics);
                match self.table.insert(key, data, flags, expire_at, now, self.policy, &self.metrics) {
                    Ok(_) => Reply::Stored,
                    Err(StorageError::TooLarge) => Reply::ClientError("bad data chunk".to_string()),
                    Err(other) => unreachable!("insert never returns {other:?}"),
                }
            }
            StoreVerb::Add => {
                let exists = self.table.get(key, now, &self.metrics).is_some();
                if exists {
                    Reply::NotStored
                } else {
                    match self.table.insert(key, data, flags, expire_at, now, self.policy, &self.metrics) {
                        Ok(_) => Reply::Stored,
                        Err(StorageError::TooLarge) => Reply::ClientError("bad data chunk".to_string()),
                        Err(other) => unreachable!("insert never returns {other:?}"),
                    }
                }
            }
            StoreVerb::Replace => {
                match self.table.update(key, data, flags, expire_at, now, &self.metrics) {
                    Ok(_) => Reply::Stored,
                    Err(StorageError::NotFound) => Reply::NotStored,
                    Err(StorageError::TooLarge) => Reply::ClientError("bad data chunk".to_string()),
                    Err(other) => unreachable!("update never returns {other:?}"),
                }
            }
            StoreVerb::Cas => {
                let expected = cas_unique.unwrap_or(0);
                match self
                    .table
                    .cas_update(key, data, flags, expire_at, expected, now, &self.metrics)
                {
                    Ok(_) => Reply::Stored,
                    Err(StorageError::NotFound) => Reply::NotFound,
                    Err(StorageError::CasMismatch) => Reply::Exists,
                    Err(StorageError::TooLarge) => Reply::ClientError("bad data chunk".to_string()),
                    Err(other) => unreachable!("cas_update never returns {other:?}"),
                }
            }
        }
    }

    fn reply_unless_noreply(&self, out: &mut Vec<u8>, noreply: bool, reply: Reply) {
        if !noreply {
            format_reply(out, &reply);
        }
    }
}
