//! The metric registry collaborator (spec §6: "Opaque handle supporting
//! `incr(name, delta)`, `set(name, value)`. Used for observability only;
//! never affects control flow.").
//!
//! A fixed set of named counters and gauges, each a plain `AtomicU64`.
//! No macro-generated struct-of-fields-plus-name-list (spec §9 flags that
//! pattern for re-architecture) — just one struct, one field per stat,
//! and a `snapshot()` that enumerates them for the `stats` command.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

/// Lock-free counters tracked for the lifetime of the process.
///
/// Every field is relaxed-ordering: these are read by an optional
/// observer (the `stats` command, a periodic log flush) and never
/// participate in control flow, matching spec §5's "metric counters use
/// relaxed atomic increments".
#[derive(Debug, Default)]
pub struct Metrics {
    pub cmd_get: AtomicU64,
    pub cmd_set: AtomicU64,
    pub cmd_delete: AtomicU64,
    pub cmd_flush: AtomicU64,
    pub cmd_incr_decr: AtomicU64,
    pub get_hits: AtomicU64,
    pub get_misses: AtomicU64,
    pub get_expired: AtomicU64,
    pub delete_hits: AtomicU64,
    pub delete_misses: AtomicU64,
    pub cas_hits: AtomicU64,
    pub cas_misses: AtomicU64,
    pub cas_badval: AtomicU64,
    pub evictions: AtomicU64,
    pub expired_unfetched: AtomicU64,
    pub curr_items: AtomicU64,
    pub total_items: AtomicU64,
    pub bytes: AtomicU64,
    started_at: std::sync::OnceLock<Instant>,
}

impl Metrics {
    /// Create a zeroed registry, recording the current instant as "started".
    pub fn new() -> Self {
        let m = Self::default();
        let _ = m.started_at.set(Instant::now());
        m
    }

    /// Increment a named counter by `delta`. Unknown names are a silent
    /// no-op — metrics never affect control flow (spec §6).
    pub fn incr(&self, name: &str, delta: u64) {
        if let Some(field) = self.field(name) {
            field.fetch_add(delta, Ordering::Relaxed);
        }
    }

    /// Set a named gauge to an absolute value.
    pub fn set(&self, name: &str, value: u64) {
        if let Some(field) = self.field(name) {
            field.store(value, Ordering::Relaxed);
        }
    }

    fn field(&self, name: &str) -> Option<&AtomicU64> {
        Some(match name {
            "cmd_get" => &self.cmd_get,
            "cmd_set" => &self.cmd_set,
            "cmd_delete" => &self.cmd_delete,
            "cmd_flush" => &self.cmd_flush,
            "cmd_incr_decr" => &self.cmd_incr_decr,
            "get_hits" => &self.get_hits,
            "get_misses" => &self.get_misses,
            "get_expired" => &self.get_expired,
            "delete_hits" => &self.delete_hits,
            "delete_misses" => &self.delete_misses,
            "cas_hits" => &self.cas_hits,
            "cas_misses" => &self.cas_misses,
            "cas_badval" => &self.cas_badval,
            "evictions" => &self.evictions,
            "expired_unfetched" => &self.expired_unfetched,
            "curr_items" => &self.curr_items,
            "total_items" => &self.total_items,
            "bytes" => &self.bytes,
            _ => return None,
        })
    }

    /// Seconds since the registry was created, used for `stats`' `uptime`.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at
            .get()
            .map(|i| i.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Render every counter as `(name, value)` pairs, in the order the
    /// `stats` command should emit `STAT` lines.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("cmd_get", self.cmd_get.load(Ordering::Relaxed)),
            ("cmd_set", self.cmd_set.load(Ordering::Relaxed)),
            ("cmd_delete", self.cmd_delete.load(Ordering::Relaxed)),
            ("cmd_flush", self.cmd_flush.load(Ordering::Relaxed)),
            (
                "cmd_incr_decr",
                self.cmd_incr_decr.load(Ordering::Relaxed),
            ),
            ("get_hits", self.get_hits.load(Ordering::Relaxed)),
            ("get_misses", self.get_misses.load(Ordering::Relaxed)),
            ("get_expired", self.get_expired.load(Ordering::Relaxed)),
            ("delete_hits", self.delete_hits.load(Ordering::Relaxed)),
            (
                "delete_misses",
                self.delete_misses.load(Ordering::Relaxed),
            ),
            ("cas_hits", self.cas_hits.load(Ordering::Relaxed)),
            ("cas_misses", self.cas_misses.load(Ordering::Relaxed)),
            ("cas_badval", self.cas_badval.load(Ordering::Relaxed)),
            ("evictions", self.evictions.load(Ordering::Relaxed)),
            (
                "expired_unfetched",
                self.expired_unfetched.load(Ordering::Relaxed),
            ),
            ("curr_items", self.curr_items.load(Ordering::Relaxed)),
            ("total_items", self.total_items.load(Ordering::Relaxed)),
            ("bytes", self.bytes.load(Ordering::Relaxed)),
            ("uptime", self.uptime_secs()),
        ]
    }

    /// Emit the current counters as a single structured log line, patterned
    /// on the reference stack's periodic usage-flush summary.
    pub fn emit_usage(&self, reason: &str) {
        info!(
            event = "usage_summary",
            reason = reason,
            cmd_get = self.cmd_get.load(Ordering::Relaxed),
            cmd_set = self.cmd_set.load(Ordering::Relaxed),
            curr_items = self.curr_items.load(Ordering::Relaxed),
            evictions = self.evictions.load(Ordering::Relaxed),
            "cache usage metrics"
        );
    }
}

/// Spawn a background task emitting usage metrics every `interval_secs`
/// seconds, patterned on `start_periodic_usage_flush` in the reference
/// health-check stack.
pub fn start_periodic_flush(
    metrics: std::sync::Arc<Metrics>,
    interval_secs: u64,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics.emit_usage("periodic");
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        metrics.emit_usage("shutdown");
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registry_is_zeroed() {
        let m = Metrics::new();
        assert_eq!(m.cmd_get.load(Ordering::Relaxed), 0);
        assert_eq!(m.curr_items.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn incr_bumps_named_counter() {
        let m = Metrics::new();
        m.incr("cmd_get", 3);
        m.incr("cmd_get", 2);
        assert_eq!(m.cmd_get.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn incr_unknown_name_is_noop() {
        let m = Metrics::new();
        m.incr("not_a_real_stat", 100);
        // Nothing panics, nothing elsewhere changes.
        assert_eq!(m.cmd_get.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn set_overwrites_gauge() {
        let m = Metrics::new();
        m.set("curr_items", 42);
        m.set("curr_items", 7);
        assert_eq!(m.curr_items.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn snapshot_includes_every_stat_and_uptime() {
        let m = Metrics::new();
        m.incr("cmd_set", 1);
        let snap = m.snapshot();
        let names: Vec<&str> = snap.iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"cmd_set"));
        assert!(names.contains(&"uptime"));
        let cmd_set = snap.iter().find(|(n, _)| *n == "cmd_set").unwrap().1;
        assert_eq!(cmd_set, 1);
    }

    #[tokio::test]
    async fn periodic_flush_stops_on_shutdown_signal() {
        let m = std::sync::Arc::new(Metrics::new());
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = start_periodic_flush(m, 3600, rx);
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("flush task should exit promptly on shutdown")
            .unwrap();
    }
}
