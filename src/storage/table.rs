//! Component B — the cuckoo table (spec §4.B).
//!
//! A contiguous, fixed-capacity array of [`Slot`]s allocated once at
//! startup (spec §3: "created once at `setup` and destroyed at
//! `teardown`"). All public operations take `now` from the caller (the
//! dispatcher owns the [`crate::clock::Clock`]) so the table itself has
//! no notion of wall-clock time and is trivial to test with fixed
//! timestamps.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::config::EvictionPolicy;
use crate::metrics::Metrics;
use crate::storage::hash::{probes, DIMENSION};
use crate::storage::item::Slot;

/// The maximum number of displacement steps `insert` will take before
/// giving up and dropping the last-displaced item (spec §4.B step 5: "a
/// small multiple of `D`"). Kept independent of table size so `insert`
/// stays `O(L)` regardless of how large `N` is.
const MAX_DISPLACEMENT_DEPTH: usize = DIMENSION * 8;

/// Typed outcomes for storage operations that can fail in an expected
/// way (spec §4.B). These are ordinary control-flow values, not
/// [`crate::error::CacheError`] — the dispatcher matches on them
/// directly to pick a wire reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No live slot matches the key.
    #[error("not found")]
    NotFound,
    /// `cas_update` found the key but the stored CAS token didn't match.
    #[error("cas mismatch")]
    CasMismatch,
    /// `incr`/`decr` target's stored value isn't a valid unsigned decimal.
    #[error("value is not numeric")]
    NonNumeric,
    /// `incr` would overflow 64 bits, or the result no longer fits the slot.
    #[error("value would overflow")]
    Overflow,
    /// The key+value pair does not fit in any slot's fixed capacity.
    #[error("item exceeds configured maximum size")]
    TooLarge,
}

/// A read-only view into an occupied slot, returned by [`Table::get`].
#[derive(Debug, Clone, Copy)]
pub struct ItemRef<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub flags: u32,
    pub cas: u64,
    pub expire_at: u64,
}

/// The fixed-capacity, cuckoo-hashed item table.
pub struct Table {
    slots: Vec<Slot>,
    item_size: usize,
    len: usize,
    next_cas: u64,
    rng: StdRng,
}

impl Table {
    /// Allocate a table of `nitem` empty slots, each holding up to
    /// `item_size` bytes of key+value. This is the only large
    /// allocation in the crate's lifetime (spec §3, §6: `storage_setup`).
    pub fn new(item_size: usize, nitem: usize) -> Self {
        Self::with_rng(item_size, nitem, StdRng::from_entropy())
    }

    /// Like [`Table::new`], but with a seeded RNG for deterministic
    /// victim-selection tests.
    pub fn with_seed(item_size: usize, nitem: usize, seed: u64) -> Self {
        Self::with_rng(item_size, nitem, StdRng::seed_from_u64(seed))
    }

    fn with_rng(item_size: usize, nitem: usize, rng: StdRng) -> Self {
        assert!(item_size > 0 && nitem > 0);
        let slots = (0..nitem).map(|_| Slot::empty(item_size)).collect();
        Self {
            slots,
            item_size,
            len: 0,
            next_cas: 0,
            rng,
        }
    }

    /// Number of slots (`N`), fixed for the table's lifetime.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Maximum key+value payload size per slot.
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Number of occupied slots, including not-yet-lazily-reclaimed
    /// expired ones (an exact count requires touching every slot; use
    /// [`Table::scan_curr_items`] for that).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `O(N)` scan for the `stats` command: the exact count of slots
    /// that are occupied *and not expired* as of `now`.
    pub fn scan_curr_items(&self, now: u64) -> usize {
        self.slots
            .iter()
            .filter(|s| s.is_occupied() && !s.expired(now))
            .count()
    }

    /// `O(N)` scan for the `stats` command: aggregate key+value bytes
    /// across unexpired occupied slots.
    pub fn scan_total_bytes(&self, now: u64) -> usize {
        self.slots
            .iter()
            .filter(|s| s.is_occupied() && !s.expired(now))
            .map(|s| s.key().len() + s.value().len())
            .sum()
    }

    fn mint_cas(&mut self) -> u64 {
        self.next_cas += 1;
        self.next_cas
    }

    /// Scan `key`'s probe set, lazily reclaiming any expired slot found
    /// along the way, and return the index of the (single, after
    /// tie-break cleanup) matching occupied slot, if any.
    ///
    /// Spec §4.B: "if — due to a prior bug — two probes both match the
    /// same key, the lower-indexed probe wins and the other is cleared."
    /// That tie-break only applies across genuinely distinct physical
    /// slots: a key's `D` salted probes can collide onto the same index
    /// (guaranteed for a small `cuckoo_nitem`, and possible at any `N`),
    /// and a slot revisited through a second probe must not be treated
    /// as its own duplicate, double-cleared, and double-decremented out
    /// of `len`. `expired_metric`, if given, is an extra counter (beyond
    /// the always-bumped `expired_unfetched`) incremented whenever a
    /// probe is lazily reclaimed as expired during this call — callers
    /// that track their own miss-due-to-expiry stat (`get`) pass one in;
    /// callers that don't care pass `None`.
    fn find_occupied(
        &mut self,
        key: &[u8],
        now: u64,
        metrics: &Metrics,
        expired_metric: Option<&str>,
    ) -> Option<usize> {
        let ps = probes(key, self.slots.len());
        let mut seen: [usize; DIMENSION] = [usize::MAX; DIMENSION];
        let mut seen_count = 0;
        let mut matches: [Option<usize>; DIMENSION] = [None; DIMENSION];
        let mut count = 0;

        for &idx in ps.iter() {
            if seen[..seen_count].contains(&idx) {
                continue;
            }
            seen[seen_count] = idx;
            seen_count += 1;

            let slot = &self.slots[idx];
            if slot.is_occupied() && slot.expired(now) {
                self.slots[idx].clear();
                self.len -= 1;
                metrics.incr("expired_unfetched", 1);
                if let Some(name) = expired_metric {
                    metrics.incr(name, 1);
                }
                continue;
            }
            if self.slots[idx].matches(key, now) {
                matches[count] = Some(idx);
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }
        let winner = matches[0].expect("count > 0 implies matches[0] is Some");
        for dup in matches.iter().take(count).skip(1).flatten() {
            self.slots[*dup].clear();
            self.len -= 1;
        }
        Some(winner)
    }

    /// spec §4.B `get`.
    pub fn get(&mut self, key: &[u8], now: u64, metrics: &Metrics) -> Option<ItemRef<'_>> {
        let found = self.find_occupied(key, now, metrics, Some("get_expired"));
        self.sync_curr_items(metrics);
        let idx = match found {
            Some(idx) => idx,
            None => {
                metrics.incr("get_misses", 1);
                return None;
            }
        };
        metrics.incr("get_hits", 1);
        let slot = &self.slots[idx];
        Some(ItemRef {
            key: slot.key(),
            value: slot.value(),
            flags: slot.flags(),
            cas: slot.cas(),
            expire_at: slot.expire_at(),
        })
    }

    /// spec §4.B `insert`. Never fails with a capacity error — the
    /// table "never reports full: it evicts probabilistically" — but
    /// does reject an item too large to ever fit in any slot.
    pub fn insert(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire_at: u64,
        now: u64,
        policy: EvictionPolicy,
        metrics: &Metrics,
    ) -> Result<u64, StorageError> {
        if key.len() + value.len() > self.item_size {
            return Err(StorageError::TooLarge);
        }
        let cas = self.mint_cas();
        let n = self.slots.len();
        let ps = probes(key, n);

        for &idx in ps.iter() {
            let occupied = self.slots[idx].is_occupied();
            let expired = occupied && self.slots[idx].expired(now);
            if !occupied || expired {
                if occupied {
                    metrics.incr("expired_unfetched", 1);
                } else {
                    self.len += 1;
                }
                self.slots[idx].init(key, value, flags, expire_at, cas);
                metrics.incr("total_items", 1);
                self.sync_curr_items(metrics);
                return Ok(cas);
            }
        }

        self.displace(key, value, flags, expire_at, cas, ps, now, policy, metrics);
        metrics.incr("total_items", 1);
        self.sync_curr_items(metrics);
        Ok(cas)
    }

    /// Cuckoo displacement chain (spec §4.B steps 2-5). `initial_probes`
    /// is the target key's own probe set, all of which were found
    /// occupied by the caller before this was invoked.
    ///
    /// Walks forward at most [`MAX_DISPLACEMENT_DEPTH`] steps, carrying
    /// the evicted item's bytes in scratch buffers — the one place in
    /// this crate that allocates on a per-operation basis, justified
    /// because displacement is already the bounded-but-costlier path
    /// insert falls back to only when every probe for a key is full.
    #[allow(clippy::too_many_arguments)]
    fn displace(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire_at: u64,
        cas: u64,
        initial_probes: [usize; DIMENSION],
        now: u64,
        policy: EvictionPolicy,
        metrics: &Metrics,
    ) {
        let n = self.slots.len();
        let mut cur_key = key.to_vec();
        let mut cur_value = value.to_vec();
        let mut cur_flags = flags;
        let mut cur_expire = expire_at;
        let mut cur_cas = cas;
        let mut exclude: Option<usize> = None;
        let mut ps = initial_probes;

        for _ in 0..MAX_DISPLACEMENT_DEPTH {
            let victim_idx = self.choose_victim(&ps, exclude, policy);

            let victim_occupied = self.slots[victim_idx].is_occupied();
            let victim_expired = victim_occupied && self.slots[victim_idx].expired(now);

            // Snapshot the victim's live contents (if any) before we
            // overwrite the slot with the item we're currently placing.
            let carry = if victim_occupied && !victim_expired {
                Some((
                    self.slots[victim_idx].key().to_vec(),
                    self.slots[victim_idx].value().to_vec(),
                    self.slots[victim_idx].flags(),
                    self.slots[victim_idx].expire_at(),
                    self.slots[victim_idx].cas(),
                ))
            } else {
                None
            };

            self.slots[victim_idx].init(&cur_key, &cur_value, cur_flags, cur_expire, cur_cas);

            match carry {
                None if victim_occupied => {
                    // Was occupied but expired: a reclaimed slot, not a net
                    // change in occupied-slot count.
                    metrics.incr("expired_unfetched", 1);
                    return;
                }
                None => {
                    // Was genuinely empty: chain terminates, one more slot in use.
                    self.len += 1;
                    return;
                }
                Some((k, v, f, e, c)) => {
                    cur_key = k;
                    cur_value = v;
                    cur_flags = f;
                    cur_expire = e;
                    cur_cas = c;
                    exclude = Some(victim_idx);
                    ps = probes(&cur_key, n);
                }
            }
        }

        // Depth bound reached: the last carried item never found a home.
        metrics.incr("evictions", 1);
    }

    /// Pick a displacement victim among `probes`, excluding the slot
    /// the current item was just displaced from (if any), per the
    /// configured [`EvictionPolicy`].
    fn choose_victim(
        &mut self,
        probes: &[usize; DIMENSION],
        exclude: Option<usize>,
        policy: EvictionPolicy,
    ) -> usize {
        let mut candidates: Vec<usize> = match exclude {
            Some(ex) => probes.iter().copied().filter(|&i| i != ex).collect(),
            None => probes.to_vec(),
        };
        if candidates.is_empty() {
            candidates = probes.to_vec();
        }
        match policy {
            EvictionPolicy::FirstProbe => candidates[0],
            EvictionPolicy::Random => {
                let pick = self.rng.gen_range(0..candidates.len());
                candidates[pick]
            }
        }
    }

    /// spec §4.B `update`. Never relocates the item.
    pub fn update(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire_at: u64,
        now: u64,
        metrics: &Metrics,
    ) -> Result<u64, StorageError> {
        let idx = self
            .find_occupied(key, now, metrics, None)
            .ok_or(StorageError::NotFound)?;
        if key.len() + value.len() > self.slots[idx].capacity() {
            self.sync_curr_items(metrics);
            return Err(StorageError::TooLarge);
        }
        let cas = self.mint_cas();
        self.slots[idx].overwrite_value(value, flags, expire_at, cas);
        self.sync_curr_items(metrics);
        Ok(cas)
    }

    /// spec §4.B `cas_update`.
    pub fn cas_update(
        &mut self,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expire_at: u64,
        expected_cas: u64,
        now: u64,
        metrics: &Metrics,
    ) -> Result<u64, StorageError> {
        let idx = match self.find_occupied(key, now, metrics, None) {
            Some(idx) => idx,
            None => {
                metrics.incr("cas_misses", 1);
                self.sync_curr_items(metrics);
                return Err(StorageError::NotFound);
            }
        };
        if self.slots[idx].cas() != expected_cas {
            metrics.incr("cas_badval", 1);
            self.sync_curr_items(metrics);
            return Err(StorageError::CasMismatch);
        }
        if key.len() + value.len() > self.slots[idx].capacity() {
            self.sync_curr_items(metrics);
            return Err(StorageError::TooLarge);
        }
        let cas = self.mint_cas();
        self.slots[idx].overwrite_value(value, flags, expire_at, cas);
        metrics.incr("cas_hits", 1);
        self.sync_curr_items(metrics);
        Ok(cas)
    }

    /// spec §4.B `delete`.
    pub fn delete(&mut self, key: &[u8], now: u64, metrics: &Metrics) -> bool {
        let found = self.find_occupied(key, now, metrics, None);
        let hit = match found {
            Some(idx) => {
                self.slots[idx].clear();
                self.len -= 1;
                metrics.incr("delete_hits", 1);
                true
            }
            None => {
                metrics.incr("delete_misses", 1);
                false
            }
        };
        self.sync_curr_items(metrics);
        hit
    }

    /// spec §4.B `arithmetic`, increment branch.
    pub fn increment(
        &mut self,
        key: &[u8],
        delta: u64,
        now: u64,
        metrics: &Metrics,
    ) -> Result<u64, StorageError> {
        self.arithmetic(key, delta, true, now, metrics)
    }

    /// spec §4.B `arithmetic`, decrement branch (saturates at zero).
    pub fn decrement(
        &mut self,
        key: &[u8],
        delta: u64,
        now: u64,
        metrics: &Metrics,
    ) -> Result<u64, StorageError> {
        self.arithmetic(key, delta, false, now, metrics)
    }

    fn arithmetic(
        &mut self,
        key: &[u8],
        delta: u64,
        increment: bool,
        now: u64,
        metrics: &Metrics,
    ) -> Result<u64, StorageError> {
        let idx = self
            .find_occupied(key, now, metrics, None)
            .ok_or(StorageError::NotFound)?;

        let current: u64 = std::str::from_utf8(self.slots[idx].value())
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(StorageError::NonNumeric)?;

        let new_value = if increment {
            current.checked_add(delta).ok_or(StorageError::Overflow)?
        } else {
            current.saturating_sub(delta)
        };

        let text = new_value.to_string();
        let key_len = self.slots[idx].key().len();
        if key_len + text.len() > self.slots[idx].capacity() {
            return Err(StorageError::Overflow);
        }

        let cas = self.mint_cas();
        let flags = self.slots[idx].flags();
        let expire_at = self.slots[idx].expire_at();
        self.slots[idx].overwrite_value(text.as_bytes(), flags, expire_at, cas);
        self.sync_curr_items(metrics);
        Ok(new_value)
    }

    /// spec §4.D `flush_all`: clear every slot.
    pub fn clear(&mut self, metrics: &Metrics) {
        for slot in self.slots.iter_mut() {
            slot.clear();
        }
        self.len = 0;
        metrics.set("curr_items", 0);
    }

    fn sync_curr_items(&self, metrics: &Metrics) {
        metrics.set("curr_items", self.len as u64);
    }
}
