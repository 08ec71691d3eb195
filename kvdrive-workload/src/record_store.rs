//! Working set of keys the engine reads, updates and deletes.
//!
//! A store runs in exactly one of two modes for its whole life:
//!
//! - **Dynamic**: records created during the run are tracked explicitly and
//!   drained by random removal.
//! - **Preloaded**: the keys already exist in the target store and are
//!   re-derived on demand from [`derive_key`], so nothing is held in memory.
//!
//! Expiration is modelled locally from the context the client returns, so the
//! engine never issues a read it expects to fail because of TTL.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rand::Rng;
use thiserror::Error;

use crate::key::derive_key;
use crate::sampler::sample_skewed;

/// Upper bound on deletes against a preloaded range.
///
/// Also the range size above which reads narrow to the most recent quarter.
pub const MAX_DELETES: u64 = 10_000;

/// Errors returned by record selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordStoreError {
    /// Nothing left to read.
    #[error("no record")]
    NoRecord,

    /// Nothing left to delete, or the preloaded delete range is exhausted.
    #[error("no unexpired record")]
    NoUnexpiredRecord,
}

/// Per-key metadata reported by the store on a successful write or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordContext {
    /// Creation time in seconds since the Unix epoch.
    pub creation_time: u64,
    /// Time to live in seconds.
    pub time_to_live: u32,
}

impl RecordContext {
    /// Creates a new context.
    #[must_use]
    pub const fn new(creation_time: u64, time_to_live: u32) -> Self {
        Self {
            creation_time,
            time_to_live,
        }
    }

    /// Returns the expiration time in seconds since the Unix epoch.
    #[must_use]
    pub const fn expires_at(&self) -> u64 {
        self.creation_time.saturating_add(self.time_to_live as u64)
    }

    /// Returns true if the key has expired at `now` (Unix seconds).
    #[must_use]
    pub const fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at() < now
    }
}

/// A key tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Opaque key bytes.
    pub key: Bytes,
    /// Store-reported context; `None` for derived keys.
    pub context: Option<RecordContext>,
}

impl Record {
    /// Creates a record with a store-reported context.
    #[must_use]
    pub const fn new(key: Bytes, context: RecordContext) -> Self {
        Self {
            key,
            context: Some(context),
        }
    }

    /// Creates a record without context. It never expires.
    #[must_use]
    pub const fn without_context(key: Bytes) -> Self {
        Self { key, context: None }
    }

    /// Returns true if the record has expired at `now` (Unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.context.is_some_and(|ctx| ctx.is_expired_at(now))
    }

    /// Returns true if the record has expired by the wall clock.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }
}

/// Returns the current wall-clock time in Unix seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Slot map with a free list and a dense index of live slots.
///
/// Uniform selection picks from the dense index; removal swaps the last live
/// entry into the hole, so nothing shifts and slot ids stay stable.
#[derive(Debug, Default)]
struct RecordArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: Vec<usize>,
}

#[derive(Debug)]
struct Slot {
    record: Option<Record>,
    /// Position of this slot in `live` while occupied.
    live_pos: usize,
}

impl RecordArena {
    fn len(&self) -> usize {
        self.live.len()
    }

    fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn insert(&mut self, record: Record) -> usize {
        let live_pos = self.live.len();
        let id = if let Some(id) = self.free.pop() {
            self.slots[id] = Slot {
                record: Some(record),
                live_pos,
            };
            id
        } else {
            self.slots.push(Slot {
                record: Some(record),
                live_pos,
            });
            self.slots.len() - 1
        };
        self.live.push(id);
        id
    }

    /// Picks a uniformly random occupied slot id.
    fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        if self.live.is_empty() {
            return None;
        }
        Some(self.live[rng.gen_range(0..self.live.len())])
    }

    fn get(&self, id: usize) -> Option<&Record> {
        self.slots.get(id).and_then(|slot| slot.record.as_ref())
    }

    fn remove(&mut self, id: usize) -> Option<Record> {
        let slot = self.slots.get_mut(id)?;
        let record = slot.record.take()?;
        let pos = slot.live_pos;

        self.live.swap_remove(pos);
        if let Some(&moved) = self.live.get(pos) {
            self.slots[moved].live_pos = pos;
        }
        self.free.push(id);
        Some(record)
    }
}

/// Cursor state over a preloaded key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadedRange {
    num_keys: u64,
    offset_get: u64,
    offset_del: u64,
    next_delete: u64,
    curr_get: u64,
    last_delete: bool,
}

impl PreloadedRange {
    fn delete_bound(&self) -> u64 {
        self.num_keys.min(MAX_DELETES)
    }

    fn is_delete_exhausted(&self) -> bool {
        self.next_delete >= self.delete_bound()
    }

    /// Size of the read window: the whole range, or its most recent quarter
    /// once the range reaches [`MAX_DELETES`].
    fn read_window(&self) -> u64 {
        if self.num_keys >= MAX_DELETES {
            self.num_keys >> 2
        } else {
            self.num_keys
        }
    }
}

/// Working set of keys, in dynamic or preloaded mode.
#[derive(Debug)]
pub enum RecordStore {
    /// Explicit records created during the run.
    Dynamic(DynamicRecords),
    /// Formula-derived keys over a fixed, pre-existing range.
    Preloaded(PreloadedRange),
}

/// Explicit working set used in dynamic mode.
#[derive(Debug, Default)]
pub struct DynamicRecords {
    arena: RecordArena,
}

impl RecordStore {
    /// Creates a store tracking records created during the run.
    #[must_use]
    pub fn dynamic() -> Self {
        Self::Dynamic(DynamicRecords::default())
    }

    /// Creates a store over an existing range of `num_keys` derived keys.
    ///
    /// Reads target `[offset_get, offset_get + num_keys)`, deletes target
    /// `[offset_del, offset_del + num_keys)`. A `num_keys` of zero yields a
    /// dynamic store.
    #[must_use]
    pub fn preloaded(num_keys: u64, offset_get: u64, offset_del: u64) -> Self {
        if num_keys == 0 {
            return Self::dynamic();
        }
        Self::Preloaded(PreloadedRange {
            num_keys,
            offset_get,
            offset_del,
            next_delete: 0,
            curr_get: 0,
            last_delete: false,
        })
    }

    /// Returns true in preloaded mode.
    #[must_use]
    pub const fn is_preloaded(&self) -> bool {
        matches!(self, Self::Preloaded(_))
    }

    /// Number of explicitly tracked records (always 0 in preloaded mode).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Dynamic(d) => d.arena.len(),
            Self::Preloaded(_) => 0,
        }
    }

    /// Returns true if nothing can be selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Dynamic(d) => d.arena.is_empty(),
            Self::Preloaded(_) => false,
        }
    }

    /// Returns true once the preloaded delete range is used up.
    #[must_use]
    pub fn is_delete_exhausted(&self) -> bool {
        match self {
            Self::Dynamic(_) => false,
            Self::Preloaded(p) => p.is_delete_exhausted(),
        }
    }

    /// Number of preloaded keys deleted so far.
    #[must_use]
    pub const fn next_delete(&self) -> u64 {
        match self {
            Self::Dynamic(_) => 0,
            Self::Preloaded(p) => p.next_delete,
        }
    }

    /// Index of the derived key most recently selected for a read.
    #[must_use]
    pub const fn curr_get(&self) -> u64 {
        match self {
            Self::Dynamic(_) => 0,
            Self::Preloaded(p) => p.curr_get,
        }
    }

    /// Start of the preloaded delete range.
    #[must_use]
    pub const fn offset_del(&self) -> u64 {
        match self {
            Self::Dynamic(_) => 0,
            Self::Preloaded(p) => p.offset_del,
        }
    }

    /// Returns true if the last `take` exhausted the delete range and the
    /// signal has not been consumed.
    #[must_use]
    pub const fn last_delete(&self) -> bool {
        match self {
            Self::Dynamic(_) => false,
            Self::Preloaded(p) => p.last_delete,
        }
    }

    /// Consumes the one-shot exhaustion signal.
    pub fn take_last_delete(&mut self) -> bool {
        match self {
            Self::Dynamic(_) => false,
            Self::Preloaded(p) => std::mem::take(&mut p.last_delete),
        }
    }

    /// Adds a created record. No-op in preloaded mode.
    pub fn add(&mut self, record: Record) {
        if let Self::Dynamic(d) = self {
            d.arena.insert(record);
        }
    }

    /// Selects a read target.
    ///
    /// In dynamic mode expired records drawn along the way are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::NoRecord`] once the store is empty.
    pub fn get<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Record, RecordStoreError> {
        let now = unix_now();
        self.get_at(rng, now)
    }

    /// [`get`](Self::get) against an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::NoRecord`] once the store is empty.
    #[allow(clippy::cast_possible_truncation)] // Read window is bounded by usize in practice.
    pub fn get_at<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: u64,
    ) -> Result<Record, RecordStoreError> {
        match self {
            Self::Preloaded(p) => {
                let window = p.read_window().max(1);
                let k = sample_skewed(rng, window as usize) as u64;
                p.curr_get = k;
                Ok(Record::without_context(derive_key(p.offset_get.wrapping_add(k))))
            }
            Self::Dynamic(d) => {
                while let Some(id) = d.arena.pick(rng) {
                    let live = d.arena.get(id).filter(|r| !r.is_expired_at(now)).cloned();
                    if let Some(record) = live {
                        return Ok(record);
                    }
                    d.arena.remove(id);
                }
                Err(RecordStoreError::NoRecord)
            }
        }
    }

    /// Selects and consumes a delete target.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::NoUnexpiredRecord`] when the store is empty
    /// or the preloaded delete range is exhausted.
    pub fn take<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<Record, RecordStoreError> {
        let now = unix_now();
        self.take_at(rng, now)
    }

    /// [`take`](Self::take) against an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns [`RecordStoreError::NoUnexpiredRecord`] when the store is empty
    /// or the preloaded delete range is exhausted.
    pub fn take_at<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: u64,
    ) -> Result<Record, RecordStoreError> {
        match self {
            Self::Preloaded(p) => {
                if p.is_delete_exhausted() {
                    return Err(RecordStoreError::NoUnexpiredRecord);
                }
                let index = p.offset_del.wrapping_add(p.next_delete);
                let record = Record::without_context(derive_key(index));
                p.next_delete += 1;
                if p.is_delete_exhausted() {
                    p.last_delete = true;
                }
                Ok(record)
            }
            Self::Dynamic(d) => {
                // Expired records are not returned as delete targets.
                while let Some(id) = d.arena.pick(rng) {
                    match d.arena.remove(id) {
                        Some(record) if !record.is_expired_at(now) => return Ok(record),
                        _ => {}
                    }
                }
                Err(RecordStoreError::NoUnexpiredRecord)
            }
        }
    }
}

impl fmt::Display for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dynamic(d) => write!(f, "dynamic records={}", d.arena.len()),
            Self::Preloaded(p) => write!(
                f,
                "num_keys={} curr_get={} next_delete={} offset_del={} offset_get={}",
                p.num_keys, p.curr_get, p.next_delete, p.offset_del, p.offset_get
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::key::new_dynamic_key;

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(3)
    }

    fn live_record(now: u64) -> Record {
        Record::new(new_dynamic_key(), RecordContext::new(now, 3_600))
    }

    fn expired_record(now: u64) -> Record {
        Record::new(new_dynamic_key(), RecordContext::new(now - 100, 10))
    }

    #[test]
    fn test_context_expiry_boundary() {
        let ctx = RecordContext::new(1_000, 60);
        assert!(!ctx.is_expired_at(1_060));
        assert!(ctx.is_expired_at(1_061));
        assert!(!Record::without_context(derive_key(1)).is_expired_at(u64::MAX));
    }

    #[test]
    fn test_preloaded_take_exhausts_at_num_keys() {
        let mut store = RecordStore::preloaded(5, 0, 100);
        let mut rng = rng();

        for i in 0..5 {
            assert!(!store.is_delete_exhausted());
            let record = store.take(&mut rng).unwrap();
            assert_eq!(record.key, derive_key(100 + i));
            assert!(record.context.is_none());
            assert_eq!(store.last_delete(), i == 4);
        }

        assert!(store.is_delete_exhausted());
        assert_eq!(store.next_delete(), 5);
        assert_eq!(
            store.take(&mut rng),
            Err(RecordStoreError::NoUnexpiredRecord)
        );
        assert_eq!(store.next_delete(), 5);

        assert!(store.take_last_delete());
        assert!(!store.take_last_delete());
    }

    #[test]
    fn test_preloaded_take_bounded_by_max_deletes() {
        let mut store = RecordStore::preloaded(MAX_DELETES * 3, 0, 0);
        let mut rng = rng();

        let mut taken = 0;
        while store.take(&mut rng).is_ok() {
            taken += 1;
        }
        assert_eq!(taken, MAX_DELETES);
        assert!(store.is_delete_exhausted());
        assert!(store.last_delete());
    }

    #[test]
    fn test_preloaded_indices_wrap_at_u64_max() {
        let mut store = RecordStore::preloaded(4, u64::MAX - 1, u64::MAX - 1);
        let mut rng = rng();

        let taken: Vec<Bytes> = (0..4).map(|_| store.take(&mut rng).unwrap().key).collect();
        let expected: Vec<Bytes> = [u64::MAX - 1, u64::MAX, 0, 1]
            .into_iter()
            .map(derive_key)
            .collect();
        assert_eq!(taken, expected);
        assert!(store.is_delete_exhausted());

        for _ in 0..100 {
            store.get(&mut rng).unwrap();
        }
    }

    #[test]
    fn test_preloaded_get_is_repeatable_and_in_window() {
        let mut store = RecordStore::preloaded(100, 1_000, 0);
        let mut rng = rng();
        let valid: HashSet<Bytes> = (1_000..1_100).map(derive_key).collect();

        for _ in 0..1_000 {
            let record = store.get(&mut rng).unwrap();
            assert!(valid.contains(&record.key));
            assert!(store.curr_get() < 100);
        }
        assert_eq!(store.next_delete(), 0);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_preloaded_get_narrows_large_range() {
        let num_keys = MAX_DELETES * 4;
        let mut store = RecordStore::preloaded(num_keys, 0, 0);
        let mut rng = rng();

        for _ in 0..2_000 {
            store.get(&mut rng).unwrap();
            assert!(store.curr_get() < num_keys / 4);
        }
    }

    #[test]
    fn test_add_is_noop_when_preloaded() {
        let mut store = RecordStore::preloaded(10, 0, 0);
        let before = store.to_string();
        store.add(live_record(unix_now()));
        assert_eq!(store.len(), 0);
        assert_eq!(store.to_string(), before);
    }

    #[test]
    fn test_zero_keys_is_dynamic() {
        let store = RecordStore::preloaded(0, 5, 5);
        assert!(!store.is_preloaded());
        assert!(store.is_empty());
    }

    #[test]
    fn test_dynamic_single_live_record() {
        let now = unix_now();
        let mut store = RecordStore::dynamic();
        let record = live_record(now);
        store.add(record.clone());
        let mut rng = rng();

        assert_eq!(store.get_at(&mut rng, now).unwrap(), record);
        assert_eq!(store.len(), 1);
        assert_eq!(store.take_at(&mut rng, now).unwrap(), record);
        assert!(store.is_empty());
        assert_eq!(
            store.get_at(&mut rng, now),
            Err(RecordStoreError::NoRecord)
        );
    }

    #[test]
    fn test_dynamic_expired_record_dropped_on_get() {
        let now = unix_now();
        let mut store = RecordStore::dynamic();
        store.add(expired_record(now));
        let mut rng = rng();

        assert_eq!(
            store.get_at(&mut rng, now),
            Err(RecordStoreError::NoRecord)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_dynamic_expired_record_not_a_delete_target() {
        let now = unix_now();
        let mut store = RecordStore::dynamic();
        store.add(expired_record(now));
        store.add(expired_record(now));
        let mut rng = rng();

        assert_eq!(
            store.take_at(&mut rng, now),
            Err(RecordStoreError::NoUnexpiredRecord)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_dynamic_get_skips_expired_and_returns_live() {
        let now = unix_now();
        let mut store = RecordStore::dynamic();
        let live = live_record(now);
        for _ in 0..20 {
            store.add(expired_record(now));
        }
        store.add(live.clone());
        let mut rng = rng();

        assert_eq!(store.get_at(&mut rng, now).unwrap(), live);
        // Only expired records that were drawn are removed.
        assert!(store.len() >= 1);
        assert_eq!(store.take_at(&mut rng, now).unwrap(), live);
        assert!(store.is_empty());
    }

    #[test]
    fn test_dynamic_take_drains_every_record_once() {
        let now = unix_now();
        let mut store = RecordStore::dynamic();
        let mut keys = HashSet::new();
        for _ in 0..500 {
            let record = live_record(now);
            keys.insert(record.key.clone());
            store.add(record);
        }
        let mut rng = rng();

        let mut seen = HashSet::new();
        while let Ok(record) = store.take_at(&mut rng, now) {
            assert!(seen.insert(record.key));
        }
        assert_eq!(seen, keys);
        assert!(!store.is_delete_exhausted());
    }

    #[test]
    fn test_arena_reuses_freed_slots() {
        let now = unix_now();
        let mut arena = RecordArena::default();
        let a = arena.insert(live_record(now));
        let b = arena.insert(live_record(now));
        let c = arena.insert(live_record(now));

        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert_eq!(arena.len(), 2);
        assert!(arena.get(b).is_some());
        assert!(arena.get(c).is_some());

        let d = arena.insert(live_record(now));
        assert_eq!(d, a);
        assert_eq!(arena.len(), 3);

        assert!(arena.remove(c).is_some());
        assert!(arena.remove(b).is_some());
        assert!(arena.remove(d).is_some());
        assert!(arena.is_empty());
    }
}
