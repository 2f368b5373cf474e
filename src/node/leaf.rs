//! Leaf nodes.
//!
//! Writers never edit a record in place. Every write appends a record through the protocol
//! below and then publishes it with a single multi-word CAS:
//!
//! 1. *reserve*: `{status: count+1, block+len; slot: vacant -> reserved}`,
//! 2. *write* the value and key bytes into the claimed region,
//! 3. *wait* for lower reservations that may carry the same key,
//! 4. *decide* against the currently visible record for the key, and either publish
//!    (`{status; slot: reserved -> visible}`, plus `old slot: visible -> tombstoned` for
//!    replacements) or abandon the reservation (`reserved -> tombstoned`).
//!
//! Every writer waits for lower same-length reservations before deciding, so among writers of
//! one key the lowest reservation decides first. A reservation that stays pending for too long
//! is abandoned by the writer waiting on it; its owner notices at publish time and starts over
//! with a fresh reservation.

use crossbeam_ebr::Guard;
use crossbeam_utils::Backoff;
use mwcas::MwCas;

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use super::meta::SlotMeta;
use super::status::MAX_RECORDS;
use super::{record_len, validate_key, Node};
use crate::error::{NodeError, Result};


/// Snoozes spent on a lower reservation before abandoning it.
const RESERVATION_PATIENCE: usize = 512;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WriteMode {
    Insert,
    Update,
    Upsert,
}

#[derive(Clone, Copy)]
struct Reservation {
    index: usize,
    meta: SlotMeta,
}

pub struct LeafNode {
    pub(super) base: Node,
}

impl LeafNode {
    /// Allocates an empty leaf of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Box<Self>> {
        Ok(Box::new(Self {
            base: Node::new(capacity)?,
        }))
    }

    /// Builds a consolidated leaf out of `records`, which must be sorted by key without
    /// duplicates.
    pub fn from_records<'a, I>(capacity: usize, records: I) -> Result<Box<Self>>
    where
        I: IntoIterator<Item = (&'a [u8], u64)>,
    {
        Ok(Box::new(Self {
            base: Node::build(capacity, records)?,
        }))
    }

    pub fn read(&self, key: &[u8], guard: &Guard) -> Option<u64> {
        self.find_visible(key, guard)
            .map(|(_, meta)| self.base.value(meta))
    }

    /// Fails with `KeyExists` if a visible record carries `key`.
    pub fn insert(&self, key: &[u8], value: u64, guard: &Guard) -> Result<()> {
        self.write(key, value, WriteMode::Insert, guard)
    }

    /// Replaces the value of an existing key. Fails with `NotFound` otherwise.
    pub fn update(&self, key: &[u8], value: u64, guard: &Guard) -> Result<()> {
        self.write(key, value, WriteMode::Update, guard)
    }

    /// Inserts or replaces.
    pub fn upsert(&self, key: &[u8], value: u64, guard: &Guard) -> Result<()> {
        self.write(key, value, WriteMode::Upsert, guard)
    }

    pub fn delete(&self, key: &[u8], guard: &Guard) -> Result<()> {
        validate_key(key)?;
        loop {
            let (index, meta) = self.find_visible(key, guard).ok_or(NodeError::NotFound)?;
            let status = self.base.status(guard);
            if status.is_frozen() {
                return Err(NodeError::Frozen);
            }

            let mut op = MwCas::new();
            op.compare_exchange_u64(
                self.base.status_word(),
                status.into_raw(),
                status.delete(meta.total_len()).into_raw(),
            );
            op.compare_exchange_u64(
                self.base.slot_word(index),
                meta.into_raw(),
                meta.tombstone().into_raw(),
            );
            if op.exec(guard) {
                return Ok(());
            }
        }
    }

    fn write(&self, key: &[u8], value: u64, mode: WriteMode, guard: &Guard) -> Result<()> {
        validate_key(key)?;
        match (mode, self.find_visible(key, guard)) {
            (WriteMode::Insert, Some(_)) => return Err(NodeError::KeyExists),
            (WriteMode::Update, None) => return Err(NodeError::NotFound),
            _ => {}
        }

        'reserve: loop {
            let slot = self.reserve(key, value, guard)?;
            loop {
                self.await_earlier(key.len(), slot.index, guard)?;
                let current = self.find_visible(key, guard);
                let status = self.base.status(guard);
                if status.is_frozen() {
                    return Err(NodeError::Frozen);
                }

                let mut op = MwCas::new();
                op.compare_exchange_u64(
                    self.base.slot_word(slot.index),
                    slot.meta.into_raw(),
                    slot.meta.finalize().into_raw(),
                );
                match (mode, current) {
                    (WriteMode::Insert, Some(_)) => {
                        self.abandon(slot.index, slot.meta, guard);
                        return Err(NodeError::KeyExists);
                    }
                    (WriteMode::Update, None) => {
                        self.abandon(slot.index, slot.meta, guard);
                        return Err(NodeError::NotFound);
                    }
                    (_, None) => {
                        op.compare_exchange_u64(
                            self.base.status_word(),
                            status.into_raw(),
                            status.into_raw(),
                        );
                    }
                    (_, Some((index, old))) => {
                        op.compare_exchange_u64(
                            self.base.status_word(),
                            status.into_raw(),
                            status.delete(old.total_len()).into_raw(),
                        );
                        op.compare_exchange_u64(
                            self.base.slot_word(index),
                            old.into_raw(),
                            old.tombstone().into_raw(),
                        );
                    }
                }
                if op.exec(guard) {
                    return Ok(());
                }
                if self.base.slot(slot.index, guard) != slot.meta {
                    tracing::trace!(index = slot.index, "reservation was abandoned, retrying");
                    continue 'reserve;
                }
            }
        }
    }

    /// Claims a slot and arena space for `key`, then writes the record.
    fn reserve(&self, key: &[u8], value: u64, guard: &Guard) -> Result<Reservation> {
        let len = record_len(key.len());
        loop {
            let status = self.base.status(guard);
            if status.is_frozen() {
                return Err(NodeError::Frozen);
            }
            let index = status.record_count();
            if index >= MAX_RECORDS || !self.base.fits(index + 1, status.block_size() + len) {
                return Err(NodeError::NodeFull);
            }

            let offset = self.base.data_size() - status.block_size() - len;
            let meta = SlotMeta::reserved(offset, key.len(), len);
            let mut op = MwCas::new();
            op.compare_exchange_u64(
                self.base.status_word(),
                status.into_raw(),
                status.reserve(len).into_raw(),
            );
            op.compare_exchange_u64(
                self.base.slot_word(index),
                SlotMeta::VACANT.into_raw(),
                meta.into_raw(),
            );
            if op.exec(guard) {
                // SAFETY: the region was claimed by the reservation above and nobody reads it
                // before the slot leaves the reserved state.
                unsafe { self.base.write_record(offset, key, value) };
                return Ok(Reservation { index, meta });
            }
        }
    }

    /// Waits until no slot below `below` is a pending reservation for a key of `key_len` bytes.
    fn await_earlier(&self, key_len: usize, below: usize, guard: &Guard) -> Result<()> {
        for index in self.base.sorted_count()..below {
            let backoff = Backoff::new();
            let mut waited = 0;
            loop {
                let meta = self.base.slot(index, guard);
                if !meta.is_reserved() || meta.key_len() != key_len {
                    break;
                }
                if waited < RESERVATION_PATIENCE {
                    backoff.snooze();
                    waited += 1;
                    continue;
                }
                if !self.abandon(index, meta, guard) && self.base.status(guard).is_frozen() {
                    return Err(NodeError::Frozen);
                }
            }
        }
        Ok(())
    }

    /// Tombstones the reservation `meta` at `index` and accounts its bytes as wasted.
    ///
    /// Returns `false` if the slot no longer holds `meta` or the node is frozen.
    fn abandon(&self, index: usize, meta: SlotMeta, guard: &Guard) -> bool {
        loop {
            let status = self.base.status(guard);
            if status.is_frozen() {
                return false;
            }
            let mut op = MwCas::new();
            op.compare_exchange_u64(
                self.base.status_word(),
                status.into_raw(),
                status.delete(meta.total_len()).into_raw(),
            );
            op.compare_exchange_u64(
                self.base.slot_word(index),
                meta.into_raw(),
                meta.tombstone().into_raw(),
            );
            if op.exec(guard) {
                tracing::trace!(index, "abandoned reservation");
                return true;
            }
            if self.base.slot(index, guard) != meta {
                return false;
            }
        }
    }

    /// Sorted prefix first, then the unsorted suffix oldest first, keeping the last visible
    /// match.
    ///
    /// A replacement always lands above the record it tombstones, so a forward scan that finds
    /// the old record dead reaches the new one further up. The scan extends while the record
    /// count grows, since that record may be newer than the count read at the start.
    fn find_visible(&self, key: &[u8], guard: &Guard) -> Option<(usize, SlotMeta)> {
        if let Some((index, meta)) = self.base.search_sorted(key, guard) {
            if meta.is_visible() {
                return Some((index, meta));
            }
        }
        let mut found = None;
        let mut scanned = self.base.sorted_count();
        loop {
            let count = self.base.status(guard).record_count();
            if scanned >= count {
                return found;
            }
            for index in scanned..count {
                let meta = self.base.slot(index, guard);
                if meta.is_visible() && self.base.key(meta) == key {
                    found = Some((index, meta));
                }
            }
            scanned = count;
        }
    }

    /// Claims the node for a structure modification.
    ///
    /// Writers observe the frozen bit and fail with `Frozen`. Fails with `Frozen` itself if
    /// another modification claimed the node first.
    pub fn freeze(&self, guard: &Guard) -> Result<()> {
        self.base.freeze(guard)
    }

    /// Freezes the node and builds a compacted copy of the same capacity holding the live
    /// records in key order.
    ///
    /// This image is left frozen; the caller publishes the copy and retires this image.
    pub fn consolidate(&self, guard: &Guard) -> Result<Box<LeafNode>> {
        self.freeze(guard)?;
        let records = self.records(guard);
        let node = Self::from_records(
            self.capacity(),
            records.iter().map(|(k, v)| (k.as_slice(), *v)),
        )
        .map_err(|e| {
            self.base.unfreeze(guard);
            e
        })?;
        tracing::debug!(
            live = records.len(),
            reclaimed = self.wasted_bytes(guard),
            "consolidated leaf"
        );
        Ok(node)
    }

    /// Live records in key order, the latest arrival winning for a key.
    pub fn records(&self, guard: &Guard) -> Vec<(Vec<u8>, u64)> {
        let count = self.base.status(guard).record_count();
        let mut live = BTreeMap::new();
        for index in 0..count {
            let meta = self.base.slot(index, guard);
            if meta.is_visible() {
                live.insert(self.base.key(meta).to_vec(), self.base.value(meta));
            }
        }
        live.into_iter().collect()
    }

    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    /// Slots ever allocated, pending and dead ones included.
    pub fn record_count(&self, guard: &Guard) -> usize {
        self.base.status(guard).record_count()
    }

    pub fn sorted_count(&self) -> usize {
        self.base.sorted_count()
    }

    /// Visible slots. Exact on a quiescent or frozen node; while an update is in flight a key
    /// can be counted twice or not at all.
    pub fn live_count(&self, guard: &Guard) -> usize {
        let count = self.base.status(guard).record_count();
        (0..count)
            .filter(|&index| self.base.slot(index, guard).is_visible())
            .count()
    }

    pub fn free_space(&self, guard: &Guard) -> usize {
        self.base.free_space(self.base.status(guard))
    }

    pub fn wasted_bytes(&self, guard: &Guard) -> usize {
        self.base.status(guard).delete_size()
    }

    pub fn is_frozen(&self, guard: &Guard) -> bool {
        self.base.status(guard).is_frozen()
    }

    /// Human readable listing of the status word and every slot.
    pub fn dump(&self, guard: &Guard) -> String {
        let mut out = String::new();
        self.dump_to(&mut out, guard)
            .map(|_| out)
            .unwrap_or_default()
    }

    fn dump_to(&self, out: &mut String, guard: &Guard) -> fmt::Result {
        let status = self.base.status(guard);
        writeln!(
            out,
            "leaf capacity={} sorted={} {:?}",
            self.capacity(),
            self.sorted_count(),
            status
        )?;
        for index in 0..status.record_count() {
            let meta = self.base.slot(index, guard);
            write!(out, "  [{:>4}] {:<10?}", index, meta.visibility())?;
            // Bytes of reserved and abandoned slots may still be under construction.
            if meta.is_visible() {
                write!(
                    out,
                    " {:?} -> {}",
                    String::from_utf8_lossy(self.base.key(meta)),
                    self.base.value(meta)
                )?;
            }
            writeln!(out, " @{}+{}", meta.offset(), meta.total_len())?;
        }
        Ok(())
    }
}

impl fmt::Debug for LeafNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = &crossbeam_ebr::pin();
        f.debug_struct("LeafNode")
            .field("capacity", &self.capacity())
            .field("sorted", &self.sorted_count())
            .field("status", &self.base.status(guard))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::meta::Visibility;
    use crossbeam_ebr::pin;
    use crossbeam_utils::thread;

    #[test]
    fn insert_then_read() {
        let leaf = LeafNode::new(256).unwrap();
        let guard = &pin();
        leaf.insert(b"b", 2, guard).unwrap();
        leaf.insert(b"a", 1, guard).unwrap();
        assert_eq!(leaf.read(b"a", guard), Some(1));
        assert_eq!(leaf.read(b"b", guard), Some(2));
        assert_eq!(leaf.read(b"c", guard), None);
        assert_eq!(leaf.insert(b"a", 3, guard), Err(NodeError::KeyExists));
        assert_eq!(leaf.record_count(guard), 2);
    }

    #[test]
    fn empty_key_is_a_key() {
        let leaf = LeafNode::new(128).unwrap();
        let guard = &pin();
        leaf.insert(b"", 9, guard).unwrap();
        assert_eq!(leaf.read(b"", guard), Some(9));
        assert_eq!(leaf.insert(b"", 1, guard), Err(NodeError::KeyExists));
    }

    #[test]
    fn update_tombstones_the_old_record() {
        let leaf = LeafNode::new(256).unwrap();
        let guard = &pin();
        leaf.insert(b"k", 1, guard).unwrap();
        leaf.update(b"k", 2, guard).unwrap();
        assert_eq!(leaf.read(b"k", guard), Some(2));
        assert_eq!(leaf.live_count(guard), 1);
        assert_eq!(leaf.record_count(guard), 2);
        assert_eq!(leaf.wasted_bytes(guard), record_len(1));
        assert_eq!(leaf.update(b"x", 2, guard), Err(NodeError::NotFound));
        // A failed update never reserves.
        assert_eq!(leaf.record_count(guard), 2);
    }

    #[test]
    fn node_full_leaves_no_trace() {
        let leaf = LeafNode::new(64).unwrap();
        let guard = &pin();
        // 48 bytes of data block: two 16-byte records and their two slots fill 48 bytes.
        leaf.insert(b"a", 1, guard).unwrap();
        leaf.insert(b"b", 2, guard).unwrap();
        assert_eq!(leaf.free_space(guard), 0);
        assert_eq!(leaf.insert(b"c", 3, guard), Err(NodeError::NodeFull));
        assert_eq!(leaf.upsert(b"a", 3, guard), Err(NodeError::NodeFull));
        assert_eq!(leaf.record_count(guard), 2);
        assert_eq!(leaf.read(b"a", guard), Some(1));
    }

    #[test]
    fn stalled_reservation_is_abandoned() {
        let leaf = LeafNode::new(256).unwrap();
        let guard = &pin();
        let stalled = leaf.reserve(b"k", 1, guard).unwrap();

        leaf.insert(b"k", 2, guard).unwrap();
        assert_eq!(leaf.read(b"k", guard), Some(2));
        assert_eq!(
            leaf.base.slot(stalled.index, guard).visibility(),
            Visibility::Tombstoned
        );
        assert_eq!(leaf.wasted_bytes(guard), record_len(1));
    }

    #[test]
    fn reservation_with_other_key_length_is_not_awaited() {
        let leaf = LeafNode::new(256).unwrap();
        let guard = &pin();
        let pending = leaf.reserve(b"long key", 1, guard).unwrap();
        leaf.insert(b"k", 2, guard).unwrap();
        assert!(leaf.base.slot(pending.index, guard).is_reserved());
        assert_eq!(leaf.wasted_bytes(guard), 0);
    }

    #[test]
    fn frozen_leaf_rejects_writes() {
        let leaf = LeafNode::new(256).unwrap();
        let guard = &pin();
        leaf.insert(b"a", 1, guard).unwrap();
        leaf.freeze(guard).unwrap();
        assert_eq!(leaf.insert(b"b", 2, guard), Err(NodeError::Frozen));
        assert_eq!(leaf.delete(b"a", guard), Err(NodeError::Frozen));
        assert_eq!(leaf.upsert(b"a", 2, guard), Err(NodeError::Frozen));
        assert_eq!(leaf.consolidate(guard).err(), Some(NodeError::Frozen));
        assert_eq!(leaf.read(b"a", guard), Some(1));
    }

    #[test]
    fn consolidate_sorts_and_compacts() {
        let leaf = LeafNode::new(512).unwrap();
        let guard = &pin();
        for (i, key) in ["d", "b", "a", "c"].iter().enumerate() {
            leaf.insert(key.as_bytes(), i as u64, guard).unwrap();
        }
        leaf.delete(b"b", guard).unwrap();
        leaf.upsert(b"c", 30, guard).unwrap();

        let fresh = leaf.consolidate(guard).unwrap();
        assert!(leaf.is_frozen(guard));
        assert!(!fresh.is_frozen(guard));
        assert_eq!(fresh.sorted_count(), 3);
        assert_eq!(fresh.record_count(guard), 3);
        assert_eq!(fresh.wasted_bytes(guard), 0);
        assert_eq!(
            fresh.records(guard),
            vec![(b"a".to_vec(), 2), (b"c".to_vec(), 30), (b"d".to_vec(), 0)]
        );
    }

    #[test]
    fn dump_lists_every_slot() {
        let leaf = LeafNode::new(256).unwrap();
        let guard = &pin();
        leaf.insert(b"x", 1, guard).unwrap();
        leaf.insert(b"y", 2, guard).unwrap();
        leaf.delete(b"x", guard).unwrap();
        leaf.reserve(b"z", 3, guard).unwrap();

        let dump = leaf.dump(guard);
        assert_eq!(dump.lines().count(), 4);
        assert!(dump.contains("Tombstoned"));
        assert!(dump.contains("Reserved"));
        assert!(dump.contains("\"y\" -> 2"));
        // Only visible slots print their record bytes.
        assert!(!dump.contains("\"x\""));
        assert!(!dump.contains("\"z\""));
    }

    #[test]
    fn racing_writers_of_one_key() {
        const THREADS: usize = 8;
        let leaf = LeafNode::new(8192).unwrap();
        let leaf = &*leaf;

        let wins: usize = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    s.spawn(move |_| {
                        let guard = &pin();
                        leaf.insert(b"same", t as u64, guard).is_ok() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        })
        .unwrap();

        assert_eq!(wins, 1);
        assert_eq!(leaf.live_count(&pin()), 1);
    }
}
