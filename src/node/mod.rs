//! Node images.
//!
//! A node is a fixed-size region made of a 16-byte header (status word, capacity and sorted
//! count) followed by a data block. The slot table grows from the low end of the data block,
//! one 8-byte [`SlotMeta`] per record ever written; the record arena grows down from the high
//! end. A record is laid out as `[value: u64][key bytes]` padded to 8 bytes:
//!
//! ```text
//! | header | slot 0 | slot 1 | ... | slot n-1 | free space | record n-1 | ... | record 0 |
//! ```
//!
//! Space is accounted against that single block. Slot words live in their own table of
//! [`U64Pointer`]s, since they are targets of [`MwCas`], and record offsets index the arena.
//!
//! Slot words and the status word change only through [`MwCas`]. Record bytes are written once
//! by the thread that reserved them, before the slot becomes visible, and never change
//! afterwards.

pub mod internal;
pub mod leaf;
pub mod meta;
pub mod split;
pub mod stack;
pub mod status;

use crossbeam_ebr::{unprotected, Guard};
use mwcas::{MwCas, U64Pointer};

use std::cmp::Ordering;
use std::ptr;
use std::sync::atomic::AtomicU64;

use crate::error::{NodeError, Result};

use self::meta::SlotMeta;
use self::status::{StatusWord, MAX_RECORDS};

pub const HEADER_SIZE: usize = 16;
pub const SLOT_SIZE: usize = 8;
pub const VALUE_SIZE: usize = 8;
pub const MIN_NODE_SIZE: usize = 64;
/// Bounded by the 22-bit offset and size fields.
pub const MAX_NODE_SIZE: usize = 1 << 22;
pub const MAX_KEY_LEN: usize = u16::MAX as usize;

/// Arena bytes taken by a record with a key of `key_len` bytes.
#[inline]
pub const fn record_len(key_len: usize) -> usize {
    (VALUE_SIZE + key_len + 7) & !7
}

pub fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity % 8 != 0 || !(MIN_NODE_SIZE..=MAX_NODE_SIZE).contains(&capacity) {
        return Err(NodeError::InvalidCapacity(capacity));
    }
    Ok(())
}

pub(crate) fn validate_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(NodeError::KeyTooLarge(key.len()));
    }
    Ok(())
}

/// Opaque reference to a node image: its address.
///
/// Node constructors return `Box`ed images, so the address survives moving the box into
/// whatever structure publishes it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeRef(u64);

impl NodeRef {
    pub fn of<T>(node: &T) -> Self {
        Self(node as *const T as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u64 {
        self.0
    }

    /// # Safety
    ///
    /// The reference must have been created from a live `T` that is published or retired under
    /// the epoch scheme, and `guard` must have been active since it was read from the tree.
    pub unsafe fn deref<'g, T>(self, _guard: &'g Guard) -> &'g T {
        &*(self.0 as *const T)
    }
}

/// State shared by leaf and internal nodes.
pub(crate) struct Node {
    status: U64Pointer,
    capacity: u32,
    sorted_count: u32,
    slots: Box<[U64Pointer]>,
    arena: Box<[AtomicU64]>,
}

impl Node {
    pub(crate) fn new(capacity: usize) -> Result<Self> {
        validate_capacity(capacity)?;
        let words = (capacity - HEADER_SIZE) / SLOT_SIZE;
        Ok(Self {
            status: U64Pointer::new(StatusWord::default().into_raw()),
            capacity: capacity as u32,
            sorted_count: 0,
            slots: (0..words).map(|_| U64Pointer::new(0)).collect(),
            arena: (0..words).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    /// Builds a private image holding `records` as visible, sorted slots.
    ///
    /// Fails with `OutOfOrder` unless keys are strictly increasing.
    pub(crate) fn build<'a, I>(capacity: usize, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a [u8], u64)>,
    {
        let mut node = Self::new(capacity)?;
        let mut metas = Vec::new();
        let mut block = 0;
        let mut prev: Option<&[u8]> = None;
        for (key, value) in records {
            validate_key(key)?;
            if prev.map_or(false, |p| p >= key) {
                return Err(NodeError::OutOfOrder);
            }
            let len = record_len(key.len());
            if metas.len() >= MAX_RECORDS || !node.fits(metas.len() + 1, block + len) {
                return Err(NodeError::NodeFull);
            }
            block += len;
            let offset = node.data_size() - block;
            // SAFETY: the image is not shared yet and the region was just accounted.
            unsafe { node.write_record(offset, key, value) };
            metas.push(SlotMeta::visible(offset, key.len(), len).into_raw());
            prev = Some(key);
        }
        let count = metas.len();
        metas.resize(node.slots.len(), SlotMeta::VACANT.into_raw());
        node.slots = metas.into_iter().map(U64Pointer::new).collect();
        node.sorted_count = count as u32;
        node.status = U64Pointer::new(StatusWord::new(count, block, 0).into_raw());
        Ok(node)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub(crate) fn sorted_count(&self) -> usize {
        self.sorted_count as usize
    }

    #[inline]
    pub(crate) fn data_size(&self) -> usize {
        self.arena.len() * SLOT_SIZE
    }

    #[inline]
    pub(crate) fn fits(&self, record_count: usize, block_size: usize) -> bool {
        record_count * SLOT_SIZE + block_size <= self.data_size()
    }

    pub(crate) fn free_space(&self, status: StatusWord) -> usize {
        self.data_size() - status.record_count() * SLOT_SIZE - status.block_size()
    }

    #[inline]
    pub(crate) fn status_word(&self) -> &U64Pointer {
        &self.status
    }

    #[inline]
    pub(crate) fn status(&self, guard: &Guard) -> StatusWord {
        StatusWord::from_raw(self.status.read(guard))
    }

    #[inline]
    pub(crate) fn slot_word(&self, index: usize) -> &U64Pointer {
        &self.slots[index]
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize, guard: &Guard) -> SlotMeta {
        SlotMeta::from_raw(self.slots[index].read(guard))
    }

    /// Slot of an image whose slot words are never the target of a multi-word operation.
    #[inline]
    pub(crate) fn fixed_slot(&self, index: usize) -> SlotMeta {
        // SAFETY: such a word never holds a descriptor, so reading it dereferences nothing.
        SlotMeta::from_raw(self.slots[index].read(unsafe { unprotected() }))
    }

    #[inline]
    fn arena_ptr(&self) -> *mut u8 {
        self.arena.as_ptr() as *mut u8
    }

    /// # Safety
    ///
    /// `[offset, offset + record_len(key.len()))` must be a region this thread reserved and that
    /// no other thread reads until its slot is published.
    pub(crate) unsafe fn write_record(&self, offset: usize, key: &[u8], value: u64) {
        debug_assert_eq!(offset % 8, 0);
        debug_assert!(offset + record_len(key.len()) <= self.data_size());
        let record = self.arena_ptr().add(offset);
        ptr::write(record as *mut u64, value);
        ptr::copy_nonoverlapping(key.as_ptr(), record.add(VALUE_SIZE), key.len());
    }

    /// Key bytes of a slot that is or was visible, or of a reservation owned by the caller.
    #[inline]
    pub(crate) fn key(&self, meta: SlotMeta) -> &[u8] {
        debug_assert!(meta.offset() + VALUE_SIZE + meta.key_len() <= self.data_size());
        // SAFETY: the region was written before the slot was published and never changes again.
        unsafe {
            std::slice::from_raw_parts(
                self.arena_ptr().add(meta.offset() + VALUE_SIZE),
                meta.key_len(),
            )
        }
    }

    #[inline]
    pub(crate) fn value(&self, meta: SlotMeta) -> u64 {
        // SAFETY: as in `key`; offsets are 8-byte aligned.
        unsafe { ptr::read(self.arena_ptr().add(meta.offset()) as *const u64) }
    }

    /// Binary search over the sorted prefix. Prefix slots are always settled.
    pub(crate) fn search_sorted(&self, key: &[u8], guard: &Guard) -> Option<(usize, SlotMeta)> {
        let (mut lo, mut hi) = (0, self.sorted_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let meta = self.slot(mid, guard);
            match self.key(meta).cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some((mid, meta)),
            }
        }
        None
    }

    /// Sets the frozen bit. Fails with `Frozen` if it is already set.
    pub(crate) fn freeze(&self, guard: &Guard) -> Result<()> {
        loop {
            let status = self.status(guard);
            if status.is_frozen() {
                return Err(NodeError::Frozen);
            }
            let mut op = MwCas::new();
            op.compare_exchange_u64(&self.status, status.into_raw(), status.freeze().into_raw());
            if op.exec(guard) {
                return Ok(());
            }
        }
    }

    /// Clears a frozen bit set by this thread's own `freeze`.
    pub(crate) fn unfreeze(&self, guard: &Guard) {
        loop {
            let status = self.status(guard);
            if !status.is_frozen() {
                return;
            }
            let mut op = MwCas::new();
            op.compare_exchange_u64(
                &self.status,
                status.into_raw(),
                status.unfreeze().into_raw(),
            );
            if op.exec(guard) {
                return;
            }
        }
    }
}
