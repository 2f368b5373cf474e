use crossbeam_ebr::Guard;

use std::fmt::{self, Write};

use super::{record_len, Node, NodeRef, SLOT_SIZE};
use crate::error::{NodeError, Result};

/// Internal node: separators paired with child references, sorted by separator.
///
/// Entry 0 always carries the empty separator. Child `i` holds the keys in
/// `[separator(i), separator(i + 1))`. Images are built whole and never change afterwards except
/// for the frozen bit, so slots are read without going through the multi-word CAS.
pub struct InternalNode {
    pub(super) base: Node,
}

impl InternalNode {
    /// Root over two children split at `separator`.
    pub fn new_root(
        capacity: usize,
        separator: &[u8],
        left: NodeRef,
        right: NodeRef,
    ) -> Result<Box<Self>> {
        Self::from_entries(capacity, [(&b""[..], left), (separator, right)])
    }

    /// Builds a node out of `entries`, sorted by separator, the first one empty.
    pub fn from_entries<'a, I>(capacity: usize, entries: I) -> Result<Box<Self>>
    where
        I: IntoIterator<Item = (&'a [u8], NodeRef)>,
    {
        let base = Node::build(
            capacity,
            entries
                .into_iter()
                .map(|(separator, child)| (separator, child.into_raw())),
        )?;
        if base.sorted_count() == 0 || !base.key(base.fixed_slot(0)).is_empty() {
            return Err(NodeError::MissingLowSeparator);
        }
        Ok(Box::new(Self { base }))
    }

    /// Copy of this node where child `index` is replaced by `left` and `right`, split at
    /// `separator`. The copy has this node's capacity.
    pub fn with_split_child(
        &self,
        index: usize,
        separator: &[u8],
        left: NodeRef,
        right: NodeRef,
    ) -> Result<Box<Self>> {
        if index >= self.len() {
            return Err(NodeError::StaleStack);
        }
        let mut entries = Vec::with_capacity(self.len() + 1);
        for (i, (sep, child)) in self.entries().enumerate() {
            if i == index {
                entries.push((sep, left));
                entries.push((separator, right));
            } else {
                entries.push((sep, child));
            }
        }
        Self::from_entries(self.capacity(), entries)
    }

    pub fn capacity(&self) -> usize {
        self.base.capacity()
    }

    pub fn len(&self) -> usize {
        self.base.sorted_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn separator(&self, index: usize) -> &[u8] {
        self.base.key(self.base.fixed_slot(index))
    }

    pub fn child(&self, index: usize) -> Option<NodeRef> {
        (index < self.len()).then(|| NodeRef::from_raw(self.base.value(self.base.fixed_slot(index))))
    }

    /// Index of the child whose range covers `key`.
    pub fn child_index(&self, key: &[u8]) -> usize {
        let (mut lo, mut hi) = (1, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.separator(mid) <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo - 1
    }

    pub fn child_for(&self, key: &[u8]) -> NodeRef {
        let index = self.child_index(key);
        NodeRef::from_raw(self.base.value(self.base.fixed_slot(index)))
    }

    pub fn entries(&self) -> impl Iterator<Item = (&[u8], NodeRef)> + '_ {
        (0..self.len()).map(move |index| {
            let meta = self.base.fixed_slot(index);
            (self.base.key(meta), NodeRef::from_raw(self.base.value(meta)))
        })
    }

    /// Whether a copy of this node with one more entry, for a separator of `key_len` bytes,
    /// still fits into its capacity.
    pub fn has_room_for(&self, key_len: usize, guard: &Guard) -> bool {
        let status = self.base.status(guard);
        self.base.free_space(status) >= SLOT_SIZE + record_len(key_len)
    }

    pub fn freeze(&self, guard: &Guard) -> Result<()> {
        self.base.freeze(guard)
    }

    pub(super) fn unfreeze(&self, guard: &Guard) {
        self.base.unfreeze(guard)
    }

    pub fn is_frozen(&self, guard: &Guard) -> bool {
        self.base.status(guard).is_frozen()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (index, (separator, child)) in self.entries().enumerate() {
            let _ = writeln!(
                out,
                "  [{:>4}] {:?} -> {:#x}",
                index,
                String::from_utf8_lossy(separator),
                child.into_raw()
            );
        }
        out
    }
}

impl fmt::Debug for InternalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries()
                    .map(|(sep, child)| (String::from_utf8_lossy(sep), child)),
            )
            .finish()
    }
}
