//! Split preparation.
//!
//! Splitting a leaf freezes it, partitions its live records into two fresh leaves and builds
//! the internal node that has to replace the parent. Nothing is installed: the caller swaps the
//! package into the tree and retires the frozen images.

use crossbeam_ebr::Guard;
use scopeguard::ScopeGuard;

use super::internal::InternalNode;
use super::leaf::LeafNode;
use super::stack::Stack;
use super::{record_len, NodeRef};
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};

/// The parent side of a split.
#[derive(Debug)]
pub enum ParentUpdate {
    /// The split leaf was the root; this node becomes the new root.
    NewRoot(Box<InternalNode>),
    /// `new` replaces the frozen parent `old`.
    Replace {
        old: NodeRef,
        new: Box<InternalNode>,
    },
}

#[derive(Debug)]
pub struct SplitPackage {
    pub left: Box<LeafNode>,
    pub right: Box<LeafNode>,
    /// First key of `right`.
    pub separator: Vec<u8>,
    pub parent: ParentUpdate,
}

impl LeafNode {
    /// Prepares the split of this leaf, whose ancestors are `stack`.
    ///
    /// On success this leaf is frozen, and so is the parent when there is one. On failure
    /// neither is left frozen by this call.
    pub fn prepare_split(
        &self,
        stack: &Stack<'_>,
        config: &NodeConfig,
        guard: &Guard,
    ) -> Result<SplitPackage> {
        if self.live_count(guard) < 2 {
            return Err(NodeError::NotSplittable);
        }
        self.freeze(guard)?;
        let frozen_leaf = scopeguard::guard((), |_| self.base.unfreeze(guard));

        let records = self.records(guard);
        if records.len() < 2 {
            return Err(NodeError::NotSplittable);
        }
        let (lower, upper) = records.split_at(split_point(&records));
        let separator = upper[0].0.clone();
        let left = LeafNode::from_records(
            config.leaf_node_size,
            lower.iter().map(|(k, v)| (k.as_slice(), *v)),
        )?;
        let right = LeafNode::from_records(
            config.leaf_node_size,
            upper.iter().map(|(k, v)| (k.as_slice(), *v)),
        )?;
        let (left_ref, right_ref) = (NodeRef::of(&*left), NodeRef::of(&*right));

        let parent = match stack.top() {
            None => ParentUpdate::NewRoot(InternalNode::new_root(
                config.internal_node_size,
                &separator,
                left_ref,
                right_ref,
            )?),
            Some(frame) => {
                let parent = frame.node;
                if parent.child(frame.index) != Some(NodeRef::of(self)) {
                    return Err(NodeError::StaleStack);
                }
                if !parent.has_room_for(separator.len(), guard) {
                    return Err(NodeError::ParentFull);
                }
                parent.freeze(guard)?;
                let frozen_parent = scopeguard::guard((), |_| parent.unfreeze(guard));
                let new = parent.with_split_child(frame.index, &separator, left_ref, right_ref)?;
                ScopeGuard::into_inner(frozen_parent);
                ParentUpdate::Replace {
                    old: NodeRef::of(parent),
                    new,
                }
            }
        };
        ScopeGuard::into_inner(frozen_leaf);

        tracing::debug!(
            left = lower.len(),
            right = upper.len(),
            new_root = matches!(parent, ParentUpdate::NewRoot(_)),
            "prepared leaf split"
        );
        Ok(SplitPackage {
            left,
            right,
            separator,
            parent,
        })
    }
}

/// Number of records going left: the shortest prefix holding at least half of the record bytes,
/// with both sides non-empty.
fn split_point(records: &[(Vec<u8>, u64)]) -> usize {
    debug_assert!(records.len() >= 2);
    let total: usize = records.iter().map(|(k, _)| record_len(k.len())).sum();
    let mut left = 0;
    let mut at = 0;
    while at < records.len() && left * 2 < total {
        left += record_len(records[at].0.len());
        at += 1;
    }
    at.clamp(1, records.len() - 1)
}
