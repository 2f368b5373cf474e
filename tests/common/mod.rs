//! Shared fixtures for integration tests.
//!
//! Set `RUST_LOG` (e.g. `bztree_node=trace`) to see engine events while a test runs.

#![allow(dead_code)]

use std::sync::Once;

use bztree_node::epoch::Guard;
use bztree_node::LeafNode;
use tracing_subscriber::EnvFilter;

pub const NODE_SIZE: usize = 4096;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Leaf with sorted keys "0", "10", .., "90" and unsorted keys "200", "210", .., "290", each
/// mapped to its numeric value.
pub fn insert_dummy(guard: &Guard) -> Box<LeafNode> {
    let leaf = LeafNode::new(NODE_SIZE).unwrap();
    for i in (0..100u64).step_by(10) {
        leaf.insert(i.to_string().as_bytes(), i, guard).unwrap();
    }
    let leaf = leaf.consolidate(guard).unwrap();
    for i in (200..300u64).step_by(10) {
        leaf.insert(i.to_string().as_bytes(), i, guard).unwrap();
    }
    leaf
}
