pub mod bench;

use crate::error::Result;
use crate::node::validate_capacity;

pub const DEFAULT_NODE_SIZE: usize = 4096;

/// Node sizes used when structure modifications build fresh images.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeConfig {
    /// Capacity of leaves produced by splits.
    pub leaf_node_size: usize,
    /// Capacity of new roots. A replaced parent keeps its own capacity.
    pub internal_node_size: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            leaf_node_size: DEFAULT_NODE_SIZE,
            internal_node_size: DEFAULT_NODE_SIZE,
        }
    }
}

impl NodeConfig {
    pub fn new(leaf_node_size: usize, internal_node_size: usize) -> Result<Self> {
        let config = Self {
            leaf_node_size,
            internal_node_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_capacity(self.leaf_node_size)?;
        validate_capacity(self.internal_node_size)
    }
}
