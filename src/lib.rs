//! Latch-free BzTree nodes.
//!
//! Leaf and internal node images whose records are published, replaced and deleted exclusively
//! through a multi-word compare-and-swap, together with consolidation and split preparation.
//! Tree traversal and the installation of new images are left to the caller, which enters an
//! epoch guard before touching a node and retires superseded images through it.

extern crate crossbeam_ebr;
extern crate crossbeam_utils;
#[macro_use]
extern crate bitflags;
extern crate mwcas;
extern crate scopeguard;

pub mod config;
pub mod epoch;
pub mod error;
pub mod node;

pub use config::NodeConfig;
pub use error::{NodeError, Result};
pub use node::internal::InternalNode;
pub use node::leaf::LeafNode;
pub use node::split::{ParentUpdate, SplitPackage};
pub use node::stack::{Frame, Stack};
pub use node::NodeRef;
