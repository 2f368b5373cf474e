//! Epoch guard adapter.
//!
//! Every node operation takes a [`Guard`]. While a guard is alive, memory that was reachable when
//! it was created stays valid even if it is superseded in the meantime. Node images replaced by
//! consolidation or split are handed to [`retire`] and freed only after every guard that could
//! still observe them has been dropped.

use crossbeam_ebr::Shared;

pub use crossbeam_ebr::{unprotected, Collector, Guard, LocalHandle};

/// Enters a protected region on the current thread. Dropping the guard exits it.
#[inline]
pub fn protect() -> Guard {
    crossbeam_ebr::pin()
}

/// Schedules a superseded node image for destruction.
///
/// # Safety
///
/// `node` must have been allocated with `Box` (every constructor in this crate returns
/// `Box<_>`), must already be unreachable for threads that enter a protected region from now
/// on, and must not be retired twice.
pub unsafe fn retire<T>(node: *const T, guard: &Guard) {
    guard.defer_destroy(Shared::from(node));
}
