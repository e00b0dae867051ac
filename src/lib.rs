//! Page allocation and shared memory regions for segment-object memory systems.
//!
//! The operating systems this crate targets manage memory as whole allocation
//! objects: every allocation is one queryable object with uniform flags, commit
//! and decommit refuse to act on pages already in the requested state, and a
//! shared object is always mapped in its entirety. The [page](mem::page) layer
//! emulates an mmap/VirtualAlloc style contract on top of that, and the
//! [shmem] layer provides cross-process regions with per-mapping protection
//! through memory aliasing.
//!
//! The OS primitives sit behind [`mem::sys::SegmentMemory`] and
//! [`mem::sys::ShmemHandles`]. [`mem::sys::emu`] is an in-process emulation of
//! such a system which hosts several processes and backs the test suite.
//!
//! # Features
//!
//! - `log_stderr` (default): the logger installed by [`log::init`] writes to
//!   stderr.
//! - `shmem_handle_backend`: [`shmem::DefaultBackend`] uses shmem handles
//!   instead of shared object base addresses.
//! - `tracker_validation`: the memory usage tracker asserts that mappings are
//!   registered and unregistered exactly once.

#[macro_use]
mod util;

pub mod consts;
pub mod error;
pub mod log;
pub mod mem;
pub mod shmem;

pub use error::{ApiError, RegionError};
pub use mem::page::{PageAllocation, PageAllocator};
pub use mem::{PageAccessibility, VirtualAddress};
pub use shmem::{Mode, RegionGuid, SharedMemoryMapping, SharedMemoryRegion};
