// Global constants of the target memory model.

use crate::mem::size;

pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+", env!("GIT_HASH"));

/// Size of a page, the unit of commit and protection.
pub const PAGE_SIZE: usize = 4 * size::KB;

/// Allocation objects start on this boundary and shared objects are sized in
/// multiples of it.
pub const ALLOCATION_GRANULARITY: usize = 64 * size::KB;

/// Largest region size representable on every platform the IPC layer talks to.
pub const MAX_REGION_SIZE: usize = i32::MAX as usize;

/// A hint passed to the allocator must be honored or the allocation fails.
pub const HINT_IS_ADVISORY: bool = false;

/// Tries of the padded allocate-then-trim loop in relaxed allocation.
pub const RELAXED_ALLOC_ATTEMPTS: usize = 3;
