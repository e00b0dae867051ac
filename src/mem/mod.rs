//! Memory primitives and the page allocator built on them.

pub mod flags;
pub mod page;
pub mod sys;
mod types;

pub use flags::{access_flags, AllocFlags, PageAccessibility, PageFlags, ShmemFlags};
pub use types::{
    align_down, align_up, checked_align_up, size, RawVirtualAddress, VirtualAddress,
};
