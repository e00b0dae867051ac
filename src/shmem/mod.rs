//! Shared memory regions.
//!
//! A [`SharedMemoryRegion`] owns a handle to a memory object other processes
//! can adopt, and produces [`SharedMemoryMapping`]s of it in the calling
//! process. The handle can be a shared object base address or a shmem handle,
//! depending on the [`RegionBackend`]; the region logic is the same for both.
//!
//! Regions follow a small mode state machine: they are created
//! [`Mode::Writable`] and may be converted once, to [`Mode::ReadOnly`] or
//! [`Mode::Unsafe`]. Writable regions cannot be duplicated.

pub mod backend;
mod mapping;
mod region;
pub mod tracker;
pub mod transfer;
mod typed;

pub use backend::{RegionBackend, SharedObjectBackend, ShmemHandleBackend};
pub use mapping::{ReadOnlySharedMemoryMapping, SharedMemoryMapping, WritableSharedMemoryMapping};
pub use region::SharedMemoryRegion;
pub use tracker::SharedMemoryTracker;
pub use typed::{
    MappedReadOnlyRegion, ReadOnlySharedMemoryRegion, UnsafeSharedMemoryRegion,
    WritableSharedMemoryRegion,
};

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};

use uguid::Guid;

use crate::mem::PageFlags;

cfg_if::cfg_if! {
    if #[cfg(feature = "shmem_handle_backend")] {
        /// The backend regions use unless told otherwise.
        pub type DefaultBackend<S> = ShmemHandleBackend<S>;
    } else {
        /// The backend regions use unless told otherwise.
        pub type DefaultBackend<S> = SharedObjectBackend<S>;
    }
}

/// Access mode of a region.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Mode {
    ReadOnly,
    Writable,
    /// Writable, and allowed to be duplicated.
    Unsafe,
}

impl Mode {
    /// Tag used in serialized regions.
    pub const fn tag(self) -> u8 {
        match self {
            Mode::ReadOnly => 0,
            Mode::Writable => 1,
            Mode::Unsafe => 2,
        }
    }

    pub const fn from_tag(tag: u8) -> Option<Mode> {
        match tag {
            0 => Some(Mode::ReadOnly),
            1 => Some(Mode::Writable),
            2 => Some(Mode::Unsafe),
            _ => None,
        }
    }

    pub fn is_writable(self) -> bool {
        self != Mode::ReadOnly
    }

    /// Page permissions of a view in this mode.
    pub fn page_flags(self) -> PageFlags {
        if self.is_writable() {
            PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE
        } else {
            PageFlags::READ | PageFlags::EXECUTE
        }
    }
}

/// Identity of a region, shared by every handle and mapping of it across
/// processes.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegionGuid(Guid);

impl RegionGuid {
    /// A fresh unguessable identifier.
    #[allow(clippy::new_without_default)]
    pub fn new() -> RegionGuid {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0; 16];
        for (i, chunk) in bytes.chunks_mut(8).enumerate() {
            let mut hasher = RandomState::new().build_hasher();
            hasher.write_u64(count);
            hasher.write_usize(i);
            chunk.copy_from_slice(&hasher.finish().to_le_bytes());
        }
        RegionGuid(Guid::from_random_bytes(bytes))
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> RegionGuid {
        RegionGuid(Guid::from_bytes(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_bytes()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Guid::ZERO
    }
}

impl fmt::Display for RegionGuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RegionGuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RegionGuid({})", self.0)
    }
}
