//! The memory primitives of the target system.
//!
//! Everything above this module talks to the system through these two traits.
//! Their contracts follow the segment-object model: an allocation is one
//! object, commit and decommit fail on pages already in the requested state,
//! and a query reports the run of pages sharing the attributes of the first
//! one.

pub mod emu;

use core::fmt;
use std::sync::Arc;

use super::{AllocFlags, PageFlags, ShmemFlags, VirtualAddress};
use crate::error::Result;

/// What a query learned about the pages at an address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemInfo {
    /// Length in bytes of the run of pages with identical attributes, starting
    /// at the page containing the queried address.
    pub length: usize,
    /// Attributes of the run.
    pub flags: PageFlags,
}

/// System-wide memory statistics, used for out-of-memory diagnostics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub committed_bytes: usize,
    pub commit_limit: usize,
    pub shared_objects: usize,
    pub private_objects: usize,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "committed {} of {} KiB, {} shared objects, {} private objects",
            self.committed_bytes / 1024,
            self.commit_limit / 1024,
            self.shared_objects,
            self.private_objects
        )
    }
}

/// The allocation object primitives of one process.
pub trait SegmentMemory: Send + Sync {
    /// Allocate a private object. `flags` must carry at least one permission
    /// bit. With [`AllocFlags::LOCATION`] the object is placed exactly at
    /// `hint` or not at all.
    fn alloc_mem(
        &self,
        hint: Option<VirtualAddress>,
        length: usize,
        flags: PageFlags,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress>;

    /// Free a whole object given its base address.
    fn free_mem(&self, base: VirtualAddress) -> Result<()>;

    /// Commit, decommit or change the permissions of pages of one object.
    /// Committing a committed page or decommitting an uncommitted one fails.
    fn set_mem(&self, address: VirtualAddress, length: usize, flags: PageFlags) -> Result<()>;

    /// Report the attributes of the pages at `address`, looking at most
    /// `length` bytes ahead.
    fn query_mem(&self, address: VirtualAddress, length: usize) -> Result<MemInfo>;

    /// Allocate a shared object, attached to the calling process.
    fn alloc_shared_mem(
        &self,
        length: usize,
        flags: PageFlags,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress>;

    /// Attach a gettable shared object to the calling process.
    fn get_shared_mem(&self, base: VirtualAddress, flags: PageFlags) -> Result<()>;

    /// Create a private view of the pages backing `[address, address + length)`
    /// and return the address in the view corresponding to `address`.
    fn alias_mem(
        &self,
        address: VirtualAddress,
        length: usize,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress>;

    /// Load bytes, honoring commit state and permissions.
    fn read(&self, address: VirtualAddress, buf: &mut [u8]) -> Result<()>;

    /// Store bytes, honoring commit state and permissions.
    fn write(&self, address: VirtualAddress, data: &[u8]) -> Result<()>;

    fn memory_stats(&self) -> MemoryStats;
}

/// A handle to a shared memory object, valid in every process.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShmemHandle(pub i32);

impl ShmemHandle {
    pub const INVALID: ShmemHandle = ShmemHandle(-1);

    pub fn is_valid(&self) -> bool {
        *self != ShmemHandle::INVALID
    }
}

/// What `shmem_get_info` reports about a handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShmemInfo {
    pub flags: ShmemFlags,
    /// Size requested at creation.
    pub size: usize,
    /// Size of the object actually allocated.
    pub actual_size: usize,
}

/// Handle-based shared memory primitives.
pub trait ShmemHandles: Send + Sync {
    fn shmem_create(&self, size: usize, flags: ShmemFlags) -> Result<ShmemHandle>;

    /// A new handle to the same object; `flags` can only reduce rights.
    fn shmem_duplicate(&self, handle: ShmemHandle, flags: ShmemFlags) -> Result<ShmemHandle>;

    /// Close a handle. The object lives on while other handles or mappings
    /// reference it.
    fn shmem_close(&self, handle: ShmemHandle) -> Result<()>;

    /// Map `[offset, offset + size)` of the object into the calling process.
    fn shmem_map(&self, handle: ShmemHandle, offset: usize, size: usize) -> Result<VirtualAddress>;

    /// Unmap a mapping created by [`ShmemHandles::shmem_map`].
    fn shmem_unmap(&self, address: VirtualAddress) -> Result<()>;

    fn shmem_get_info(&self, handle: ShmemHandle) -> Result<ShmemInfo>;
}

impl<T: SegmentMemory + ?Sized> SegmentMemory for Arc<T> {
    fn alloc_mem(
        &self,
        hint: Option<VirtualAddress>,
        length: usize,
        flags: PageFlags,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress> {
        (**self).alloc_mem(hint, length, flags, alloc)
    }

    fn free_mem(&self, base: VirtualAddress) -> Result<()> {
        (**self).free_mem(base)
    }

    fn set_mem(&self, address: VirtualAddress, length: usize, flags: PageFlags) -> Result<()> {
        (**self).set_mem(address, length, flags)
    }

    fn query_mem(&self, address: VirtualAddress, length: usize) -> Result<MemInfo> {
        (**self).query_mem(address, length)
    }

    fn alloc_shared_mem(
        &self,
        length: usize,
        flags: PageFlags,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress> {
        (**self).alloc_shared_mem(length, flags, alloc)
    }

    fn get_shared_mem(&self, base: VirtualAddress, flags: PageFlags) -> Result<()> {
        (**self).get_shared_mem(base, flags)
    }

    fn alias_mem(
        &self,
        address: VirtualAddress,
        length: usize,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress> {
        (**self).alias_mem(address, length, alloc)
    }

    fn read(&self, address: VirtualAddress, buf: &mut [u8]) -> Result<()> {
        (**self).read(address, buf)
    }

    fn write(&self, address: VirtualAddress, data: &[u8]) -> Result<()> {
        (**self).write(address, data)
    }

    fn memory_stats(&self) -> MemoryStats {
        (**self).memory_stats()
    }
}

impl<T: ShmemHandles + ?Sized> ShmemHandles for Arc<T> {
    fn shmem_create(&self, size: usize, flags: ShmemFlags) -> Result<ShmemHandle> {
        (**self).shmem_create(size, flags)
    }

    fn shmem_duplicate(&self, handle: ShmemHandle, flags: ShmemFlags) -> Result<ShmemHandle> {
        (**self).shmem_duplicate(handle, flags)
    }

    fn shmem_close(&self, handle: ShmemHandle) -> Result<()> {
        (**self).shmem_close(handle)
    }

    fn shmem_map(&self, handle: ShmemHandle, offset: usize, size: usize) -> Result<VirtualAddress> {
        (**self).shmem_map(handle, offset, size)
    }

    fn shmem_unmap(&self, address: VirtualAddress) -> Result<()> {
        (**self).shmem_unmap(address)
    }

    fn shmem_get_info(&self, handle: ShmemHandle) -> Result<ShmemInfo> {
        (**self).shmem_get_info(handle)
    }
}
