//! The platform half of shared memory regions.

mod handle;
mod object;

pub use handle::ShmemHandleBackend;
pub use object::SharedObjectBackend;

use core::fmt::Debug;

use super::Mode;
use crate::error::RegionError;
use crate::mem::sys::{SegmentMemory, ShmemHandle};
use crate::mem::VirtualAddress;

/// A platform handle that can travel between processes as an integer.
pub trait RawHandle: Copy + Eq + Debug + Send + Sync + 'static {
    fn to_raw(self) -> u64;
    fn from_raw(raw: u64) -> Option<Self>;
    fn is_valid(&self) -> bool;
}

impl RawHandle for VirtualAddress {
    fn to_raw(self) -> u64 {
        self.raw() as u64
    }

    fn from_raw(raw: u64) -> Option<Self> {
        usize::try_from(raw).ok().map(VirtualAddress::new)
    }

    fn is_valid(&self) -> bool {
        self.raw() != 0
    }
}

impl RawHandle for ShmemHandle {
    fn to_raw(self) -> u64 {
        self.0 as u32 as u64
    }

    fn from_raw(raw: u64) -> Option<Self> {
        u32::try_from(raw).ok().map(|h| ShmemHandle(h as i32))
    }

    fn is_valid(&self) -> bool {
        ShmemHandle::is_valid(self)
    }
}

/// A view created by [`RegionBackend::map`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MappedView<H> {
    /// Handle of the object the view shows.
    pub handle: H,
    /// Address of the requested offset.
    pub address: VirtualAddress,
    /// Bytes of the pages covering the requested range, from `address`.
    pub mapped_size: usize,
}

/// How regions talk to the platform. One instance serves one process and
/// holds whatever per-process bookkeeping the strategy needs.
pub trait RegionBackend: Send + Sync + Sized {
    type Handle: RawHandle;
    type Memory: SegmentMemory;

    /// Primitives of the process this backend serves, for loads and stores
    /// through mappings.
    fn memory(&self) -> &Self::Memory;

    /// Create a writable object of `size` bytes, a multiple of the
    /// allocation granularity.
    fn create(&self, size: usize) -> Result<Self::Handle, RegionError>;

    /// Another handle to the object behind `handle`.
    fn duplicate(&self, handle: Self::Handle) -> Result<Self::Handle, RegionError>;

    /// Make the object read-only for whoever holds the returned handle, which
    /// replaces `handle`.
    fn convert_to_read_only(&self, handle: Self::Handle) -> Result<Self::Handle, RegionError>;

    /// Allow duplication of a writable object. Returns the handle to use from
    /// now on.
    fn convert_to_unsafe(&self, handle: Self::Handle) -> Result<Self::Handle, RegionError>;

    /// Map `[offset, offset + size)` of the object with the access of `mode`.
    /// `region_size` is the logical size of the region, already checked to
    /// cover the range.
    fn map(
        &self,
        handle: Self::Handle,
        mode: Mode,
        region_size: usize,
        offset: usize,
        size: usize,
    ) -> Result<MappedView<Self::Handle>, RegionError>;

    /// Release a view returned by [`RegionBackend::map`].
    fn unmap(&self, view: MappedView<Self::Handle>) -> Result<(), RegionError>;

    /// Whether the object is the kind of object regions hand out, at least
    /// `size` bytes large, and read-only exactly if `mode` is.
    fn check_permissions_correspond_to_mode(
        &self,
        handle: Self::Handle,
        mode: Mode,
        size: usize,
    ) -> bool;

    /// Start using a handle received from another process, in `mode`. Runs
    /// before the permission check and must not record anything it could
    /// later release when the handle turns out to be bogus.
    fn adopt(&self, handle: Self::Handle, mode: Mode) -> Result<(), RegionError>;

    fn close(&self, handle: Self::Handle);
}
