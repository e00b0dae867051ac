//! Mappings of shared memory regions.

use core::fmt;
use core::ops::Deref;
use std::sync::Arc;

use log_crate::{trace, warn};

use super::backend::{MappedView, RegionBackend};
use super::tracker::SharedMemoryTracker;
use super::RegionGuid;
use crate::error::RegionError;
use crate::mem::sys::SegmentMemory;
use crate::mem::VirtualAddress;

/// A view of a region in the calling process, unmapped on drop.
pub struct SharedMemoryMapping<B: RegionBackend> {
    backend: Arc<B>,
    /// `None` once unmapped.
    view: Option<MappedView<B::Handle>>,
    size: usize,
    guid: RegionGuid,
}

impl<B: RegionBackend> SharedMemoryMapping<B> {
    pub(super) fn new(
        backend: &Arc<B>,
        view: MappedView<B::Handle>,
        size: usize,
        guid: RegionGuid,
    ) -> Self {
        SharedMemoryTracker::the().increment_memory_usage(view.address, view.mapped_size, guid);
        trace!("Mapped 0x{:x} bytes of {} at {}.", size, guid, view.address);
        SharedMemoryMapping {
            backend: backend.clone(),
            view: Some(view),
            size,
            guid,
        }
    }

    fn view(&self) -> &MappedView<B::Handle> {
        match &self.view {
            Some(view) => view,
            None => unreachable!("Mapping used after unmap."),
        }
    }

    pub fn address(&self) -> VirtualAddress {
        self.view().address
    }

    /// Bytes requested.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes actually mapped from [`SharedMemoryMapping::address`], at least
    /// [`SharedMemoryMapping::size`].
    pub fn mapped_size(&self) -> usize {
        self.view().mapped_size
    }

    pub fn guid(&self) -> RegionGuid {
        self.guid
    }

    /// Copy out of the mapping at `offset`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), RegionError> {
        self.check_range(offset, buf.len())?;
        Ok(self.backend.memory().read(self.address() + offset, buf)?)
    }

    /// Copy into the mapping at `offset`. Fails with an access violation if
    /// the mapping is read-only.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), RegionError> {
        self.check_range(offset, data.len())?;
        Ok(self.backend.memory().write(self.address() + offset, data)?)
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), RegionError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(RegionError::OutOfBounds {
                offset,
                size: len,
                region_size: self.size,
            }),
        }
    }

    /// Unmap now, reporting failure.
    pub fn unmap(mut self) -> Result<(), RegionError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), RegionError> {
        let view = match self.view.take() {
            Some(view) => view,
            None => return Ok(()),
        };
        SharedMemoryTracker::the().decrement_memory_usage(view.address, view.mapped_size, self.guid);
        self.backend.unmap(view)?;
        trace!("Unmapped {} at {}.", self.guid, view.address);
        Ok(())
    }
}

impl<B: RegionBackend> Drop for SharedMemoryMapping<B> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Unmapping {} failed: {}.", self.guid, e);
        }
    }
}

impl<B: RegionBackend> fmt::Debug for SharedMemoryMapping<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedMemoryMapping")
            .field("view", &self.view)
            .field("size", &self.size)
            .field("guid", &self.guid)
            .finish()
    }
}

/// A mapping of a read-only region.
#[derive(Debug)]
pub struct ReadOnlySharedMemoryMapping<B: RegionBackend>(SharedMemoryMapping<B>);

impl<B: RegionBackend> ReadOnlySharedMemoryMapping<B> {
    pub(super) fn new(mapping: SharedMemoryMapping<B>) -> Self {
        ReadOnlySharedMemoryMapping(mapping)
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), RegionError> {
        self.0.read(offset, buf)
    }

    /// Read the whole mapping.
    pub fn to_vec(&self) -> Result<Vec<u8>, RegionError> {
        let mut buf = vec![0; self.0.size()];
        self.0.read(0, &mut buf)?;
        Ok(buf)
    }

    pub fn into_inner(self) -> SharedMemoryMapping<B> {
        self.0
    }
}

impl<B: RegionBackend> Deref for ReadOnlySharedMemoryMapping<B> {
    type Target = SharedMemoryMapping<B>;

    fn deref(&self) -> &SharedMemoryMapping<B> {
        &self.0
    }
}

/// A mapping of a writable or unsafe region.
#[derive(Debug)]
pub struct WritableSharedMemoryMapping<B: RegionBackend>(SharedMemoryMapping<B>);

impl<B: RegionBackend> WritableSharedMemoryMapping<B> {
    pub(super) fn new(mapping: SharedMemoryMapping<B>) -> Self {
        WritableSharedMemoryMapping(mapping)
    }

    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), RegionError> {
        self.0.read(offset, buf)
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), RegionError> {
        self.0.write(offset, data)
    }

    /// Fill `[offset, offset + len)` with `byte`.
    pub fn fill(&self, offset: usize, len: usize, byte: u8) -> Result<(), RegionError> {
        self.0.write(offset, &vec![byte; len])
    }

    pub fn into_inner(self) -> SharedMemoryMapping<B> {
        self.0
    }
}

impl<B: RegionBackend> Deref for WritableSharedMemoryMapping<B> {
    type Target = SharedMemoryMapping<B>;

    fn deref(&self) -> &SharedMemoryMapping<B> {
        &self.0
    }
}
