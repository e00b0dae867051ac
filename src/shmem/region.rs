//! The mode-checked region abstraction.

use std::sync::Arc;

use log_crate::{debug, warn};

use super::backend::{RawHandle, RegionBackend};
use super::mapping::SharedMemoryMapping;
use super::transfer::RegionTransfer;
use super::{Mode, RegionGuid};
use crate::consts::{ALLOCATION_GRANULARITY, MAX_REGION_SIZE};
use crate::error::RegionError;
use crate::mem::checked_align_up;

/// Size checks shared by creation and adoption.
fn check_size(size: usize) -> Result<(), RegionError> {
    if size == 0 {
        return Err(RegionError::ZeroSize);
    }
    if size > MAX_REGION_SIZE {
        return Err(RegionError::TooLarge(size));
    }
    Ok(())
}

/// A handle to shared memory with a mode, a logical size and an identity.
///
/// Dropping the region closes its handle. Mappings stay valid after that.
pub struct SharedMemoryRegion<B: RegionBackend> {
    backend: Arc<B>,
    /// `None` once the handle has been passed on.
    handle: Option<B::Handle>,
    mode: Mode,
    size: usize,
    guid: RegionGuid,
}

impl<B: RegionBackend> SharedMemoryRegion<B> {
    /// Create a region of `size` bytes. The object is rounded up to the
    /// allocation granularity, but [`SharedMemoryRegion::size`] and every
    /// bounds check use `size`.
    ///
    /// # Panics
    /// If `mode` is [`Mode::ReadOnly`]: such a region could never receive
    /// any content.
    pub fn create(backend: &Arc<B>, mode: Mode, size: usize) -> Result<Self, RegionError> {
        check_size(size)?;
        let rounded = checked_align_up(size, ALLOCATION_GRANULARITY)
            .filter(|r| *r <= MAX_REGION_SIZE)
            .ok_or(RegionError::TooLarge(size))?;
        assert_ne!(
            mode,
            Mode::ReadOnly,
            "Creating a region in read-only mode will lead to this region being non-modifiable."
        );

        let handle = backend.create(rounded)?;
        let guid = RegionGuid::new();
        debug!(
            "Created {:?} region {} of 0x{:x} (0x{:x}) bytes, handle {:?}.",
            mode, guid, size, rounded, handle
        );
        Ok(SharedMemoryRegion {
            backend: backend.clone(),
            handle: Some(handle),
            mode,
            size,
            guid,
        })
    }

    /// Adopt a handle received from another process.
    ///
    /// # Panics
    /// If the object behind the handle does not match `mode` and `size`.
    pub fn take(
        backend: &Arc<B>,
        handle: B::Handle,
        mode: Mode,
        size: usize,
        guid: RegionGuid,
    ) -> Result<Self, RegionError> {
        if !handle.is_valid() {
            return Err(RegionError::InvalidHandle);
        }
        check_size(size)?;

        backend.adopt(handle, mode)?;
        if !backend.check_permissions_correspond_to_mode(handle, mode, size) {
            backend.close(handle);
            panic!(
                "Handle {:?} does not correspond to a {:?} region of 0x{:x} bytes.",
                handle, mode, size
            );
        }
        debug!("Took {:?} region {}, handle {:?}.", mode, guid, handle);
        Ok(SharedMemoryRegion {
            backend: backend.clone(),
            handle: Some(handle),
            mode,
            size,
            guid,
        })
    }

    /// Adopt a region serialized by [`SharedMemoryRegion::into_transfer`].
    pub fn from_transfer(backend: &Arc<B>, transfer: RegionTransfer) -> Result<Self, RegionError> {
        let handle = B::Handle::from_raw(transfer.handle).ok_or(RegionError::InvalidHandle)?;
        Self::take(backend, handle, transfer.mode, transfer.size, transfer.guid)
    }

    /// Give up the handle for transfer to another process.
    pub fn into_transfer(mut self) -> RegionTransfer {
        let handle = self.take_handle();
        RegionTransfer {
            handle: handle.to_raw(),
            mode: self.mode,
            size: self.size,
            guid: self.guid,
        }
    }

    /// Another region with its own handle to the same object.
    ///
    /// # Panics
    /// If the region is writable.
    pub fn duplicate(&self) -> Result<Self, RegionError> {
        assert_ne!(
            self.mode,
            Mode::Writable,
            "Duplicating a writable shared memory region is prohibited."
        );
        let handle = self.backend.duplicate(self.handle())?;
        Ok(SharedMemoryRegion {
            backend: self.backend.clone(),
            handle: Some(handle),
            mode: self.mode,
            size: self.size,
            guid: self.guid,
        })
    }

    /// Make the region read-only, for good. Whether the object's protection
    /// changes now or at the next mapping is up to the backend; mappings made
    /// afterwards are read-only either way.
    ///
    /// # Panics
    /// If the region is not writable.
    pub fn convert_to_read_only(&mut self) -> Result<(), RegionError> {
        assert_eq!(
            self.mode,
            Mode::Writable,
            "Only writable shared memory region can be converted to read-only."
        );
        let handle = self.backend.convert_to_read_only(self.handle())?;
        self.handle = Some(handle);
        self.mode = Mode::ReadOnly;
        Ok(())
    }

    /// Allow duplicating the region while keeping it writable, for good.
    ///
    /// # Panics
    /// If the region is not writable.
    pub fn convert_to_unsafe(&mut self) -> Result<(), RegionError> {
        assert_eq!(
            self.mode,
            Mode::Writable,
            "Only writable shared memory region can be converted to unsafe."
        );
        let handle = self.backend.convert_to_unsafe(self.handle())?;
        self.handle = Some(handle);
        self.mode = Mode::Unsafe;
        Ok(())
    }

    /// Map `[offset, offset + size)` of the region.
    pub fn map_at(&self, offset: usize, size: usize) -> Result<SharedMemoryMapping<B>, RegionError> {
        let out_of_bounds = RegionError::OutOfBounds {
            offset,
            size,
            region_size: self.size,
        };
        match offset.checked_add(size) {
            Some(end) if size != 0 && end <= self.size => {}
            _ => return Err(out_of_bounds),
        }

        let view = self
            .backend
            .map(self.handle(), self.mode, self.size, offset, size)
            .map_err(|e| {
                warn!("Mapping region {} at 0x{:x} failed: {}.", self.guid, offset, e);
                e
            })?;
        Ok(SharedMemoryMapping::new(&self.backend, view, size, self.guid))
    }

    /// Map the whole region.
    pub fn map(&self) -> Result<SharedMemoryMapping<B>, RegionError> {
        self.map_at(0, self.size)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Size as requested at creation.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn guid(&self) -> RegionGuid {
        self.guid
    }

    pub fn handle(&self) -> B::Handle {
        match self.handle {
            Some(handle) => handle,
            None => unreachable!("Region handle used after being passed on."),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn take_handle(&mut self) -> B::Handle {
        let handle = self.handle();
        self.handle = None;
        handle
    }
}

impl<B: RegionBackend> Drop for SharedMemoryRegion<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.close(handle);
        }
    }
}

impl<B: RegionBackend> core::fmt::Debug for SharedMemoryRegion<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SharedMemoryRegion")
            .field("handle", &self.handle)
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("guid", &self.guid)
            .finish()
    }
}
