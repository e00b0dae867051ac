//! Regions backed by shmem handles.
//!
//! Handles map arbitrary ranges of their object and carry their own access
//! rights, so no view bookkeeping is needed here. Converting to read-only is
//! eager: the handle is replaced by a read-only duplicate and the writable one
//! is closed, so a peer receiving the handle cannot regain write access.

use core::fmt;

use log_crate::{error, trace, warn};

use super::{MappedView, RegionBackend};
use crate::consts::PAGE_SIZE;
use crate::error::RegionError;
use crate::mem::sys::{SegmentMemory, ShmemHandle, ShmemHandles};
use crate::mem::{align_up, ShmemFlags};
use crate::shmem::Mode;

pub struct ShmemHandleBackend<S> {
    sys: S,
}

impl<S: ShmemHandles + SegmentMemory> ShmemHandleBackend<S> {
    pub fn new(sys: S) -> ShmemHandleBackend<S> {
        ShmemHandleBackend { sys }
    }
}

impl<S: ShmemHandles + SegmentMemory> RegionBackend for ShmemHandleBackend<S> {
    type Handle = ShmemHandle;
    type Memory = S;

    fn memory(&self) -> &S {
        &self.sys
    }

    fn create(&self, size: usize) -> Result<ShmemHandle, RegionError> {
        Ok(self.sys.shmem_create(size, ShmemFlags::empty())?)
    }

    fn duplicate(&self, handle: ShmemHandle) -> Result<ShmemHandle, RegionError> {
        Ok(self.sys.shmem_duplicate(handle, ShmemFlags::empty())?)
    }

    /// Eager: returns a read-only duplicate and closes `handle`.
    fn convert_to_read_only(&self, handle: ShmemHandle) -> Result<ShmemHandle, RegionError> {
        let read_only = self.sys.shmem_duplicate(handle, ShmemFlags::READONLY)?;
        if let Err(e) = self.sys.shmem_close(handle) {
            warn!("Closing writable handle {} failed: {}.", handle.0, e);
        }
        trace!("Replaced handle {} by read-only {}.", handle.0, read_only.0);
        Ok(read_only)
    }

    fn convert_to_unsafe(&self, handle: ShmemHandle) -> Result<ShmemHandle, RegionError> {
        Ok(handle)
    }

    fn map(
        &self,
        handle: ShmemHandle,
        _mode: Mode,
        _region_size: usize,
        offset: usize,
        size: usize,
    ) -> Result<MappedView<ShmemHandle>, RegionError> {
        let address = self.sys.shmem_map(handle, offset, size)?;
        let in_page = address.offset_in(PAGE_SIZE);
        Ok(MappedView {
            handle,
            address,
            mapped_size: align_up(in_page + size, PAGE_SIZE) - in_page,
        })
    }

    fn unmap(&self, view: MappedView<ShmemHandle>) -> Result<(), RegionError> {
        Ok(self.sys.shmem_unmap(view.address)?)
    }

    fn check_permissions_correspond_to_mode(
        &self,
        handle: ShmemHandle,
        mode: Mode,
        size: usize,
    ) -> bool {
        let info = match self.sys.shmem_get_info(handle) {
            Ok(info) => info,
            Err(e) => {
                error!("shmem_get_info({}) failed: {}.", handle.0, e);
                return false;
            }
        };
        if info.size < size {
            error!(
                "Shmem handle {} is 0x{:x} bytes, expected at least 0x{:x}.",
                handle.0, info.size, size
            );
            return false;
        }

        let is_read_only = info.flags.contains(ShmemFlags::READONLY);
        let expected_read_only = mode == Mode::ReadOnly;
        if is_read_only != expected_read_only {
            error!(
                "Shmem handle {} has wrong access rights: it is{} read-only but it should{} be.",
                handle.0,
                if is_read_only { "" } else { " not" },
                if expected_read_only { "" } else { " not" }
            );
            return false;
        }
        true
    }

    fn adopt(&self, _handle: ShmemHandle, _mode: Mode) -> Result<(), RegionError> {
        Ok(())
    }

    fn close(&self, handle: ShmemHandle) {
        if let Err(e) = self.sys.shmem_close(handle) {
            warn!("Closing shmem handle {} failed: {}.", handle.0, e);
        }
    }
}

impl<S> fmt::Debug for ShmemHandleBackend<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ShmemHandleBackend").finish_non_exhaustive()
    }
}
