//! The handle-based shared memory primitives.
//!
//! Handles are global to the machine, like file descriptors passed over a
//! socket, so a handle created in one process can be used in any other.

use log_crate::{debug, trace};

use super::process::{mapping_length, Process};
use super::space::{first_fit, View, ViewKind};
use super::{HandleEntry, MachineState, SharedObject};
use crate::consts::PAGE_SIZE;
use crate::error::{ApiError, Result};
use crate::mem::sys::{ShmemHandle, ShmemHandles, ShmemInfo};
use crate::mem::{checked_align_up, PageFlags, ShmemFlags, VirtualAddress};

impl MachineState {
    fn handle(&self, handle: ShmemHandle) -> Result<&HandleEntry> {
        self.handles.get(&handle.0).ok_or(ApiError::InvalidHandle)
    }

    fn new_handle(&mut self, object: usize, read_only: bool) -> ShmemHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, HandleEntry { object, read_only });
        if let Some(object) = self.objects.get_mut(&object) {
            object.handles += 1;
        }
        ShmemHandle(handle)
    }
}

impl ShmemHandles for Process {
    fn shmem_create(&self, size: usize, flags: ShmemFlags) -> Result<ShmemHandle> {
        if size == 0 {
            return Err(ApiError::InvalidParameter);
        }
        let len = checked_align_up(size, PAGE_SIZE).ok_or(ApiError::InvalidParameter)?;

        let machine = self.machine();
        let mut state = machine.state.lock();
        let base = first_fit(
            state.objects.iter().map(|(base, o)| (*base, o.len)),
            &machine.config.shared_arena,
            len,
        )
        .ok_or(ApiError::NotEnoughMemory)?;

        let pages = len / PAGE_SIZE;
        machine.charge(pages)?;
        let backing = machine.new_backing(pages);
        backing.commit(0..pages);
        state.objects.insert(
            base,
            SharedObject {
                len,
                requested: size,
                backing,
                gettable: false,
                attached: 0,
                handles: 0,
            },
        );
        let handle = state.new_handle(base, flags.contains(ShmemFlags::READONLY));
        debug!(
            "Created shmem object of 0x{:x} bytes, handle {}.",
            len, handle.0
        );
        Ok(handle)
    }

    fn shmem_duplicate(&self, handle: ShmemHandle, flags: ShmemFlags) -> Result<ShmemHandle> {
        let mut state = self.machine().state.lock();
        let entry = state.handle(handle)?;
        let object = entry.object;
        let read_only = entry.read_only || flags.contains(ShmemFlags::READONLY);
        let dup = state.new_handle(object, read_only);
        trace!("Duplicated handle {} as {}.", handle.0, dup.0);
        Ok(dup)
    }

    fn shmem_close(&self, handle: ShmemHandle) -> Result<()> {
        let mut state = self.machine().state.lock();
        let entry = state
            .handles
            .remove(&handle.0)
            .ok_or(ApiError::InvalidHandle)?;
        if let Some(object) = state.objects.get_mut(&entry.object) {
            object.handles -= 1;
        }
        state.release_if_unused(entry.object);
        trace!("Closed handle {}.", handle.0);
        Ok(())
    }

    fn shmem_map(&self, handle: ShmemHandle, offset: usize, size: usize) -> Result<VirtualAddress> {
        let machine = self.machine();
        let mut state = machine.state.lock();
        let entry = state.handle(handle)?;
        let read_only = entry.read_only;
        let object = state
            .objects
            .get(&entry.object)
            .ok_or(ApiError::InvalidHandle)?;

        let end = offset.checked_add(size).ok_or(ApiError::InvalidParameter)?;
        if size == 0 || end > object.len {
            return Err(ApiError::InvalidParameter);
        }
        let backing = object.backing.clone();
        let len = mapping_length(offset, size);
        let perms = if read_only {
            PageFlags::READ
        } else {
            PageFlags::READ | PageFlags::WRITE
        };

        let space = state.space(self.pid());
        let base = machine
            .config
            .private_arenas()
            .find_map(|arena| space.find_free(arena, len))
            .ok_or(ApiError::NotEnoughMemory)?;
        space.views.insert(
            base,
            View::new(ViewKind::ShmemMapping, backing, offset / PAGE_SIZE, len, perms),
        );
        debug!(
            "Mapped handle {} [0x{:x}, 0x{:x}) at 0x{:x}.",
            handle.0, offset, end, base
        );
        Ok(VirtualAddress::new(base + offset % PAGE_SIZE))
    }

    fn shmem_unmap(&self, address: VirtualAddress) -> Result<()> {
        let mut state = self.machine().state.lock();
        let space = state.space(self.pid());
        let base = match space.find(address.raw()) {
            Some((base, view)) if view.kind == ViewKind::ShmemMapping => base,
            _ => return Err(ApiError::InvalidAddress),
        };
        space.views.remove(&base);
        trace!("Unmapped shmem mapping at 0x{:x}.", base);
        Ok(())
    }

    fn shmem_get_info(&self, handle: ShmemHandle) -> Result<ShmemInfo> {
        let state = self.machine().state.lock();
        let entry = state.handle(handle)?;
        let object = state
            .objects
            .get(&entry.object)
            .ok_or(ApiError::InvalidHandle)?;
        let mut flags = ShmemFlags::empty();
        if entry.read_only {
            flags |= ShmemFlags::READONLY;
        }
        Ok(ShmemInfo {
            flags,
            size: object.requested,
            actual_size: object.len,
        })
    }
}
