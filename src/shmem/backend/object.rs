//! Regions backed by gettable shared objects, identified by base address.
//!
//! A shared object is only ever attached whole, at the same address in every
//! process, and attaching it twice in one process is impossible. Mappings
//! therefore share the base view where they can and get a private alias where
//! they cannot: when another mapping already uses the base view, or when the
//! base view's protection differs from what the mapping needs. The protection
//! of a view some live mapping depends on is never changed.
//!
//! Which views are in use is tracked per process in a view table. The base
//! view is released once no mapping uses it and no region in this process
//! holds a handle to the object.
//!
//! Mode conversion is deferred: converting only changes the mode the region
//! records, and the protection of each mapping follows the mode at map time.
//! The creating process keeps its writable base view.
//!
//! A region passed on with `into_transfer` keeps its handle counted in the
//! sending process, so the sender stays attached to the object until the
//! process itself goes away. The receiver can therefore adopt the handle at
//! any time.

use core::fmt;

use hashbrown::HashMap;
use log_crate::{debug, error, trace, warn};

use super::{MappedView, RegionBackend};
use crate::consts::{MAX_REGION_SIZE, PAGE_SIZE};
use crate::error::RegionError;
use crate::mem::sys::SegmentMemory;
use crate::mem::{align_up, AllocFlags, PageFlags, VirtualAddress};
use crate::shmem::Mode;
use crate::util::sync::Spinlock;

/// What this process does with one shared object.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ObjectViews {
    /// Regions in this process holding the object's handle.
    handles: usize,
    /// Live mappings, base or alias.
    views: usize,
    /// Whether a live mapping uses the base view.
    base_in_use: bool,
    /// Whether this process allocated the object. Its base view then has the
    /// protection the object was created with, whatever the region's mode.
    created: bool,
    /// Whether this backend created or attached the base view, and so may
    /// release it.
    owned: bool,
}

/// Backend over the shared object primitives of one process.
pub struct SharedObjectBackend<S> {
    sys: S,
    table: Spinlock<HashMap<VirtualAddress, ObjectViews>>,
}

impl<S: SegmentMemory> SharedObjectBackend<S> {
    pub fn new(sys: S) -> SharedObjectBackend<S> {
        SharedObjectBackend {
            sys,
            table: Spinlock::default(),
        }
    }

    /// Live mappings of the object at `base` in this process.
    pub fn live_views(&self, base: VirtualAddress) -> usize {
        self.table.lock().get(&base).map_or(0, |o| o.views)
    }

    /// Number of objects this process tracks.
    pub fn tracked_objects(&self) -> usize {
        self.table.lock().len()
    }

    /// Drop the base view of `base` if nothing in this process needs it.
    fn release_if_unused(&self, table: &mut HashMap<VirtualAddress, ObjectViews>, base: VirtualAddress) {
        let unused = table
            .get(&base)
            .map_or(false, |o| o.views == 0 && o.handles == 0);
        if !unused {
            return;
        }
        let owned = table.remove(&base).map_or(false, |o| o.owned);
        if !owned {
            trace!("Forgetting shared object at {}.", base);
            return;
        }
        match self.sys.query_mem(base, PAGE_SIZE) {
            Ok(info) if info.flags.contains(PageFlags::BASE | PageFlags::SHARED) => {}
            Ok(info) => {
                error!("Refusing to release {} ({:?}): not a shared object.", base, info.flags);
                return;
            }
            Err(e) => {
                warn!("Querying shared object at {} failed: {}.", base, e);
                return;
            }
        }
        match self.sys.free_mem(base) {
            Ok(()) => debug!("Released shared object at {}.", base),
            Err(e) => warn!("Releasing shared object at {} failed: {}.", base, e),
        }
    }

    /// Map through an alias so the protection can differ from the base view.
    fn alias(&self, address: VirtualAddress, size: usize, mode: Mode) -> Result<VirtualAddress, RegionError> {
        let alias = self.sys.alias_mem(address, size, AllocFlags::SELMAPALL)?;
        let pages = alias.prev_aligned(PAGE_SIZE);
        let length = align_up(alias.offset_in(PAGE_SIZE) + size, PAGE_SIZE);
        if let Err(e) = self.sys.set_mem(pages, length, mode.page_flags()) {
            if let Err(e) = self.sys.free_mem(pages) {
                warn!("Freeing alias at {} failed: {}.", pages, e);
            }
            return Err(e.into());
        }
        Ok(alias)
    }
}

impl<S: SegmentMemory> RegionBackend for SharedObjectBackend<S> {
    type Handle = VirtualAddress;
    type Memory = S;

    fn memory(&self) -> &S {
        &self.sys
    }

    fn create(&self, size: usize) -> Result<VirtualAddress, RegionError> {
        let flags = PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE;
        let base = self.sys.alloc_shared_mem(size, flags, AllocFlags::GETTABLE)?;
        self.table.lock().insert(
            base,
            ObjectViews {
                handles: 1,
                created: true,
                owned: true,
                ..ObjectViews::default()
            },
        );
        Ok(base)
    }

    fn duplicate(&self, handle: VirtualAddress) -> Result<VirtualAddress, RegionError> {
        let mut table = self.table.lock();
        let object = table.get_mut(&handle).ok_or(RegionError::InvalidHandle)?;
        object.handles += 1;
        Ok(handle)
    }

    /// Deferred: the region records the new mode and mappings made from now
    /// on are read-only. Existing mappings keep their protection.
    fn convert_to_read_only(&self, handle: VirtualAddress) -> Result<VirtualAddress, RegionError> {
        trace!("Object at {} is read-only from now on.", handle);
        Ok(handle)
    }

    fn convert_to_unsafe(&self, handle: VirtualAddress) -> Result<VirtualAddress, RegionError> {
        Ok(handle)
    }

    fn map(
        &self,
        handle: VirtualAddress,
        mode: Mode,
        region_size: usize,
        offset: usize,
        size: usize,
    ) -> Result<MappedView<VirtualAddress>, RegionError> {
        let mut table = self.table.lock();
        let object = table.get_mut(&handle).ok_or(RegionError::InvalidHandle)?;

        let mut info = self.sys.query_mem(handle, MAX_REGION_SIZE)?;
        if info.flags.contains(PageFlags::FREE) {
            self.sys.get_shared_mem(handle, mode.page_flags())?;
            info = self.sys.query_mem(handle, MAX_REGION_SIZE)?;
        }
        if info.length < offset + size {
            return Err(RegionError::OutOfBounds {
                offset,
                size,
                region_size: info.length.min(region_size),
            });
        }
        if !info.flags.contains(PageFlags::COMMIT) {
            self.sys
                .set_mem(handle, info.length, PageFlags::COMMIT | PageFlags::DEFAULT)?;
            info = self.sys.query_mem(handle, MAX_REGION_SIZE)?;
        }

        let requested = handle + offset;
        let base_matches = info.flags.contains(PageFlags::WRITE) == mode.is_writable();
        let address = if !object.base_in_use && base_matches {
            object.base_in_use = true;
            requested
        } else {
            let alias = self.alias(requested, size, mode)?;
            debug!(
                "Mapping {} of object at {} through alias {}.",
                mode_name(mode),
                handle,
                alias
            );
            alias
        };
        object.views += 1;

        let in_page = address.offset_in(PAGE_SIZE);
        Ok(MappedView {
            handle,
            address,
            mapped_size: align_up(in_page + size, PAGE_SIZE) - in_page,
        })
    }

    fn unmap(&self, view: MappedView<VirtualAddress>) -> Result<(), RegionError> {
        let info = self.sys.query_mem(view.address, PAGE_SIZE)?;
        let mut table = self.table.lock();
        if info.flags.contains(PageFlags::SHARED) {
            if let Some(object) = table.get_mut(&view.handle) {
                object.base_in_use = false;
            }
        } else {
            self.sys.free_mem(view.address.prev_aligned(PAGE_SIZE))?;
        }

        if let Some(object) = table.get_mut(&view.handle) {
            object.views -= 1;
        }
        self.release_if_unused(&mut table, view.handle);
        Ok(())
    }

    fn check_permissions_correspond_to_mode(
        &self,
        handle: VirtualAddress,
        mode: Mode,
        size: usize,
    ) -> bool {
        let info = match self.sys.query_mem(handle, MAX_REGION_SIZE) {
            Ok(info) => info,
            Err(e) => {
                error!("Querying shared object at {} failed: {}.", handle, e);
                return false;
            }
        };
        if !info.flags.contains(PageFlags::BASE | PageFlags::SHARED) || info.length < size {
            error!(
                "{} is not a shared object of at least 0x{:x} bytes ({:?}, 0x{:x} bytes).",
                handle, size, info.flags, info.length
            );
            return false;
        }

        let created = self.table.lock().get(&handle).map_or(false, |o| o.created);
        let is_read_only = !info.flags.contains(PageFlags::WRITE);
        let expected_read_only = mode == Mode::ReadOnly;
        if !created && is_read_only != expected_read_only {
            error!(
                "Shared object at {} has wrong access rights: it is{} read-only but it should{} be.",
                handle,
                if is_read_only { "" } else { " not" },
                if expected_read_only { "" } else { " not" }
            );
            return false;
        }
        true
    }

    fn adopt(&self, handle: VirtualAddress, mode: Mode) -> Result<(), RegionError> {
        let mut table = self.table.lock();
        if let Some(object) = table.get_mut(&handle) {
            object.handles += 1;
            return Ok(());
        }

        let info = self.sys.query_mem(handle, PAGE_SIZE)?;
        let owned = if info.flags.contains(PageFlags::FREE) {
            self.sys.get_shared_mem(handle, mode.page_flags())?;
            true
        } else if info.flags.contains(PageFlags::BASE | PageFlags::SHARED) {
            false
        } else {
            // Not an object this backend may track. The permission check
            // that follows rejects it.
            return Ok(());
        };
        table.insert(
            handle,
            ObjectViews {
                handles: 1,
                owned,
                ..ObjectViews::default()
            },
        );
        Ok(())
    }

    fn close(&self, handle: VirtualAddress) {
        let mut table = self.table.lock();
        match table.get_mut(&handle) {
            Some(object) => object.handles -= 1,
            None => {
                warn!("Closing untracked shared object handle {}.", handle);
                return;
            }
        }
        self.release_if_unused(&mut table, handle);
    }
}

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::ReadOnly => "read-only",
        Mode::Writable | Mode::Unsafe => "writable",
    }
}

impl<S> fmt::Debug for SharedObjectBackend<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedObjectBackend").finish_non_exhaustive()
    }
}
