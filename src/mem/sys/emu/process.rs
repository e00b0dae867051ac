//! Emulated processes and their memory primitives.

use std::sync::Arc;

use log_crate::{debug, trace};

use super::space::{first_fit, View, ViewKind};
use super::{Machine, SharedObject, ALIAS_PERMISSIONS};
use crate::consts::PAGE_SIZE;
use crate::error::{ApiError, Result};
use crate::mem::sys::{MemInfo, MemoryStats, SegmentMemory};
use crate::mem::{align_up, checked_align_up, AllocFlags, PageFlags, VirtualAddress};

make_id!(
    /// Identifies a process of an emulated machine.
    pub ProcessId
);

/// A process of an emulated machine. Dropping it tears down its address
/// space, detaching it from every shared object it had attached.
pub struct Process {
    machine: Arc<Machine>,
    pid: ProcessId,
}

/// Page-rounded length, rejecting zero and overflow.
fn page_length(length: usize) -> Result<usize> {
    if length == 0 {
        return Err(ApiError::InvalidParameter);
    }
    checked_align_up(length, PAGE_SIZE).ok_or(ApiError::InvalidParameter)
}

impl Process {
    pub(super) fn new(machine: Arc<Machine>, pid: ProcessId) -> Process {
        Process { machine, pid }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// Number of objects (private, shared or alias) in this address space.
    pub fn object_count(&self) -> usize {
        self.machine.state.lock().space(self.pid).views.len()
    }

    /// Place a private view of `len` bytes in the first private arena with room.
    fn place_private(&self, views: &super::AddressSpace, len: usize) -> Result<usize> {
        self.machine
            .config
            .private_arenas()
            .find_map(|arena| views.find_free(arena, len))
            .ok_or(ApiError::NotEnoughMemory)
    }

    /// Copy between `address` and a buffer page by page, checking each page
    /// with `allowed`.
    fn access(
        &self,
        address: VirtualAddress,
        len: usize,
        allowed: impl Fn(PageFlags) -> bool,
        mut copy: impl FnMut(&View, usize, usize, core::ops::Range<usize>) -> bool,
    ) -> Result<()> {
        let mut state = self.machine.state.lock();
        let space = state.space(self.pid);
        let mut done = 0;
        while done < len {
            let cur = address + done;
            let fault = ApiError::AccessViolation { address: cur };
            let (base, view) = space.find(cur.raw()).ok_or(fault)?;
            let page = (cur.raw() - base) / PAGE_SIZE;
            let offset = cur.offset_in(PAGE_SIZE);
            let n = (PAGE_SIZE - offset).min(len - done);
            if !allowed(view.perms[page]) {
                return Err(fault);
            }
            if !copy(view, view.first_frame + page, offset, done..done + n) {
                return Err(fault);
            }
            done += n;
        }
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let mut state = self.machine.state.lock();
        let space = match state.spaces.remove(&self.pid) {
            Some(space) => space,
            None => return,
        };
        for (base, view) in space.views {
            if view.kind == ViewKind::SharedBase {
                if let Some(object) = state.objects.get_mut(&base) {
                    object.attached -= 1;
                }
                state.release_if_unused(base);
            }
        }
        debug!("Process {} exited.", self.pid.raw());
    }
}

impl SegmentMemory for Process {
    fn alloc_mem(
        &self,
        hint: Option<VirtualAddress>,
        length: usize,
        flags: PageFlags,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress> {
        let len = page_length(length)?;
        let perms = flags.permissions();
        if perms.is_empty() || !(PageFlags::PERMISSIONS | PageFlags::COMMIT).contains(flags) {
            return Err(ApiError::InvalidParameter);
        }

        let machine = &self.machine;
        let mut state = machine.state.lock();
        let space = state.space(self.pid);

        let base = if alloc.contains(AllocFlags::LOCATION) {
            let hint = hint.ok_or(ApiError::InvalidParameter)?;
            if !hint.is_aligned(crate::consts::ALLOCATION_GRANULARITY)
                || !machine.in_private_arena(hint.raw(), len)
                || !space.is_range_free(hint.raw(), len)
            {
                return Err(ApiError::InvalidAddress);
            }
            hint.raw()
        } else if alloc.contains(AllocFlags::ANY) {
            let high = machine
                .config
                .high_arena
                .as_ref()
                .ok_or(ApiError::InvalidParameter)?;
            space.find_free(high, len).ok_or(ApiError::NotEnoughMemory)?
        } else {
            space
                .find_free(&machine.config.low_arena, len)
                .ok_or(ApiError::NotEnoughMemory)?
        };

        let pages = len / PAGE_SIZE;
        let backing = machine.new_backing(pages);
        if flags.contains(PageFlags::COMMIT) {
            machine.charge(pages)?;
            backing.commit(0..pages);
        }
        space
            .views
            .insert(base, View::new(ViewKind::Private, backing, 0, len, perms));
        trace!("Allocated 0x{:x} bytes at 0x{:x} ({:?}).", len, base, flags);
        Ok(VirtualAddress::new(base))
    }

    fn free_mem(&self, base: VirtualAddress) -> Result<()> {
        let mut state = self.machine.state.lock();
        let kind = match state.space(self.pid).views.get(&base.raw()) {
            Some(view) => view.kind,
            None => return Err(ApiError::InvalidAddress),
        };
        match kind {
            ViewKind::ShmemMapping => return Err(ApiError::AccessDenied),
            ViewKind::SharedBase => state.detach(self.pid, base.raw()),
            ViewKind::Private | ViewKind::Alias => {
                state.space(self.pid).views.remove(&base.raw());
            }
        }
        trace!("Freed {:?} object at {}.", kind, base);
        Ok(())
    }

    fn set_mem(&self, address: VirtualAddress, length: usize, flags: PageFlags) -> Result<()> {
        let len = page_length(length)?;
        if !address.is_aligned(PAGE_SIZE) {
            return Err(ApiError::InvalidAddress);
        }
        let commit = flags.contains(PageFlags::COMMIT);
        let decommit = flags.contains(PageFlags::DECOMMIT);
        let known = PageFlags::PERMISSIONS
            | PageFlags::COMMIT
            | PageFlags::DECOMMIT
            | PageFlags::DEFAULT;
        if (commit && decommit)
            || !known.contains(flags)
            || (flags.contains(PageFlags::DEFAULT) && !commit)
        {
            return Err(ApiError::InvalidParameter);
        }

        let machine = &self.machine;
        let mut state = machine.state.lock();
        let (base, view) = state
            .space(self.pid)
            .find_mut(address.raw())
            .ok_or(ApiError::InvalidAddress)?;
        let first = (address.raw() - base) / PAGE_SIZE;
        let last = first + len / PAGE_SIZE;
        if last > view.pages() {
            return Err(ApiError::InvalidAddress);
        }
        let frames = view.frames(first..last);
        let perms = if flags.contains(PageFlags::DEFAULT) {
            view.default_perms
        } else {
            flags.permissions()
        };

        if decommit {
            if !view.backing.all_committed(frames.clone()) {
                return Err(ApiError::AccessDenied);
            }
            view.backing.decommit(frames);
        } else {
            if perms.is_empty() {
                return Err(ApiError::InvalidParameter);
            }
            if commit {
                if view.backing.any_committed(frames.clone()) {
                    return Err(ApiError::AccessDenied);
                }
                machine.charge(last - first)?;
                view.backing.commit(frames);
            } else if !view.backing.all_committed(frames) {
                return Err(ApiError::AccessDenied);
            }
            view.perms[first..last].iter_mut().for_each(|p| *p = perms);
        }
        trace!("Set 0x{:x} bytes at {} to {:?}.", len, address, flags);
        Ok(())
    }

    fn query_mem(&self, address: VirtualAddress, length: usize) -> Result<MemInfo> {
        let len = page_length(length)?;
        let page = address.prev_aligned(PAGE_SIZE).raw();
        let mut state = self.machine.state.lock();
        let space = state.space(self.pid);

        if let Some((base, view)) = space.find(page) {
            let first = (page - base) / PAGE_SIZE;
            let limit = view.pages().min(first.saturating_add(len / PAGE_SIZE));
            let attributes = |p: usize| (view.perms[p], view.is_committed(p));
            let (perms, committed) = attributes(first);
            let mut end = first + 1;
            while end < limit && attributes(end) == (perms, committed) {
                end += 1;
            }

            let mut flags = perms;
            if committed {
                flags |= PageFlags::COMMIT;
            }
            if view.kind == ViewKind::SharedBase {
                flags |= PageFlags::SHARED;
            }
            if first == 0 {
                flags |= PageFlags::BASE;
            }
            return Ok(MemInfo {
                length: (end - first) * PAGE_SIZE,
                flags,
            });
        }

        let arena = self
            .machine
            .arena_of(page)
            .ok_or(ApiError::InvalidAddress)?;
        let next = space
            .next_view_after(page)
            .map_or(arena.end, |n| n.min(arena.end));
        Ok(MemInfo {
            length: (next - page).min(len),
            flags: PageFlags::FREE,
        })
    }

    fn alloc_shared_mem(
        &self,
        length: usize,
        flags: PageFlags,
        alloc: AllocFlags,
    ) -> Result<VirtualAddress> {
        let len = page_length(length)?;
        let perms = flags.permissions();
        if perms.is_empty() || !(PageFlags::PERMISSIONS | PageFlags::COMMIT).contains(flags) {
            return Err(ApiError::InvalidParameter);
        }

        let machine = &self.machine;
        let mut state = machine.state.lock();
        let base = first_fit(
            state.objects.iter().map(|(base, o)| (*base, o.len)),
            &machine.config.shared_arena,
            len,
        )
        .ok_or(ApiError::NotEnoughMemory)?;

        let pages = len / PAGE_SIZE;
        let backing = machine.new_backing(pages);
        if flags.contains(PageFlags::COMMIT) {
            machine.charge(pages)?;
            backing.commit(0..pages);
        }
        state.objects.insert(
            base,
            SharedObject {
                len,
                requested: length,
                backing: backing.clone(),
                gettable: alloc.contains(AllocFlags::GETTABLE),
                attached: 1,
                handles: 0,
            },
        );
        state
            .space(self.pid)
            .views
            .insert(base, View::new(ViewKind::SharedBase, backing, 0, len, perms));
        debug!("Allocated shared object of 0x{:x} bytes at 0x{:x}.", len, base);
        Ok(VirtualAddress::new(base))
    }

    fn get_shared_mem(&self, base: VirtualAddress, flags: PageFlags) -> Result<()> {
        let perms = flags.permissions();
        if perms.is_empty() {
            return Err(ApiError::InvalidParameter);
        }

        let mut state = self.machine.state.lock();
        let (len, backing) = match state.objects.get(&base.raw()) {
            Some(o) if !o.gettable => return Err(ApiError::AccessDenied),
            Some(o) => (o.len, o.backing.clone()),
            None => return Err(ApiError::InvalidAddress),
        };
        let space = state.space(self.pid);
        if space.views.contains_key(&base.raw()) {
            return Err(ApiError::AccessDenied);
        }
        space.views.insert(
            base.raw(),
            View::new(ViewKind::SharedBase, backing, 0, len, perms),
        );
        if let Some(object) = state.objects.get_mut(&base.raw()) {
            object.attached += 1;
        }
        debug!("Process {} attached shared object at {}.", self.pid.raw(), base);
        Ok(())
    }

    fn alias_mem(
        &self,
        address: VirtualAddress,
        length: usize,
        _alloc: AllocFlags,
    ) -> Result<VirtualAddress> {
        if length == 0 {
            return Err(ApiError::InvalidParameter);
        }
        let start = address.prev_aligned(PAGE_SIZE).raw();
        let end = address
            .raw()
            .checked_add(length)
            .and_then(|e| checked_align_up(e, PAGE_SIZE))
            .ok_or(ApiError::InvalidParameter)?;

        let mut state = self.machine.state.lock();
        let space = state.space(self.pid);
        let (base, view) = space.find(start).ok_or(ApiError::InvalidAddress)?;
        if end > base + view.len {
            return Err(ApiError::InvalidAddress);
        }
        let first = (start - base) / PAGE_SIZE;
        let frames = view.frames(first..(end - base) / PAGE_SIZE);
        if !view.backing.all_committed(frames.clone()) {
            return Err(ApiError::AccessDenied);
        }
        let backing = view.backing.clone();

        let alias_len = end - start;
        let alias_base = self.place_private(space, alias_len)?;
        space.views.insert(
            alias_base,
            View::new(
                ViewKind::Alias,
                backing,
                frames.start,
                alias_len,
                ALIAS_PERMISSIONS,
            ),
        );
        debug!(
            "Aliased 0x{:x} bytes at 0x{:x} to 0x{:x}.",
            alias_len, start, alias_base
        );
        Ok(VirtualAddress::new(alias_base + address.offset_in(PAGE_SIZE)))
    }

    fn read(&self, address: VirtualAddress, buf: &mut [u8]) -> Result<()> {
        let readable = PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE;
        self.access(
            address,
            buf.len(),
            |p| p.intersects(readable),
            |view, frame, offset, range| view.backing.read(frame, offset, &mut buf[range]),
        )
    }

    fn write(&self, address: VirtualAddress, data: &[u8]) -> Result<()> {
        self.access(
            address,
            data.len(),
            |p| p.contains(PageFlags::WRITE),
            |view, frame, offset, range| view.backing.write(frame, offset, &data[range]),
        )
    }

    fn memory_stats(&self) -> MemoryStats {
        self.machine.stats()
    }
}

/// Round `length` up to whole pages. Exposed for the shmem primitives.
pub(super) fn mapping_length(offset: usize, size: usize) -> usize {
    align_up(offset % PAGE_SIZE + size, PAGE_SIZE)
}
