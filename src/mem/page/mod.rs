//! The page allocator.
//!
//! Presents an mmap/VirtualAlloc style contract (reserve, commit, decommit,
//! protect, free) on top of the segment-object primitives. Two gaps are
//! bridged here:
//!
//! - The primitives refuse to commit committed pages and to decommit
//!   uncommitted ones, so every access change first queries the range and only
//!   issues the transitions that are actually needed.
//! - An allocation cannot be resized or re-based, so alignment beyond the
//!   allocation granularity is obtained by freeing an oversized allocation and
//!   allocating again at the aligned address inside it. Another thread can
//!   take that range in between; the second allocation then fails and the
//!   failure is reported as is.

mod allocation;
pub mod oom;
#[cfg(test)]
mod test;

pub use allocation::PageAllocation;

use core::cell::Cell;

use log_crate::{debug, error, trace, warn};

use crate::consts::{ALLOCATION_GRANULARITY, HINT_IS_ADVISORY, PAGE_SIZE, RELAXED_ALLOC_ATTEMPTS};
use crate::error::{ApiError, Result};
use crate::mem::sys::SegmentMemory;
use crate::mem::{access_flags, AllocFlags, PageAccessibility, PageFlags, VirtualAddress};

thread_local! {
    static LAST_ALLOC_ERROR: Cell<Option<ApiError>> = Cell::new(None);
}

/// The error of the most recent failed allocation on this thread. Diagnostic
/// only; the failing call returns the same error.
pub fn last_alloc_error() -> Option<ApiError> {
    LAST_ALLOC_ERROR.with(|e| e.get())
}

fn record_alloc_error(err: ApiError) -> ApiError {
    LAST_ALLOC_ERROR.with(|e| e.set(Some(err)));
    err
}

/// Permission bits for a new allocation object. The primitives need at least
/// one permission bit even for memory nobody may touch, so inaccessible
/// memory is readable as far as the object is concerned.
pub fn object_flags(accessibility: PageAccessibility) -> PageFlags {
    let flags = access_flags(accessibility);
    if flags.is_empty() {
        PageFlags::READ
    } else {
        flags
    }
}

/// Page allocator over the primitives of one process.
pub struct PageAllocator<S> {
    sys: S,
}

impl<S: SegmentMemory> PageAllocator<S> {
    pub const fn new(sys: S) -> PageAllocator<S> {
        PageAllocator { sys }
    }

    pub fn sys(&self) -> &S {
        &self.sys
    }

    /// Reserve `length` bytes, committing them if `commit` is set.
    ///
    /// With a hint the object is placed exactly there or the call fails.
    /// Without one, high memory is preferred and low memory is the fallback.
    pub fn alloc_pages_internal(
        &self,
        hint: Option<VirtualAddress>,
        length: usize,
        accessibility: PageAccessibility,
        commit: bool,
    ) -> Result<VirtualAddress> {
        let mut flags = object_flags(accessibility);
        if commit {
            flags |= PageFlags::COMMIT;
        }

        let result = match hint {
            Some(hint) => {
                let placed = self.sys.alloc_mem(Some(hint), length, flags, AllocFlags::LOCATION);
                if HINT_IS_ADVISORY && placed.is_err() {
                    self.alloc_anywhere(length, flags)
                } else {
                    placed
                }
            }
            None => self.alloc_anywhere(length, flags),
        };

        match result {
            Ok(base) => {
                trace!(
                    "Allocated 0x{:x} bytes at {} ({:?}, commit: {}).",
                    length,
                    base,
                    accessibility,
                    commit
                );
                Ok(base)
            }
            Err(e) => {
                debug!("Allocating 0x{:x} bytes at {:?} failed: {}.", length, hint, e);
                Err(record_alloc_error(e))
            }
        }
    }

    fn alloc_anywhere(&self, length: usize, flags: PageFlags) -> Result<VirtualAddress> {
        self.sys
            .alloc_mem(None, length, flags, AllocFlags::ANY)
            .or_else(|_| self.sys.alloc_mem(None, length, flags, AllocFlags::empty()))
    }

    /// Narrow an allocation of `base_length` bytes at `base` to `trim_length`
    /// bytes starting `pre_slack` bytes in.
    ///
    /// Objects cannot be resized, so the whole allocation is freed and
    /// requested again at exactly `base + pre_slack`. If something else takes
    /// the range in between, the error of the second request is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn trim_mapping(
        &self,
        base: VirtualAddress,
        base_length: usize,
        trim_length: usize,
        accessibility: PageAccessibility,
        commit: bool,
        pre_slack: usize,
        post_slack: usize,
    ) -> Result<VirtualAddress> {
        if pre_slack == 0 && post_slack == 0 {
            return Ok(base);
        }
        let target = base + pre_slack;
        self.free_pages(base, base_length);
        let trimmed = self.alloc_pages_internal(Some(target), trim_length, accessibility, commit);
        if let Err(e) = trimmed {
            warn!("Lost {} to another allocation while trimming: {}.", target, e);
        }
        trimmed
    }

    /// Commit and protect, or decommit, the pages in `[address, address + length)`.
    ///
    /// The range is walked in the runs reported by the query primitive, and
    /// each run only gets the transition it still needs: committed runs are
    /// not committed again, uncommitted or free runs are not decommitted, and
    /// permissions are only set where they differ. Decommitting leaves
    /// permissions alone. Stops at the first failing call.
    pub fn try_set_access(
        &self,
        address: VirtualAddress,
        length: usize,
        accessibility: PageAccessibility,
    ) -> Result<()> {
        let requested = match accessibility {
            PageAccessibility::Inaccessible => PageFlags::DECOMMIT,
            _ => PageFlags::COMMIT | access_flags(accessibility),
        };

        let mut addr = address;
        let mut remaining = length;
        while remaining > 0 {
            let info = self.sys.query_mem(addr, remaining)?;
            let chunk = info.length.min(remaining);
            let mut flags = requested;
            if flags.contains(PageFlags::COMMIT) && info.flags.contains(PageFlags::COMMIT) {
                flags.remove(PageFlags::COMMIT);
            }
            if flags.contains(PageFlags::DECOMMIT) && !info.flags.contains(PageFlags::COMMIT) {
                flags.remove(PageFlags::DECOMMIT);
            }

            let transition = flags.intersects(PageFlags::COMMIT | PageFlags::DECOMMIT);
            let reprotect = requested != PageFlags::DECOMMIT
                && flags.permissions() != info.flags.permissions();
            if transition || reprotect {
                trace!("Setting {} +0x{:x} to {:?}.", addr, chunk, flags);
                self.sys.set_mem(addr, chunk, flags)?;
            }

            addr += chunk;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Like [`PageAllocator::try_set_access`], but failure is fatal: running
    /// out of memory while committing goes through [`oom::oom_crash`] and any
    /// other error panics.
    pub fn set_access(&self, address: VirtualAddress, length: usize, accessibility: PageAccessibility) {
        match self.try_set_access(address, length, accessibility) {
            Ok(()) => {}
            Err(ApiError::NotEnoughMemory) if accessibility != PageAccessibility::Inaccessible => {
                oom::oom_crash(length, self.sys.memory_stats())
            }
            Err(e) => {
                error!("Setting {} +0x{:x} to {:?} failed.", address, length, accessibility);
                panic!("Page access change failed with error {} ({}).", e.code(), e);
            }
        }
    }

    /// Free the whole allocation at `address`. The primitive cannot free part
    /// of an object, so `length` is informational.
    pub fn free_pages(&self, address: VirtualAddress, length: usize) {
        if let Err(e) = self.sys.free_mem(address) {
            panic!(
                "Freeing 0x{:x} bytes at {} failed with error {} ({}).",
                length,
                address,
                e.code(),
                e
            );
        }
        trace!("Freed 0x{:x} bytes at {}.", length, address);
    }

    pub fn decommit_system_pages(&self, address: VirtualAddress, length: usize) {
        self.set_access(address, length, PageAccessibility::Inaccessible);
    }

    pub fn recommit_system_pages(
        &self,
        address: VirtualAddress,
        length: usize,
        accessibility: PageAccessibility,
    ) -> Result<()> {
        self.try_set_access(address, length, accessibility)
    }

    /// There is no way to drop the contents of pages while keeping them
    /// committed, so this does nothing.
    pub fn discard_system_pages(&self, _address: VirtualAddress, _length: usize) {}

    /// Allocate `length` bytes aligned to `align`.
    ///
    /// Both must be multiples of the allocation granularity and `align` a
    /// power of two. An exact-size allocation is tried first, at the hint and
    /// then anywhere. If it comes back misaligned it is replaced by an
    /// allocation padded by `align - granularity`, trimmed to the aligned
    /// range inside it.
    pub fn alloc_pages(
        &self,
        hint: Option<VirtualAddress>,
        length: usize,
        align: usize,
        accessibility: PageAccessibility,
        commit: bool,
    ) -> Result<PageAllocation<'_, S>> {
        assert!(
            length != 0 && length % ALLOCATION_GRANULARITY == 0,
            "Allocation length 0x{:x} is not a multiple of the allocation granularity.",
            length
        );
        assert!(
            align.is_power_of_two() && align >= ALLOCATION_GRANULARITY,
            "Alignment 0x{:x} is not a power of two multiple of the allocation granularity.",
            align
        );
        let hint = hint.map(|h| h.prev_aligned(align));

        let exact = match hint {
            Some(h) => self
                .alloc_pages_internal(Some(h), length, accessibility, commit)
                .or_else(|_| self.alloc_pages_internal(None, length, accessibility, commit)),
            None => self.alloc_pages_internal(None, length, accessibility, commit),
        }?;
        if exact.is_aligned(align) {
            return Ok(PageAllocation::new(self, hint, exact, length, accessibility, commit));
        }

        self.free_pages(exact, length);
        let padded_length = length
            .checked_add(align - ALLOCATION_GRANULARITY)
            .ok_or_else(|| record_alloc_error(ApiError::NotEnoughMemory))?;
        let padded = self.alloc_pages_internal(None, padded_length, accessibility, commit)?;
        let aligned = padded.next_aligned(align);
        let pre_slack = aligned - padded;
        let post_slack = padded_length - pre_slack - length;
        debug!(
            "Trimming {} +0x{:x} to {} +0x{:x}.",
            padded, padded_length, aligned, length
        );
        let base = self.trim_mapping(
            padded,
            padded_length,
            length,
            accessibility,
            commit,
            pre_slack,
            post_slack,
        )?;
        Ok(PageAllocation::new(self, hint, base, length, accessibility, commit))
    }

    /// Allocate with an advisory hint: exactly at the hint if possible, else
    /// in high memory, else in low memory. Alignment is obtained by padding,
    /// freeing and allocating again at the aligned address, up to
    /// [`RELAXED_ALLOC_ATTEMPTS`] times. Inaccessible memory is reserved but
    /// not committed.
    pub fn allocate_relaxed(
        &self,
        hint: Option<VirtualAddress>,
        length: usize,
        align: usize,
        accessibility: PageAccessibility,
    ) -> Result<PageAllocation<'_, S>> {
        assert!(
            length != 0 && length % PAGE_SIZE == 0,
            "Allocation length 0x{:x} is not a multiple of the page size.",
            length
        );
        assert!(
            align.is_power_of_two() && align >= ALLOCATION_GRANULARITY,
            "Alignment 0x{:x} is not a power of two multiple of the allocation granularity.",
            align
        );
        let commit = accessibility != PageAccessibility::Inaccessible;
        let mut flags = object_flags(accessibility);
        if commit {
            flags |= PageFlags::COMMIT;
        }
        let hint = hint.map(|h| h.prev_aligned(align));

        let allocate = |hint: Option<VirtualAddress>, length: usize| -> Result<VirtualAddress> {
            let located = match hint {
                Some(h) => self.sys.alloc_mem(Some(h), length, flags, AllocFlags::LOCATION),
                None => Err(ApiError::InvalidAddress),
            };
            located.or_else(|_| self.alloc_anywhere(length, flags))
        };

        let base = allocate(hint, length).map_err(record_alloc_error)?;
        if base.is_aligned(align) {
            return Ok(PageAllocation::new(self, hint, base, length, accessibility, commit));
        }
        self.free_pages(base, length);

        let padded_length = length
            .checked_add(align - ALLOCATION_GRANULARITY)
            .ok_or_else(|| record_alloc_error(ApiError::NotEnoughMemory))?;
        let mut last_err = ApiError::NotEnoughMemory;
        for attempt in 0..RELAXED_ALLOC_ATTEMPTS {
            let padded = allocate(None, padded_length).map_err(record_alloc_error)?;
            let aligned = padded.next_aligned(align);
            self.free_pages(padded, padded_length);
            match self.sys.alloc_mem(Some(aligned), length, flags, AllocFlags::LOCATION) {
                Ok(base) => {
                    return Ok(PageAllocation::new(self, hint, base, length, accessibility, commit))
                }
                Err(e) => {
                    debug!("Aligned allocation attempt {} at {} failed: {}.", attempt + 1, aligned, e);
                    last_err = e;
                }
            }
        }
        Err(record_alloc_error(last_err))
    }
}
