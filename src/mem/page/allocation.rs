//! An owned run of pages.

use core::fmt;

use super::PageAllocator;
use crate::error::Result;
use crate::mem::sys::SegmentMemory;
use crate::mem::{PageAccessibility, VirtualAddress};

/// Pages handed out by [`PageAllocator::alloc_pages`] or
/// [`PageAllocator::allocate_relaxed`]. Must be released with
/// [`PageAllocation::free`]; dropping one leaks the pages.
#[must_use = "Pages must be freed."]
pub struct PageAllocation<'a, S: SegmentMemory> {
    allocator: &'a PageAllocator<S>,
    hint: Option<VirtualAddress>,
    base: VirtualAddress,
    length: usize,
    accessibility: PageAccessibility,
    committed: bool,
}

impl<'a, S: SegmentMemory> PageAllocation<'a, S> {
    pub(super) fn new(
        allocator: &'a PageAllocator<S>,
        hint: Option<VirtualAddress>,
        base: VirtualAddress,
        length: usize,
        accessibility: PageAccessibility,
        committed: bool,
    ) -> Self {
        PageAllocation {
            allocator,
            hint,
            base,
            length,
            accessibility,
            committed,
        }
    }

    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The hint the allocation was requested with, after alignment.
    pub fn hint(&self) -> Option<VirtualAddress> {
        self.hint
    }

    pub fn accessibility(&self) -> PageAccessibility {
        self.accessibility
    }

    /// Whether the pages are committed, as far as this allocation knows.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether `address` falls within the allocation.
    pub fn contains(&self, address: VirtualAddress) -> bool {
        self.base <= address && address - self.base < self.length
    }

    pub fn try_set_access(&mut self, accessibility: PageAccessibility) -> Result<()> {
        self.allocator
            .try_set_access(self.base, self.length, accessibility)?;
        self.record(accessibility);
        Ok(())
    }

    pub fn set_access(&mut self, accessibility: PageAccessibility) {
        self.allocator
            .set_access(self.base, self.length, accessibility);
        self.record(accessibility);
    }

    pub fn decommit(&mut self) {
        self.allocator.decommit_system_pages(self.base, self.length);
        self.record(PageAccessibility::Inaccessible);
    }

    pub fn recommit(&mut self, accessibility: PageAccessibility) -> Result<()> {
        self.allocator
            .recommit_system_pages(self.base, self.length, accessibility)?;
        self.record(accessibility);
        Ok(())
    }

    pub fn discard(&self) {
        self.allocator.discard_system_pages(self.base, self.length);
    }

    pub fn free(self) {
        self.allocator.free_pages(self.base, self.length);
    }

    fn record(&mut self, accessibility: PageAccessibility) {
        self.accessibility = accessibility;
        self.committed = accessibility != PageAccessibility::Inaccessible;
    }
}

impl<S: SegmentMemory> fmt::Debug for PageAllocation<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PageAllocation")
            .field("base", &self.base)
            .field("length", &self.length)
            .field("accessibility", &self.accessibility)
            .field("committed", &self.committed)
            .finish()
    }
}
