//! Per-process address spaces.

use core::ops::Range;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::backing::Backing;
use crate::consts::{ALLOCATION_GRANULARITY, PAGE_SIZE};
use crate::mem::{checked_align_up, PageFlags};

/// How a view came to be, which decides what freeing it means.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum ViewKind {
    /// A private object.
    Private,
    /// The attachment of a shared object at its base address.
    SharedBase,
    /// A private view of another view's frames.
    Alias,
    /// A mapping made through a shmem handle.
    ShmemMapping,
}

/// An object as seen from one process.
pub(super) struct View {
    pub len: usize,
    pub kind: ViewKind,
    pub backing: Arc<Backing>,
    /// Index of this view's first page in `backing`.
    pub first_frame: usize,
    /// Permissions of each page.
    pub perms: Vec<PageFlags>,
    /// Permissions given at allocation, used by `PageFlags::DEFAULT`.
    pub default_perms: PageFlags,
}

impl View {
    pub fn new(
        kind: ViewKind,
        backing: Arc<Backing>,
        first_frame: usize,
        len: usize,
        perms: PageFlags,
    ) -> View {
        View {
            len,
            kind,
            backing,
            first_frame,
            perms: vec![perms; len / PAGE_SIZE],
            default_perms: perms,
        }
    }

    pub fn pages(&self) -> usize {
        self.len / PAGE_SIZE
    }

    /// Backing frames of the given pages of this view.
    pub fn frames(&self, pages: Range<usize>) -> Range<usize> {
        self.first_frame + pages.start..self.first_frame + pages.end
    }

    pub fn is_committed(&self, page: usize) -> bool {
        self.backing.is_committed(self.first_frame + page)
    }
}

#[derive(Default)]
pub(super) struct AddressSpace {
    pub views: BTreeMap<usize, View>,
}

impl AddressSpace {
    /// The view containing `address`, with its base.
    pub fn find(&self, address: usize) -> Option<(usize, &View)> {
        self.views
            .range(..=address)
            .next_back()
            .filter(|(base, view)| address < *base + view.len)
            .map(|(base, view)| (*base, view))
    }

    pub fn find_mut(&mut self, address: usize) -> Option<(usize, &mut View)> {
        self.views
            .range_mut(..=address)
            .next_back()
            .filter(|(base, view)| address < **base + view.len)
            .map(|(base, view)| (*base, view))
    }

    /// Whether no view overlaps `[start, start + len)`.
    pub fn is_range_free(&self, start: usize, len: usize) -> bool {
        let end = match start.checked_add(len) {
            Some(end) => end,
            None => return false,
        };
        if self.find(start).is_some() {
            return false;
        }
        self.views.range(start..end).next().is_none()
    }

    /// Base of the first view at or after `address`.
    pub fn next_view_after(&self, address: usize) -> Option<usize> {
        self.views.range(address..).next().map(|(base, _)| *base)
    }

    /// Lowest granularity-aligned address in `arena` where `len` bytes fit.
    pub fn find_free(&self, arena: &Range<usize>, len: usize) -> Option<usize> {
        first_fit(self.views.iter().map(|(base, v)| (*base, v.len)), arena, len)
    }

    pub fn count(&self, kind: ViewKind) -> usize {
        self.views.values().filter(|v| v.kind == kind).count()
    }
}

/// Lowest granularity-aligned address in `arena` where `len` bytes fit among
/// the `(base, len)` ranges, which must be sorted by base.
pub(super) fn first_fit(
    occupied: impl Iterator<Item = (usize, usize)>,
    arena: &Range<usize>,
    len: usize,
) -> Option<usize> {
    let mut candidate = checked_align_up(arena.start, ALLOCATION_GRANULARITY)?;
    for (base, size) in occupied {
        let end = base + size;
        if end <= candidate {
            continue;
        }
        if base >= candidate.checked_add(len)? {
            break;
        }
        candidate = checked_align_up(end, ALLOCATION_GRANULARITY)?;
    }

    match candidate.checked_add(len) {
        Some(end) if end <= arena.end => Some(candidate),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::first_fit;

    const G: usize = 0x1_0000;

    #[test]
    fn empty_arena() {
        assert_eq!(first_fit(core::iter::empty(), &(G..16 * G), G), Some(G));
        assert_eq!(first_fit(core::iter::empty(), &(G..2 * G), 2 * G), None);
    }

    #[test]
    fn skips_occupied() {
        let occupied = vec![(G, 0x1000), (2 * G, 3 * G)];
        assert_eq!(first_fit(occupied.into_iter(), &(G..16 * G), G), Some(5 * G));
    }

    #[test]
    fn fits_in_hole() {
        let occupied = vec![(G, G), (4 * G, G)];
        assert_eq!(first_fit(occupied.into_iter(), &(G..16 * G), 2 * G), Some(2 * G));
    }
}
