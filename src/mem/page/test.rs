use std::sync::Arc;

use super::{last_alloc_error, object_flags, oom, PageAllocator};
use crate::consts::{ALLOCATION_GRANULARITY, PAGE_SIZE};
use crate::error::ApiError;
use crate::mem::sys::emu::{Machine, MachineConfig, Process};
use crate::mem::sys::SegmentMemory;
use crate::mem::{PageAccessibility, PageFlags, VirtualAddress};

fn allocator_with(config: MachineConfig) -> PageAllocator<Arc<Process>> {
    PageAllocator::new(Machine::new(config).spawn())
}

fn allocator() -> PageAllocator<Arc<Process>> {
    allocator_with(MachineConfig::default())
}

fn flags_at(pages: &PageAllocator<Arc<Process>>, address: VirtualAddress) -> PageFlags {
    pages.sys().query_mem(address, PAGE_SIZE).unwrap().flags
}

#[test]
fn allocate_then_free() {
    let pages = allocator();
    for &length in &[PAGE_SIZE, 3 * PAGE_SIZE, ALLOCATION_GRANULARITY] {
        let base = pages
            .alloc_pages_internal(None, length, PageAccessibility::ReadWrite, true)
            .unwrap();
        pages.free_pages(base, length);
        assert_eq!(flags_at(&pages, base), PageFlags::FREE);
        let again = pages
            .alloc_pages_internal(Some(base), length, PageAccessibility::ReadWrite, true)
            .unwrap();
        assert_eq!(again, base);
        pages.free_pages(again, length);
    }
}

#[test]
fn high_memory_first() {
    let pages = allocator();
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::Read, false)
        .unwrap();
    let high = pages.sys().machine().config().high_arena.clone().unwrap();
    assert!(high.contains(&base.raw()));

    let pages = allocator_with(MachineConfig {
        high_arena: None,
        ..MachineConfig::default()
    });
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::Read, false)
        .unwrap();
    assert!(pages.sys().machine().config().low_arena.contains(&base.raw()));
}

#[test]
fn inaccessible_objects_are_readable() {
    assert_eq!(object_flags(PageAccessibility::Inaccessible), PageFlags::READ);
    for a in PageAccessibility::ALL.iter().copied() {
        assert!(!object_flags(a).is_empty());
    }

    let pages = allocator();
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::Inaccessible, false)
        .unwrap();
    let flags = flags_at(&pages, base);
    assert_eq!(flags.permissions(), PageFlags::READ);
    assert!(!flags.contains(PageFlags::COMMIT));
}

#[test]
fn hint_is_mandatory() {
    let pages = allocator();
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::ReadWrite, true)
        .unwrap();
    assert_eq!(
        pages.alloc_pages_internal(Some(base), PAGE_SIZE, PageAccessibility::ReadWrite, true),
        Err(ApiError::InvalidAddress)
    );
    assert_eq!(last_alloc_error(), Some(ApiError::InvalidAddress));
}

#[test]
fn set_access_is_idempotent() {
    let pages = allocator();
    let length = 4 * PAGE_SIZE;
    let base = pages
        .alloc_pages_internal(None, length, PageAccessibility::Inaccessible, false)
        .unwrap();

    pages.set_access(base, length, PageAccessibility::ReadWrite);
    pages.set_access(base, length, PageAccessibility::ReadWrite);
    assert_eq!(
        flags_at(&pages, base).permissions(),
        PageFlags::READ | PageFlags::WRITE
    );

    pages.set_access(base, length, PageAccessibility::Inaccessible);
    pages.set_access(base, length, PageAccessibility::Inaccessible);
    assert!(!flags_at(&pages, base).contains(PageFlags::COMMIT));
    assert_eq!(pages.sys().machine().committed_bytes(), 0);
}

#[test]
fn set_access_over_mixed_runs() {
    let pages = allocator();
    let length = 4 * PAGE_SIZE;
    let base = pages
        .alloc_pages_internal(None, length, PageAccessibility::ReadWrite, true)
        .unwrap();

    pages.decommit_system_pages(base + PAGE_SIZE, PAGE_SIZE);
    pages
        .try_set_access(base + 3 * PAGE_SIZE, PAGE_SIZE, PageAccessibility::Read)
        .unwrap();
    pages.set_access(base, length, PageAccessibility::ReadWrite);

    let info = pages.sys().query_mem(base, length).unwrap();
    assert_eq!(info.length, length);
    assert!(info.flags.contains(PageFlags::COMMIT | PageFlags::READ | PageFlags::WRITE));

    pages.decommit_system_pages(base, 2 * PAGE_SIZE);
    pages.decommit_system_pages(base, length);
    assert_eq!(pages.sys().machine().committed_bytes(), 0);
}

#[test]
fn recommit_restores_access() {
    let pages = allocator();
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::ReadWrite, true)
        .unwrap();
    pages.sys().write(base, &[9]).unwrap();
    pages.decommit_system_pages(base, PAGE_SIZE);
    assert!(pages.sys().write(base, &[9]).is_err());
    pages
        .recommit_system_pages(base, PAGE_SIZE, PageAccessibility::ReadWrite)
        .unwrap();
    let mut buf = [1];
    pages.sys().read(base, &mut buf).unwrap();
    assert_eq!(buf, [0]);
    pages.discard_system_pages(base, PAGE_SIZE);
}

#[test]
fn try_set_access_reports_errors() {
    let pages = allocator();
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::ReadWrite, true)
        .unwrap();
    pages.free_pages(base, PAGE_SIZE);
    assert_eq!(
        pages.try_set_access(base, PAGE_SIZE, PageAccessibility::ReadWrite),
        Err(ApiError::InvalidAddress)
    );
    // Nothing to decommit in a free range.
    pages
        .try_set_access(base, PAGE_SIZE, PageAccessibility::Inaccessible)
        .unwrap();
}

#[test]
#[should_panic(expected = "Page access change failed")]
fn set_access_on_free_memory_panics() {
    let pages = allocator();
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::ReadWrite, true)
        .unwrap();
    pages.free_pages(base, PAGE_SIZE);
    pages.set_access(base, PAGE_SIZE, PageAccessibility::Read);
}

fn panicking_oom_hook(size: usize) {
    panic!("Out of memory: 0x{:x} bytes.", size);
}

#[test]
#[should_panic(expected = "Out of memory: 0x4000 bytes.")]
fn commit_failure_is_fatal() {
    oom::set_oom_hook(Some(panicking_oom_hook));
    let pages = allocator_with(MachineConfig {
        commit_limit: 2 * PAGE_SIZE,
        ..MachineConfig::default()
    });
    let base = pages
        .alloc_pages_internal(None, 4 * PAGE_SIZE, PageAccessibility::Inaccessible, false)
        .unwrap();
    pages.set_access(base, 4 * PAGE_SIZE, PageAccessibility::ReadWrite);
}

#[test]
fn trim_without_slack_keeps_base() {
    let pages = allocator();
    let base = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::Read, true)
        .unwrap();
    let trimmed = pages
        .trim_mapping(base, PAGE_SIZE, PAGE_SIZE, PageAccessibility::Read, true, 0, 0)
        .unwrap();
    assert_eq!(trimmed, base);
}

#[test]
fn trim_reallocates_inside() {
    let pages = allocator();
    let length = 4 * ALLOCATION_GRANULARITY;
    let base = pages
        .alloc_pages_internal(None, length, PageAccessibility::ReadWrite, true)
        .unwrap();
    let trimmed = pages
        .trim_mapping(
            base,
            length,
            ALLOCATION_GRANULARITY,
            PageAccessibility::ReadWrite,
            true,
            ALLOCATION_GRANULARITY,
            2 * ALLOCATION_GRANULARITY,
        )
        .unwrap();
    assert_eq!(trimmed, base + ALLOCATION_GRANULARITY);
    assert_eq!(flags_at(&pages, base), PageFlags::FREE);
    assert_eq!(pages.sys().machine().committed_bytes(), ALLOCATION_GRANULARITY);
}

#[test]
fn aligned_allocation() {
    let pages = allocator();
    let align = 4 * ALLOCATION_GRANULARITY;
    // Push the next free address off the alignment boundary.
    let filler = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::Read, false)
        .unwrap();

    let allocation = pages
        .alloc_pages(None, ALLOCATION_GRANULARITY, align, PageAccessibility::ReadWrite, true)
        .unwrap();
    assert!(allocation.base().is_aligned(align));
    assert_eq!(allocation.hint(), None);
    assert_eq!(allocation.len(), ALLOCATION_GRANULARITY);
    assert!(allocation.is_committed());
    assert!(!allocation.contains(filler));
    allocation.free();
    pages.free_pages(filler, PAGE_SIZE);
    assert_eq!(pages.sys().machine().committed_bytes(), 0);
}

#[test]
fn allocation_lifecycle() {
    let pages = allocator();
    let mut allocation = pages
        .alloc_pages(None, ALLOCATION_GRANULARITY, ALLOCATION_GRANULARITY, PageAccessibility::Inaccessible, false)
        .unwrap();
    assert!(!allocation.is_committed());

    allocation.set_access(PageAccessibility::ReadWrite);
    pages.sys().write(allocation.base(), b"pages").unwrap();
    allocation.decommit();
    assert!(!allocation.is_committed());
    allocation.recommit(PageAccessibility::Read).unwrap();
    assert_eq!(allocation.accessibility(), PageAccessibility::Read);
    allocation.discard();
    allocation.try_set_access(PageAccessibility::ReadWrite).unwrap();
    allocation.free();
    assert_eq!(pages.sys().machine().stats().private_objects, 0);
}

#[test]
fn relaxed_hint_is_advisory() {
    let pages = allocator();
    let taken = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::Read, false)
        .unwrap();
    let allocation = pages
        .allocate_relaxed(Some(taken), PAGE_SIZE, ALLOCATION_GRANULARITY, PageAccessibility::ReadWrite)
        .unwrap();
    assert_ne!(allocation.base(), taken);
    assert_eq!(allocation.hint(), Some(taken));
    assert!(allocation.is_committed());
    allocation.free();

    let hint = VirtualAddress::new(0x0400_0000);
    let allocation = pages
        .allocate_relaxed(Some(hint), PAGE_SIZE, ALLOCATION_GRANULARITY, PageAccessibility::Inaccessible)
        .unwrap();
    assert_eq!(allocation.base(), hint);
    assert_eq!(allocation.hint(), Some(hint));
    assert!(!flags_at(&pages, hint).contains(PageFlags::COMMIT));
    allocation.free();
}

#[test]
fn relaxed_alignment() {
    let pages = allocator();
    let align = 16 * ALLOCATION_GRANULARITY;
    let filler = pages
        .alloc_pages_internal(None, PAGE_SIZE, PageAccessibility::Read, false)
        .unwrap();
    let allocation = pages
        .allocate_relaxed(None, 2 * PAGE_SIZE, align, PageAccessibility::Read)
        .unwrap();
    assert!(allocation.base().is_aligned(align));
    allocation.free();
    pages.free_pages(filler, PAGE_SIZE);
}
