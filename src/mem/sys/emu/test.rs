use super::{Machine, MachineConfig};
use crate::consts::{ALLOCATION_GRANULARITY, PAGE_SIZE};
use crate::error::ApiError;
use crate::mem::sys::{SegmentMemory, ShmemHandles};
use crate::mem::{AllocFlags, PageFlags, ShmemFlags, VirtualAddress};

const RW: PageFlags = PageFlags::from_bits_truncate(0x3);
const RW_COMMIT: PageFlags = PageFlags::from_bits_truncate(0x13);

#[test]
fn allocations_are_granularity_aligned() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    let a = proc.alloc_mem(None, 1, RW_COMMIT, AllocFlags::empty()).unwrap();
    let b = proc.alloc_mem(None, 1, RW_COMMIT, AllocFlags::empty()).unwrap();
    assert!(a.is_aligned(ALLOCATION_GRANULARITY));
    assert!(b.is_aligned(ALLOCATION_GRANULARITY));
    assert_eq!(b - a, ALLOCATION_GRANULARITY);
    assert_eq!(proc.object_count(), 2);
    assert_eq!(machine.committed_bytes(), 2 * PAGE_SIZE);
}

#[test]
fn permissions_are_required() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    assert_eq!(
        proc.alloc_mem(None, PAGE_SIZE, PageFlags::COMMIT, AllocFlags::empty()),
        Err(ApiError::InvalidParameter)
    );
    assert_eq!(
        proc.alloc_mem(None, 0, RW, AllocFlags::empty()),
        Err(ApiError::InvalidParameter)
    );
}

#[test]
fn any_uses_high_memory() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    let a = proc.alloc_mem(None, PAGE_SIZE, RW, AllocFlags::ANY).unwrap();
    assert!(machine.config().high_arena.as_ref().unwrap().contains(&a.raw()));

    let machine = Machine::new(MachineConfig {
        high_arena: None,
        ..MachineConfig::default()
    });
    let proc = machine.spawn();
    assert_eq!(
        proc.alloc_mem(None, PAGE_SIZE, RW, AllocFlags::ANY),
        Err(ApiError::InvalidParameter)
    );
}

#[test]
fn location_is_exact() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    let hint = VirtualAddress::new(0x0100_0000);
    let a = proc
        .alloc_mem(Some(hint), PAGE_SIZE, RW, AllocFlags::LOCATION)
        .unwrap();
    assert_eq!(a, hint);
    assert_eq!(
        proc.alloc_mem(Some(hint), PAGE_SIZE, RW, AllocFlags::LOCATION),
        Err(ApiError::InvalidAddress)
    );
    assert_eq!(
        proc.alloc_mem(
            Some(hint + PAGE_SIZE),
            PAGE_SIZE,
            RW,
            AllocFlags::LOCATION
        ),
        Err(ApiError::InvalidAddress)
    );
}

#[test]
fn redundant_commit_and_decommit_fail() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    let a = proc
        .alloc_mem(None, 4 * PAGE_SIZE, RW_COMMIT, AllocFlags::empty())
        .unwrap();
    assert_eq!(
        proc.set_mem(a, PAGE_SIZE, RW_COMMIT),
        Err(ApiError::AccessDenied)
    );
    proc.set_mem(a, PAGE_SIZE, PageFlags::DECOMMIT).unwrap();
    assert_eq!(
        proc.set_mem(a, 2 * PAGE_SIZE, PageFlags::DECOMMIT),
        Err(ApiError::AccessDenied)
    );
    assert_eq!(machine.committed_bytes(), 3 * PAGE_SIZE);
    proc.set_mem(a, PAGE_SIZE, RW_COMMIT).unwrap();
    assert_eq!(machine.committed_bytes(), 4 * PAGE_SIZE);
}

#[test]
fn query_reports_runs() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    let a = proc
        .alloc_mem(None, 4 * PAGE_SIZE, RW_COMMIT, AllocFlags::empty())
        .unwrap();
    proc.set_mem(a + 2 * PAGE_SIZE, PAGE_SIZE, PageFlags::DECOMMIT)
        .unwrap();

    let info = proc.query_mem(a, 4 * PAGE_SIZE).unwrap();
    assert_eq!(info.length, 2 * PAGE_SIZE);
    assert_eq!(info.flags, RW_COMMIT | PageFlags::BASE);

    let info = proc.query_mem(a + 2 * PAGE_SIZE + 12, 2 * PAGE_SIZE).unwrap();
    assert_eq!(info.length, PAGE_SIZE);
    assert_eq!(info.flags, RW);

    let info = proc.query_mem(a + 4 * PAGE_SIZE, PAGE_SIZE).unwrap();
    assert_eq!(info.flags, PageFlags::FREE);
}

#[test]
fn stores_honor_permissions() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    let a = proc
        .alloc_mem(None, 2 * PAGE_SIZE, RW_COMMIT, AllocFlags::empty())
        .unwrap();
    proc.write(a + (PAGE_SIZE - 2), &[1, 2, 3, 4]).unwrap();
    let mut buf = [0; 4];
    proc.read(a + (PAGE_SIZE - 2), &mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3, 4]);

    proc.set_mem(a + PAGE_SIZE, PAGE_SIZE, PageFlags::READ).unwrap();
    assert_eq!(
        proc.write(a + PAGE_SIZE, &[0]),
        Err(ApiError::AccessViolation {
            address: a + PAGE_SIZE
        })
    );
    proc.set_mem(a, PAGE_SIZE, PageFlags::DECOMMIT).unwrap();
    assert_eq!(
        proc.read(a, &mut buf),
        Err(ApiError::AccessViolation { address: a })
    );
}

#[test]
fn commit_limit() {
    let machine = Machine::new(MachineConfig {
        commit_limit: 4 * PAGE_SIZE,
        ..MachineConfig::default()
    });
    let proc = machine.spawn();
    let a = proc
        .alloc_mem(None, 4 * PAGE_SIZE, RW_COMMIT, AllocFlags::empty())
        .unwrap();
    assert_eq!(
        proc.alloc_mem(None, PAGE_SIZE, RW_COMMIT, AllocFlags::empty()),
        Err(ApiError::NotEnoughMemory)
    );
    proc.free_mem(a).unwrap();
    assert_eq!(machine.committed_bytes(), 0);
}

#[test]
fn shared_objects_across_processes() {
    let machine = Machine::new(MachineConfig::default());
    let first = machine.spawn();
    let second = machine.spawn();
    let base = first
        .alloc_shared_mem(PAGE_SIZE, RW_COMMIT, AllocFlags::GETTABLE)
        .unwrap();
    first.write(base, b"shared").unwrap();

    second.get_shared_mem(base, RW).unwrap();
    assert_eq!(second.get_shared_mem(base, RW), Err(ApiError::AccessDenied));
    let mut buf = [0; 6];
    second.read(base, &mut buf).unwrap();
    assert_eq!(&buf, b"shared");
    assert!(second.query_mem(base, PAGE_SIZE).unwrap().flags.contains(PageFlags::SHARED | PageFlags::BASE));

    first.free_mem(base).unwrap();
    assert!(machine.has_shared_object(base.raw()));
    drop(second);
    assert!(!machine.has_shared_object(base.raw()));
}

#[test]
fn aliases_have_their_own_permissions() {
    let machine = Machine::new(MachineConfig::default());
    let proc = machine.spawn();
    let a = proc
        .alloc_mem(None, 2 * PAGE_SIZE, RW_COMMIT, AllocFlags::empty())
        .unwrap();
    let alias = proc.alias_mem(a + PAGE_SIZE + 8, 8, AllocFlags::empty()).unwrap();
    assert_eq!(alias.offset_in(PAGE_SIZE), 8);

    proc.set_mem(alias.prev_aligned(PAGE_SIZE), PAGE_SIZE, PageFlags::READ)
        .unwrap();
    proc.write(a + PAGE_SIZE + 8, &[7]).unwrap();
    let mut buf = [0];
    proc.read(alias, &mut buf).unwrap();
    assert_eq!(buf, [7]);
    assert!(proc.write(alias, &[8]).is_err());

    proc.free_mem(alias.prev_aligned(PAGE_SIZE)).unwrap();
    proc.read(a + PAGE_SIZE + 8, &mut buf).unwrap();
}

#[test]
fn shmem_handles() {
    let machine = Machine::new(MachineConfig::default());
    let first = machine.spawn();
    let second = machine.spawn();
    let handle = first.shmem_create(100, ShmemFlags::empty()).unwrap();
    let info = first.shmem_get_info(handle).unwrap();
    assert_eq!((info.size, info.actual_size), (100, PAGE_SIZE));

    let ro = first.shmem_duplicate(handle, ShmemFlags::READONLY).unwrap();
    let writable = first.shmem_map(handle, 0, 100).unwrap();
    first.write(writable + 10, &[42]).unwrap();

    let view = second.shmem_map(ro, 10, 1).unwrap();
    let mut buf = [0];
    second.read(view, &mut buf).unwrap();
    assert_eq!(buf, [42]);
    assert!(second.write(view, &[0]).is_err());
    assert_eq!(second.free_mem(view.prev_aligned(PAGE_SIZE)), Err(ApiError::AccessDenied));

    first.shmem_close(handle).unwrap();
    assert_eq!(first.shmem_close(handle), Err(ApiError::InvalidHandle));
    second.shmem_close(ro).unwrap();
    assert_eq!(machine.shared_objects(), 0);
    second.read(view, &mut buf).unwrap();
    second.shmem_unmap(view).unwrap();
    first.shmem_unmap(writable).unwrap();
}
