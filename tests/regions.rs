//! Shared memory regions across emulated processes.

use std::sync::Arc;

use futures::future;
use segmem::mem::sys::emu::{Machine, MachineConfig, Process};
use segmem::shmem::transfer::RegionTransfer;
use segmem::shmem::{DefaultBackend, ReadOnlySharedMemoryRegion, SharedMemoryTracker};
use segmem::{Mode, SharedMemoryRegion};

type Backend = DefaultBackend<Arc<Process>>;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_in_many_processes() {
    static READERS: usize = 6;

    let machine = Machine::new(MachineConfig::default());
    let writer = Arc::new(Backend::new(machine.spawn()));
    let mapped = ReadOnlySharedMemoryRegion::create(&writer, 1000).unwrap();
    for i in 0..10 {
        mapped.mapping.fill(i * 100, 100, i as u8).unwrap();
    }
    let guid = mapped.region.guid();

    let mut handles = Vec::new();
    for _ in 0..READERS {
        let wire = mapped.region.duplicate().unwrap().into_transfer().encode();
        let backend = Arc::new(Backend::new(machine.spawn()));
        handles.push(tokio::spawn(async move {
            let transfer = RegionTransfer::decode(wire).unwrap();
            let region = SharedMemoryRegion::from_transfer(&backend, transfer).unwrap();
            assert_eq!(region.mode(), Mode::ReadOnly);
            assert_eq!(region.size(), 1000);

            let mapping = region.map_at(500, 100).unwrap();
            let mut buf = [0; 100];
            mapping.read(0, &mut buf).unwrap();
            assert_eq!(buf, [5; 100]);
            assert!(mapping.write(0, &[0]).is_err());
            region.guid()
        }));
    }

    for result in future::join_all(handles).await {
        assert_eq!(result.unwrap(), guid);
    }
    assert_eq!(SharedMemoryTracker::the().usage(guid).unwrap().mappings, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remap_after_unmap() {
    let machine = Machine::new(MachineConfig::default());
    let backend = Arc::new(Backend::new(machine.spawn()));
    let mut region = SharedMemoryRegion::create(&backend, Mode::Writable, 100).unwrap();
    region.convert_to_unsafe().unwrap();
    let region = Arc::new(region);

    let handles = (0..4u8).map(|i| {
        let region = region.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                let mapping = region.map_at(i as usize * 25, 25).unwrap();
                mapping.write(0, &[i; 25]).unwrap();
                mapping.unmap().unwrap();
            }
        })
    });
    for result in future::join_all(handles).await {
        result.unwrap();
    }

    let mapping = region.map().unwrap();
    let mut buf = [0; 100];
    mapping.read(0, &mut buf).unwrap();
    for (i, chunk) in buf.chunks(25).enumerate() {
        assert!(chunk.iter().all(|b| *b == i as u8));
    }
    assert!(region.map_at(100, 1).is_err());

    drop(mapping);
    drop(region);
    assert_eq!(machine.shared_objects(), 0);
}
