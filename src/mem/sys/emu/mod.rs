//! An in-process emulation of a segment-object memory system.
//!
//! A [`Machine`] owns the shared state of the system: physical commit
//! accounting, the shared arena with its shared objects, and the global shmem
//! handle table. Each [`Process`] has a private address space split into a low
//! and a high arena. The primitives reproduce the behaviors the layers above
//! must cope with:
//!
//! - allocation objects start on 64 KiB boundaries and are sized in pages,
//! - an object needs at least one permission bit even when reserved,
//! - committing a committed page or decommitting an uncommitted one fails,
//! - placement at a given address fails if any page there is taken,
//! - shared objects live at the same address in every process and are only
//!   ever attached as a whole,
//! - an alias is a private view of the same frames with its own permissions.

mod backing;
mod process;
mod shmem;
mod space;
#[cfg(test)]
mod test;

use core::ops::Range;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use log_crate::debug;

use crate::consts::{ALLOCATION_GRANULARITY, PAGE_SIZE};
use crate::error::{ApiError, Result};
use crate::mem::sys::MemoryStats;
use crate::mem::{size, PageFlags};
use crate::util::sync::Spinlock;
use backing::Backing;
use space::AddressSpace;

pub use process::{Process, ProcessId};

/// Layout and limits of an emulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Private memory below the shared arena.
    pub low_arena: Range<usize>,
    /// Where shared objects live, at the same address in every process.
    pub shared_arena: Range<usize>,
    /// Private high memory, requested with `AllocFlags::ANY`. `None` models a
    /// system without high memory support.
    pub high_arena: Option<Range<usize>>,
    /// Bytes of storage that can be committed machine-wide.
    pub commit_limit: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            low_arena: 0x0001_0000..0x1000_0000,
            shared_arena: 0x1000_0000..0x2000_0000,
            high_arena: Some(0x2000_0000..0xC000_0000),
            commit_limit: 512 * size::MB,
        }
    }
}

impl MachineConfig {
    fn arenas(&self) -> impl Iterator<Item = &Range<usize>> {
        core::iter::once(&self.low_arena)
            .chain(core::iter::once(&self.shared_arena))
            .chain(self.high_arena.iter())
    }

    /// Private arenas, in the order aliases and mappings are placed.
    fn private_arenas(&self) -> impl Iterator<Item = &Range<usize>> {
        core::iter::once(&self.low_arena).chain(self.high_arena.iter())
    }
}

/// A shared object and what keeps it alive.
struct SharedObject {
    /// Size in bytes, a page multiple.
    len: usize,
    /// Size asked for at creation.
    requested: usize,
    backing: Arc<Backing>,
    gettable: bool,
    /// Processes with a base view.
    attached: usize,
    /// Open shmem handles.
    handles: usize,
}

struct HandleEntry {
    object: usize,
    read_only: bool,
}

#[derive(Default)]
struct MachineState {
    objects: BTreeMap<usize, SharedObject>,
    handles: HashMap<i32, HandleEntry>,
    next_handle: i32,
    spaces: HashMap<ProcessId, AddressSpace>,
}

impl MachineState {
    fn space(&mut self, pid: ProcessId) -> &mut AddressSpace {
        self.spaces
            .get_mut(&pid)
            .expect("Memory call from a process that has exited.")
    }

    /// Destroy the object at `base` if no attachment or handle refers to it.
    fn release_if_unused(&mut self, base: usize) {
        let unused = self
            .objects
            .get(&base)
            .map_or(false, |o| o.attached == 0 && o.handles == 0);
        if unused {
            self.objects.remove(&base);
            debug!("Destroyed shared object at 0x{:x}.", base);
        }
    }

    /// Remove the calling process's base view of the shared object at `base`.
    fn detach(&mut self, pid: ProcessId, base: usize) {
        if let Some(object) = self.objects.get_mut(&base) {
            object.attached -= 1;
        }
        self.space(pid).views.remove(&base);
        self.release_if_unused(base);
    }
}

/// An emulated machine: the shared half of the memory system.
pub struct Machine {
    config: MachineConfig,
    /// Committed frames, machine-wide.
    committed: Arc<AtomicUsize>,
    state: Spinlock<MachineState>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Arc<Machine> {
        for arena in config.arenas() {
            assert!(
                arena.start % ALLOCATION_GRANULARITY == 0 && arena.end % ALLOCATION_GRANULARITY == 0,
                "Arena 0x{:x}-0x{:x} is not aligned to the allocation granularity.",
                arena.start,
                arena.end
            );
        }
        Arc::new(Machine {
            config,
            committed: Arc::new(AtomicUsize::new(0)),
            state: Spinlock::new(MachineState {
                next_handle: 1,
                ..MachineState::default()
            }),
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Start a process with an empty address space.
    pub fn spawn(self: &Arc<Self>) -> Arc<Process> {
        let pid = ProcessId::new();
        self.state.lock().spaces.insert(pid, AddressSpace::default());
        debug!("Spawned process {}.", pid.raw());
        Arc::new(Process::new(self.clone(), pid))
    }

    /// Number of live shared objects.
    pub fn shared_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Whether a shared object exists at `base`.
    pub fn has_shared_object(&self, base: usize) -> bool {
        self.state.lock().objects.contains_key(&base)
    }

    pub fn committed_bytes(&self) -> usize {
        self.committed.load(Ordering::Acquire) * PAGE_SIZE
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        MemoryStats {
            committed_bytes: self.committed_bytes(),
            commit_limit: self.config.commit_limit,
            shared_objects: state.objects.len(),
            private_objects: state
                .spaces
                .values()
                .map(|s| s.count(space::ViewKind::Private) + s.count(space::ViewKind::Alias))
                .sum(),
        }
    }

    /// Take `pages` frames from the commit budget.
    fn charge(&self, pages: usize) -> Result<()> {
        let limit = self.config.commit_limit / PAGE_SIZE;
        self.committed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                c.checked_add(pages).filter(|n| *n <= limit)
            })
            .map(|_| ())
            .map_err(|_| ApiError::NotEnoughMemory)
    }

    fn new_backing(&self, pages: usize) -> Arc<Backing> {
        Backing::new(pages, self.committed.clone())
    }

    /// The arena containing `address`, if any.
    fn arena_of(&self, address: usize) -> Option<&Range<usize>> {
        self.config.arenas().find(|a| a.contains(&address))
    }

    /// Whether `[start, start + len)` lies entirely in one private arena.
    fn in_private_arena(&self, start: usize, len: usize) -> bool {
        match start.checked_add(len) {
            Some(end) => self
                .config
                .private_arenas()
                .any(|a| a.start <= start && end <= a.end),
            None => false,
        }
    }
}

/// Default permissions of an alias.
const ALIAS_PERMISSIONS: PageFlags = PageFlags::from_bits_truncate(
    PageFlags::READ.bits() | PageFlags::WRITE.bits(),
);
