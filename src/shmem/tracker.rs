//! Accounting of mapped shared memory.

use hashbrown::HashMap;
use log_crate::trace;

use super::RegionGuid;
use crate::mem::VirtualAddress;
use crate::util::sync::Spinlock;

/// Mapped bytes of one region.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    pub bytes: usize,
    pub mappings: usize,
}

#[derive(Default)]
struct TrackerState {
    usage: HashMap<RegionGuid, Usage>,
    /// Outstanding mappings by region and address, with their sizes.
    #[cfg(feature = "tracker_validation")]
    live: HashMap<(RegionGuid, VirtualAddress), Vec<usize>>,
}

/// Observes every mapping made and released in this process. It has no say
/// in anything; it only counts.
#[derive(Default)]
pub struct SharedMemoryTracker {
    state: Spinlock<TrackerState>,
}

singleton!(TRACKER, SharedMemoryTracker);

impl SharedMemoryTracker {
    pub fn increment_memory_usage(&self, address: VirtualAddress, size: usize, guid: RegionGuid) {
        let mut state = self.state.lock();
        #[cfg(feature = "tracker_validation")]
        state.live.entry((guid, address)).or_default().push(size);

        let usage = state.usage.entry(guid).or_default();
        usage.bytes += size;
        usage.mappings += 1;
        trace!("{} mapped at {}, now {} mappings.", guid, address, usage.mappings);
    }

    pub fn decrement_memory_usage(&self, address: VirtualAddress, size: usize, guid: RegionGuid) {
        let mut state = self.state.lock();
        #[cfg(feature = "tracker_validation")]
        {
            let sizes = state.live.get_mut(&(guid, address));
            let position = sizes
                .as_ref()
                .and_then(|s| s.iter().position(|s| *s == size));
            match (sizes, position) {
                (Some(sizes), Some(i)) => {
                    sizes.swap_remove(i);
                    if sizes.is_empty() {
                        state.live.remove(&(guid, address));
                    }
                }
                _ => panic!(
                    "Releasing untracked mapping of {} at {} (0x{:x} bytes).",
                    guid, address, size
                ),
            }
        }
        #[cfg(not(feature = "tracker_validation"))]
        let _ = address;

        if let Some(usage) = state.usage.get_mut(&guid) {
            usage.bytes -= size;
            usage.mappings -= 1;
            if usage.mappings == 0 {
                state.usage.remove(&guid);
            }
        }
    }

    /// Current usage of a region, if it has live mappings.
    pub fn usage(&self, guid: RegionGuid) -> Option<Usage> {
        self.state.lock().usage.get(&guid).copied()
    }

    /// Bytes mapped across all regions.
    pub fn total_bytes(&self) -> usize {
        self.state.lock().usage.values().map(|u| u.bytes).sum()
    }
}
