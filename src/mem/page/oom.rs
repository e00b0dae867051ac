//! The out-of-memory path.

use log_crate::error;

use crate::mem::sys::MemoryStats;
use crate::util::sync::Spinlock;

/// Called with the size of the failed request before the process aborts.
pub type OomHook = fn(usize);

static HOOK: Spinlock<Option<OomHook>> = Spinlock::new(None);

/// Install a hook run by [`oom_crash`], returning the previous one. A hook
/// that panics or exits prevents the abort.
pub fn set_oom_hook(hook: Option<OomHook>) -> Option<OomHook> {
    core::mem::replace(&mut *HOOK.lock(), hook)
}

/// Terminate the process after failing to commit `size` bytes.
#[cold]
pub fn oom_crash(size: usize, stats: MemoryStats) -> ! {
    error!("Out of memory committing 0x{:x} bytes: {}.", size, stats);
    let hook = *HOOK.lock();
    if let Some(hook) = hook {
        hook(size);
    }
    std::process::abort()
}
