//! Synchronization utilities.

mod spinlock;
#[cfg(test)]
mod test;

pub use spinlock::{Spinlock, SpinlockGuard};
