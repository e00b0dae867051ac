//! Storage behind allocation objects.

use core::ops::Range;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::consts::PAGE_SIZE;
use crate::util::sync::Spinlock;

#[derive(Default)]
struct Frame {
    committed: bool,
    /// Allocated on first store; committed frames without data read as zero.
    data: Option<Box<[u8]>>,
}

/// The frames of one object. Shared between every view of the object, so
/// commit state is per object while permissions are per view.
pub(super) struct Backing {
    frames: Spinlock<Vec<Frame>>,
    /// Machine-wide count of committed frames.
    committed: Arc<AtomicUsize>,
}

impl Backing {
    pub(super) fn new(pages: usize, committed: Arc<AtomicUsize>) -> Arc<Backing> {
        let mut frames = Vec::with_capacity(pages);
        frames.resize_with(pages, Frame::default);
        Arc::new(Backing {
            frames: Spinlock::new(frames),
            committed,
        })
    }

    pub(super) fn is_committed(&self, frame: usize) -> bool {
        self.frames.lock()[frame].committed
    }

    pub(super) fn all_committed(&self, frames: Range<usize>) -> bool {
        self.frames.lock()[frames].iter().all(|f| f.committed)
    }

    pub(super) fn any_committed(&self, frames: Range<usize>) -> bool {
        self.frames.lock()[frames].iter().any(|f| f.committed)
    }

    /// Mark frames committed. The caller has charged them already.
    pub(super) fn commit(&self, frames: Range<usize>) {
        for f in self.frames.lock()[frames].iter_mut() {
            debug_assert!(!f.committed);
            f.committed = true;
        }
    }

    /// Release frames and their contents, returning the charge.
    pub(super) fn decommit(&self, frames: Range<usize>) {
        let mut released = 0;
        for f in self.frames.lock()[frames].iter_mut() {
            if f.committed {
                f.committed = false;
                f.data = None;
                released += 1;
            }
        }
        self.committed.fetch_sub(released, Ordering::AcqRel);
    }

    /// Copy out of a frame. Returns false if the frame is not committed.
    pub(super) fn read(&self, frame: usize, offset: usize, buf: &mut [u8]) -> bool {
        let frames = self.frames.lock();
        let f = &frames[frame];
        if !f.committed {
            return false;
        }
        match &f.data {
            Some(data) => buf.copy_from_slice(&data[offset..offset + buf.len()]),
            None => buf.iter_mut().for_each(|b| *b = 0),
        }
        true
    }

    /// Copy into a frame. Returns false if the frame is not committed.
    pub(super) fn write(&self, frame: usize, offset: usize, data: &[u8]) -> bool {
        let mut frames = self.frames.lock();
        let f = &mut frames[frame];
        if !f.committed {
            return false;
        }
        let page = f
            .data
            .get_or_insert_with(|| vec![0; PAGE_SIZE].into_boxed_slice());
        page[offset..offset + data.len()].copy_from_slice(data);
        true
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        let committed = self.frames.lock().iter().filter(|f| f.committed).count();
        self.committed.fetch_sub(committed, Ordering::AcqRel);
    }
}
