use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use radiograph_common::frame::LumaFrame;

/// A frame on loan from its source. The release callback runs exactly once,
/// when the lease is dropped, whatever happened to the frame in between.
pub struct FrameLease {
    frame: LumaFrame,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl FrameLease {
    pub fn new(frame: LumaFrame, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            frame,
            release: Some(Box::new(release)),
        }
    }

    pub fn frame(&self) -> &LumaFrame {
        &self.frame
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// The slot was empty.
    Delivered,
    /// An undelivered frame was dropped to make room.
    Replaced,
    /// The mailbox no longer accepts frames; the lease was released.
    Closed,
}

struct Slot {
    pending: Option<FrameLease>,
    closed: bool,
}

/// Single-slot "keep only latest" handoff between a frame source and the
/// worker. Posting never blocks; a frame that has not been taken yet is
/// replaced by the newer one.
pub struct Mailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn post(&self, lease: FrameLease) -> PostOutcome {
        let mut slot = self.lock();
        if slot.closed {
            drop(slot);
            drop(lease);
            return PostOutcome::Closed;
        }
        let previous = slot.pending.replace(lease);
        drop(slot);
        self.ready.notify_one();

        // release the displaced frame outside the lock
        match previous {
            Some(dropped) => {
                drop(dropped);
                PostOutcome::Replaced
            }
            None => PostOutcome::Delivered,
        }
    }

    /// Block until a frame is available. Returns `None` once the mailbox is
    /// closed and drained.
    pub fn take(&self) -> Option<FrameLease> {
        let mut slot = self.lock();
        loop {
            if let Some(lease) = slot.pending.take() {
                return Some(lease);
            }
            if slot.closed {
                return None;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting frames and wake the worker. A frame still waiting in
    /// the slot can be taken one last time.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
