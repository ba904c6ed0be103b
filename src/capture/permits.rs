use crossbeam::channel::{self, Receiver, Sender};

/// A fixed budget of frames that may be outstanding downstream at once.
///
/// Camera stacks hand out frames from a small buffer pool and stall when the
/// consumer forgets to give them back. Each captured frame carries a
/// [`FramePermit`] in its release hook, so a leaked frame shows up here as a
/// permanently missing permit.
#[derive(Clone)]
pub struct FramePermits {
    tx: Sender<()>,
    rx: Receiver<()>,
    capacity: usize,
}

impl FramePermits {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel was sized for exactly this many tokens.
            let _ = tx.try_send(());
        }
        Self { tx, rx, capacity }
    }

    /// Take a permit, or `None` when every buffer is still held downstream.
    pub fn try_acquire(&self) -> Option<FramePermit> {
        self.rx.try_recv().ok().map(|()| FramePermit {
            tx: self.tx.clone(),
        })
    }

    pub fn available(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Returned to its pool when dropped.
pub struct FramePermit {
    tx: Sender<()>,
}

impl Drop for FramePermit {
    fn drop(&mut self) {
        let _ = self.tx.try_send(());
    }
}
