//! Bounded step queue.
//!
//! Caps the number of work items in flight at a fixed slot count (one per
//! logical CPU by default). Slots are created lazily up to the width, then
//! recycled; work that arrives while every slot is busy waits in a FIFO
//! backlog and is handed a slot directly when one frees up.
//!
//! Work submitted from inside an item that already holds a slot runs inline
//! in that slot. A parent step waiting on a nested step is suspended, so its
//! slot would otherwise sit idle, and acquiring a second slot could deadlock
//! once every slot is held by a waiting parent.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::oneshot;
use tracing::trace;

tokio::task_local! {
    static HOLDS_SLOT: ();
}

#[derive(Debug, Default)]
struct QueueState {
    /// Slots created so far. Never exceeds the width.
    runners: usize,
    /// Created slots not currently running anything.
    idle: usize,
    backlog: VecDeque<oneshot::Sender<()>>,
}

#[derive(Debug)]
pub struct StepQueue {
    width: usize,
    state: Mutex<QueueState>,
}

impl StepQueue {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of slots currently running work.
    pub fn active(&self) -> usize {
        let state = self.state.lock();
        state.runners - state.idle
    }

    /// Number of items waiting for a slot.
    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Run `work` once a slot is available and return its output.
    ///
    /// Failures belong to the caller: an `Err` output is returned as-is and
    /// the slot is released for the next item either way.
    pub async fn enqueue<F>(&self, work: F) -> F::Output
    where
        F: Future,
    {
        if HOLDS_SLOT.try_with(|_| ()).is_ok() {
            trace!("reentrant enqueue, running in the current slot");
            return work.await;
        }

        self.acquire().await;
        let _slot = SlotGuard { queue: self };
        HOLDS_SLOT.scope((), work).await
    }

    async fn acquire(&self) {
        let receiver = {
            let mut state = self.state.lock();
            if state.runners < self.width {
                state.runners += 1;
                return;
            }
            if state.idle > 0 {
                state.idle -= 1;
                return;
            }
            let (sender, receiver) = oneshot::channel();
            state.backlog.push_back(sender);
            receiver
        };

        trace!("all slots busy, waiting in backlog");
        let mut waiter = Waiter {
            queue: self,
            receiver: Some(receiver),
        };
        waiter.wait().await;
    }

    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(sender) = state.backlog.pop_front() {
            // A closed receiver means that waiter went away; try the next one.
            if sender.send(()).is_ok() {
                return;
            }
        }
        state.idle += 1;
    }
}

/// Releases a held slot when the work settles or is dropped.
struct SlotGuard<'a> {
    queue: &'a StepQueue,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.queue.release();
    }
}

/// A backlog entry. If it is dropped after a slot was handed to it but before
/// it ran, the slot is passed on instead of leaking.
struct Waiter<'a> {
    queue: &'a StepQueue,
    receiver: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn wait(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            // The sender lives in the backlog until a slot is handed over, and
            // the queue outlives this borrow, so an error cannot happen here.
            let _ = receiver.await;
        }
        self.receiver = None;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if receiver.try_recv().is_ok() {
                self.queue.release();
            }
        }
    }
}
