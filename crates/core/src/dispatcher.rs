//! Host/engine synchronization dispatcher (C3).
//!
//! Breakpoint hits and watch events arrive on a guest CPU thread; scripted
//! callbacks and UI updates must run on the main thread. `Dispatcher` is the
//! single rendezvous point between the two: a sync queue and an async queue
//! of one-shot work items, drained by `tick()` on the main thread, plus a
//! monotonic fence counter so a worker thread can block until its enqueued
//! work has actually run (`wait`).
//!
//! Lock order, when a caller needs more than one of the engine's locks at
//! once: `session_lock → breakpoint_lock → trace_pc_lock → trace_buffer_lock
//! → dispatcher.sync_mutex`. The dispatcher's own mutex is always acquired
//! last.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A one-shot unit of work handed to the dispatcher, run on the main thread.
pub type Work = Box<dyn FnOnce() + Send>;

/// Guarded state behind the dispatcher's mutex.
#[derive(Default)]
struct State {
    /// Fence assigned to the next `request_sync` call.
    next_fence: u64,
    /// Highest fence whose work has completed.
    completed_fence: u64,
    /// Sync work, paired with the fence it publishes on completion.
    sync_queue: VecDeque<(u64, Work)>,
    /// Async work, unordered with respect to sync work.
    async_queue: VecDeque<Work>,
}

/// A `Mutex<State>` + `Condvar` cross-thread work queue with fence ordering.
///
/// Sync items run in enqueue order and publish their fence as each
/// completes; async items run after all sync items enqueued for a given
/// `tick`. Cancellation is not supported: pending work runs on the next
/// `tick` regardless of how long ago it was enqueued.
pub struct Dispatcher {
    state: Mutex<State>,
    condvar: Condvar,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("Dispatcher")
            .field("next_fence", &state.next_fence)
            .field("completed_fence", &state.completed_fence)
            .field("sync_queue_len", &state.sync_queue.len())
            .field("async_queue_len", &state.async_queue.len())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with its fence at zero and both queues empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            condvar: Condvar::new(),
        }
    }

    /// Enqueues one-shot work, run during the next `tick` after any sync
    /// work already enqueued for that tick. Unordered with respect to other
    /// async work already queued.
    pub fn request_async(&self, work: Work) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.async_queue.push_back(work);
    }

    /// Enqueues work and returns the fence it will publish on completion.
    /// Does not block; pass the returned fence to [`Self::wait`] to block
    /// until it has run.
    pub fn request_sync(&self, work: Work) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.next_fence += 1;
        let fence = state.next_fence;
        state.sync_queue.push_back((fence, work));
        fence
    }

    /// Blocks until `completed_fence >= fence`.
    pub fn wait(&self, fence: u64) {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let _state = self
            .condvar
            .wait_while(state, |s| s.completed_fence < fence)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
    }

    /// Non-blocking form of `wait`: returns once `completed_fence >= fence`,
    /// or `None` if that doesn't happen within `timeout`.
    pub fn wait_timeout(&self, fence: u64, timeout: Duration) -> Option<u64> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (state, result) = self
            .condvar
            .wait_timeout_while(state, timeout, |s| s.completed_fence < fence)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if result.timed_out() {
            return None;
        }
        Some(state.completed_fence)
    }

    /// Drains the sync queue in FIFO order, running each item and
    /// publishing its fence as `completed_fence` immediately after it
    /// returns (waking anyone blocked in `wait`), then drains the async
    /// queue in FIFO order. Called once per main-loop iteration.
    pub fn tick(&self) {
        loop {
            let next = {
                let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                state.sync_queue.pop_front()
            };
            let Some((fence, work)) = next else { break };
            work();
            let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.completed_fence = fence;
            drop(state);
            self.condvar.notify_all();
        }
        loop {
            let next = {
                let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                state.async_queue.pop_front()
            };
            let Some(work) = next else { break };
            work();
        }
    }

    /// Highest fence whose work has completed.
    #[must_use]
    pub fn completed_fence(&self) -> u64 {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).completed_fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sync_work_runs_on_tick_and_publishes_its_fence() {
        let dispatcher = Dispatcher::new();
        let ran = Arc::new(AtomicU64::new(0));
        let ran_clone = Arc::clone(&ran);
        let fence = dispatcher.request_sync(Box::new(move || {
            ran_clone.store(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        dispatcher.tick();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.completed_fence(), fence);
    }

    #[test]
    fn invariant_6_sync_fences_complete_in_enqueue_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let f1 = dispatcher.request_sync({
            let order = Arc::clone(&order);
            Box::new(move || order.lock().unwrap().push(1))
        });
        let f2 = dispatcher.request_sync({
            let order = Arc::clone(&order);
            Box::new(move || order.lock().unwrap().push(2))
        });
        assert!(f1 < f2);
        dispatcher.tick();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn s4_wait_blocks_until_main_thread_ticks() {
        let dispatcher = Arc::new(Dispatcher::new());
        let worker_dispatcher = Arc::clone(&dispatcher);
        let fence = Arc::new(Mutex::new(0u64));
        let fence_clone = Arc::clone(&fence);

        let handle = thread::spawn(move || {
            let f = worker_dispatcher.request_sync(Box::new(|| {}));
            *fence_clone.lock().unwrap() = f;
            worker_dispatcher.wait(f);
        });

        thread::sleep(Duration::from_millis(10));
        dispatcher.tick();
        handle.join().unwrap();
        assert_eq!(dispatcher.completed_fence(), *fence.lock().unwrap());
    }

    #[test]
    fn async_work_runs_after_sync_work_on_the_same_tick() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        dispatcher.request_async({
            let order = Arc::clone(&order);
            Box::new(move || order.lock().unwrap().push("async"))
        });
        dispatcher.request_sync({
            let order = Arc::clone(&order);
            Box::new(move || order.lock().unwrap().push("sync"))
        });
        dispatcher.tick();
        assert_eq!(*order.lock().unwrap(), vec!["sync", "async"]);
    }

    #[test]
    fn wait_timeout_returns_none_without_a_tick() {
        let dispatcher = Dispatcher::new();
        let fence = dispatcher.request_sync(Box::new(|| {}));
        assert_eq!(dispatcher.wait_timeout(fence, Duration::from_millis(5)), None);
    }
}
