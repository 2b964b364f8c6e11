// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Global epoch counter and per-thread deferred-free queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

type Deferred = Box<dyn FnOnce() + Send>;

/// Per-thread reclamation slot.
///
/// `observed` is the epoch the thread last pinned (0 = inactive). The
/// callback queue is in ascending epoch order because entries are enqueued
/// at the monotonically increasing global epoch.
struct ThreadSlot {
    observed: AtomicU64,
    queue: Mutex<VecDeque<(u64, Deferred)>>,
}

impl ThreadSlot {
    fn new() -> Self {
        Self {
            observed: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

/// Epoch-based deferred reclamation.
///
/// Worker threads pin their slot on transaction start and enqueue
/// destructors for shared state they retire. [`tick`](Self::tick) advances
/// the global epoch and runs every callback that has aged past the hazard
/// window.
pub struct EpochReclaimer {
    global: AtomicU64,
    lag: u64,
    threads: Box<[ThreadSlot]>,
}

impl EpochReclaimer {
    /// Creates a reclaimer with one slot per worker thread.
    pub fn new(max_threads: usize, lag: u64) -> Self {
        Self {
            // Epoch 0 is reserved to mean "inactive".
            global: AtomicU64::new(1),
            lag,
            threads: (0..max_threads).map(|_| ThreadSlot::new()).collect(),
        }
    }

    /// Returns the current global epoch.
    #[inline]
    pub fn global_epoch(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }

    /// Pins thread `tid` at the current global epoch.
    ///
    /// Called at every transaction start so a long-running worker does not
    /// hold the minimum epoch down forever.
    pub fn enter(&self, tid: usize) {
        let epoch = self.global.load(Ordering::Acquire);
        self.threads[tid].observed.store(epoch, Ordering::Release);
    }

    /// Marks thread `tid` inactive. Its pending callbacks stay queued.
    pub fn exit(&self, tid: usize) {
        self.threads[tid].observed.store(0, Ordering::Release);
    }

    /// Enqueues a destructor for state retired by thread `tid`.
    ///
    /// The callback runs on a later [`tick`](Self::tick), once no thread
    /// active at enqueue time can still hold a reference. The caller must
    /// not touch the retired state afterward.
    pub fn defer(&self, tid: usize, callback: Box<dyn FnOnce() + Send>) {
        let epoch = self.global.load(Ordering::Acquire);
        self.threads[tid].queue.lock().push_back((epoch, callback));
    }

    /// Advances the global epoch and runs every eligible callback.
    ///
    /// The new epoch is one past the minimum of the current global epoch
    /// and every active thread's observed epoch; a callback is eligible
    /// once its recorded epoch is at least `lag` behind the new epoch.
    pub fn tick(&self) {
        let mut min = self.global.load(Ordering::Acquire);
        for slot in self.threads.iter() {
            let observed = slot.observed.load(Ordering::Acquire);
            if observed != 0 && observed < min {
                min = observed;
            }
        }
        let next = min + 1;
        self.global.store(next, Ordering::Release);

        for slot in self.threads.iter() {
            // Callbacks run outside the queue lock so a destructor may
            // itself defer without re-entering the mutex.
            let mut ready = Vec::new();
            {
                let mut queue = slot.queue.lock();
                // Ascending epoch order: stop at the first entry still too new.
                while matches!(queue.front(), Some((epoch, _)) if epoch + self.lag <= next) {
                    if let Some((_, callback)) = queue.pop_front() {
                        ready.push(callback);
                    }
                }
            }
            for callback in ready {
                callback();
            }
        }
    }

    /// Number of callbacks still waiting across all threads.
    pub fn pending(&self) -> usize {
        self.threads.iter().map(|slot| slot.queue.lock().len()).sum()
    }

    /// Spawns a background thread that calls [`tick`](Self::tick) on an
    /// interval. The returned handle stops and joins the thread on drop.
    pub fn spawn_advancer(self: &Arc<Self>, interval: Duration) -> EpochAdvancer {
        let reclaimer = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("epoch-advancer".into())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis() as u64, "epoch advancer started");
                while !stop_flag.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    reclaimer.tick();
                }
                debug!("epoch advancer stopped");
            })
            .expect("failed to spawn epoch advancer thread");
        EpochAdvancer {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for EpochReclaimer {
    fn drop(&mut self) {
        // No thread can hold a reference once the reclaimer itself is being
        // torn down; run everything that is still queued.
        for slot in self.threads.iter() {
            let callbacks: Vec<Deferred> =
                slot.queue.lock().drain(..).map(|(_, callback)| callback).collect();
            for callback in callbacks {
                callback();
            }
        }
    }
}

impl std::fmt::Debug for EpochReclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochReclaimer")
            .field("global", &self.global_epoch())
            .field("lag", &self.lag)
            .field("threads", &self.threads.len())
            .finish()
    }
}

/// Handle to the background epoch advancer thread.
///
/// Dropping the handle signals the thread to stop and joins it.
pub struct EpochAdvancer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for EpochAdvancer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for EpochAdvancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochAdvancer").finish_non_exhaustive()
    }
}
