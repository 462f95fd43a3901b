// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cancel-once timers.
//!
//! A [`Timer`] is the arbiter for every held message: the pending-queue
//! recheck, the wake drain and the timeout callback all race on
//! [`Timer::cancel`] / fire, and exactly one of them wins.
//!
//! # State machine
//!
//! ```text
//!   IDLE --schedule--> SCHEDULED --deadline--> FIRED
//!    |                    |
//!    +------cancel--------+-----> CANCELLED
//!    +------close---------+-----> CLOSED
//! ```
//!
//! Every transition out of IDLE/SCHEDULED is a single CAS, so `cancel()`
//! returns `true` to at most one caller and never after the timer fired.
//!
//! # Threading
//!
//! One `hdds-mq-timeout` thread per [`TimeoutAdmin`] sleeps on a condvar
//! until the earliest deadline. Expired listeners are submitted to the
//! executor given at timer creation, never run while the heap lock is held.

use crate::executor::{Executor, Task};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const FIRED: u8 = 2;
const CANCELLED: u8 = 3;
const CLOSED: u8 = 4;

/// Callback invoked with the timer's subject when it expires.
pub trait TimeoutListener<S>: Send + Sync {
    fn on_timeout(&self, subject: S);
}

/// Observable timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Scheduled,
    Fired,
    Cancelled,
    Closed,
}

struct TimerCore {
    state: AtomicU8,
    fire: Mutex<Option<Task>>,
    executor: Arc<dyn Executor>,
}

impl TimerCore {
    fn claim(&self, target: u8) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current != IDLE && current != SCHEDULED {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn expire(&self) {
        if self
            .state
            .compare_exchange(SCHEDULED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let Some(task) = self.fire.lock().take() else {
            return;
        };

        // The subject must still be resolved when the executor refuses work,
        // so the callback falls back to the timer thread.
        let slot = Arc::new(Mutex::new(Some(task)));
        let submitted = Arc::clone(&slot);
        let result = self.executor.execute(Box::new(move || {
            if let Some(task) = submitted.lock().take() {
                task();
            }
        }));
        if let Err(e) = result {
            tracing::debug!("[timeout] executor refused timeout callback: {}", e);
            if let Some(task) = slot.lock().take() {
                task();
            }
        }
    }
}

struct Entry {
    deadline: Instant,
    seq: u64,
    core: Arc<TimerCore>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: BinaryHeap is a max-heap, the earliest deadline must pop first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<Entry>>,
    condvar: Condvar,
    running: AtomicBool,
    seq: AtomicU64,
}

impl Shared {
    fn push(&self, core: Arc<TimerCore>, delay: Duration) {
        let entry = Entry {
            deadline: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            core,
        };
        let mut heap = self.heap.lock();
        let earliest = heap.peek().map_or(true, |head| entry.deadline < head.deadline);
        heap.push(entry);
        if earliest {
            self.condvar.notify_one();
        }
    }

    fn run_loop(&self) {
        let mut heap = self.heap.lock();
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            match heap.peek().map(|e| e.deadline) {
                None => {
                    self.condvar.wait(&mut heap);
                }
                Some(deadline) if deadline > now => {
                    let _ = self.condvar.wait_until(&mut heap, deadline);
                }
                Some(_) => {
                    let mut expired = Vec::new();
                    while heap.peek().is_some_and(|e| e.deadline <= now) {
                        if let Some(entry) = heap.pop() {
                            expired.push(entry.core);
                        }
                    }
                    parking_lot::MutexGuard::unlocked(&mut heap, || {
                        for core in expired {
                            core.expire();
                        }
                    });
                }
            }
        }
    }
}

/// Timer service: creates cancel-once timers and fires them on expiry.
pub struct TimeoutAdmin {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutAdmin {
    /// Spawn the timer thread.
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            running: AtomicBool::new(true),
            seq: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = std::thread::Builder::new()
            .name("hdds-mq-timeout".to_string())
            .spawn(move || thread_shared.run_loop())
            .expect("Failed to spawn hdds-mq timeout thread");

        Self {
            shared,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// Create an idle timer for `subject`.
    ///
    /// When the timer expires, `listener.on_timeout(subject)` is submitted to
    /// `executor`.
    pub fn create_timer<S>(
        &self,
        subject: S,
        listener: Arc<dyn TimeoutListener<S>>,
        executor: Arc<dyn Executor>,
    ) -> Timer
    where
        S: Send + 'static,
    {
        let task: Task = Box::new(move || listener.on_timeout(subject));
        Timer {
            core: Arc::new(TimerCore {
                state: AtomicU8::new(IDLE),
                fire: Mutex::new(Some(task)),
                executor,
            }),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of entries waiting in the deadline heap, including entries
    /// whose timers were cancelled but have not reached their deadline yet.
    pub fn scheduled(&self) -> usize {
        self.shared.heap.lock().len()
    }

    /// Stop the timer thread. Timers that have not fired never will.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            let _heap = self.shared.heap.lock();
            self.shared.condvar.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            // The admin may be dropped by a callback running inline on the
            // timer thread itself.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::debug!("[timeout] timer thread panicked");
            }
        }
    }
}

impl Default for TimeoutAdmin {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimeoutAdmin {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to one cancel-once timer.
pub struct Timer {
    core: Arc<TimerCore>,
    shared: Arc<Shared>,
}

impl Timer {
    /// Arm the timer.
    ///
    /// Returns `false` if the timer was already claimed (cancelled, closed)
    /// or scheduled, or if the admin has shut down.
    pub fn schedule(&self, delay: Duration) -> bool {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        if self
            .core
            .state
            .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.shared.push(Arc::clone(&self.core), delay);
        true
    }

    /// Claim the timer before it fires.
    ///
    /// Returns `true` iff this call is the first to claim a timer that has
    /// not fired. Every later call, and every call after expiry, returns
    /// `false`.
    pub fn cancel(&self) -> bool {
        if self.core.claim(CANCELLED) {
            drop(self.core.fire.lock().take());
            true
        } else {
            false
        }
    }

    /// Release the timer without firing it.
    pub fn close(&self) {
        if self.core.claim(CLOSED) {
            drop(self.core.fire.lock().take());
        }
    }

    pub fn state(&self) -> TimerState {
        match self.core.state.load(Ordering::Acquire) {
            IDLE => TimerState::Idle,
            SCHEDULED => TimerState::Scheduled,
            FIRED => TimerState::Fired,
            CANCELLED => TimerState::Cancelled,
            _ => TimerState::Closed,
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer").field("state", &self.state()).finish()
    }
}
