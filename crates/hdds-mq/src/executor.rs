// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Task executors.
//!
//! The queue never runs consumers on the dispatching thread. Every delivery
//! and every timeout callback is handed to an [`Executor`] as a boxed task;
//! submission is non-blocking and tasks may run on any worker in any order.

use crate::error::ExecutorError;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fire-and-forget task submission.
pub trait Executor: Send + Sync {
    /// Submit a task. Must not block waiting for the task to run.
    fn execute(&self, task: Task) -> Result<(), ExecutorError>;
}

/// Fixed pool of named worker threads fed by an unbounded channel.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = channel::unbounded::<Task>();
        let running = Arc::new(AtomicBool::new(true));

        let workers = (0..threads.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
                thread::Builder::new()
                    .name(format!("hdds-mq-worker-{}", i))
                    .spawn(move || Self::run_worker(receiver))
                    .expect("Failed to spawn hdds-mq worker thread")
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            running,
        }
    }

    fn run_worker(receiver: Receiver<Task>) {
        while let Ok(task) = receiver.recv() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
            if result.is_err() {
                tracing::debug!("[worker] task panicked");
            }
        }
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.lock().len()
    }

    /// Check if the pool accepts tasks.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, let workers finish the queued ones, and join them.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        // Dropping the last sender ends each worker's recv loop.
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            // A task that shuts the pool down cannot join its own thread.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::debug!("[worker] worker thread panicked");
            }
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| ExecutorError::ShutDown),
            None => Err(ExecutorError::ShutDown),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Executor backed by a tokio runtime's blocking pool.
///
/// Consumers are synchronous, so tasks go through `spawn_blocking` rather
/// than onto the async workers.
#[derive(Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Executor on the runtime of the calling task.
    ///
    /// Returns `None` outside a tokio runtime.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}

/// Runs every task on the submitting thread. Test and tooling use only.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        task();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn wait_for(count: &AtomicUsize, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if count.load(Ordering::SeqCst) == expected {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_worker_pool_runs_tasks() {
        let pool = WorkerPool::new(4);
        assert_eq!(pool.threads(), 4);

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            pool.execute(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        assert!(wait_for(&count, 100));
    }

    #[test]
    fn test_worker_pool_survives_panicking_task() {
        let pool = WorkerPool::new(1);
        let count = Arc::new(AtomicUsize::new(0));

        pool.execute(Box::new(|| panic!("boom"))).unwrap();
        let c = Arc::clone(&count);
        pool.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert!(wait_for(&count, 1));
    }

    #[test]
    fn test_worker_pool_rejects_after_shutdown() {
        let pool = WorkerPool::new(2);
        pool.shutdown();
        assert!(!pool.is_running());
        assert!(matches!(
            pool.execute(Box::new(|| {})),
            Err(ExecutorError::ShutDown)
        ));
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let pool = WorkerPool::new(1);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let c = Arc::clone(&count);
            pool.execute(Box::new(move || {
                thread::sleep(Duration::from_millis(1));
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_inline_executor_runs_immediately() {
        let count = AtomicUsize::new(0);
        let count = Arc::new(count);
        let c = Arc::clone(&count);
        InlineExecutor
            .execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tokio_executor() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let executor = TokioExecutor::new(rt.handle().clone());

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        executor
            .execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(wait_for(&count, 1));
        assert!(TokioExecutor::current().is_none());
    }
}
