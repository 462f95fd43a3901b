// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::items_after_statements)] // Test helpers
#![allow(clippy::cast_possible_truncation)] // Test parameters

//! Held message resolution tests
//!
//! Every dispatched message ends up delivered or timed out, exactly once;
//! pending messages drain in FIFO order; a registration racing with the
//! dispatcher's own lookup never strands a message.

use hdds_mq::{
    ConsumeError, Consumer, EndpointProperties, EndpointProvider, Executor, ExecutorError,
    InlineExecutor, Message, MessageQueue, MqConfig, PreHandler, ProviderHandle, Task,
    TimeoutAdmin, WorkerPool,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Consumer recording the `u32` tag of each message.
#[derive(Default)]
struct Tags {
    seen: Mutex<Vec<u32>>,
}

impl Consumer for Tags {
    fn on_message(&self, mut message: Message) -> Result<(), ConsumeError> {
        let tag = message
            .take::<u32>()
            .ok_or_else(|| ConsumeError::new("untagged message"))?;
        self.seen.lock().push(tag);
        Ok(())
    }
}

struct Provider {
    id: &'static str,
    consumer: Arc<Tags>,
    pre_handlers: Vec<String>,
}

impl Provider {
    fn new(id: &'static str) -> (Arc<Self>, Arc<Tags>) {
        let consumer = Arc::new(Tags::default());
        let provider = Arc::new(Self {
            id,
            consumer: consumer.clone(),
            pre_handlers: Vec::new(),
        });
        (provider, consumer)
    }
}

impl EndpointProvider for Provider {
    fn properties(&self) -> EndpointProperties {
        EndpointProperties::new(self.id).pre_handlers(self.pre_handlers.clone())
    }

    fn consumer(&self) -> Arc<dyn Consumer> {
        self.consumer.clone()
    }
}

/// Executor that queues tasks until the test runs them.
#[derive(Default)]
struct RecordingExecutor {
    tasks: Mutex<Vec<Task>>,
}

impl RecordingExecutor {
    fn run_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let n = tasks.len();
        for task in tasks {
            task();
        }
        n
    }
}

impl Executor for RecordingExecutor {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        self.tasks.lock().push(task);
        Ok(())
    }
}

fn tagged(to: &str, tag: u32) -> Message {
    let mut message = Message::new(to);
    message.attach(tag);
    message
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_drain_submits_in_fifo_order() {
    let executor = Arc::new(RecordingExecutor::default());
    let queue = MessageQueue::new(
        MqConfig::default(),
        executor.clone(),
        Arc::new(TimeoutAdmin::new()),
    )
    .unwrap();
    queue.activate();

    for tag in 1..=3 {
        queue.dispatch(tagged("H", tag));
    }
    assert_eq!(executor.run_all(), 0, "nothing submitted while held");

    let (provider, consumer) = Provider::new("H");
    queue.register(ProviderHandle(1), provider).unwrap();

    assert_eq!(executor.run_all(), 3);
    assert_eq!(*consumer.seen.lock(), vec![1, 2, 3]);
}

#[test]
fn test_fifo_per_destination_is_independent() {
    let queue = MessageQueue::new(
        MqConfig::default(),
        Arc::new(InlineExecutor),
        Arc::new(TimeoutAdmin::new()),
    )
    .unwrap();
    queue.activate();

    for tag in 0..20 {
        let to = if tag % 2 == 0 { "even" } else { "odd" };
        queue.dispatch(tagged(to, tag));
    }

    let (odd, odd_seen) = Provider::new("odd");
    let (even, even_seen) = Provider::new("even");
    queue.register(ProviderHandle(1), odd).unwrap();
    queue.register(ProviderHandle(2), even).unwrap();

    assert_eq!(*odd_seen.seen.lock(), (0..20).filter(|t| t % 2 == 1).collect::<Vec<_>>());
    assert_eq!(*even_seen.seen.lock(), (0..20).filter(|t| t % 2 == 0).collect::<Vec<_>>());
}

#[test]
fn test_exactly_once_near_timeout() {
    const COUNT: u32 = 200;

    let config = MqConfig::default().msg_timeout_secs(1).worker_threads(4);
    let queue = MessageQueue::start(config).unwrap();

    for tag in 0..COUNT {
        queue.dispatch(tagged("T", tag));
    }

    // Register right around the deadline so drains and expiries interleave.
    thread::sleep(Duration::from_millis(995));
    let (provider, consumer) = Provider::new("T");
    queue.register(ProviderHandle(1), provider).unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        let stats = queue.stats();
        stats.messages_delivered + stats.messages_timed_out == u64::from(COUNT)
    }));
    thread::sleep(Duration::from_millis(50));

    let stats = queue.stats();
    let seen = consumer.seen.lock().clone();
    assert_eq!(seen.len() as u64, stats.messages_delivered);
    assert_eq!(
        stats.messages_delivered + stats.messages_timed_out,
        u64::from(COUNT)
    );
    let unique: HashSet<u32> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "a message was delivered twice");
    assert_eq!(queue.pending_total(), 0);
}

#[test]
fn test_registration_racing_dispatch_strands_nothing() {
    const ROUNDS: usize = 50;
    const PER_ROUND: u32 = 20;

    let executor: Arc<dyn Executor> = Arc::new(WorkerPool::new(4));
    let timers = Arc::new(TimeoutAdmin::new());

    for round in 0..ROUNDS {
        let queue = Arc::new(
            MessageQueue::new(
                MqConfig::default().msg_timeout_secs(30),
                executor.clone(),
                timers.clone(),
            )
            .unwrap(),
        );
        queue.activate();

        let (provider, consumer) = Provider::new("R");
        let barrier = Arc::new(Barrier::new(2));

        let sender = {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for tag in 0..PER_ROUND {
                    queue.dispatch(tagged("R", tag));
                }
            })
        };
        let registrar = {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                queue.register(ProviderHandle(round as u64), provider).unwrap();
            })
        };
        sender.join().unwrap();
        registrar.join().unwrap();

        assert!(
            wait_until(Duration::from_secs(5), || consumer.seen.lock().len()
                == PER_ROUND as usize),
            "round {}: delivered {} of {}, {} still held",
            round,
            consumer.seen.lock().len(),
            PER_ROUND,
            queue.pending_total()
        );
        assert_eq!(queue.pending_total(), 0);
    }
}

#[test]
fn test_handler_leases_released_after_delivery() {
    struct Count(AtomicUsize);
    impl PreHandler for Count {
        fn pre_handle(&self, _message: &mut Message) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    let queue = MessageQueue::new(
        MqConfig::default(),
        Arc::new(InlineExecutor),
        Arc::new(TimeoutAdmin::new()),
    )
    .unwrap();
    queue.activate();

    let counter = Arc::new(Count(AtomicUsize::new(0)));
    struct Shared(Arc<Count>);
    impl PreHandler for Shared {
        fn pre_handle(&self, message: &mut Message) -> bool {
            self.0.pre_handle(message)
        }
    }
    queue
        .pre_handlers()
        .register("count", Box::new(Shared(counter.clone())));

    let consumer = Arc::new(Tags::default());
    let provider = Arc::new(Provider {
        id: "L",
        consumer: consumer.clone(),
        pre_handlers: vec!["count".to_string()],
    });
    queue.register(ProviderHandle(1), provider).unwrap();
    assert_eq!(queue.pre_handlers().leases("count"), 1);

    for tag in 0..10 {
        queue.dispatch(tagged("L", tag));
    }

    assert_eq!(counter.0.load(Ordering::SeqCst), 10);
    assert_eq!(consumer.seen.lock().len(), 10);
    // Only the endpoint's own chain still holds a lease.
    assert_eq!(queue.pre_handlers().leases("count"), 1);

    queue.unregister(ProviderHandle(1));
    assert_eq!(queue.pre_handlers().leases("count"), 0);
}

#[test]
fn test_consumer_failures_are_contained() {
    struct Flaky;
    impl Consumer for Flaky {
        fn on_message(&self, message: Message) -> Result<(), ConsumeError> {
            match message.payload::<u32>() {
                Some(0) => Err(ConsumeError::new("refused")),
                Some(1) => panic!("consumer bug"),
                _ => Ok(()),
            }
        }
    }
    struct FlakyProvider;
    impl EndpointProvider for FlakyProvider {
        fn properties(&self) -> EndpointProperties {
            EndpointProperties::new("flaky")
        }
        fn consumer(&self) -> Arc<dyn Consumer> {
            Arc::new(Flaky)
        }
    }

    let queue = MessageQueue::new(
        MqConfig::default(),
        Arc::new(InlineExecutor),
        Arc::new(TimeoutAdmin::new()),
    )
    .unwrap();
    queue.activate();
    queue
        .register(ProviderHandle(1), Arc::new(FlakyProvider))
        .unwrap();

    queue.dispatch(tagged("flaky", 0));
    queue.dispatch(tagged("flaky", 1));
    queue.dispatch(tagged("flaky", 2));

    let stats = queue.stats();
    assert_eq!(stats.messages_failed, 2);
    assert_eq!(stats.messages_delivered, 1);
}

#[test]
fn test_refused_submission_releases_message() {
    struct Closed;
    impl Executor for Closed {
        fn execute(&self, _task: Task) -> Result<(), ExecutorError> {
            Err(ExecutorError::ShutDown)
        }
    }

    struct Flag(Arc<AtomicUsize>);
    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let queue = MessageQueue::new(
        MqConfig::default(),
        Arc::new(Closed),
        Arc::new(TimeoutAdmin::new()),
    )
    .unwrap();
    queue.activate();
    let (provider, _) = Provider::new("Z");
    queue.register(ProviderHandle(1), provider).unwrap();

    let drops = Arc::new(AtomicUsize::new(0));
    let mut message = Message::new("Z");
    message.attach(Flag(drops.clone()));
    queue.dispatch(message);

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().messages_failed, 1);
}

#[test]
fn test_release_is_idempotent() {
    struct Flag(Arc<AtomicUsize>);
    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Closer;
    impl Consumer for Closer {
        fn on_message(&self, mut message: Message) -> Result<(), ConsumeError> {
            message.close();
            message.close();
            Ok(())
        }
    }
    struct CloserProvider;
    impl EndpointProvider for CloserProvider {
        fn properties(&self) -> EndpointProperties {
            EndpointProperties::new("closer")
        }
        fn consumer(&self) -> Arc<dyn Consumer> {
            Arc::new(Closer)
        }
    }

    let queue = MessageQueue::new(
        MqConfig::default(),
        Arc::new(InlineExecutor),
        Arc::new(TimeoutAdmin::new()),
    )
    .unwrap();
    queue.activate();
    queue
        .register(ProviderHandle(1), Arc::new(CloserProvider))
        .unwrap();

    let drops = Arc::new(AtomicUsize::new(0));
    let mut message = Message::new("closer");
    message.attach(Flag(drops.clone()));
    queue.dispatch(message);

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert_eq!(queue.stats().messages_delivered, 1);
}
