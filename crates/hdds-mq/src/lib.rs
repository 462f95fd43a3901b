// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Message Queue
//!
//! In-process routing core: endpoints register and unregister at any time,
//! and messages are routed to the endpoint whose id matches their
//! destination.
//!
//! # Features
//!
//! - **Endpoint Registry**: lock-free lookup by id, serialized registration,
//!   rename on update
//! - **Pending Queues**: messages sent before their endpoint exists wait in a
//!   per-destination FIFO with a bounded timeout
//! - **Exactly-once resolution**: every held message is either delivered or
//!   timed out, never both
//! - **Handler Chains**: pre/post handlers resolved by id, hot-swappable
//!
//! # Quick Start
//!
//! ```no_run
//! use hdds_mq::{
//!     ConsumeError, Consumer, EndpointProperties, EndpointProvider, Message, MessageQueue,
//!     MqConfig, ProviderHandle,
//! };
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl Consumer for Printer {
//!     fn on_message(&self, message: Message) -> Result<(), ConsumeError> {
//!         println!("received {}", message);
//!         Ok(())
//!     }
//! }
//!
//! impl EndpointProvider for Printer {
//!     fn properties(&self) -> EndpointProperties {
//!         EndpointProperties::new("printer")
//!     }
//!
//!     fn consumer(&self) -> Arc<dyn Consumer> {
//!         Arc::new(Printer)
//!     }
//! }
//!
//! let queue = MessageQueue::start(MqConfig::default())?;
//!
//! // Held until "printer" registers.
//! queue.dispatch(Message::new("printer"));
//! queue.register(ProviderHandle(1), Arc::new(Printer))?;
//! # Ok::<(), hdds_mq::MqError>(())
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "my-queue"
//! msg_timeout_secs = 10
//! worker_threads = 4
//! log_level = "info"
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod handler;
pub mod message;
pub mod pending;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod timeout;

pub use config::{ConfigError, MqConfig, DEFAULT_MSG_TIMEOUT_SECS};
pub use endpoint::{
    Consumer, Endpoint, EndpointProperties, EndpointProvider, Producer, ProviderHandle,
};
pub use error::{ConsumeError, ExecutorError, MqError, Result};
pub use executor::{Executor, InlineExecutor, Task, TokioExecutor, WorkerPool};
pub use handler::{HandlerChain, HandlerHolder, HandlerManager, PostHandler, PreHandler};
pub use message::{Message, Payload};
pub use pending::{NodeId, PendingQueueTable};
pub use queue::MessageQueue;
pub use registry::{EndpointRegistry, UpdateOutcome};
pub use stats::{QueueStats, QueueStatsSnapshot};
pub use timeout::{TimeoutAdmin, TimeoutListener, Timer, TimerState};
