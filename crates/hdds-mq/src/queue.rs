// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message queue: registration front-end and dispatcher.
//!
//! # Dispatch
//!
//! ```text
//! dispatch(msg)
//!   ├── no destination ──────────────► release
//!   ├── endpoint registered ─────────► assign + submit
//!   └── not registered ──► hold + arm timer ──► re-resolve
//!                                                ├── found, cancel won ► claim + submit
//!                                                └── otherwise ───────► stays held
//! ```
//!
//! A held message leaves its pending queue exactly once: through the
//! re-resolve above, through a wake drain when its endpoint registers, or
//! through its timer firing. The timer's cancel-once state decides which.

use crate::config::MqConfig;
use crate::endpoint::{Endpoint, EndpointProperties, EndpointProvider, ProviderHandle};
use crate::error::{MqError, Result};
use crate::executor::{Executor, WorkerPool};
use crate::handler::{HandlerManager, PostHandler, PreHandler};
use crate::message::Message;
use crate::pending::{NodeId, PendingQueueTable};
use crate::registry::{EndpointRegistry, UpdateOutcome};
use crate::stats::{QueueStats, QueueStatsSnapshot};
use crate::timeout::{TimeoutAdmin, TimeoutListener};
use arc_swap::ArcSwap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// In-process message queue.
///
/// Created inactive by [`MessageQueue::new`]; [`MessageQueue::start`] builds
/// an active queue with its own worker pool and timer thread.
pub struct MessageQueue {
    inner: Arc<QueueInner>,
}

pub(crate) struct QueueInner {
    config: ArcSwap<MqConfig>,
    registry: EndpointRegistry,
    pending: PendingQueueTable,
    pre_handlers: Arc<HandlerManager<dyn PreHandler>>,
    post_handlers: Arc<HandlerManager<dyn PostHandler>>,
    executor: Arc<dyn Executor>,
    timers: Arc<TimeoutAdmin>,
    expiry: Arc<dyn TimeoutListener<NodeId>>,
    active: AtomicBool,
    pub(crate) stats: QueueStats,
    this: Weak<QueueInner>,
}

/// Routes fired timers back to the queue without keeping it alive.
struct ExpiryRelay(Weak<QueueInner>);

impl TimeoutListener<NodeId> for ExpiryRelay {
    fn on_timeout(&self, node: NodeId) {
        if let Some(inner) = self.0.upgrade() {
            inner.expire(node);
        }
    }
}

impl MessageQueue {
    /// Create an inactive queue on `executor` and `timers`.
    pub fn new(
        config: MqConfig,
        executor: Arc<dyn Executor>,
        timers: Arc<TimeoutAdmin>,
    ) -> Result<Self> {
        config.validate()?;

        let inner = Arc::new_cyclic(|this: &Weak<QueueInner>| QueueInner {
            config: ArcSwap::from_pointee(config),
            registry: EndpointRegistry::new(),
            pending: PendingQueueTable::new(),
            pre_handlers: Arc::new(HandlerManager::new()),
            post_handlers: Arc::new(HandlerManager::new()),
            executor,
            timers,
            expiry: Arc::new(ExpiryRelay(this.clone())),
            active: AtomicBool::new(false),
            stats: QueueStats::new(),
            this: this.clone(),
        });

        Ok(Self { inner })
    }

    /// Create and activate a queue with a [`WorkerPool`] of
    /// `config.worker_threads` and a private [`TimeoutAdmin`].
    pub fn start(config: MqConfig) -> Result<Self> {
        config.validate()?;
        let executor = Arc::new(WorkerPool::new(config.worker_threads));
        let queue = Self::new(config, executor, Arc::new(TimeoutAdmin::new()))?;
        queue.activate();
        Ok(queue)
    }

    /// Register `provider` under `handle`.
    pub fn register(
        &self,
        handle: ProviderHandle,
        provider: Arc<dyn EndpointProvider>,
    ) -> Result<Arc<Endpoint>> {
        self.inner.register(handle, provider)
    }

    /// Remove the endpoint registered under `handle`.
    pub fn unregister(&self, handle: ProviderHandle) -> Option<Arc<Endpoint>> {
        self.inner.unregister(handle)
    }

    /// Re-read `provider`'s properties for the registration under `handle`.
    pub fn update(
        &self,
        handle: ProviderHandle,
        provider: Arc<dyn EndpointProvider>,
    ) -> Result<Arc<Endpoint>> {
        self.inner.update(handle, provider)
    }

    /// Route `message` to the endpoint named by its destination.
    pub fn dispatch(&self, message: Message) {
        self.inner.dispatch(message);
    }

    /// Start delivering to endpoints registered so far and wake their
    /// pending messages.
    pub fn activate(&self) {
        self.inner.activate();
    }

    /// Stop waking endpoints and release every held message.
    pub fn deactivate(&self) {
        self.inner.deactivate();
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Apply a new configuration. The timeout applies to messages held
    /// from now on; the worker pool keeps its size.
    pub fn modified(&self, config: MqConfig) -> Result<()> {
        config.validate()?;
        tracing::info!(
            "[{}] configuration updated: msg_timeout={}s",
            config.name,
            config.msg_timeout_secs
        );
        self.inner.config.store(Arc::new(config));
        Ok(())
    }

    pub fn config(&self) -> Arc<MqConfig> {
        self.inner.config.load_full()
    }

    /// Pre-handlers available to endpoints, by id.
    pub fn pre_handlers(&self) -> &Arc<HandlerManager<dyn PreHandler>> {
        &self.inner.pre_handlers
    }

    /// Post-handlers available to endpoints, by id.
    pub fn post_handlers(&self) -> &Arc<HandlerManager<dyn PostHandler>> {
        &self.inner.post_handlers
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.inner.registry.resolve(id)
    }

    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.inner.registry.endpoints()
    }

    /// Messages held for `destination`.
    pub fn pending_len(&self, destination: &str) -> usize {
        self.inner.pending.len_for(destination)
    }

    /// Messages held across all destinations.
    pub fn pending_total(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.inner.deactivate();
    }
}

impl QueueInner {
    fn build_endpoint(
        &self,
        id: Arc<str>,
        handle: ProviderHandle,
        provider: &Arc<dyn EndpointProvider>,
        properties: &EndpointProperties,
    ) -> Arc<Endpoint> {
        Arc::new(Endpoint::new(
            id,
            handle,
            Arc::clone(provider),
            properties,
            &self.pre_handlers,
            &self.post_handlers,
        ))
    }

    fn register(
        self: &Arc<Self>,
        handle: ProviderHandle,
        provider: Arc<dyn EndpointProvider>,
    ) -> Result<Arc<Endpoint>> {
        let properties = provider.properties();
        let result = self.registry.register(handle, &properties, |id| {
            self.build_endpoint(id, handle, &provider, &properties)
        });

        match result {
            Ok(endpoint) => {
                tracing::info!("{} registered ({})", endpoint, handle);
                endpoint.attach_producer(self.this.clone());
                self.bind(&endpoint);
                Ok(endpoint)
            }
            Err(e) => {
                tracing::error!("Registration of {} failed: {}", handle, e);
                Err(e)
            }
        }
    }

    fn unregister(&self, handle: ProviderHandle) -> Option<Arc<Endpoint>> {
        let endpoint = self.registry.unregister(handle)?;
        tracing::info!("{} unregistered ({})", endpoint, handle);
        Some(endpoint)
    }

    fn update(
        self: &Arc<Self>,
        handle: ProviderHandle,
        provider: Arc<dyn EndpointProvider>,
    ) -> Result<Arc<Endpoint>> {
        let properties = provider.properties();
        let result = self.registry.update(handle, &properties, |id| {
            self.build_endpoint(id, handle, &provider, &properties)
        });

        match result {
            Ok(UpdateOutcome::Registered(endpoint)) => {
                tracing::info!("{} registered ({})", endpoint, handle);
                endpoint.attach_producer(self.this.clone());
                self.bind(&endpoint);
                Ok(endpoint)
            }
            Ok(UpdateOutcome::Renamed { endpoint, from }) => {
                tracing::info!("Endpoint [{}] renamed to [{}]", from, endpoint.id());
                endpoint.set_handlers(&properties, &self.pre_handlers, &self.post_handlers);
                self.bind(&endpoint);
                Ok(endpoint)
            }
            Ok(UpdateOutcome::Unchanged(endpoint)) => {
                endpoint.set_handlers(&properties, &self.pre_handlers, &self.post_handlers);
                self.bind(&endpoint);
                Ok(endpoint)
            }
            Err(e) => {
                tracing::error!("Update of {} failed: {}", handle, e);
                Err(e)
            }
        }
    }

    /// Materialize an eager consumer and deliver what is waiting for it.
    /// Does nothing while the queue is inactive.
    fn bind(self: &Arc<Self>, endpoint: &Arc<Endpoint>) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        if !endpoint.is_lazy() && !endpoint.is_materialized() {
            let materialized = catch_unwind(AssertUnwindSafe(|| endpoint.consumer()));
            if materialized.is_err() {
                tracing::error!("{} failed to create its consumer", endpoint);
            }
        }
        self.wake(endpoint);
    }

    fn wake(self: &Arc<Self>, endpoint: &Arc<Endpoint>) {
        let id = endpoint.id();
        let woken = self
            .pending
            .drain_for(&id, |message| self.execute(Arc::clone(endpoint), message));
        if woken > 0 {
            tracing::debug!("{} woke {} pending message(s)", endpoint, woken);
        }
    }

    pub(crate) fn dispatch(self: &Arc<Self>, mut message: Message) {
        self.stats.record_dispatched();
        // A forwarded message still carries its previous hop.
        message.reset_route();

        let Some(destination) = message.destination() else {
            tracing::debug!("{} has no destination, released", message);
            self.stats.record_dropped();
            drop(message);
            return;
        };

        if let Some(endpoint) = self.registry.resolve(&destination) {
            self.execute(endpoint, message);
            return;
        }

        let destination = self.registry.intern(&destination);
        let timeout = self.config.load().msg_timeout();
        let node = self.pending.enqueue(&destination, message, timeout, |node| {
            self.timers.create_timer(
                node,
                Arc::clone(&self.expiry),
                Arc::clone(&self.executor),
            )
        });
        self.stats.record_held();

        // The endpoint may have registered between the lookup and the
        // enqueue, after its wake drain already ran.
        if let Some(endpoint) = self.registry.resolve(&destination) {
            if let Some(message) = self.pending.claim(node) {
                self.execute(endpoint, message);
            }
        }
    }

    fn execute(self: &Arc<Self>, endpoint: Arc<Endpoint>, mut message: Message) {
        let message_id = message.id();
        let endpoint_id = endpoint.id();
        message.assign_endpoint(endpoint);

        let inner = Arc::clone(self);
        if let Err(e) = self
            .executor
            .execute(Box::new(move || inner.deliver(message)))
        {
            let err = MqError::DispatchFailure {
                endpoint: endpoint_id.to_string(),
                message: message_id,
                reason: e.to_string(),
            };
            tracing::error!("{}", err);
            self.stats.record_failed();
        }
    }

    fn deliver(&self, mut message: Message) {
        let Some(endpoint) = message.endpoint().cloned() else {
            return;
        };

        if let Some(chain) = message.pre_handlers().cloned() {
            if !chain.apply(&mut message) {
                tracing::debug!("{} dropped by pre-handlers of {}", message, endpoint);
                self.stats.record_dropped();
                return;
            }
        }

        let message_id = message.id();
        let outcome = catch_unwind(AssertUnwindSafe(|| endpoint.consumer().on_message(message)));
        let reason = match outcome {
            Ok(Ok(())) => {
                self.stats.record_delivered();
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "consumer panicked".to_string(),
        };

        let err = MqError::DispatchFailure {
            endpoint: endpoint.id().to_string(),
            message: message_id,
            reason,
        };
        tracing::error!("{}", err);
        self.stats.record_failed();
    }

    fn expire(&self, node: NodeId) {
        let Some(message) = self.pending.remove(node) else {
            return;
        };
        let err = MqError::Timeout {
            destination: message.to().unwrap_or_default().to_string(),
            message: message.id(),
        };
        tracing::warn!("{}", err);
        self.stats.record_timed_out();
    }

    fn activate(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("[{}] message queue activated", self.config.load().name);
        for endpoint in self.registry.endpoints() {
            self.bind(&endpoint);
        }
    }

    fn deactivate(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let released = self.pending.close_all();
        tracing::info!(
            "[{}] message queue deactivated, {} pending message(s) released",
            self.config.load().name,
            released.len()
        );
        self.stats.record_dropped_n(released.len() as u64);
    }
}
