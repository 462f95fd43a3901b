// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoints and the provider boundary.
//!
//! Transports and services plug into the queue as [`EndpointProvider`]s.
//! The queue wraps each registered provider in an [`Endpoint`], hands the
//! provider a [`Producer`] to send with, and delivers messages addressed to
//! the endpoint id to the provider's [`Consumer`].

use crate::error::{ConsumeError, MqError};
use crate::handler::{HandlerChain, HandlerManager, PostHandler, PreHandler};
use crate::message::Message;
use crate::queue::QueueInner;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Opaque registration handle chosen by the adapter that registers a provider.
///
/// The same handle is used to update or unregister the provider later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderHandle(pub u64);

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider#{}", self.0)
    }
}

/// Registration properties published by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointProperties {
    /// Endpoint id. Trimmed on registration; missing or blank ids are rejected.
    pub id: Option<String>,
    /// Materialize the consumer on first delivery instead of at registration.
    pub lazy: bool,
    /// Pre-handler ids run before the consumer, in order.
    pub pre_handlers: Vec<String>,
    /// Post-handler ids run on produced messages, in order.
    pub post_handlers: Vec<String>,
}

impl EndpointProperties {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn pre_handlers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pre_handlers = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn post_handlers<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_handlers = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Trimmed id, or `None` if missing or blank.
    pub fn trimmed_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

impl Default for EndpointProperties {
    fn default() -> Self {
        Self {
            id: None,
            lazy: true,
            pre_handlers: Vec::new(),
            post_handlers: Vec::new(),
        }
    }
}

/// Receives messages addressed to an endpoint.
pub trait Consumer: Send + Sync {
    /// Process one message. The consumer owns it from here on.
    fn on_message(&self, message: Message) -> Result<(), ConsumeError>;
}

/// Externally supplied endpoint implementation.
///
/// Provider callbacks run while the registry is locked and must not call
/// back into the queue's registration methods.
pub trait EndpointProvider: Send + Sync {
    /// Current registration properties. Re-read on update.
    fn properties(&self) -> EndpointProperties;

    /// Build the consumer. Called at most once per registration.
    fn consumer(&self) -> Arc<dyn Consumer>;

    /// Receive the producer for this registration.
    fn attach_producer(&self, _producer: Producer) {}

    /// The registration is gone; the producer handed out before is closed.
    fn detach_producer(&self) {}
}

/// A registered provider, reachable by its id.
pub struct Endpoint {
    id: RwLock<Arc<str>>,
    handle: ProviderHandle,
    provider: Arc<dyn EndpointProvider>,
    lazy: AtomicBool,
    consumer: OnceLock<Arc<dyn Consumer>>,
    pre_handlers: ArcSwap<HandlerChain<dyn PreHandler>>,
    post_handlers: ArcSwap<HandlerChain<dyn PostHandler>>,
    closed: Arc<AtomicBool>,
}

impl Endpoint {
    pub(crate) fn new(
        id: Arc<str>,
        handle: ProviderHandle,
        provider: Arc<dyn EndpointProvider>,
        properties: &EndpointProperties,
        pre_manager: &Arc<HandlerManager<dyn PreHandler>>,
        post_manager: &Arc<HandlerManager<dyn PostHandler>>,
    ) -> Self {
        Self {
            id: RwLock::new(id),
            handle,
            provider,
            lazy: AtomicBool::new(properties.lazy),
            consumer: OnceLock::new(),
            pre_handlers: ArcSwap::from_pointee(HandlerChain::lease(
                pre_manager,
                &properties.pre_handlers,
            )),
            post_handlers: ArcSwap::from_pointee(HandlerChain::lease(
                post_manager,
                &properties.post_handlers,
            )),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current id.
    pub fn id(&self) -> Arc<str> {
        Arc::clone(&self.id.read())
    }

    pub(crate) fn set_id(&self, id: Arc<str>) {
        *self.id.write() = id;
    }

    pub fn handle(&self) -> ProviderHandle {
        self.handle
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy.load(Ordering::Acquire)
    }

    /// `true` once the consumer has been built.
    pub fn is_materialized(&self) -> bool {
        self.consumer.get().is_some()
    }

    /// The provider's consumer, built on first call.
    pub fn consumer(&self) -> Arc<dyn Consumer> {
        Arc::clone(self.consumer.get_or_init(|| self.provider.consumer()))
    }

    pub fn pre_handlers(&self) -> Arc<HandlerChain<dyn PreHandler>> {
        self.pre_handlers.load_full()
    }

    pub fn post_handlers(&self) -> Arc<HandlerChain<dyn PostHandler>> {
        self.post_handlers.load_full()
    }

    /// Re-read laziness and handler ids from `properties`. The previous
    /// chains are released once no in-flight message holds them.
    pub(crate) fn set_handlers(
        &self,
        properties: &EndpointProperties,
        pre_manager: &Arc<HandlerManager<dyn PreHandler>>,
        post_manager: &Arc<HandlerManager<dyn PostHandler>>,
    ) {
        self.lazy.store(properties.lazy, Ordering::Release);
        if self.pre_handlers.load().ids() != properties.pre_handlers.as_slice() {
            self.pre_handlers.store(Arc::new(HandlerChain::lease(
                pre_manager,
                &properties.pre_handlers,
            )));
        }
        if self.post_handlers.load().ids() != properties.post_handlers.as_slice() {
            self.post_handlers.store(Arc::new(HandlerChain::lease(
                post_manager,
                &properties.post_handlers,
            )));
        }
    }

    pub(crate) fn attach_producer(self: &Arc<Self>, queue: Weak<QueueInner>) {
        if self.is_closed() {
            return;
        }
        let producer = Producer {
            endpoint: Arc::downgrade(self),
            queue,
            closed: Arc::clone(&self.closed),
        };
        self.provider.attach_producer(producer);
    }

    /// Close the producer and notify the provider. Idempotent.
    pub(crate) fn close_producer(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.provider.detach_producer();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint[{}]", self.id.read())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &*self.id.read())
            .field("handle", &self.handle)
            .field("lazy", &self.is_lazy())
            .field("materialized", &self.is_materialized())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Sending side of an endpoint.
///
/// Messages sent through a producer carry the endpoint id as origin, pass
/// the endpoint's post-handler chain, and are then dispatched like any other
/// message.
#[derive(Clone)]
pub struct Producer {
    endpoint: Weak<Endpoint>,
    queue: Weak<QueueInner>,
    closed: Arc<AtomicBool>,
}

impl Producer {
    /// New message from this endpoint to `to`.
    pub fn create_message(&self, to: impl Into<Arc<str>>) -> Message {
        let mut message = Message::new(to);
        if let Some(endpoint) = self.endpoint.upgrade() {
            message.set_origin(endpoint.id());
        }
        message
    }

    /// Send `message` on. A message this endpoint received may be sent again.
    pub fn send(&self, mut message: Message) -> Result<(), MqError> {
        let endpoint = match self.endpoint.upgrade() {
            Some(endpoint) if !self.is_closed() => endpoint,
            _ => return Err(self.closed_error()),
        };
        let queue = self.queue.upgrade().ok_or_else(|| self.closed_error())?;

        message.reset_route();
        message.set_origin(endpoint.id());

        if !endpoint.post_handlers().apply(&mut message) {
            tracing::debug!("{} dropped by post-handlers of {}", message, endpoint);
            queue.stats.record_dropped();
            message.close();
            return Ok(());
        }

        queue.dispatch(message);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> MqError {
        let id = self
            .endpoint
            .upgrade()
            .map(|e| e.id().to_string())
            .unwrap_or_default();
        MqError::ProducerClosed(id)
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("endpoint", &self.endpoint.upgrade().map(|e| e.id()))
            .field("closed", &self.is_closed())
            .finish()
    }
}
