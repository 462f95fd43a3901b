// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routed message.
//!
//! A message carries one opaque payload and is owned by exactly one party at
//! a time: the sender, a pending queue, or the task delivering it. Dropping
//! a message releases it; [`Message::close`] does the same explicitly and is
//! idempotent.

use crate::endpoint::Endpoint;
use crate::handler::{HandlerChain, PostHandler, PreHandler};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque message payload.
pub type Payload = Box<dyn Any + Send>;

/// Message routed by destination id.
pub struct Message {
    id: u64,
    to: Option<Arc<str>>,
    from: Option<Arc<str>>,
    payload: Option<Payload>,
    endpoint: Option<Arc<Endpoint>>,
    pre_handlers: Option<Arc<HandlerChain<dyn PreHandler>>>,
    post_handlers: Option<Arc<HandlerChain<dyn PostHandler>>>,
    closed: bool,
}

impl Message {
    /// Create a message for destination `to`.
    pub fn new(to: impl Into<Arc<str>>) -> Self {
        let mut message = Self::to_null();
        message.to = Some(to.into());
        message
    }

    /// Create a message without destination. Dispatching it is a no-op.
    pub fn to_null() -> Self {
        Self {
            id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            to: None,
            from: None,
            payload: None,
            endpoint: None,
            pre_handlers: None,
            post_handlers: None,
            closed: false,
        }
    }

    /// Set the origin id.
    pub fn with_origin(mut self, from: impl Into<Arc<str>>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Process-unique message number, used to identify the message in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Destination id.
    pub fn to(&self) -> Option<&str> {
        self.to.as_deref()
    }

    pub fn set_to(&mut self, to: impl Into<Arc<str>>) {
        self.to = Some(to.into());
    }

    /// Origin id.
    pub fn origin(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub(crate) fn set_origin(&mut self, from: Arc<str>) {
        self.from = Some(from);
    }

    /// `true` if the message has no (or a blank) destination.
    pub fn is_to_null(&self) -> bool {
        self.to.as_deref().map_or(true, |to| to.trim().is_empty())
    }

    pub(crate) fn destination(&self) -> Option<Arc<str>> {
        if self.is_to_null() {
            None
        } else {
            self.to.clone()
        }
    }

    /// Attach a payload, replacing (and dropping) any previous one.
    pub fn attach<T: Any + Send>(&mut self, payload: T) {
        self.payload = Some(Box::new(payload));
    }

    /// Attach an already boxed payload.
    pub fn attach_boxed(&mut self, payload: Payload) {
        self.payload = Some(payload);
    }

    /// Take the payload out of the message.
    pub fn detach(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    /// Take the payload if it is a `T`. A payload of another type stays attached.
    pub fn take<T: Any + Send>(&mut self) -> Option<T> {
        match self.payload.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.payload = Some(other);
                None
            }
        }
    }

    /// Borrow the payload as a `T`.
    pub fn payload<T: Any + Send>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref::<T>()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Endpoint this message was assigned to by the dispatcher.
    pub fn endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.endpoint.as_ref()
    }

    pub fn pre_handlers(&self) -> Option<&Arc<HandlerChain<dyn PreHandler>>> {
        self.pre_handlers.as_ref()
    }

    pub fn post_handlers(&self) -> Option<&Arc<HandlerChain<dyn PostHandler>>> {
        self.post_handlers.as_ref()
    }

    /// Bind the message to its target endpoint and take that endpoint's
    /// handler chains, replacing any previous hop's.
    pub(crate) fn assign_endpoint(&mut self, endpoint: Arc<Endpoint>) {
        self.pre_handlers = Some(endpoint.pre_handlers());
        self.post_handlers = Some(endpoint.post_handlers());
        self.endpoint = Some(endpoint);
    }

    /// Clear the previous hop's endpoint so the message can be sent on.
    pub(crate) fn reset_route(&mut self) {
        self.endpoint = None;
        self.pre_handlers = None;
        self.post_handlers = None;
    }

    /// Release the payload and handler chain references. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.payload = None;
        self.reset_route();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message[#{} {} -> {}]",
            self.id,
            self.from.as_deref().unwrap_or("-"),
            self.to.as_deref().unwrap_or("null")
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("to", &self.to)
            .field("from", &self.from)
            .field("payload", &self.payload.as_ref().map(|_| "Box<dyn Any>"))
            .field("endpoint", &self.endpoint.as_ref().map(|e| e.id()))
            .field("closed", &self.closed)
            .finish()
    }
}
