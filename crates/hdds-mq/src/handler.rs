// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pre/post handler chains.
//!
//! Endpoints name their handlers by id. A [`HandlerManager`] resolves those
//! ids into [`HandlerHolder`]s: reference-counted slots that track the handler
//! currently registered under the id. Handlers may come and go at any time;
//! a leased holder always sees the current one, and an empty holder passes
//! messages through untouched.
//!
//! Every `lease(ids)` must be paired with exactly one `release(ids)`.
//! [`HandlerChain`] does this pairing on drop.

use crate::message::Message;
use arc_swap::ArcSwapOption;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Handler run on a message before it reaches its endpoint's consumer.
pub trait PreHandler: Send + Sync {
    /// Returns `false` to drop the message.
    fn pre_handle(&self, message: &mut Message) -> bool;
}

/// Handler run on a message an endpoint produces, before it is dispatched.
pub trait PostHandler: Send + Sync {
    /// Returns `false` to drop the message.
    fn post_handle(&self, message: &mut Message) -> bool;
}

/// Slot tracking the handler registered under one id.
pub struct HandlerHolder<H: ?Sized> {
    id: Arc<str>,
    handler: ArcSwapOption<Box<H>>,
    leases: AtomicUsize,
}

impl<H: ?Sized> HandlerHolder<H> {
    fn new(id: Arc<str>) -> Self {
        Self {
            id,
            handler: ArcSwapOption::empty(),
            leases: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current handler, if one is registered.
    pub fn get(&self) -> Option<Arc<Box<H>>> {
        self.handler.load_full()
    }

    pub fn is_bound(&self) -> bool {
        self.handler.load().is_some()
    }

    pub fn leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }
}

/// Resolves handler ids to leased holders.
pub struct HandlerManager<H: ?Sized> {
    holders: DashMap<Arc<str>, Arc<HandlerHolder<H>>>,
}

impl<H: ?Sized> HandlerManager<H> {
    pub fn new() -> Self {
        Self {
            holders: DashMap::new(),
        }
    }

    fn entry(
        &self,
        id: &str,
    ) -> dashmap::mapref::one::RefMut<'_, Arc<str>, Arc<HandlerHolder<H>>> {
        let key: Arc<str> = Arc::from(id);
        self.holders
            .entry(Arc::clone(&key))
            .or_insert_with(|| Arc::new(HandlerHolder::new(key)))
    }

    /// Register (or replace) the handler for `id`.
    pub fn register(&self, id: &str, handler: Box<H>) {
        self.entry(id).handler.store(Some(Arc::new(handler)));
        tracing::debug!("Handler [{}] registered", id);
    }

    /// Remove the handler for `id`. Leased holders become pass-through.
    pub fn unregister(&self, id: &str) {
        if let Some(holder) = self.holders.get(id) {
            holder.handler.store(None);
        }
        self.prune(id);
        tracing::debug!("Handler [{}] unregistered", id);
    }

    /// Lease holders for `ids`, in order.
    pub fn lease(&self, ids: &[String]) -> Vec<Arc<HandlerHolder<H>>> {
        ids.iter()
            .map(|id| {
                // Counted under the entry lock so a concurrent prune cannot
                // orphan the holder being leased.
                let holder = self.entry(id);
                holder.leases.fetch_add(1, Ordering::AcqRel);
                Arc::clone(holder.value())
            })
            .collect()
    }

    /// Release one lease per id.
    pub fn release(&self, ids: &[String]) {
        for id in ids {
            let released = self.holders.get(id.as_str()).is_some_and(|holder| {
                holder
                    .leases
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .is_ok()
            });
            if !released {
                tracing::error!("Handler [{}] released without lease", id);
                debug_assert!(released, "handler [{}] released without lease", id);
            }
            self.prune(id);
        }
    }

    /// Outstanding leases for `id`.
    pub fn leases(&self, id: &str) -> usize {
        self.holders.get(id).map_or(0, |h| h.leases())
    }

    /// Drop the holder for `id` once it is unleased and unbound.
    fn prune(&self, id: &str) {
        if let Entry::Occupied(entry) = self.holders.entry(Arc::from(id)) {
            if entry.get().leases() == 0 && !entry.get().is_bound() {
                entry.remove();
            }
        }
    }

    /// Number of ids with a holder.
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}

impl<H: ?Sized> Default for HandlerManager<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered, leased handler chain. Releases its leases on drop.
pub struct HandlerChain<H: ?Sized> {
    ids: Vec<String>,
    holders: Vec<Arc<HandlerHolder<H>>>,
    manager: Arc<HandlerManager<H>>,
}

impl<H: ?Sized> HandlerChain<H> {
    /// Lease a chain for `ids` from `manager`.
    pub fn lease(manager: &Arc<HandlerManager<H>>, ids: &[String]) -> Self {
        Self {
            ids: ids.to_vec(),
            holders: manager.lease(ids),
            manager: Arc::clone(manager),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }
}

impl HandlerChain<dyn PreHandler> {
    /// Run every bound handler in order. Stops at the first `false`.
    pub fn apply(&self, message: &mut Message) -> bool {
        self.holders.iter().all(|holder| match holder.get() {
            Some(handler) => handler.pre_handle(message),
            None => true,
        })
    }
}

impl HandlerChain<dyn PostHandler> {
    /// Run every bound handler in order. Stops at the first `false`.
    pub fn apply(&self, message: &mut Message) -> bool {
        self.holders.iter().all(|holder| match holder.get() {
            Some(handler) => handler.post_handle(message),
            None => true,
        })
    }
}

impl<H: ?Sized> Drop for HandlerChain<H> {
    fn drop(&mut self) {
        self.holders.clear();
        self.manager.release(&self.ids);
    }
}

impl<H: ?Sized> std::fmt::Debug for HandlerChain<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerChain").field("ids", &self.ids).finish()
    }
}
