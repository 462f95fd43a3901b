// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint registry.
//!
//! Two views of the same endpoints: by id for the dispatcher, by provider
//! handle for registration adapters. Reads by id are lock-free; every
//! mutation goes through a single write lock, which keeps both views
//! consistent except for the brief window of a rename, where the endpoint is
//! reachable under both its old and new id.

use crate::endpoint::{Endpoint, EndpointProperties, ProviderHandle};
use crate::error::{MqError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of [`EndpointRegistry::update`].
#[derive(Debug)]
pub enum UpdateOutcome {
    /// Handle was unknown; the endpoint was registered.
    Registered(Arc<Endpoint>),
    /// Endpoint moved from `from` to its new id.
    Renamed { endpoint: Arc<Endpoint>, from: Arc<str> },
    /// Id did not change.
    Unchanged(Arc<Endpoint>),
}

/// Id and handle maps of registered endpoints.
pub struct EndpointRegistry {
    by_id: DashMap<Arc<str>, Arc<Endpoint>>,
    by_handle: Mutex<HashMap<ProviderHandle, Arc<Endpoint>>>,
    interned: DashMap<Arc<str>, ()>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_handle: Mutex::new(HashMap::new()),
            interned: DashMap::new(),
        }
    }

    /// Shared instance of `id`. Equal ids intern to the same allocation.
    pub fn intern(&self, id: &str) -> Arc<str> {
        if let Some(entry) = self.interned.get(id) {
            return Arc::clone(entry.key());
        }
        let entry = self.interned.entry(Arc::from(id)).or_insert(());
        Arc::clone(entry.key())
    }

    /// Register a new endpoint under the id in `properties`.
    ///
    /// `build` creates the endpoint once the id is known to be free; it runs
    /// under the registry lock.
    pub fn register<F>(
        &self,
        handle: ProviderHandle,
        properties: &EndpointProperties,
        build: F,
    ) -> Result<Arc<Endpoint>>
    where
        F: FnOnce(Arc<str>) -> Arc<Endpoint>,
    {
        let mut handles = self.by_handle.lock();
        self.insert_locked(&mut handles, handle, properties, build)
    }

    fn insert_locked<F>(
        &self,
        handles: &mut HashMap<ProviderHandle, Arc<Endpoint>>,
        handle: ProviderHandle,
        properties: &EndpointProperties,
        build: F,
    ) -> Result<Arc<Endpoint>>
    where
        F: FnOnce(Arc<str>) -> Arc<Endpoint>,
    {
        let id = properties
            .trimmed_id()
            .ok_or_else(|| MqError::InvalidId(properties.id.clone().unwrap_or_default()))?;

        if let Some(existing) = handles.get(&handle) {
            return Err(MqError::DuplicateId(existing.id().to_string()));
        }

        let id = self.intern(id);
        let endpoint = match self.by_id.entry(Arc::clone(&id)) {
            Entry::Occupied(_) => return Err(MqError::DuplicateId(id.to_string())),
            Entry::Vacant(vacant) => {
                let endpoint = build(id);
                vacant.insert(Arc::clone(&endpoint));
                endpoint
            }
        };
        handles.insert(handle, Arc::clone(&endpoint));
        Ok(endpoint)
    }

    /// Remove the endpoint registered under `handle` and close its producer.
    ///
    /// Unknown handles are ignored.
    pub fn unregister(&self, handle: ProviderHandle) -> Option<Arc<Endpoint>> {
        let endpoint = {
            let mut handles = self.by_handle.lock();
            self.remove_locked(&mut handles, handle)?
        };
        endpoint.close_producer();
        Some(endpoint)
    }

    fn remove_locked(
        &self,
        handles: &mut HashMap<ProviderHandle, Arc<Endpoint>>,
        handle: ProviderHandle,
    ) -> Option<Arc<Endpoint>> {
        let endpoint = handles.remove(&handle)?;
        self.by_id
            .remove_if(&*endpoint.id(), |_, current| Arc::ptr_eq(current, &endpoint));
        Some(endpoint)
    }

    /// Re-read the id of the endpoint under `handle`.
    ///
    /// An unknown handle registers. A changed id moves the endpoint if the
    /// new id is free; otherwise the endpoint is unregistered and
    /// [`MqError::RenameConflict`] returned. A missing or blank id also
    /// unregisters the endpoint.
    pub fn update<F>(
        &self,
        handle: ProviderHandle,
        properties: &EndpointProperties,
        build: F,
    ) -> Result<UpdateOutcome>
    where
        F: FnOnce(Arc<str>) -> Arc<Endpoint>,
    {
        let mut handles = self.by_handle.lock();
        let Some(endpoint) = handles.get(&handle).cloned() else {
            return self
                .insert_locked(&mut handles, handle, properties, build)
                .map(UpdateOutcome::Registered);
        };

        let old_id = endpoint.id();
        let Some(new_id) = properties.trimmed_id() else {
            self.remove_locked(&mut handles, handle);
            drop(handles);
            endpoint.close_producer();
            return Err(MqError::InvalidId(properties.id.clone().unwrap_or_default()));
        };
        if *old_id == *new_id {
            return Ok(UpdateOutcome::Unchanged(endpoint));
        }

        let new_id = self.intern(new_id);
        let moved = match self.by_id.entry(Arc::clone(&new_id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                endpoint.set_id(Arc::clone(&new_id));
                vacant.insert(Arc::clone(&endpoint));
                true
            }
        };

        if !moved {
            self.remove_locked(&mut handles, handle);
            drop(handles);
            endpoint.close_producer();
            return Err(MqError::RenameConflict {
                from: old_id.to_string(),
                to: new_id.to_string(),
            });
        }

        self.by_id
            .remove_if(&*old_id, |_, current| Arc::ptr_eq(current, &endpoint));
        Ok(UpdateOutcome::Renamed {
            endpoint,
            from: old_id,
        })
    }

    /// Endpoint currently registered under `id`. Never takes the write lock.
    pub fn resolve(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.by_id.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Endpoint registered under `handle`.
    pub fn get(&self, handle: ProviderHandle) -> Option<Arc<Endpoint>> {
        self.by_handle.lock().get(&handle).cloned()
    }

    /// Snapshot of all registered endpoints.
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.by_handle.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_handle.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Consumer, EndpointProvider};
    use crate::error::ConsumeError;
    use crate::handler::{HandlerManager, PostHandler, PreHandler};
    use crate::message::Message;

    struct Null;

    impl Consumer for Null {
        fn on_message(&self, _message: Message) -> std::result::Result<(), ConsumeError> {
            Ok(())
        }
    }

    impl EndpointProvider for Null {
        fn properties(&self) -> EndpointProperties {
            EndpointProperties::default()
        }

        fn consumer(&self) -> Arc<dyn Consumer> {
            Arc::new(Null)
        }
    }

    struct Fixture {
        registry: EndpointRegistry,
        pre: Arc<HandlerManager<dyn PreHandler>>,
        post: Arc<HandlerManager<dyn PostHandler>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: EndpointRegistry::new(),
                pre: Arc::new(HandlerManager::new()),
                post: Arc::new(HandlerManager::new()),
            }
        }

        fn build(
            &self,
            handle: u64,
            props: &EndpointProperties,
        ) -> impl FnOnce(Arc<str>) -> Arc<Endpoint> + '_ {
            let props = props.clone();
            move |id| {
                Arc::new(Endpoint::new(
                    id,
                    ProviderHandle(handle),
                    Arc::new(Null),
                    &props,
                    &self.pre,
                    &self.post,
                ))
            }
        }

        fn register(&self, handle: u64, id: &str) -> Result<Arc<Endpoint>> {
            let props = EndpointProperties::new(id);
            self.registry
                .register(ProviderHandle(handle), &props, self.build(handle, &props))
        }

        fn update(&self, handle: u64, id: &str) -> Result<UpdateOutcome> {
            let props = EndpointProperties::new(id);
            self.registry
                .update(ProviderHandle(handle), &props, self.build(handle, &props))
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let fx = Fixture::new();
        let ep = fx.register(1, "  A ").unwrap();

        assert_eq!(&*ep.id(), "A");
        assert!(Arc::ptr_eq(&fx.registry.resolve("A").unwrap(), &ep));
        assert!(fx.registry.resolve(" A ").is_none());
        assert_eq!(fx.registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_blank_id() {
        let fx = Fixture::new();
        assert!(matches!(fx.register(1, "   "), Err(MqError::InvalidId(_))));

        let props = EndpointProperties::default();
        let result = fx
            .registry
            .register(ProviderHandle(2), &props, fx.build(2, &props));
        assert!(matches!(result, Err(MqError::InvalidId(_))));
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_duplicate_id_keeps_first() {
        let fx = Fixture::new();
        let first = fx.register(1, "A").unwrap();

        assert!(matches!(fx.register(2, "A"), Err(MqError::DuplicateId(id)) if id == "A"));
        assert!(Arc::ptr_eq(&fx.registry.resolve("A").unwrap(), &first));
        assert!(fx.registry.get(ProviderHandle(2)).is_none());
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let fx = Fixture::new();
        fx.register(1, "A").unwrap();
        assert!(matches!(fx.register(1, "B"), Err(MqError::DuplicateId(_))));
        assert!(fx.registry.resolve("B").is_none());
    }

    #[test]
    fn test_unregister_removes_both_views() {
        let fx = Fixture::new();
        let ep = fx.register(1, "A").unwrap();

        let removed = fx.registry.unregister(ProviderHandle(1)).unwrap();
        assert!(Arc::ptr_eq(&removed, &ep));
        assert!(removed.is_closed());
        assert!(fx.registry.resolve("A").is_none());
        assert!(fx.registry.unregister(ProviderHandle(1)).is_none());
    }

    #[test]
    fn test_update_renames_to_free_id() {
        let fx = Fixture::new();
        let ep = fx.register(1, "F").unwrap();

        match fx.update(1, "G").unwrap() {
            UpdateOutcome::Renamed { endpoint, from } => {
                assert!(Arc::ptr_eq(&endpoint, &ep));
                assert_eq!(&*from, "F");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(fx.registry.resolve("F").is_none());
        assert!(Arc::ptr_eq(&fx.registry.resolve("G").unwrap(), &ep));
        assert_eq!(&*ep.id(), "G");
    }

    #[test]
    fn test_update_conflict_unregisters() {
        let fx = Fixture::new();
        let f = fx.register(1, "F").unwrap();
        let g = fx.register(2, "G").unwrap();

        let err = fx.update(1, "G").unwrap_err();
        assert_eq!(err.to_string(), "Endpoint [F] is unregistered: existing id=G");

        assert!(f.is_closed());
        assert!(fx.registry.resolve("F").is_none());
        assert!(fx.registry.get(ProviderHandle(1)).is_none());
        assert!(Arc::ptr_eq(&fx.registry.resolve("G").unwrap(), &g));
    }

    #[test]
    fn test_update_to_blank_id_unregisters() {
        let fx = Fixture::new();
        let ep = fx.register(1, "F").unwrap();

        assert!(matches!(fx.update(1, " "), Err(MqError::InvalidId(_))));
        assert!(ep.is_closed());
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_update_unknown_handle_registers() {
        let fx = Fixture::new();
        assert!(matches!(
            fx.update(9, "A").unwrap(),
            UpdateOutcome::Registered(_)
        ));
        assert!(matches!(fx.update(9, "A").unwrap(), UpdateOutcome::Unchanged(_)));
    }

    #[test]
    fn test_intern_shares_allocation() {
        let registry = EndpointRegistry::new();
        let a = registry.intern("topic");
        let b = registry.intern(&String::from("topic"));
        assert!(Arc::ptr_eq(&a, &b));
    }
}
