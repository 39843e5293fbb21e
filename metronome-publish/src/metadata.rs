// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, RwLock};

use hashbrown::HashSet;

use crate::HttpRequest;

/// Metric names already registered with a backend's metadata endpoint.
///
/// Safe for concurrent use; clones share the same set. A name is reserved the
/// moment [`MetadataCache::insert`] returns `true`, so at most one caller ever
/// issues the registration for it. A reservation whose call was never sent is
/// handed back when its [`MetadataCall`] is dropped or released.
#[derive(Debug, Clone, Default)]
pub struct MetadataCache(Arc<RwLock<HashSet<String>>>);

impl MetadataCache {
    /// An empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name`. Returns `true` if it was not registered before.
    pub fn insert(&self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.0.write().unwrap().insert(name.to_owned())
    }

    fn remove(&self, name: &str) {
        self.0.write().unwrap().remove(name);
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.0.read().unwrap().contains(name)
    }

    /// Number of registered names
    pub fn len(&self) -> usize {
        self.0.read().unwrap().len()
    }

    /// Whether no names are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A metadata registration holding the reservation of its name.
///
/// Dropping the call releases the name unless [`MetadataCall::commit`] was
/// called first, so a call lost on an error path is registered by a later
/// cycle.
#[derive(Debug)]
pub struct MetadataCall {
    name: String,
    request: HttpRequest,
    cache: MetadataCache,
    committed: bool,
}

impl MetadataCall {
    /// Reserve `name` in `cache` for `request`.
    ///
    /// Returns `None` if the name was already reserved.
    pub fn reserve(
        cache: &MetadataCache,
        name: impl Into<String>,
        request: HttpRequest,
    ) -> Option<Self> {
        let name = name.into();
        cache.insert(&name).then(|| Self {
            name,
            request,
            cache: cache.clone(),
            committed: false,
        })
    }

    /// The reserved metric name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The request to send
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Keep the name reserved for good. Called once the request was sent,
    /// whatever the response.
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Give the name back without sending, so a later cycle registers it.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for MetadataCall {
    fn drop(&mut self) {
        if !self.committed {
            self.cache.remove(&self.name);
        }
    }
}
