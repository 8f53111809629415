//! Process-local state cache backed by a kube reflector store.
//!
//! The watch streams feed every event through the cache's [`Writer`], so a
//! relist (`Init` .. `InitDone`) rebuilds the store and drops objects that
//! vanished while the watch was disconnected. Reconcilers also push the
//! objects they just wrote, so reads after a mutation see the new state
//! before the watch delivers it.
//!
//! The cache is a read optimization only: existence and create/update
//! decisions always re-read the authoritative store.

use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::{Stream, TryStreamExt};
use kube::Resource;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::watcher;
use tracing::debug;

use crate::controller::common::ResourceKey;

/// Advisory cache of the last observed object per key.
pub struct StateCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    reader: Store<K>,
    writer: Mutex<Writer<K>>,
}

impl<K> Default for StateCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> StateCache<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    pub fn new() -> Self {
        let (reader, writer) = reflector::store();
        Self {
            reader,
            writer: Mutex::new(writer),
        }
    }

    fn writer(&self) -> MutexGuard<'_, Writer<K>> {
        // Store contents stay consistent even if a holder panicked
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn object_ref(key: &ResourceKey) -> ObjectRef<K> {
        ObjectRef::new(&key.name).within(&key.namespace)
    }

    /// Look up the object stored under `key`'s namespace and name.
    pub fn get(&self, key: &ResourceKey) -> Option<K> {
        self.reader
            .get(&Self::object_ref(key))
            .map(|obj| obj.as_ref().clone())
    }

    /// Record an object just read from or written to the authoritative store.
    pub fn put(&self, obj: K) {
        self.apply(&watcher::Event::Apply(obj));
    }

    /// Drop a key after the authoritative store reported it gone.
    pub fn evict(&self, key: &ResourceKey) {
        let Some(existing) = self.reader.get(&Self::object_ref(key)) else {
            return;
        };
        debug!(key = %key, "Evicting cache entry");
        self.apply(&watcher::Event::Delete(existing.as_ref().clone()));
    }

    /// Apply one watcher event to the store.
    pub fn apply(&self, event: &watcher::Event<K>) {
        self.writer().apply_watcher_event(event);
    }

    /// Pass a watch stream through the cache, leaving the events unchanged.
    ///
    /// Same as [`kube::runtime::reflector()`] except that the writer stays
    /// reachable from the reconcilers instead of being moved into the stream.
    pub fn reflect<'a, S>(&'a self, stream: S) -> impl Stream<Item = S::Item> + 'a
    where
        S: Stream<Item = watcher::Result<watcher::Event<K>>> + 'a,
    {
        stream.inspect_ok(move |event| self.apply(event))
    }

    pub fn len(&self) -> usize {
        self.reader.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reader.is_empty()
    }
}
