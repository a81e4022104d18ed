//! Reference-counted shared resources.
//!
//! # Responsibilities
//! - Identify logical owners with opaque handles
//! - Track the live owner set of a resource
//! - Release the underlying resource once, when the last owner leaves
//! - Hand out one instance per composite key (no process-wide singleton)

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::storage::kv::{KeyValueStore, StorageError};

/// Opaque token identifying one logical owner of a shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(Uuid);

impl OwnerHandle {
    /// Create a fresh, globally unique handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of live owners plus its size.
///
/// The set and the counter only change together, under the set's mutex.
#[derive(Debug, Default)]
pub struct OwnerSet {
    handles: Mutex<HashSet<OwnerHandle>>,
    count: AtomicUsize,
}

impl OwnerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`. Returns false if it was already registered.
    pub fn declare(&self, handle: OwnerHandle) -> bool {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        let added = handles.insert(handle);
        self.count.store(handles.len(), Ordering::SeqCst);
        added
    }

    /// Remove `handle`.
    ///
    /// `on_last` runs, still under the lock, only when this call removed the
    /// final owner. Unknown handles leave the set untouched.
    pub fn release<R>(&self, handle: &OwnerHandle, on_last: impl FnOnce() -> R) -> Option<R> {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        if !handles.remove(handle) {
            return None;
        }
        self.count.store(handles.len(), Ordering::SeqCst);
        if handles.is_empty() {
            Some(on_last())
        } else {
            None
        }
    }

    pub fn contains(&self, handle: &OwnerHandle) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(handle)
    }

    /// Number of live owners.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// A resource that can be released once nobody uses it.
pub trait Closeable {
    type Error;

    fn release(&self) -> Result<(), Self::Error>;
}

impl Closeable for dyn KeyValueStore {
    type Error = StorageError;

    fn release(&self) -> Result<(), StorageError> {
        self.close()
    }
}

/// A resource whose lifetime is the union of its owners' lifetimes.
pub struct Shared<T: ?Sized> {
    key: String,
    owners: OwnerSet,
    released: AtomicBool,
    resource: Arc<T>,
}

impl<T: ?Sized + Closeable> Shared<T> {
    pub fn new(key: impl Into<String>, resource: Arc<T>) -> Self {
        Self {
            key: key.into(),
            owners: OwnerSet::new(),
            released: AtomicBool::new(false),
            resource,
        }
    }

    /// Composite key this instance was registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn resource(&self) -> &Arc<T> {
        &self.resource
    }

    /// Register `handle` as a user of the resource.
    ///
    /// Declaring on an already released instance re-arms it; the new owner is
    /// responsible for reopening the resource.
    pub fn declare_ownership(&self, handle: OwnerHandle) {
        if self.owners.declare(handle) {
            self.released.store(false, Ordering::SeqCst);
            tracing::debug!(key = %self.key, owner = %handle, refs = self.owners.count(), "Ownership declared");
        }
    }

    /// Drop `handle`'s ownership. Returns true if this call released the resource.
    pub fn close(&self, handle: &OwnerHandle) -> Result<bool, T::Error> {
        let released = self.owners.release(handle, || {
            if self.released.swap(true, Ordering::SeqCst) {
                return Ok(false);
            }
            self.resource.release().map(|()| true)
        });

        match released {
            Some(result) => {
                let released = result?;
                if released {
                    tracing::info!(key = %self.key, "Last owner closed, resource released");
                }
                Ok(released)
            }
            None => {
                tracing::debug!(key = %self.key, owner = %handle, refs = self.owners.count(), "Ownership dropped");
                Ok(false)
            }
        }
    }

    pub fn ref_count(&self) -> usize {
        self.owners.count()
    }

    pub fn is_owned_by(&self, handle: &OwnerHandle) -> bool {
        self.owners.contains(handle)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl<T: ?Sized> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("key", &self.key)
            .field("refs", &self.owners.count())
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

/// Hands out one `Shared<T>` per composite key.
///
/// Callers hold the registry explicitly; two users asking for the same key get
/// the same instance and therefore the same lifecycle.
pub struct SharedRegistry<T: ?Sized> {
    instances: DashMap<String, Arc<Shared<T>>>,
}

impl<T: ?Sized + Closeable> SharedRegistry<T> {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// The live instance for `key`, building it with `make` on first use or
    /// once the previous instance has been released.
    pub fn acquire(&self, key: impl Into<String>, make: impl FnOnce() -> Arc<T>) -> Arc<Shared<T>> {
        let key = key.into();
        match self.instances.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_released() && occupied.get().ref_count() == 0 {
                    tracing::debug!(key = %key, "Replacing released instance");
                    occupied.insert(Arc::new(Shared::new(key, make())));
                }
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => vacant.insert(Arc::new(Shared::new(key, make()))).value().clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Shared<T>>> {
        self.instances.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl<T: ?Sized + Closeable> Default for SharedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
