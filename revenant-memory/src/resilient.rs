// Copyright 2026 revenant Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    borrow::Borrow,
    fmt::Debug,
    hash::Hash,
    marker::PhantomData,
    sync::{Arc, Weak},
    time::Duration,
};

use hashbrown::{hash_map::Entry as HashMapEntry, HashMap};
use parking_lot::Mutex;
use revenant_common::{
    code::{Key, Value, ValueKind},
    error::{Error, Result},
    spawn::Spawner,
};
use tokio::time::Instant;

use crate::{
    handle::Handle,
    registry::{ReclaimCallback, WeakRegistry},
};

/// Callback invoked once, when an entry is truly evicted.
pub type FinalizeCallback = Box<dyn FnOnce() + Send + 'static>;

/// Default grace period of a revived entry.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Activity state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    /// Whether the value has been read since the last transition to inactive.
    pub active: bool,
    /// When the entry last became inactive. `None` until the entry is revived for the first time.
    pub last_active: Option<Instant>,
}

struct Entry<V> {
    shadow: V,
    active: bool,
    last_active: Option<Instant>,
    on_finalize: Option<FinalizeCallback>,
}

struct CacheInner<K, V> {
    registry: WeakRegistry<K, V>,
    entries: Mutex<HashMap<K, Entry<V>>>,
    grace_period: Duration,
    spawner: Spawner,
}

impl<K, V> CacheInner<K, V>
where
    K: Key,
    V: Value,
{
    /// Register `value` and refresh the shadow copy. The caller must hold the entries lock.
    fn install(
        this: &Arc<Self>,
        entries: &mut HashMap<K, Entry<V>>,
        key: K,
        value: &Handle<V>,
        on_finalize: Option<FinalizeCallback>,
    ) -> Result<()> {
        let on_reclaim = {
            let weak: Weak<Self> = Arc::downgrade(this);
            let on_reclaim: ReclaimCallback<K> = Box::new(move |key: K| {
                if let Some(inner) = weak.upgrade() {
                    Self::on_reclaim(&inner, key);
                }
            });
            on_reclaim
        };
        this.registry.set(key.clone(), value, Some(on_reclaim))?;

        let shadow = value.shadow_copy();
        match entries.entry(key) {
            HashMapEntry::Occupied(mut o) => o.get_mut().shadow = shadow,
            HashMapEntry::Vacant(v) => {
                v.insert(Entry {
                    shadow,
                    active: false,
                    last_active: None,
                    on_finalize,
                });
            }
        }
        Ok(())
    }

    /// The only path that removes an entry or fires its finalizer.
    fn on_reclaim(this: &Arc<Self>, key: K) {
        let mut entries = this.entries.lock();
        let Some(entry) = entries.get_mut(&key) else {
            tracing::trace!(?key, "[resilient]: reclaimed value has no entry");
            return;
        };

        if entry.active {
            entry.active = false;
            entry.last_active = Some(Instant::now());
            let revived = Handle::new(entry.shadow.shadow_copy());
            match Self::install(this, &mut entries, key.clone(), &revived, None) {
                Ok(()) => {
                    drop(entries);
                    tracing::debug!(?key, grace_period = ?this.grace_period, "[resilient]: revive active entry");
                    let grace_period = this.grace_period;
                    let _ = this.spawner.spawn(async move {
                        // Keep the revived value alive for a while so that it is not reclaimed again right away.
                        let _revived = revived;
                        tokio::time::sleep(grace_period).await;
                    });
                    return;
                }
                Err(e) => tracing::warn!(?key, ?e, "[resilient]: fail to revive entry, finalize it"),
            }
        }

        let entry = entries.remove(&key);
        drop(entries);
        tracing::debug!(?key, "[resilient]: finalize entry");
        if let Some(on_finalize) = entry.and_then(|entry| entry.on_finalize) {
            on_finalize();
        }
    }
}

/// Builder of [`ResilientCache`].
pub struct ResilientCacheBuilder<K, V> {
    grace_period: Duration,
    spawner: Option<Spawner>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> Debug for ResilientCacheBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCacheBuilder")
            .field("grace_period", &self.grace_period)
            .field("spawner", &self.spawner)
            .finish()
    }
}

impl<K, V> Default for ResilientCacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            spawner: None,
            _marker: PhantomData,
        }
    }
}

impl<K, V> ResilientCacheBuilder<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a builder with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long a revived value is kept alive after a transient reclamation.
    ///
    /// Default: 60s.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the spawner for the background tasks of the cache.
    ///
    /// Default: the current tokio runtime.
    pub fn with_spawner(mut self, spawner: impl Into<Spawner>) -> Self {
        self.spawner = Some(spawner.into());
        self
    }

    /// Build the cache.
    ///
    /// Fails with [`Error::Config`] if no spawner is set and there is no current tokio runtime.
    pub fn build(self) -> Result<ResilientCache<K, V>> {
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Spawner::current()?,
        };
        let inner = CacheInner {
            registry: WeakRegistry::new(&spawner),
            entries: Mutex::new(HashMap::new()),
            grace_period: self.grace_period,
            spawner,
        };
        Ok(ResilientCache { inner: Arc::new(inner) })
    }
}

/// A weak cache that survives transient reclamation.
///
/// Values are held through a [`WeakRegistry`], so the cache never keeps them alive. Each entry keeps a shallow
/// shadow copy of its latest value. When a value is reclaimed:
///
/// - If it has been read since the entry last became inactive, the shadow copy is installed as the new value and
///   kept alive for the grace period. The entry becomes inactive.
/// - Otherwise the entry is removed and its finalizer is called.
pub struct ResilientCache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for ResilientCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debug for ResilientCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCache")
            .field("entries", &self.inner.entries.lock().len())
            .field("grace_period", &self.inner.grace_period)
            .finish()
    }
}

impl<K, V> ResilientCache<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a cache builder.
    pub fn builder() -> ResilientCacheBuilder<K, V> {
        ResilientCacheBuilder::new()
    }

    /// Cache `value` under `key`.
    ///
    /// `on_finalize` is kept only if the entry is created by this call. It is called once the entry is truly evicted.
    pub fn set(&self, key: K, value: &Handle<V>, on_finalize: Option<FinalizeCallback>) -> Result<()> {
        let kind = value.kind();
        if kind != ValueKind::Composite {
            return Err(Error::invalid_value_kind(&key, kind));
        }
        let mut entries = self.inner.entries.lock();
        CacheInner::install(&self.inner, &mut entries, key, value, on_finalize)
    }

    /// Get the value cached under `key` and mark the entry active.
    pub fn get<Q>(&self, key: &Q) -> Option<Handle<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let value = match self.inner.registry.get(key) {
            Some(value) => value,
            None => {
                // A reclamation observed by the registry read may have just revived the entry.
                if !self.inner.entries.lock().contains_key(key) {
                    return None;
                }
                self.inner.registry.get(key)?
            }
        };
        if let Some(entry) = self.inner.entries.lock().get_mut(key) {
            entry.active = true;
        }
        Some(value)
    }

    /// Check whether [`ResilientCache::get`] would return a value, without marking the entry active.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.inner.registry.has(key) {
            return true;
        }
        // Same as `get`, the read above may have revived the entry.
        let revived = self.inner.entries.lock().contains_key(key);
        revived && self.inner.registry.has(key)
    }

    /// Activity state of the entry under `key`.
    pub fn activity<Q>(&self, key: &Q) -> Option<Activity>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.entries.lock().get(key).map(|entry| Activity {
            active: entry.active,
            last_active: entry.last_active,
        })
    }

    /// Set the finalizer of the entry under `key` if it has none.
    ///
    /// Returns `false` and drops `on_finalize` if there is no entry or it already has a finalizer.
    pub fn attach_finalizer<Q>(&self, key: &Q, on_finalize: FinalizeCallback) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.inner.entries.lock().get_mut(key) {
            Some(entry) if entry.on_finalize.is_none() => {
                entry.on_finalize = Some(on_finalize);
                true
            }
            _ => false,
        }
    }

    /// Number of entries, revived ones included.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Check whether there is no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The grace period of revived values.
    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    pub(crate) fn spawner(&self) -> &Spawner {
        &self.inner.spawner
    }
}
