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
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Weak},
};

use hashbrown::HashMap;
use parking_lot::Mutex;
use revenant_common::{
    code::{Key, Value, ValueKind},
    error::{Error, Result},
    spawn::Spawner,
};
use tokio::sync::mpsc;

use crate::handle::{Handle, SubscriptionId, WeakHandle};

/// Callback invoked once with the key when the value registered under it is reclaimed.
pub type ReclaimCallback<K> = Box<dyn FnOnce(K) + Send + 'static>;

/// Call `on_reclaim`, containing its panic so that one callback cannot stop the delivery of the others.
fn fire<K>(on_reclaim: ReclaimCallback<K>, key: K)
where
    K: Key,
{
    let k = key.clone();
    if catch_unwind(AssertUnwindSafe(move || on_reclaim(key))).is_err() {
        tracing::warn!(key = ?k, "[registry]: reclaim callback panicked");
    }
}

struct Notice<K> {
    key: K,
    subscription: SubscriptionId,
}

struct Record<K, V> {
    handle: WeakHandle<V>,
    subscription: SubscriptionId,
    on_reclaim: Option<ReclaimCallback<K>>,
}

struct RegistryInner<K, V> {
    records: Mutex<HashMap<K, Record<K, V>>>,
    tx: mpsc::UnboundedSender<Notice<K>>,
}

impl<K, V> RegistryInner<K, V>
where
    K: Key,
    V: Value,
{
    fn reclaim(&self, notice: Notice<K>) {
        let removed = {
            let mut records = self.records.lock();
            match records.get(&notice.key) {
                Some(record) if record.subscription == notice.subscription => records.remove_entry(&notice.key),
                _ => None,
            }
        };

        match removed {
            Some((key, record)) => {
                tracing::trace!(?key, "[registry]: reclamation delivered");
                if let Some(on_reclaim) = record.on_reclaim {
                    fire(on_reclaim, key);
                }
            }
            None => tracing::trace!(key = ?notice.key, "[registry]: ignore stale reclamation notice"),
        }
    }
}

/// Keyed store of weakly held values with reclamation notification.
///
/// The registry never keeps a value alive. When the last strong [`Handle`] of a registered value is dropped, a notice
/// is queued and delivered later by a background task, which removes the record and calls its reclaim callback. A
/// [`WeakRegistry::get`] that observes a reclaimed value before the notice is delivered handles the reclamation
/// eagerly instead. Either way the callback is called exactly once.
pub struct WeakRegistry<K, V> {
    inner: Arc<RegistryInner<K, V>>,
}

impl<K, V> Clone for WeakRegistry<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debug for WeakRegistry<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("records", &self.inner.records.lock().len())
            .finish()
    }
}

impl<K, V> WeakRegistry<K, V>
where
    K: Key,
    V: Value,
{
    /// Create a registry whose reclamation notices are delivered by a task spawned on `spawner`.
    pub fn new(spawner: &Spawner) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(RegistryInner {
            records: Mutex::new(HashMap::new()),
            tx,
        });
        let _ = spawner.spawn(Self::deliver(Arc::downgrade(&inner), rx));
        Self { inner }
    }

    async fn deliver(inner: Weak<RegistryInner<K, V>>, mut rx: mpsc::UnboundedReceiver<Notice<K>>) {
        while let Some(notice) = rx.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.reclaim(notice);
        }
        tracing::trace!("[registry]: reclamation delivery stopped");
    }

    /// Register `value` under `key`.
    ///
    /// Registering the value that is already registered under `key` is a no-op and drops `on_reclaim`. Registering a
    /// different value cancels the subscription of the previous one, whose reclamation is then never reported.
    pub fn set(&self, key: K, value: &Handle<V>, on_reclaim: Option<ReclaimCallback<K>>) -> Result<()> {
        let kind = value.kind();
        if kind != ValueKind::Composite {
            return Err(Error::invalid_value_kind(&key, kind));
        }

        let mut records = self.inner.records.lock();

        if let Some(record) = records.get(&key) {
            if let Some(current) = record.handle.upgrade() {
                if Handle::ptr_eq(&current, value) {
                    return Ok(());
                }
                current.unsubscribe(record.subscription);
            }
        }

        let subscription = {
            let tx = self.inner.tx.clone();
            let key = key.clone();
            value.subscribe(move |subscription| {
                // The receiver is gone only if the registry is gone.
                let _ = tx.send(Notice { key, subscription });
            })
        };

        records.insert(
            key,
            Record {
                handle: Handle::downgrade(value),
                subscription,
                on_reclaim,
            },
        );
        Ok(())
    }

    /// Get the value registered under `key` if it has not been reclaimed.
    pub fn get<Q>(&self, key: &Q) -> Option<Handle<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (key, record) = {
            let mut records = self.inner.records.lock();
            let record = records.get(key)?;
            if let Some(handle) = record.handle.upgrade() {
                return Some(handle);
            }
            records.remove_entry(key)?
        };

        tracing::trace!(?key, "[registry]: reclamation observed before delivery");
        if let Some(on_reclaim) = record.on_reclaim {
            fire(on_reclaim, key);
        }
        None
    }

    /// Check whether [`WeakRegistry::get`] would return a value.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Number of records, including reclaimed ones whose notice has not been delivered yet.
    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    /// Check whether there is no record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
