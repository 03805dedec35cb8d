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
    fmt::Debug,
    ops::Deref,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;

/// Identifier of a reclamation subscription attached to a [`Handle`].
pub type SubscriptionId = u64;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

type Notify = Box<dyn FnOnce(SubscriptionId) + Send + 'static>;

struct Tracked<V> {
    value: V,
    subscriptions: Mutex<Vec<(SubscriptionId, Notify)>>,
}

impl<V> Drop for Tracked<V> {
    fn drop(&mut self) {
        for (id, notify) in self.subscriptions.get_mut().drain(..) {
            notify(id);
        }
    }
}

/// Strong, reference-counted owner of a cached value.
///
/// Caches only keep a [`WeakHandle`] to the value. The value is reclaimed when the last [`Handle`] is dropped, and
/// every subscription attached to it is notified at that moment.
pub struct Handle<V> {
    inner: Arc<Tracked<V>>,
}

impl<V> Handle<V> {
    /// Wrap a value into a new handle with no subscriptions.
    pub fn new(value: V) -> Self {
        Self {
            inner: Arc::new(Tracked {
                value,
                subscriptions: Mutex::new(vec![]),
            }),
        }
    }

    /// Check whether two handles own the same value.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of strong handles of the value.
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }

    /// Create a non-owning reference to the value.
    pub fn downgrade(this: &Self) -> WeakHandle<V> {
        WeakHandle {
            inner: Arc::downgrade(&this.inner),
        }
    }

    /// Attach a callback that is called once with its subscription id, when the last strong handle is dropped.
    pub(crate) fn subscribe(&self, notify: impl FnOnce(SubscriptionId) + Send + 'static) -> SubscriptionId {
        let id = NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed);
        self.inner.subscriptions.lock().push((id, Box::new(notify)));
        id
    }

    /// Detach a callback. Detaching an unknown subscription is a no-op.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.subscriptions.lock().retain(|(sid, _)| *sid != id);
    }

    #[cfg(test)]
    pub(crate) fn subscriptions(this: &Self) -> usize {
        this.inner.subscriptions.lock().len()
    }
}

impl<V> Clone for Handle<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Deref for Handle<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.inner.value
    }
}

impl<V> Debug for Handle<V>
where
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handle").field(&self.inner.value).finish()
    }
}

/// Non-owning reference to the value of a [`Handle`].
pub struct WeakHandle<V> {
    inner: Weak<Tracked<V>>,
}

impl<V> WeakHandle<V> {
    /// Get a strong handle if the value has not been reclaimed yet.
    pub fn upgrade(&self) -> Option<Handle<V>> {
        self.inner.upgrade().map(|inner| Handle { inner })
    }

    /// Check whether the value has been reclaimed.
    pub fn is_reclaimed(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl<V> Clone for WeakHandle<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Debug for WeakHandle<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakHandle")
            .field("reclaimed", &self.is_reclaimed())
            .finish()
    }
}
