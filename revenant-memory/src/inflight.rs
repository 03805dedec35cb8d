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
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use hashbrown::{hash_map::Entry as HashMapEntry, HashMap};
use parking_lot::Mutex;
use revenant_common::{
    code::Key,
    error::{Error, Result},
};
use tokio::sync::oneshot;

/// Sending side of a waiter of an in-flight operation.
pub type Notifier<T> = oneshot::Sender<Result<T>>;

/// Receiving side of a waiter of an in-flight operation.
#[derive(Debug)]
pub struct Waiter<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Waiter<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(res)) => Poll::Ready(res),
            // The operation was dropped before it settled, e.g. its runtime was shut down. See `InflightGuard`.
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::population(anyhow::anyhow!(
                "in-flight operation dropped before completion"
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Result of [`InflightMap::enqueue`].
#[derive(Debug)]
pub enum Enqueue<T> {
    /// No operation was in flight. The caller must start one and eventually call [`InflightMap::take`].
    Lead(Waiter<T>),
    /// An operation is already in flight. Wait for its outcome.
    Wait(Waiter<T>),
}

/// Table of in-flight operations, one per key, with the waiters of each.
#[derive(Debug)]
pub struct InflightMap<K, T> {
    inflights: HashMap<K, Vec<Notifier<T>>>,
}

impl<K, T> Default for InflightMap<K, T> {
    fn default() -> Self {
        Self {
            inflights: HashMap::new(),
        }
    }
}

impl<K, T> InflightMap<K, T> {
    /// Number of keys with an operation in flight.
    pub fn len(&self) -> usize {
        self.inflights.len()
    }

    /// Check whether no operation is in flight.
    pub fn is_empty(&self) -> bool {
        self.inflights.is_empty()
    }
}

impl<K, T> InflightMap<K, T>
where
    K: Key,
{
    /// Join the operation in flight for `key`, or record a new one.
    pub fn enqueue(&mut self, key: &K) -> Enqueue<T> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter { rx };
        match self.inflights.entry(key.clone()) {
            HashMapEntry::Vacant(v) => {
                v.insert(vec![tx]);
                Enqueue::Lead(waiter)
            }
            HashMapEntry::Occupied(mut o) => {
                o.get_mut().push(tx);
                Enqueue::Wait(waiter)
            }
        }
    }

    /// Remove the operation in flight for `key` and return its waiters.
    pub fn take<Q>(&mut self, key: &Q) -> Vec<Notifier<T>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inflights.remove(key).unwrap_or_default()
    }

    /// Check whether an operation is in flight for `key`.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inflights.contains_key(key)
    }
}

/// Owned by the task running an in-flight operation.
///
/// If the task is dropped before the operation settles, the guard removes the key from the table and drops its
/// notifiers, so the waiters fail instead of hanging and the key can be led again.
pub struct InflightGuard<K, T>
where
    K: Key,
{
    inflights: Arc<Mutex<InflightMap<K, T>>>,
    key: Option<K>,
}

impl<K, T> InflightGuard<K, T>
where
    K: Key,
{
    /// Guard the operation in flight for `key`.
    pub fn new(inflights: Arc<Mutex<InflightMap<K, T>>>, key: K) -> Self {
        Self {
            inflights,
            key: Some(key),
        }
    }

    /// Remove the operation from the table and return its waiters.
    pub fn take(mut self) -> Vec<Notifier<T>> {
        match self.key.take() {
            Some(key) => self.inflights.lock().take(&key),
            None => vec![],
        }
    }
}

impl<K, T> Drop for InflightGuard<K, T>
where
    K: Key,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let notifiers = self.inflights.lock().take(&key);
            tracing::debug!(?key, waiters = notifiers.len(), "[inflight]: operation dropped before completion");
        }
    }
}

/// Deliver `res` to every waiter. Waiters that gave up are skipped.
pub fn notify_all<T>(notifiers: Vec<Notifier<T>>, res: Result<T>)
where
    T: Clone,
{
    for notifier in notifiers {
        let _ = notifier.send(res.clone());
    }
}
