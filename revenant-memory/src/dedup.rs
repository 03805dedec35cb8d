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

use std::{fmt::Debug, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures_util::FutureExt;
use parking_lot::Mutex;
use revenant_common::{
    code::Key,
    error::{Error, Result},
    spawn::Spawner,
};

use crate::inflight::{notify_all, Enqueue, InflightGuard, InflightMap};

/// Single-flight deduplication without caching.
///
/// Concurrent [`Dedup::run`] calls for the same key share one operation and all receive a clone of its outcome. Once
/// the operation settles, the next call for the key starts a new one.
pub struct Dedup<K, R> {
    inflights: Arc<Mutex<InflightMap<K, R>>>,
    spawner: Spawner,
}

impl<K, R> Clone for Dedup<K, R> {
    fn clone(&self) -> Self {
        Self {
            inflights: self.inflights.clone(),
            spawner: self.spawner.clone(),
        }
    }
}

impl<K, R> Debug for Dedup<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dedup")
            .field("inflights", &self.inflights.lock().len())
            .finish()
    }
}

impl<K, R> Dedup<K, R>
where
    K: Key,
    R: Clone + Send + 'static,
{
    /// Create a deduplicator whose operations run on `spawner`.
    pub fn new(spawner: impl Into<Spawner>) -> Self {
        Self {
            inflights: Arc::new(Mutex::new(InflightMap::default())),
            spawner: spawner.into(),
        }
    }

    /// Number of keys with an operation in flight.
    pub fn inflight(&self) -> usize {
        self.inflights.lock().len()
    }

    /// Run the operation built by `f` for `key`, or join the one already in flight.
    ///
    /// `f` is only called if no operation is in flight for `key`.
    pub async fn run<F, FU, ER>(&self, key: K, f: F) -> Result<R>
    where
        F: FnOnce() -> FU,
        FU: Future<Output = std::result::Result<R, ER>> + Send + 'static,
        ER: Into<anyhow::Error>,
    {
        let enqueue = self.inflights.lock().enqueue(&key);
        let waiter = match enqueue {
            Enqueue::Wait(waiter) => waiter,
            Enqueue::Lead(waiter) => {
                let future = f();
                let guard = InflightGuard::new(self.inflights.clone(), key.clone());
                let _ = self.spawner.spawn(async move {
                    let res = match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(Ok(r)) => Ok(r),
                        Ok(Err(e)) => Err(Error::population(e)),
                        Err(_) => Err(Error::population(anyhow::anyhow!("deduplicated operation panicked"))),
                    };
                    if let Err(e) = &res {
                        tracing::warn!(?key, ?e, "[dedup]: operation failed");
                    }
                    let notifiers = guard.take();
                    notify_all(notifiers, res);
                });
                waiter
            }
        };
        waiter.await
    }
}
