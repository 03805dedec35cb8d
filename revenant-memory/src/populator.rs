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

use futures_util::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use revenant_common::{
    code::{Key, Value},
    error::{Error, Result},
};

use crate::{
    handle::Handle,
    inflight::{notify_all, Enqueue, InflightGuard, InflightMap},
    resilient::{FinalizeCallback, ResilientCache},
};

type Populate<K, V, P> = Arc<dyn Fn(P, Registration<K, V>) -> BoxFuture<'static, anyhow::Result<V>> + Send + Sync>;

enum Slot<K, V> {
    Pending(Option<FinalizeCallback>),
    Committed { cache: ResilientCache<K, V>, key: K },
    Abandoned,
}

/// Lets a population operation supply the finalizer of the entry it populates.
///
/// Registering before the result is committed attaches the finalizer at commit time. Registering afterwards attaches
/// it to the committed entry if that entry still exists and has no finalizer. Registering for a failed population
/// drops the finalizer.
pub struct Registration<K, V> {
    slot: Arc<Mutex<Slot<K, V>>>,
}

impl<K, V> Debug for Registration<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.slot.lock() {
            Slot::Pending(_) => "pending",
            Slot::Committed { .. } => "committed",
            Slot::Abandoned => "abandoned",
        };
        f.debug_struct("Registration").field("state", &state).finish()
    }
}

impl<K, V> Registration<K, V>
where
    K: Key,
    V: Value,
{
    /// Supply the callback to call once the populated entry is truly evicted.
    pub fn register(self, on_finalize: impl FnOnce() + Send + 'static) {
        let (cache, key) = {
            let mut slot = self.slot.lock();
            match &mut *slot {
                Slot::Pending(callback) => {
                    *callback = Some(Box::new(on_finalize));
                    return;
                }
                Slot::Committed { cache, key } => (cache.clone(), key.clone()),
                Slot::Abandoned => {
                    tracing::debug!("[populator]: drop finalizer of a failed population");
                    return;
                }
            }
        };
        if !cache.attach_finalizer(&key, Box::new(on_finalize)) {
            tracing::debug!(?key, "[populator]: fail to attach late finalizer");
        }
    }
}

/// Single-flight population on top of a [`ResilientCache`].
///
/// On a miss, exactly one population operation runs per key. Every concurrent caller of the same key receives the
/// same outcome: the same [`Handle`] or the same error. The operation runs on the cache's spawner and is never
/// cancelled, even if every caller gives up.
pub struct Populator<K, V, P> {
    cache: ResilientCache<K, V>,
    populate: Populate<K, V, P>,
    inflights: Arc<Mutex<InflightMap<K, Handle<V>>>>,
}

impl<K, V, P> Clone for Populator<K, V, P> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            populate: self.populate.clone(),
            inflights: self.inflights.clone(),
        }
    }
}

impl<K, V, P> Debug for Populator<K, V, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Populator")
            .field("cache", &self.cache)
            .field("inflights", &self.inflights.lock().len())
            .finish()
    }
}

impl<K, V, P> Populator<K, V, P>
where
    K: Key,
    V: Value,
    P: Send + 'static,
{
    /// Create a populator that fills `cache` with `populate`.
    pub fn new<F, FU, ER>(cache: ResilientCache<K, V>, populate: F) -> Self
    where
        F: Fn(P, Registration<K, V>) -> FU + Send + Sync + 'static,
        FU: Future<Output = std::result::Result<V, ER>> + Send + 'static,
        ER: Into<anyhow::Error>,
    {
        let populate: Populate<K, V, P> =
            Arc::new(move |params, registration| populate(params, registration).map(|res| res.map_err(Into::into)).boxed());
        Self {
            cache,
            populate,
            inflights: Arc::new(Mutex::new(InflightMap::default())),
        }
    }

    /// The underlying cache.
    pub fn cache(&self) -> &ResilientCache<K, V> {
        &self.cache
    }

    /// Number of keys being populated.
    pub fn inflight(&self) -> usize {
        self.inflights.lock().len()
    }

    /// Get the value of `key`, populating it with `params` on a miss.
    pub async fn resolve(&self, key: K, params: P) -> Result<Handle<V>> {
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let enqueue = self.inflights.lock().enqueue(&key);
        let waiter = match enqueue {
            Enqueue::Wait(waiter) => {
                tracing::trace!(?key, "[populator]: join in-flight population");
                waiter
            }
            Enqueue::Lead(waiter) => {
                tracing::debug!(?key, "[populator]: start population");
                let guard = InflightGuard::new(self.inflights.clone(), key.clone());
                let _ = self.cache.spawner().spawn(self.clone().run(key, params, guard));
                waiter
            }
        };
        waiter.await
    }

    async fn run(self, key: K, params: P, guard: InflightGuard<K, Handle<V>>) {
        let slot = Arc::new(Mutex::new(Slot::Pending(None)));
        let registration = Registration { slot: slot.clone() };

        let populate = self.populate.clone();
        let res = match AssertUnwindSafe(async move { populate(params, registration).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Population(Arc::new(e))),
            Err(_) => Err(Error::population(anyhow::anyhow!("population operation panicked"))),
        };

        let notifiers = guard.take();

        let res = match res {
            Ok(value) => self.commit(&key, value, &slot),
            Err(e) => Err(e),
        };
        if let Err(e) = &res {
            tracing::warn!(?key, ?e, "[populator]: population failed");
            *slot.lock() = Slot::Abandoned;
        }

        notify_all(notifiers, res);
    }

    fn commit(&self, key: &K, value: V, slot: &Mutex<Slot<K, V>>) -> Result<Handle<V>> {
        let value = Handle::new(value);
        {
            let mut slot = slot.lock();
            let on_finalize = match std::mem::replace(&mut *slot, Slot::Abandoned) {
                Slot::Pending(on_finalize) => on_finalize,
                _ => None,
            };
            self.cache.set(key.clone(), &value, on_finalize)?;
            *slot = Slot::Committed {
                cache: self.cache.clone(),
                key: key.clone(),
            };
        }
        tracing::debug!(?key, "[populator]: commit population");
        Ok(self.cache.get(key).unwrap_or(value))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use futures_util::future::join_all;
    use revenant_common::{code::ValueKind, object::Object};

    use super::*;

    const GRACE: Duration = Duration::from_secs(60);

    fn cache() -> ResilientCache<String, Object> {
        ResilientCache::builder().with_grace_period(GRACE).build().unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    /// Populates `{ n: params }` after 50ms and counts its runs.
    fn counting_populator(runs: Arc<AtomicUsize>) -> Populator<String, Object, i64> {
        Populator::new(cache(), move |n: i64, _: Registration<String, Object>| {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, anyhow::Error>(Object::map([("n", Object::from(n))]))
            }
        })
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_single_flight() {
        let runs = Arc::new(AtomicUsize::new(0));
        let populator = counting_populator(runs.clone());

        let results = join_all((0..8).map(|_| populator.resolve("k".to_string(), 1))).await;
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert_eq!(populator.inflight(), 0);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.field("n").and_then(Object::as_f64), Some(1.0));
        for res in results.iter() {
            assert!(Handle::ptr_eq(res.as_ref().unwrap(), first));
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_two_concurrent_resolves() {
        let runs = Arc::new(AtomicUsize::new(0));
        let populator = counting_populator(runs.clone());

        let (a, b) = tokio::join!(
            populator.resolve("k".to_string(), 1),
            populator.resolve("k".to_string(), 1)
        );
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(Handle::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_hit_skips_population() {
        let runs = Arc::new(AtomicUsize::new(0));
        let populator = counting_populator(runs.clone());

        let a = populator.resolve("k".to_string(), 1).await.unwrap();
        let b = populator.resolve("k".to_string(), 2).await.unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(Handle::ptr_eq(&a, &b));
        assert!(populator.cache().activity("k").unwrap().active);

        // Different keys populate independently.
        let c = populator.resolve("j".to_string(), 3).await.unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert_eq!(c.field("n").and_then(Object::as_f64), Some(3.0));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_failure_is_shared_and_not_cached() {
        let runs = Arc::new(AtomicUsize::new(0));
        let populator = {
            let runs = runs.clone();
            Populator::new(cache(), move |fail: bool, _: Registration<String, Object>| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if fail {
                        anyhow::bail!("boom");
                    }
                    Ok(Object::map([("ok", Object::from(true))]))
                }
            })
        };

        let (a, b) = tokio::join!(
            populator.resolve("k".to_string(), true),
            populator.resolve("k".to_string(), true)
        );
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        match (a, b) {
            (Err(Error::Population(a)), Err(Error::Population(b))) => {
                assert!(Arc::ptr_eq(&a, &b));
                assert_eq!(a.to_string(), "boom");
            }
            _ => panic!("both callers must observe the failure"),
        }
        assert_eq!(populator.inflight(), 0);
        assert!(populator.cache().is_empty());

        // The next call starts over.
        let value = populator.resolve("k".to_string(), false).await.unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert_eq!(value.field("ok").and_then(Object::as_bool), Some(true));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_panic_is_reported() {
        let populator = Populator::new(cache(), |_: (), _: Registration<String, Object>| async {
            if true {
                panic!("population exploded");
            }
            Ok::<_, anyhow::Error>(Object::array([]))
        });

        let res = populator.resolve("k".to_string(), ()).await;
        assert!(matches!(res, Err(Error::Population(_))));
        assert_eq!(populator.inflight(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_primitive_result_is_rejected() {
        let populator = Populator::new(cache(), |_: (), _: Registration<String, Object>| async {
            Ok::<_, anyhow::Error>(Object::from(1))
        });

        let res = populator.resolve("k".to_string(), ()).await;
        assert!(matches!(
            res,
            Err(Error::InvalidValueKind {
                kind: ValueKind::Primitive,
                ..
            })
        ));
        assert_eq!(populator.inflight(), 0);
        assert!(populator.cache().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_registered_finalizer() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let populator = {
            let finalized = finalized.clone();
            Populator::new(cache(), move |_: (), registration: Registration<String, Object>| {
                let finalized = finalized.clone();
                registration.register(move || {
                    finalized.fetch_add(1, Ordering::Relaxed);
                });
                async { Ok::<_, anyhow::Error>(Object::map([("n", Object::from(1))])) }
            })
        };

        let value = populator.resolve("k".to_string(), ()).await.unwrap();
        drop(value);

        // Read on commit, so the first reclamation revives the entry.
        settle().await;
        assert_eq!(finalized.load(Ordering::Relaxed), 0);
        assert!(populator.cache().has("k"));

        tokio::time::sleep(GRACE).await;
        assert_eq!(finalized.load(Ordering::Relaxed), 1);
        assert!(!populator.cache().has("k"));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_late_registration() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let populator = {
            let finalized = finalized.clone();
            Populator::new(cache(), move |_: (), registration: Registration<String, Object>| {
                let finalized = finalized.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    registration.register(move || {
                        finalized.fetch_add(1, Ordering::Relaxed);
                    });
                });
                async { Ok::<_, anyhow::Error>(Object::map([("n", Object::from(1))])) }
            })
        };

        let value = populator.resolve("k".to_string(), ()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(value);
        settle().await;
        tokio::time::sleep(GRACE).await;
        assert_eq!(finalized.load(Ordering::Relaxed), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_caller_gives_up() {
        let runs = Arc::new(AtomicUsize::new(0));
        let populator = counting_populator(runs.clone());

        let res = tokio::time::timeout(Duration::from_millis(10), populator.resolve("k".to_string(), 1)).await;
        assert!(res.is_err());
        assert_eq!(populator.inflight(), 1);

        // The population keeps running and commits.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(populator.inflight(), 0);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test_log::test]
    fn test_runtime_shutdown_releases_waiters() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let cache = ResilientCache::builder()
            .with_spawner(runtime.handle().clone())
            .build()
            .unwrap();
        let populator: Populator<String, Object, ()> =
            Populator::new(cache, |_: (), _: Registration<String, Object>| {
                std::future::pending::<anyhow::Result<Object>>()
            });

        let mut resolve = Box::pin(populator.resolve("k".to_string(), ()));
        assert!(resolve.as_mut().now_or_never().is_none());
        assert_eq!(populator.inflight(), 1);

        // The population task is dropped without ever settling.
        drop(runtime);
        assert_eq!(populator.inflight(), 0);

        let res = tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(resolve);
        assert!(matches!(res, Err(Error::Population(_))));
    }
}
