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
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use revenant::prelude::*;

type Profiles = Populator<String, Object, String>;

const GRACE: Duration = Duration::from_millis(10);

fn profiles(store: ExpiringStore<String, Object>, computed: Arc<AtomicUsize>, finalized: Arc<AtomicUsize>) -> Profiles {
    let cache = ResilientCache::builder().with_grace_period(GRACE).build().unwrap();
    Populator::new(cache, move |name: String, registration: Registration<String, Object>| {
        let store = store.clone();
        let computed = computed.clone();
        let finalized = finalized.clone();
        async move {
            registration.register(move || {
                finalized.fetch_add(1, Ordering::Relaxed);
            });
            if let Some(profile) = store.get(&name).await? {
                return Ok::<_, Error>(profile);
            }
            computed.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(50)).await;
            let profile = Object::map([("name", Object::from(name.as_str())), ("visits", Object::from(1))]);
            store.put(&name, &profile).await?;
            Ok(profile)
        }
    })
}

#[test_log::test(tokio::test)]
async fn test_read_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let store: ExpiringStore<String, Object> = ExpiringStore::builder(dir.path()).build().await.unwrap();
    let computed = Arc::new(AtomicUsize::new(0));
    let finalized = Arc::new(AtomicUsize::new(0));

    let populator = profiles(store.clone(), computed.clone(), finalized.clone());
    let res = futures_util::future::join_all(
        (0..4).map(|_| populator.resolve("alice".to_string(), "alice".to_string())),
    )
    .await;
    let handles: Vec<Handle<Object>> = res.into_iter().map(Result::unwrap).collect();
    assert_eq!(computed.load(Ordering::Relaxed), 1);
    assert!(handles.windows(2).all(|w| Handle::ptr_eq(&w[0], &w[1])));
    assert_eq!(handles[0].field("name").and_then(Object::as_str), Some("alice"));
    assert_eq!(populator.inflight(), 0);

    // Persisted by the population.
    assert!(store.get(&"alice".to_string()).await.unwrap().is_some());

    // A fresh cache over the same store loads without computing.
    let populator = profiles(store, computed.clone(), finalized);
    let profile = populator.resolve("alice".to_string(), "alice".to_string()).await.unwrap();
    assert_eq!(profile.field("visits").and_then(Object::as_f64), Some(1.0));
    assert_eq!(computed.load(Ordering::Relaxed), 1);
}

#[test_log::test(tokio::test)]
async fn test_finalized_after_grace_period() {
    let dir = tempfile::tempdir().unwrap();
    let store: ExpiringStore<String, Object> = ExpiringStore::builder(dir.path()).build().await.unwrap();
    let computed = Arc::new(AtomicUsize::new(0));
    let finalized = Arc::new(AtomicUsize::new(0));
    let populator = profiles(store, computed.clone(), finalized.clone());

    let profile = populator.resolve("bob".to_string(), "bob".to_string()).await.unwrap();
    assert!(populator.cache().has("bob"));
    drop(profile);

    // Revived once since the commit read it, then finalized when the grace period ends unread.
    for _ in 0..100 {
        if finalized.load(Ordering::Relaxed) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(finalized.load(Ordering::Relaxed), 1);
    assert!(!populator.cache().has("bob"));

    // Populated again from the store.
    populator.resolve("bob".to_string(), "bob".to_string()).await.unwrap();
    assert_eq!(computed.load(Ordering::Relaxed), 1);
}

#[test_log::test(tokio::test)]
async fn test_expired_record_is_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let store: ExpiringStore<String, Object> = ExpiringStore::builder(dir.path())
        .with_expire(Some(Duration::ZERO))
        .build()
        .await
        .unwrap();
    let computed = Arc::new(AtomicUsize::new(0));
    let finalized = Arc::new(AtomicUsize::new(0));

    let populator = profiles(store.clone(), computed.clone(), finalized.clone());
    drop(populator.resolve("carol".to_string(), "carol".to_string()).await.unwrap());

    let populator = profiles(store, computed.clone(), finalized);
    populator.resolve("carol".to_string(), "carol".to_string()).await.unwrap();
    assert_eq!(computed.load(Ordering::Relaxed), 2);
}
