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
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use revenant_common::{
    code::{StorageKey, StorageValue},
    error::Result,
    spawn::Spawner,
};
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// Default time to live of a record: 30 days.
pub const DEFAULT_EXPIRE: Duration = Duration::from_secs(60 * 60 * 24 * 30);

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

// `expire_at` is in unix millis. `None` never expires.
#[derive(Serialize)]
struct RecordRef<'a, K, V> {
    key: &'a K,
    expire_at: Option<u64>,
    value: &'a V,
}

#[derive(Deserialize)]
struct Record<K, V> {
    key: K,
    expire_at: Option<u64>,
    value: V,
}

#[derive(Deserialize)]
struct Expiry {
    expire_at: Option<u64>,
}

fn is_expired(expire_at: Option<u64>, now: u64) -> bool {
    expire_at.is_some_and(|expire_at| expire_at <= now)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Builder of [`ExpiringStore`].
pub struct ExpiringStoreBuilder<K, V> {
    dir: PathBuf,
    expire: Option<Duration>,
    spawner: Option<Spawner>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> Debug for ExpiringStoreBuilder<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringStoreBuilder")
            .field("dir", &self.dir)
            .field("expire", &self.expire)
            .field("spawner", &self.spawner)
            .finish()
    }
}

impl<K, V> ExpiringStoreBuilder<K, V>
where
    K: StorageKey,
    V: StorageValue,
{
    /// Create a builder for a store kept under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            expire: Some(DEFAULT_EXPIRE),
            spawner: None,
            _marker: PhantomData,
        }
    }

    /// Set the time to live of the records written by `put`. With `None`, records never expire.
    ///
    /// Default: 30 days.
    pub fn with_expire(mut self, expire: Option<Duration>) -> Self {
        self.expire = expire;
        self
    }

    /// Set the spawner for background cleanups.
    ///
    /// Default: the current tokio runtime.
    pub fn with_spawner(mut self, spawner: impl Into<Spawner>) -> Self {
        self.spawner = Some(spawner.into());
        self
    }

    /// Open the store, creating its directory if needed and clearing expired records.
    pub async fn build(self) -> Result<ExpiringStore<K, V>> {
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => Spawner::current()?,
        };
        tokio::fs::create_dir_all(&self.dir).await?;
        let store = ExpiringStore {
            inner: Arc::new(StoreInner {
                dir: self.dir,
                expire: self.expire,
                spawner,
            }),
            _marker: PhantomData,
        };
        store.clear_expired().await?;
        Ok(store)
    }
}

#[derive(Debug)]
struct StoreInner {
    dir: PathBuf,
    expire: Option<Duration>,
    spawner: Spawner,
}

impl StoreInner {
    async fn records(&self) -> Result<Vec<PathBuf>> {
        let mut paths = vec![];
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn clear_expired(&self) -> Result<usize> {
        let now = now_millis();
        let mut cleared = 0;
        for path in self.records().await? {
            let buf = match tokio::fs::read(&path).await {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let expiry: Expiry = match serde_json::from_slice(&buf) {
                Ok(expiry) => expiry,
                Err(e) => {
                    tracing::warn!(?path, ?e, "[store]: skip undecodable record");
                    continue;
                }
            };
            if is_expired(expiry.expire_at, now) && remove(&path).await? {
                cleared += 1;
            }
        }
        tracing::debug!(dir = ?self.dir, cleared, "[store]: clear expired records");
        Ok(cleared)
    }
}

async fn remove(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Durable key-value store whose records expire a fixed time after they are written.
///
/// A store built with `with_expire(None)` keeps its records until they are overwritten or cleared.
///
/// Each record is a JSON file under the store directory, named after the hash of its key.
pub struct ExpiringStore<K, V> {
    inner: Arc<StoreInner>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> Clone for ExpiringStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K, V> Debug for ExpiringStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringStore").field("inner", &self.inner).finish()
    }
}

impl<K, V> ExpiringStore<K, V>
where
    K: StorageKey,
    V: StorageValue,
{
    /// Create a store builder.
    pub fn builder(dir: impl AsRef<Path>) -> ExpiringStoreBuilder<K, V> {
        ExpiringStoreBuilder::new(dir)
    }

    fn path(&self, key: &K) -> Result<PathBuf> {
        let hash = XxHash64::oneshot(0, &serde_json::to_vec(key)?);
        Ok(self.inner.dir.join(format!("{hash:016x}.{RECORD_EXTENSION}")))
    }

    /// Write `value` under `key`, expiring after the configured time to live.
    pub async fn put(&self, key: &K, value: &V) -> Result<()> {
        let path = self.path(key)?;
        let buf = serde_json::to_vec(&RecordRef {
            key,
            expire_at: self
                .inner
                .expire
                .map(|expire| now_millis().saturating_add(expire.as_millis() as u64)),
            value,
        })?;
        let temp = path.with_extension(TEMP_EXTENSION);
        tokio::fs::write(&temp, buf).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }

    /// Read the value under `key`.
    ///
    /// An expired record reads as missing and triggers a background cleanup of expired records.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        let path = self.path(key)?;
        let buf = match tokio::fs::read(&path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: Record<K, V> = serde_json::from_slice(&buf)?;
        if record.key != *key {
            tracing::debug!(?key, ?path, "[store]: hash collision");
            return Ok(None);
        }
        if is_expired(record.expire_at, now_millis()) {
            let inner = self.inner.clone();
            let _ = self.inner.spawner.spawn(async move {
                if let Err(e) = inner.clear_expired().await {
                    tracing::warn!(?e, "[store]: fail to clear expired records");
                }
            });
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    /// Remove every expired record. Returns the number of removed records.
    pub async fn clear_expired(&self) -> Result<usize> {
        self.inner.clear_expired().await
    }

    /// Remove every record.
    pub async fn clear_all(&self) -> Result<()> {
        for path in self.inner.records().await? {
            remove(&path).await?;
        }
        Ok(())
    }
}
