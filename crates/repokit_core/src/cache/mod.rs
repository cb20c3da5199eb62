//! Cache backends for the cached repository.
//!
//! # Responsibility
//! - Store serialized result sets under string keys with a TTL.
//! - Provide an in-process backend that can be shared across units of work.
//!
//! # Invariants
//! - An expired entry is never returned, and none outlives the next write.
//! - Backends hold opaque bytes; encoding is the codec's concern.

use crate::error::{RepoError, RepoResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub mod codec;

pub use codec::{JsonCodec, PayloadCodec};

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> RepoResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> RepoResult<()>;

    async fn remove(&self, key: &str) -> RepoResult<()>;

    /// Removes every entry whose key starts with `prefix`; returns how many.
    async fn remove_prefix(&self, prefix: &str) -> RepoResult<usize>;
}

#[derive(Debug)]
struct CacheEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// In-process backend. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries; expired ones are purged first.
    pub fn len(&self) -> usize {
        let Ok(mut entries) = self.entries() else {
            return 0;
        };
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries()
            .map(|entries| {
                entries
                    .get(key)
                    .is_some_and(|entry| entry.expires_at > Instant::now())
            })
            .unwrap_or(false)
    }

    fn entries(&self) -> RepoResult<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| RepoError::Runtime("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> RepoResult<Option<Vec<u8>>> {
        let mut entries = self.entries()?;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.payload.clone()))
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    /// Stores `payload` and purges every expired entry.
    async fn set(&self, key: &str, payload: Vec<u8>, ttl: Duration) -> RepoResult<()> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .ok_or_else(|| RepoError::validation(format!("cache ttl {ttl:?} overflows")))?;
        let mut entries = self.entries()?;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(key.to_string(), CacheEntry { payload, expires_at });
        Ok(())
    }

    async fn remove(&self, key: &str) -> RepoResult<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> RepoResult<usize> {
        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}
