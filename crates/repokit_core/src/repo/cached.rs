//! Caching repository decorator.
//!
//! # Responsibility
//! - Serve repeated reads from a [`CacheBackend`] until their TTL expires.
//! - Expose explicit invalidation: per key, per entity id, per
//!   specification and per entity type.
//!
//! # Invariants
//! - Writes pass through to the inner repository and never invalidate;
//!   callers refresh or clear after a checkpoint when they need fresh reads.
//! - A cache failure never fails a read: backend errors degrade to a miss
//!   and undecodable payloads are evicted.
//! - Keys are `{Type}:all`, `{Type}:id:{id}` and
//!   `{Type}:{operation}:{sha256(fingerprint)}`.

use crate::cache::{CacheBackend, JsonCodec, PayloadCodec};
use crate::error::RepoResult;
use crate::model::entity::Entity;
use crate::model::paged::PagedResult;
use crate::repo::{Grouping, ReadRepository, Repository};
use crate::spec::filter::Filter;
use crate::spec::specification::Specification;
use async_trait::async_trait;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache entry identity, relative to one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    All,
    Id(String),
    /// Read operation keyed by a structural fingerprint; the fingerprint is
    /// hashed when the key is rendered.
    Operation {
        operation: &'static str,
        fingerprint: String,
    },
}

impl CacheKey {
    pub fn for_id<K: std::fmt::Display>(id: &K) -> Self {
        Self::Id(id.to_string())
    }

    pub fn for_specification<T: Entity>(operation: &'static str, spec: &Specification<T>) -> Self {
        Self::Operation {
            operation,
            fingerprint: spec.fingerprint(),
        }
    }

    /// Renders the backend key for entity type `type_name`.
    pub fn render(&self, type_name: &str) -> String {
        match self {
            Self::All => format!("{type_name}:all"),
            Self::Id(id) => format!("{type_name}:id:{id}"),
            Self::Operation {
                operation,
                fingerprint,
            } => {
                let digest = Sha256::digest(fingerprint.as_bytes());
                format!("{type_name}:{operation}:{}", hex::encode(digest))
            }
        }
    }
}

const OP_SPECIFICATION: &str = "spec";
const OP_SINGLE: &str = "single";
const OP_FIRST: &str = "first";
const OP_COUNT: &str = "count";
const OP_EXISTS: &str = "exists";
const OP_PAGED: &str = "paged";
const OP_GROUPED: &str = "grouped";
const OP_ALL_WITH_DELETED: &str = "all_with_deleted";
const OP_ID_WITH_DELETED: &str = "id_with_deleted";

/// Read-through cache in front of a repository.
pub struct CachedRepository<T, R, C = JsonCodec> {
    inner: R,
    backend: Arc<dyn CacheBackend>,
    codec: C,
    ttl: Duration,
    _entity: PhantomData<fn() -> T>,
}

impl<T, R> CachedRepository<T, R, JsonCodec>
where
    T: Entity,
    R: Repository<T>,
{
    pub fn new(inner: R, backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_codec(inner, backend, JsonCodec)
    }
}

impl<T, R, C> CachedRepository<T, R, C>
where
    T: Entity,
    R: Repository<T>,
    C: PayloadCodec,
{
    pub fn with_codec(inner: R, backend: Arc<dyn CacheBackend>, codec: C) -> Self {
        Self {
            inner,
            backend,
            codec,
            ttl: DEFAULT_CACHE_TTL,
            _entity: PhantomData,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn type_name() -> &'static str {
        T::descriptor().name
    }

    fn key(key: &CacheKey) -> String {
        key.render(Self::type_name())
    }

    async fn read_through<V, F>(&self, key: CacheKey, load: F) -> RepoResult<V>
    where
        V: Serialize + DeserializeOwned + Send,
        F: Future<Output = RepoResult<V>> + Send,
    {
        let rendered = Self::key(&key);
        match self.backend.get(&rendered).await {
            Ok(Some(payload)) => match self.codec.decode::<V>(&payload) {
                Ok(value) => {
                    debug!("event=cache_read module=cache status=hit key={rendered}");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        "event=cache_read module=cache status=evicted key={rendered} error={err}"
                    );
                    if let Err(err) = self.backend.remove(&rendered).await {
                        warn!(
                            "event=cache_remove module=cache status=error key={rendered} error={err}"
                        );
                    }
                }
            },
            Ok(None) => debug!("event=cache_read module=cache status=miss key={rendered}"),
            Err(err) => warn!(
                "event=cache_read module=cache status=degraded key={rendered} error={err}"
            ),
        }

        let value = load.await?;
        match self.codec.encode(&value) {
            Ok(payload) => {
                if let Err(err) = self.backend.set(&rendered, payload, self.ttl).await {
                    warn!("event=cache_write module=cache status=degraded key={rendered} error={err}");
                }
            }
            Err(err) => {
                warn!("event=cache_write module=cache status=error key={rendered} error={err}")
            }
        }
        Ok(value)
    }

    /// Drops every entry of this entity type and reloads `get_all`.
    pub async fn refresh_cache(&self) -> RepoResult<Vec<T>> {
        self.clear_cache().await?;
        self.get_all().await
    }

    pub async fn refresh_entry(&self, id: &T::Key) -> RepoResult<Option<T>> {
        self.remove_from_cache(id).await?;
        self.get_by_id(id).await
    }

    pub async fn refresh_specification(&self, spec: &Specification<T>) -> RepoResult<Vec<T>> {
        self.remove_specification(spec).await?;
        self.get_by_specification(spec).await
    }

    pub async fn remove_from_cache(&self, id: &T::Key) -> RepoResult<()> {
        self.clear_key(&CacheKey::for_id(id)).await
    }

    pub async fn remove_specification(&self, spec: &Specification<T>) -> RepoResult<()> {
        self.clear_key(&CacheKey::for_specification(OP_SPECIFICATION, spec))
            .await
    }

    /// Drops every entry of this entity type; returns how many.
    pub async fn clear_cache(&self) -> RepoResult<usize> {
        let prefix = format!("{}:", Self::type_name());
        let removed = self.backend.remove_prefix(&prefix).await?;
        debug!("event=cache_clear module=cache status=ok prefix={prefix} removed={removed}");
        Ok(removed)
    }

    pub async fn clear_key(&self, key: &CacheKey) -> RepoResult<()> {
        self.backend.remove(&Self::key(key)).await
    }
}

#[async_trait]
impl<T, R, C> ReadRepository<T> for CachedRepository<T, R, C>
where
    T: Entity,
    R: Repository<T>,
    C: PayloadCodec,
{
    async fn get_by_id(&self, id: &T::Key) -> RepoResult<Option<T>> {
        self.read_through(CacheKey::for_id(id), self.inner.get_by_id(id))
            .await
    }

    async fn get_by_id_including_deleted(&self, id: &T::Key) -> RepoResult<Option<T>> {
        let key = CacheKey::Operation {
            operation: OP_ID_WITH_DELETED,
            fingerprint: id.to_string(),
        };
        self.read_through(key, self.inner.get_by_id_including_deleted(id))
            .await
    }

    async fn get_all(&self) -> RepoResult<Vec<T>> {
        self.read_through(CacheKey::All, self.inner.get_all()).await
    }

    async fn get_all_including_deleted(&self) -> RepoResult<Vec<T>> {
        let key = CacheKey::Operation {
            operation: OP_ALL_WITH_DELETED,
            fingerprint: String::new(),
        };
        self.read_through(key, self.inner.get_all_including_deleted())
            .await
    }

    async fn get_by_specification(&self, spec: &Specification<T>) -> RepoResult<Vec<T>> {
        let key = CacheKey::for_specification(OP_SPECIFICATION, spec);
        self.read_through(key, self.inner.get_by_specification(spec))
            .await
    }

    async fn get_single_by_specification(&self, spec: &Specification<T>) -> RepoResult<Option<T>> {
        let key = CacheKey::for_specification(OP_SINGLE, spec);
        self.read_through(key, self.inner.get_single_by_specification(spec))
            .await
    }

    async fn get_first_by_specification(&self, spec: &Specification<T>) -> RepoResult<Option<T>> {
        let key = CacheKey::for_specification(OP_FIRST, spec);
        self.read_through(key, self.inner.get_first_by_specification(spec))
            .await
    }

    async fn count(&self, spec: Option<&Specification<T>>) -> RepoResult<u64> {
        let fingerprint = spec.map_or_else(
            || Specification::<T>::all().fingerprint(),
            Specification::fingerprint,
        );
        let key = CacheKey::Operation {
            operation: OP_COUNT,
            fingerprint,
        };
        self.read_through(key, self.inner.count(spec)).await
    }

    async fn exists(&self, filter: &Filter) -> RepoResult<bool> {
        let key = CacheKey::Operation {
            operation: OP_EXISTS,
            fingerprint: filter.to_string(),
        };
        self.read_through(key, self.inner.exists(filter)).await
    }

    async fn get_paged(
        &self,
        page_number: u32,
        page_size: u32,
        spec: Option<&Specification<T>>,
    ) -> RepoResult<PagedResult<T>> {
        let base = spec.map_or_else(
            || Specification::<T>::all().fingerprint(),
            Specification::fingerprint,
        );
        let key = CacheKey::Operation {
            operation: OP_PAGED,
            fingerprint: format!("{base}|page={page_number} size={page_size}"),
        };
        self.read_through(key, self.inner.get_paged(page_number, page_size, spec))
            .await
    }

    async fn get_grouped_by_specification(
        &self,
        spec: &Specification<T>,
    ) -> RepoResult<Vec<Grouping<T>>> {
        let key = CacheKey::for_specification(OP_GROUPED, spec);
        self.read_through(key, self.inner.get_grouped_by_specification(spec))
            .await
    }
}

#[async_trait]
impl<T, R, C> Repository<T> for CachedRepository<T, R, C>
where
    T: Entity,
    R: Repository<T>,
    C: PayloadCodec,
{
    fn add(&self, entity: &T) -> RepoResult<()> {
        self.inner.add(entity)
    }

    fn add_range(&self, entities: &[T]) -> RepoResult<()> {
        self.inner.add_range(entities)
    }

    fn update(&self, entity: &T) -> RepoResult<()> {
        self.inner.update(entity)
    }

    fn update_range(&self, entities: &[T]) -> RepoResult<()> {
        self.inner.update_range(entities)
    }

    fn delete(&self, entity: &T) -> RepoResult<()> {
        self.inner.delete(entity)
    }

    fn delete_range(&self, entities: &[T]) -> RepoResult<()> {
        self.inner.delete_range(entities)
    }

    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<()> {
        self.inner.delete_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::CacheKey;

    #[test]
    fn keys_follow_the_type_prefix_layout() {
        assert_eq!(CacheKey::All.render("Product"), "Product:all");
        assert_eq!(CacheKey::for_id(&42).render("Product"), "Product:id:42");

        let key = CacheKey::Operation {
            operation: "spec",
            fingerprint: "entity=Product|where=price > 50".to_string(),
        }
        .render("Product");
        let hash = key.strip_prefix("Product:spec:").unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn equal_fingerprints_share_a_key() {
        let render = |fingerprint: &str| {
            CacheKey::Operation {
                operation: "count",
                fingerprint: fingerprint.to_string(),
            }
            .render("Product")
        };
        assert_eq!(render("a"), render("a"));
        assert_ne!(render("a"), render("b"));
    }
}
