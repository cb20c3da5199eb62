//! Repository contracts and implementations.
//!
//! # Responsibility
//! - Define typed read and mutation contracts over one entity type.
//! - Provide the session-backed repository, a caching decorator and a
//!   no-op implementation.
//!
//! # Invariants
//! - Default reads never return soft-deleted rows; only the
//!   `*_including_deleted` paths and `including_deleted()` specifications do.
//! - Mutations only stage; nothing reaches the store before the owning unit
//!   of work checkpoints.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::Entity;
use crate::model::paged::PagedResult;
use crate::spec::filter::Filter;
use crate::spec::specification::Specification;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod cached;
pub mod noop;
pub mod sql_repo;

pub use cached::{CacheKey, CachedRepository, DEFAULT_CACHE_TTL};
pub use noop::NoopRepository;
pub use sql_repo::SqlRepository;

/// Entities sharing one value of the grouping column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grouping<T> {
    pub key: JsonValue,
    pub items: Vec<T>,
}

#[async_trait]
pub trait ReadRepository<T: Entity>: Send + Sync {
    /// Tracked lookup by key.
    async fn get_by_id(&self, id: &T::Key) -> RepoResult<Option<T>>;

    async fn get_by_id_or_throw(&self, id: &T::Key) -> RepoResult<T> {
        self.get_by_id(id).await?.ok_or_else(|| RepoError::NotFound {
            entity: T::descriptor().name,
            key: id.to_string(),
        })
    }

    async fn get_by_id_including_deleted(&self, id: &T::Key) -> RepoResult<Option<T>>;

    /// Every live row, untracked.
    async fn get_all(&self) -> RepoResult<Vec<T>>;

    async fn get_all_including_deleted(&self) -> RepoResult<Vec<T>>;

    async fn get_by_specification(&self, spec: &Specification<T>) -> RepoResult<Vec<T>>;

    /// `None` for no match; `MultipleMatches` for more than one.
    async fn get_single_by_specification(&self, spec: &Specification<T>) -> RepoResult<Option<T>>;

    async fn get_single_or_throw(&self, spec: &Specification<T>) -> RepoResult<T> {
        self.get_single_by_specification(spec)
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: T::descriptor().name,
                key: spec.fingerprint(),
            })
    }

    async fn get_first_by_specification(&self, spec: &Specification<T>) -> RepoResult<Option<T>>;

    async fn count(&self, spec: Option<&Specification<T>>) -> RepoResult<u64>;

    async fn exists(&self, filter: &Filter) -> RepoResult<bool>;

    /// One page (1-based) of the filtered set; `spec` paging is replaced.
    async fn get_paged(
        &self,
        page_number: u32,
        page_size: u32,
        spec: Option<&Specification<T>>,
    ) -> RepoResult<PagedResult<T>>;

    /// Groups by the specification's group-by column, in order of first
    /// appearance.
    async fn get_grouped_by_specification(
        &self,
        spec: &Specification<T>,
    ) -> RepoResult<Vec<Grouping<T>>>;
}

#[async_trait]
pub trait Repository<T: Entity>: ReadRepository<T> {
    fn add(&self, entity: &T) -> RepoResult<()>;

    fn add_range(&self, entities: &[T]) -> RepoResult<()>;

    /// Stages an update; tracked entities only write changed columns.
    fn update(&self, entity: &T) -> RepoResult<()>;

    fn update_range(&self, entities: &[T]) -> RepoResult<()>;

    fn delete(&self, entity: &T) -> RepoResult<()>;

    fn delete_range(&self, entities: &[T]) -> RepoResult<()>;

    /// Looks the entity up and stages its delete; `NotFound` when absent.
    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<()>;
}
