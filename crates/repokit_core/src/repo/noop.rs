//! Repository that stores nothing.

use crate::error::RepoResult;
use crate::model::entity::Entity;
use crate::model::paged::PagedResult;
use crate::repo::{Grouping, ReadRepository, Repository};
use crate::spec::filter::Filter;
use crate::spec::specification::Specification;
use async_trait::async_trait;
use std::marker::PhantomData;

/// Accepts every mutation and finds nothing.
///
/// Stands in where a repository is required but persistence is disabled;
/// page arguments are still validated.
pub struct NoopRepository<T> {
    _entity: PhantomData<fn() -> T>,
}

impl<T> NoopRepository<T> {
    pub fn new() -> Self {
        Self {
            _entity: PhantomData,
        }
    }
}

impl<T> Default for NoopRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> ReadRepository<T> for NoopRepository<T> {
    async fn get_by_id(&self, _id: &T::Key) -> RepoResult<Option<T>> {
        Ok(None)
    }

    async fn get_by_id_including_deleted(&self, _id: &T::Key) -> RepoResult<Option<T>> {
        Ok(None)
    }

    async fn get_all(&self) -> RepoResult<Vec<T>> {
        Ok(Vec::new())
    }

    async fn get_all_including_deleted(&self) -> RepoResult<Vec<T>> {
        Ok(Vec::new())
    }

    async fn get_by_specification(&self, _spec: &Specification<T>) -> RepoResult<Vec<T>> {
        Ok(Vec::new())
    }

    async fn get_single_by_specification(&self, _spec: &Specification<T>) -> RepoResult<Option<T>> {
        Ok(None)
    }

    async fn get_first_by_specification(&self, _spec: &Specification<T>) -> RepoResult<Option<T>> {
        Ok(None)
    }

    async fn count(&self, _spec: Option<&Specification<T>>) -> RepoResult<u64> {
        Ok(0)
    }

    async fn exists(&self, _filter: &Filter) -> RepoResult<bool> {
        Ok(false)
    }

    async fn get_paged(
        &self,
        page_number: u32,
        page_size: u32,
        _spec: Option<&Specification<T>>,
    ) -> RepoResult<PagedResult<T>> {
        Specification::<T>::all().apply_paging_by_page(page_number, page_size)?;
        Ok(PagedResult::empty(page_number, page_size))
    }

    async fn get_grouped_by_specification(
        &self,
        _spec: &Specification<T>,
    ) -> RepoResult<Vec<Grouping<T>>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for NoopRepository<T> {
    fn add(&self, _entity: &T) -> RepoResult<()> {
        Ok(())
    }

    fn add_range(&self, _entities: &[T]) -> RepoResult<()> {
        Ok(())
    }

    fn update(&self, _entity: &T) -> RepoResult<()> {
        Ok(())
    }

    fn update_range(&self, _entities: &[T]) -> RepoResult<()> {
        Ok(())
    }

    fn delete(&self, _entity: &T) -> RepoResult<()> {
        Ok(())
    }

    fn delete_range(&self, _entities: &[T]) -> RepoResult<()> {
        Ok(())
    }

    async fn delete_by_id(&self, _id: &T::Key) -> RepoResult<()> {
        Ok(())
    }
}
