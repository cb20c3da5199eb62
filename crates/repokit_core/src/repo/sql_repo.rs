//! Session-backed repository.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{from_record, key_to_json, to_record, Entity, EntityDescriptor, Record};
use crate::model::paged::PagedResult;
use crate::repo::{Grouping, ReadRepository, Repository};
use crate::session::{PendingChange, PersistenceSession};
use crate::spec::evaluator::{Query, SpecificationEvaluator};
use crate::spec::filter::Filter;
use crate::spec::specification::Specification;
use async_trait::async_trait;
use log::debug;
use serde_json::Value as JsonValue;
use std::marker::PhantomData;
use std::sync::Arc;

/// Repository that evaluates specifications against a persistence session
/// and stages mutations on it.
pub struct SqlRepository<T> {
    session: Arc<dyn PersistenceSession>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> SqlRepository<T> {
    /// Fails with `Mapping` when `T`'s descriptor is malformed.
    pub fn try_new(session: Arc<dyn PersistenceSession>) -> RepoResult<Self> {
        T::descriptor().validate()?;
        Ok(Self {
            session,
            _entity: PhantomData,
        })
    }

    fn source(&self) -> Query {
        self.session.source(T::descriptor())
    }

    fn evaluate(&self, spec: &Specification<T>) -> RepoResult<Query> {
        SpecificationEvaluator::evaluate(self.source(), spec)
    }

    async fn fetch_entities(&self, query: &Query) -> RepoResult<Vec<T>> {
        decode_all(self.session.fetch(query).await?)
    }

    async fn find_by_key(&self, query: Query, id: &T::Key) -> RepoResult<Option<T>> {
        let query = query.filter_key(&key_to_json(id)?)?;
        let mut records = self.session.fetch(&query).await?;
        match records.pop() {
            Some(record) => Ok(Some(from_record(record)?)),
            None => Ok(None),
        }
    }

    /// Builds the update for `entity`; `None` when a tracked entity has no
    /// changed column.
    fn update_change(&self, entity: &T) -> RepoResult<Option<PendingChange>> {
        let descriptor = T::descriptor();
        let record = to_record(entity)?;
        match self.session.changed_columns(descriptor, &record) {
            Some(columns) if columns.is_empty() => {
                debug!(
                    "event=repo_update module=repo status=skipped reason=unchanged entity={}",
                    descriptor.name
                );
                Ok(None)
            }
            Some(columns) => Ok(Some(PendingChange::partial_update(
                descriptor, record, columns,
            ))),
            None => Ok(Some(PendingChange::update(descriptor, record))),
        }
    }

    /// Encodes every entity before staging any, so a failing entity stages
    /// nothing.
    fn stage_all(
        &self,
        entities: &[T],
        change: fn(&'static EntityDescriptor, Record) -> PendingChange,
    ) -> RepoResult<()> {
        let records = entities
            .iter()
            .map(to_record)
            .collect::<RepoResult<Vec<_>>>()?;
        for record in records {
            self.session.stage(change(T::descriptor(), record));
        }
        Ok(())
    }
}

fn decode_all<T: Entity>(records: Vec<Record>) -> RepoResult<Vec<T>> {
    records.into_iter().map(from_record).collect()
}

#[async_trait]
impl<T: Entity> ReadRepository<T> for SqlRepository<T> {
    async fn get_by_id(&self, id: &T::Key) -> RepoResult<Option<T>> {
        self.find_by_key(self.source(), id).await
    }

    async fn get_by_id_including_deleted(&self, id: &T::Key) -> RepoResult<Option<T>> {
        self.find_by_key(self.source().with_deleted(), id).await
    }

    async fn get_all(&self) -> RepoResult<Vec<T>> {
        self.fetch_entities(&self.source().without_tracking()).await
    }

    async fn get_all_including_deleted(&self) -> RepoResult<Vec<T>> {
        self.fetch_entities(&self.source().without_tracking().with_deleted())
            .await
    }

    async fn get_by_specification(&self, spec: &Specification<T>) -> RepoResult<Vec<T>> {
        let query = self.evaluate(spec)?;
        self.fetch_entities(&query).await
    }

    async fn get_single_by_specification(&self, spec: &Specification<T>) -> RepoResult<Option<T>> {
        let query = self.evaluate(spec)?;
        let mut matches = self.fetch_entities(&query.clone().take_at_most(2)).await?;
        if matches.len() > 1 {
            // Matches within the specification's own page, not the whole filter.
            let total = self.session.count(&query).await?;
            let count = match query.paging() {
                Some(paging) => total.saturating_sub(paging.skip).min(paging.take),
                None => total,
            };
            return Err(RepoError::MultipleMatches {
                entity: T::descriptor().name,
                count: usize::try_from(count).unwrap_or(usize::MAX),
            });
        }
        Ok(matches.pop())
    }

    async fn get_first_by_specification(&self, spec: &Specification<T>) -> RepoResult<Option<T>> {
        let query = self.evaluate(spec)?.take_at_most(1);
        Ok(self.fetch_entities(&query).await?.into_iter().next())
    }

    async fn count(&self, spec: Option<&Specification<T>>) -> RepoResult<u64> {
        let query = match spec {
            Some(spec) => self.evaluate(spec)?,
            None => self.source(),
        };
        self.session.count(&query).await
    }

    async fn exists(&self, filter: &Filter) -> RepoResult<bool> {
        let query = self.source().without_tracking().filter(filter)?;
        self.session.exists(&query).await
    }

    async fn get_paged(
        &self,
        page_number: u32,
        page_size: u32,
        spec: Option<&Specification<T>>,
    ) -> RepoResult<PagedResult<T>> {
        let paged = spec
            .cloned()
            .unwrap_or_default()
            .apply_paging_by_page(page_number, page_size)?;
        let query = self.evaluate(&paged)?;
        let (records, total) = self.session.fetch_page(&query).await?;
        Ok(PagedResult::new(
            decode_all(records)?,
            page_number,
            page_size,
            total,
        ))
    }

    async fn get_grouped_by_specification(
        &self,
        spec: &Specification<T>,
    ) -> RepoResult<Vec<Grouping<T>>> {
        let query = self.evaluate(spec)?;
        let column = query.group_by().ok_or_else(|| {
            RepoError::validation(format!(
                "grouped read of {} needs a group-by column",
                T::descriptor().name
            ))
        })?;

        let mut groups: Vec<(JsonValue, Vec<Record>)> = Vec::new();
        for record in self.session.fetch(&query).await? {
            let key = record.get(column.name).cloned().unwrap_or(JsonValue::Null);
            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(record),
                None => groups.push((key, vec![record])),
            }
        }

        groups
            .into_iter()
            .map(|(key, members)| {
                Ok(Grouping {
                    key,
                    items: decode_all(members)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for SqlRepository<T> {
    fn add(&self, entity: &T) -> RepoResult<()> {
        self.session
            .stage(PendingChange::insert(T::descriptor(), to_record(entity)?));
        Ok(())
    }

    fn add_range(&self, entities: &[T]) -> RepoResult<()> {
        self.stage_all(entities, PendingChange::insert)
    }

    fn update(&self, entity: &T) -> RepoResult<()> {
        if let Some(change) = self.update_change(entity)? {
            self.session.stage(change);
        }
        Ok(())
    }

    fn update_range(&self, entities: &[T]) -> RepoResult<()> {
        let changes = entities
            .iter()
            .map(|entity| self.update_change(entity))
            .collect::<RepoResult<Vec<_>>>()?;
        for change in changes.into_iter().flatten() {
            self.session.stage(change);
        }
        Ok(())
    }

    fn delete(&self, entity: &T) -> RepoResult<()> {
        self.session
            .stage(PendingChange::delete(T::descriptor(), to_record(entity)?));
        Ok(())
    }

    fn delete_range(&self, entities: &[T]) -> RepoResult<()> {
        self.stage_all(entities, PendingChange::delete)
    }

    async fn delete_by_id(&self, id: &T::Key) -> RepoResult<()> {
        let entity = self.get_by_id(id).await?.ok_or_else(|| RepoError::NotFound {
            entity: T::descriptor().name,
            key: id.to_string(),
        })?;
        self.delete(&entity)
    }
}
