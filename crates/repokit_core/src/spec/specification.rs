//! Immutable query description.
//!
//! # Responsibility
//! - Capture criteria, includes, ordering, grouping, paging and tracking for
//!   one entity type as plain data.
//! - Compose two specifications into one.
//!
//! # Invariants
//! - At most one ordering is active; the last one applied wins.
//! - Paging is either absent or a validated `skip`/`take` pair.
//! - Builders consume `self`; a built specification never changes.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Entity, Navigation};
use crate::spec::filter::Filter;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub field: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub skip: u64,
    pub take: u64,
}

/// Include rooted at a typed navigation and continued by a dotted path.
#[derive(Debug, Clone)]
pub struct GroupedInclude {
    pub root: Navigation,
    pub then_path: String,
}

impl GroupedInclude {
    /// Full include path, `root.then_path`.
    pub fn path(&self) -> String {
        format!("{}.{}", self.root.name, self.then_path)
    }
}

/// Query description for entity type `T`.
pub struct Specification<T> {
    criteria: Option<Filter>,
    includes: Vec<Navigation>,
    include_paths: Vec<String>,
    grouped_includes: Vec<GroupedInclude>,
    order: Option<OrderSpec>,
    group_by: Option<String>,
    paging: Option<Paging>,
    no_tracking: bool,
    include_deleted: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Specification<T> {
    pub fn new(criteria: Option<Filter>) -> Self {
        Self {
            criteria,
            includes: Vec::new(),
            include_paths: Vec::new(),
            grouped_includes: Vec::new(),
            order: None,
            group_by: None,
            paging: None,
            no_tracking: false,
            include_deleted: false,
            _entity: PhantomData,
        }
    }

    /// Matches every (non-deleted) row.
    pub fn all() -> Self {
        Self::new(None)
    }

    pub fn matching(criteria: Filter) -> Self {
        Self::new(Some(criteria))
    }

    pub fn add_include(mut self, navigation: Navigation) -> Self {
        if !self
            .includes
            .iter()
            .any(|existing| existing.name == navigation.name)
        {
            self.includes.push(navigation);
        }
        self
    }

    pub fn add_include_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if !self.include_paths.contains(&path) {
            self.include_paths.push(path);
        }
        self
    }

    /// Includes `root` and continues along `then_path` from its target.
    pub fn add_grouped_include(mut self, root: Navigation, then_path: impl Into<String>) -> Self {
        let grouped = GroupedInclude {
            root,
            then_path: then_path.into(),
        };
        if !self
            .grouped_includes
            .iter()
            .any(|existing| existing.path() == grouped.path())
        {
            self.grouped_includes.push(grouped);
        }
        self
    }

    pub fn apply_order_by(self, field: impl Into<String>) -> Self {
        self.ordered(field.into(), SortDirection::Ascending)
    }

    pub fn apply_order_by_descending(self, field: impl Into<String>) -> Self {
        self.ordered(field.into(), SortDirection::Descending)
    }

    fn ordered(mut self, field: String, direction: SortDirection) -> Self {
        self.order = Some(OrderSpec { field, direction });
        self
    }

    pub fn apply_group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by = Some(field.into());
        self
    }

    pub fn apply_paging(mut self, skip: u64, take: u64) -> RepoResult<Self> {
        if take == 0 {
            return Err(RepoError::validation("paging `take` must be at least 1"));
        }
        self.paging = Some(Paging { skip, take });
        Ok(self)
    }

    /// Pages are 1-based: page `n` skips `(n - 1) * page_size` rows.
    pub fn apply_paging_by_page(self, page_number: u32, page_size: u32) -> RepoResult<Self> {
        if page_number < 1 {
            return Err(RepoError::validation(format!(
                "page number must be at least 1, got {page_number}"
            )));
        }
        if page_size == 0 {
            return Err(RepoError::validation("page size must be at least 1"));
        }
        let skip = u64::from(page_number - 1) * u64::from(page_size);
        self.apply_paging(skip, u64::from(page_size))
    }

    pub fn disable_tracking(mut self) -> Self {
        self.no_tracking = true;
        self
    }

    /// Opts out of the soft-delete filter for this query.
    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Narrows the criteria with `filter`.
    pub fn and_criteria(mut self, filter: Filter) -> Self {
        self.criteria = Some(match self.criteria.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Combines two specifications.
    ///
    /// Criteria are conjoined and includes are unioned. `other` wins for
    /// ordering, grouping and paging when it sets them. Disabling tracking
    /// or including deleted rows in either operand carries over.
    pub fn compose(self, other: Specification<T>) -> Self {
        let mut composed = match other.criteria {
            Some(criteria) => self.and_criteria(criteria),
            None => self,
        };
        for navigation in other.includes {
            composed = composed.add_include(navigation);
        }
        for path in other.include_paths {
            composed = composed.add_include_path(path);
        }
        for grouped in other.grouped_includes {
            composed = composed.add_grouped_include(grouped.root, grouped.then_path);
        }
        if other.order.is_some() {
            composed.order = other.order;
        }
        if other.group_by.is_some() {
            composed.group_by = other.group_by;
        }
        if other.paging.is_some() {
            composed.paging = other.paging;
        }
        composed.no_tracking |= other.no_tracking;
        composed.include_deleted |= other.include_deleted;
        composed
    }

    /// Same as [`Specification::compose`].
    pub fn and(self, other: Specification<T>) -> Self {
        self.compose(other)
    }

    pub fn criteria(&self) -> Option<&Filter> {
        self.criteria.as_ref()
    }

    pub fn includes(&self) -> &[Navigation] {
        &self.includes
    }

    pub fn include_paths(&self) -> &[String] {
        &self.include_paths
    }

    pub fn grouped_includes(&self) -> &[GroupedInclude] {
        &self.grouped_includes
    }

    pub fn order(&self) -> Option<&OrderSpec> {
        self.order.as_ref()
    }

    pub fn group_by(&self) -> Option<&str> {
        self.group_by.as_deref()
    }

    pub fn paging(&self) -> Option<Paging> {
        self.paging
    }

    pub fn is_tracking(&self) -> bool {
        !self.no_tracking
    }

    pub fn includes_deleted(&self) -> bool {
        self.include_deleted
    }

    /// Stable text identity of the specification's structure.
    ///
    /// Two specifications with equal fingerprints produce the same query.
    pub fn fingerprint(&self) -> String {
        let mut parts = vec![format!("entity={}", T::descriptor().name)];
        if let Some(criteria) = &self.criteria {
            parts.push(format!("where={criteria}"));
        }
        let includes: Vec<String> = self
            .includes
            .iter()
            .map(|navigation| navigation.name.to_string())
            .chain(self.include_paths.iter().cloned())
            .chain(self.grouped_includes.iter().map(GroupedInclude::path))
            .collect();
        if !includes.is_empty() {
            parts.push(format!("include={}", includes.join(",")));
        }
        if let Some(order) = &self.order {
            parts.push(format!("order={} {}", order.field, order.direction.sql()));
        }
        if let Some(group_by) = &self.group_by {
            parts.push(format!("group={group_by}"));
        }
        if let Some(paging) = self.paging {
            parts.push(format!("skip={} take={}", paging.skip, paging.take));
        }
        if self.no_tracking {
            parts.push("no_tracking".to_string());
        }
        if self.include_deleted {
            parts.push("with_deleted".to_string());
        }
        parts.join("|")
    }
}

impl<T: Entity> Default for Specification<T> {
    fn default() -> Self {
        Self::all()
    }
}

impl<T> Clone for Specification<T> {
    fn clone(&self) -> Self {
        Self {
            criteria: self.criteria.clone(),
            includes: self.includes.clone(),
            include_paths: self.include_paths.clone(),
            grouped_includes: self.grouped_includes.clone(),
            order: self.order.clone(),
            group_by: self.group_by.clone(),
            paging: self.paging,
            no_tracking: self.no_tracking,
            include_deleted: self.include_deleted,
            _entity: PhantomData,
        }
    }
}

impl<T> Debug for Specification<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Specification")
            .field("criteria", &self.criteria)
            .field(
                "includes",
                &self
                    .includes
                    .iter()
                    .map(|navigation| navigation.name)
                    .collect::<Vec<_>>(),
            )
            .field("include_paths", &self.include_paths)
            .field(
                "grouped_includes",
                &self
                    .grouped_includes
                    .iter()
                    .map(GroupedInclude::path)
                    .collect::<Vec<_>>(),
            )
            .field("order", &self.order)
            .field("group_by", &self.group_by)
            .field("paging", &self.paging)
            .field("no_tracking", &self.no_tracking)
            .field("include_deleted", &self.include_deleted)
            .finish()
    }
}

impl<T> PartialEq for Specification<T> {
    fn eq(&self, other: &Self) -> bool {
        let navigation_names = |navigations: &[Navigation]| {
            navigations
                .iter()
                .map(|navigation| navigation.name)
                .collect::<Vec<_>>()
        };
        let grouped_paths = |grouped: &[GroupedInclude]| {
            grouped.iter().map(GroupedInclude::path).collect::<Vec<_>>()
        };

        self.criteria == other.criteria
            && navigation_names(&self.includes) == navigation_names(&other.includes)
            && self.include_paths == other.include_paths
            && grouped_paths(&self.grouped_includes) == grouped_paths(&other.grouped_includes)
            && self.order == other.order
            && self.group_by == other.group_by
            && self.paging == other.paging
            && self.no_tracking == other.no_tracking
            && self.include_deleted == other.include_deleted
    }
}
