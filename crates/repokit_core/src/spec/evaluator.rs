//! Specification evaluator and executable query.
//!
//! # Responsibility
//! - Apply a [`Specification`] to a session's source [`Query`] in a fixed
//!   step order.
//! - Render the resulting query to deterministic, parameterized SQL.
//!
//! # Invariants
//! - Evaluation order: tracking, criteria, typed includes, string includes,
//!   grouped includes, ordering, grouping, paging.
//! - Unknown columns and unresolvable includes fail evaluation; nothing is
//!   silently dropped.
//! - Rendered row order is total: the key column breaks ties.

use crate::db::value::json_to_sql;
use crate::error::{RepoError, RepoResult};
use crate::model::capability::IS_DELETED;
use crate::model::entity::{Column, Entity, EntityDescriptor};
use crate::spec::filter::Filter;
use crate::spec::include::IncludeTree;
use crate::spec::specification::{Paging, SortDirection, Specification};
use log::debug;
use rusqlite::types::Value as SqlValue;
use serde_json::Value as JsonValue;

/// Executable query over one entity table.
#[derive(Debug, Clone)]
pub struct Query {
    descriptor: &'static EntityDescriptor,
    tracking: bool,
    exclude_deleted: bool,
    predicates: Vec<String>,
    params: Vec<SqlValue>,
    includes: IncludeTree,
    order: Option<(Column, SortDirection)>,
    group_by: Option<Column>,
    paging: Option<Paging>,
}

impl Query {
    /// Source query for an entity: tracked, and filtered to non-deleted
    /// rows when the entity is soft-deletable.
    pub fn from_descriptor(descriptor: &'static EntityDescriptor) -> Self {
        Self {
            descriptor,
            tracking: true,
            exclude_deleted: true,
            predicates: Vec::new(),
            params: Vec::new(),
            includes: IncludeTree::new(),
            order: None,
            group_by: None,
            paging: None,
        }
    }

    pub fn descriptor(&self) -> &'static EntityDescriptor {
        self.descriptor
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Whether deleted rows are hidden, here and in eager-loaded
    /// soft-deletable navigations.
    pub fn excludes_deleted(&self) -> bool {
        self.exclude_deleted
    }

    pub fn includes(&self) -> &IncludeTree {
        &self.includes
    }

    pub fn order(&self) -> Option<(Column, SortDirection)> {
        self.order
    }

    pub fn group_by(&self) -> Option<Column> {
        self.group_by
    }

    pub fn paging(&self) -> Option<Paging> {
        self.paging
    }

    pub fn without_tracking(mut self) -> Self {
        self.tracking = false;
        self
    }

    /// Drops the soft-delete filter.
    pub fn with_deleted(mut self) -> Self {
        self.exclude_deleted = false;
        self
    }

    pub fn filter(mut self, criteria: &Filter) -> RepoResult<Self> {
        let rendered = criteria.render(self.descriptor, &mut self.params)?;
        self.predicates.push(rendered);
        Ok(self)
    }

    /// Restricts the query to the row whose key equals `key`.
    pub fn filter_key(self, key: &JsonValue) -> RepoResult<Self> {
        let key_column = self.descriptor.key;
        self.filter_in(key_column, std::slice::from_ref(key))
    }

    /// Restricts `column` to the given record values.
    pub(crate) fn filter_in(mut self, column: Column, values: &[JsonValue]) -> RepoResult<Self> {
        if values.is_empty() {
            self.predicates.push("0 = 1".to_string());
            return Ok(self);
        }
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            self.params
                .push(json_to_sql(self.descriptor.table, column, value)?);
            placeholders.push("?");
        }
        let predicate = if placeholders.len() == 1 {
            format!("\"{}\" = ?", column.name)
        } else {
            format!("\"{}\" IN ({})", column.name, placeholders.join(", "))
        };
        self.predicates.push(predicate);
        Ok(self)
    }

    pub fn include(mut self, path: &str) -> RepoResult<Self> {
        self.includes.add_path(self.descriptor, path)?;
        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> RepoResult<Self> {
        let column = self.descriptor.require_column(field)?;
        self.order = Some((column, direction));
        Ok(self)
    }

    pub fn grouped_by(mut self, field: &str) -> RepoResult<Self> {
        self.group_by = Some(self.descriptor.require_column(field)?);
        Ok(self)
    }

    pub fn page(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    /// Caps the row count, keeping any existing offset.
    pub fn take_at_most(mut self, limit: u64) -> Self {
        self.paging = Some(match self.paging {
            Some(paging) => Paging {
                skip: paging.skip,
                take: paging.take.min(limit),
            },
            None => Paging {
                skip: 0,
                take: limit,
            },
        });
        self
    }

    fn where_clause(&self) -> String {
        let mut predicates = Vec::with_capacity(self.predicates.len() + 1);
        if self.exclude_deleted && self.descriptor.is_soft_deletable() {
            predicates.push(format!("\"{}\" = 0", IS_DELETED.name));
        }
        predicates.extend(self.predicates.iter().cloned());
        if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        }
    }

    /// `SELECT` over every persisted column, in descriptor order.
    pub fn select_sql(&self) -> (String, Vec<SqlValue>) {
        let columns = self
            .descriptor
            .persisted_columns()
            .iter()
            .map(|column| format!("\"{}\"", column.name))
            .collect::<Vec<_>>()
            .join(", ");
        let key = self.descriptor.key.name;
        let order = match self.order {
            Some((column, direction)) if column.name != key => format!(
                " ORDER BY \"{}\" {}, \"{key}\" ASC",
                column.name,
                direction.sql()
            ),
            Some((column, direction)) => {
                format!(" ORDER BY \"{}\" {}", column.name, direction.sql())
            }
            None => format!(" ORDER BY \"{key}\" ASC"),
        };

        let mut sql = format!(
            "SELECT {columns} FROM \"{}\"{}{order}",
            self.descriptor.table,
            self.where_clause()
        );
        let mut params = self.params.clone();
        if let Some(paging) = self.paging {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(saturating_i64(paging.take)));
            params.push(SqlValue::Integer(saturating_i64(paging.skip)));
        }
        (sql, params)
    }

    /// Row count of the filtered set; ordering and paging are ignored.
    pub fn count_sql(&self) -> (String, Vec<SqlValue>) {
        (
            format!(
                "SELECT COUNT(*) FROM \"{}\"{}",
                self.descriptor.table,
                self.where_clause()
            ),
            self.params.clone(),
        )
    }

    pub fn exists_sql(&self) -> (String, Vec<SqlValue>) {
        (
            format!(
                "SELECT EXISTS(SELECT 1 FROM \"{}\"{})",
                self.descriptor.table,
                self.where_clause()
            ),
            self.params.clone(),
        )
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Applies specifications to source queries.
pub struct SpecificationEvaluator;

impl SpecificationEvaluator {
    pub fn evaluate<T: Entity>(source: Query, spec: &Specification<T>) -> RepoResult<Query> {
        let descriptor = T::descriptor();
        if !std::ptr::eq(source.descriptor(), descriptor) {
            return Err(RepoError::mapping(format!(
                "specification for {} applied to a {} query",
                descriptor.name,
                source.descriptor().name
            )));
        }

        let mut query = source;
        if !spec.is_tracking() {
            query = query.without_tracking();
        }
        if spec.includes_deleted() {
            query = query.with_deleted();
        }
        if let Some(criteria) = spec.criteria() {
            query = query.filter(criteria)?;
        }
        for navigation in spec.includes() {
            query = query.include(navigation.name)?;
        }
        for path in spec.include_paths() {
            query = query.include(path)?;
        }
        for grouped in spec.grouped_includes() {
            query = query.include(&grouped.path())?;
        }
        if let Some(order) = spec.order() {
            query = query.order_by(&order.field, order.direction)?;
        }
        if let Some(group_by) = spec.group_by() {
            query = query.grouped_by(group_by)?;
        }
        if let Some(paging) = spec.paging() {
            query = query.page(paging);
        }

        debug!(
            "event=spec_evaluate module=spec status=ok entity={} includes={} tracking={}",
            descriptor.name,
            query.includes().paths().len(),
            query.is_tracking()
        );
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::{Query, SpecificationEvaluator};
    use crate::error::RepoError;
    use crate::model::entity::{Column, Entity, EntityDescriptor, Navigation};
    use crate::spec::filter::field;
    use crate::spec::specification::Specification;
    use rusqlite::types::Value as SqlValue;
    use serde::{Deserialize, Serialize};

    static NOTE: EntityDescriptor = EntityDescriptor::new("Note", "notes", Column::integer("id"))
        .with_columns(&[Column::text("title"), Column::real("rank")])
        .with_navigations(&[Navigation::collection("replies", note, "rank")])
        .soft_deletable();

    fn note() -> &'static EntityDescriptor {
        &NOTE
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        id: i64,
    }

    impl Entity for Note {
        type Key = i64;

        fn descriptor() -> &'static EntityDescriptor {
            &NOTE
        }

        fn key(&self) -> i64 {
            self.id
        }
    }

    #[test]
    fn source_query_filters_deleted_rows() {
        let (sql, params) = Query::from_descriptor(&NOTE).select_sql();
        assert_eq!(
            sql,
            "SELECT \"id\", \"title\", \"rank\", \"is_deleted\", \"deleted_at\" FROM \"notes\" \
             WHERE \"is_deleted\" = 0 ORDER BY \"id\" ASC"
        );
        assert!(params.is_empty());
    }

    #[test]
    fn plain_tables_render_without_a_deleted_filter() {
        static TAG: EntityDescriptor = EntityDescriptor::new("Tag", "tags", Column::integer("id"));

        let query = Query::from_descriptor(&TAG);
        assert_eq!(query.select_sql().0, "SELECT \"id\" FROM \"tags\" ORDER BY \"id\" ASC");
        assert!(query.excludes_deleted());
        assert!(!query.with_deleted().excludes_deleted());
    }

    #[test]
    fn evaluation_renders_criteria_order_and_paging() {
        let spec = Specification::<Note>::matching(field("rank").gt(50))
            .apply_order_by_descending("rank")
            .apply_paging_by_page(2, 10)
            .unwrap();
        let query = SpecificationEvaluator::evaluate(Query::from_descriptor(&NOTE), &spec).unwrap();
        let (sql, params) = query.select_sql();
        assert!(sql.ends_with(
            "WHERE \"is_deleted\" = 0 AND \"rank\" > ? ORDER BY \"rank\" DESC, \"id\" ASC LIMIT ? OFFSET ?"
        ));
        assert_eq!(
            params,
            vec![
                SqlValue::Real(50.0),
                SqlValue::Integer(10),
                SqlValue::Integer(10)
            ]
        );

        let (count_sql, count_params) = query.count_sql();
        assert_eq!(
            count_sql,
            "SELECT COUNT(*) FROM \"notes\" WHERE \"is_deleted\" = 0 AND \"rank\" > ?"
        );
        assert_eq!(count_params, vec![SqlValue::Real(50.0)]);
    }

    #[test]
    fn including_deleted_drops_the_global_filter() {
        let spec = Specification::<Note>::all().including_deleted();
        let query = SpecificationEvaluator::evaluate(Query::from_descriptor(&NOTE), &spec).unwrap();
        assert!(!query.select_sql().0.contains("is_deleted\" = 0"));
    }

    #[test]
    fn unknown_order_column_fails_evaluation() {
        let spec = Specification::<Note>::all().apply_order_by("colour");
        let err = SpecificationEvaluator::evaluate(Query::from_descriptor(&NOTE), &spec).unwrap_err();
        assert!(matches!(err, RepoError::Mapping(_)));
    }

    #[test]
    fn unknown_include_fails_evaluation() {
        let spec = Specification::<Note>::all().add_include_path("author");
        let err = SpecificationEvaluator::evaluate(Query::from_descriptor(&NOTE), &spec).unwrap_err();
        assert!(matches!(err, RepoError::Mapping(message) if message.contains("author")));
    }

    #[test]
    fn duplicate_includes_are_applied_once() {
        let spec = Specification::<Note>::all()
            .add_include(NOTE.navigations[0])
            .add_include_path("replies");
        let query = SpecificationEvaluator::evaluate(Query::from_descriptor(&NOTE), &spec).unwrap();
        assert_eq!(query.includes().paths(), ["replies".to_string()]);
    }

    #[test]
    fn take_at_most_keeps_the_offset() {
        let spec = Specification::<Note>::all().apply_paging(5, 10).unwrap();
        let query = SpecificationEvaluator::evaluate(Query::from_descriptor(&NOTE), &spec)
            .unwrap()
            .take_at_most(2);
        let paging = query.paging().unwrap();
        assert_eq!((paging.skip, paging.take), (5, 2));
    }
}
