//! Entity contract and static table mapping.
//!
//! # Responsibility
//! - Define what a repository-managed record type must provide.
//! - Describe how an entity maps onto one table: key, columns, navigations
//!   and opted-in capabilities.
//! - Convert entities to and from JSON records, the shape every session
//!   operation works on.
//!
//! # Invariants
//! - An entity serializes to a JSON object whose keys are its column names
//!   (capability structs are `#[serde(flatten)]`ed into it).
//! - Descriptor identifiers are plain SQL identifiers; they are quoted but
//!   never escaped, so `validate()` rejects anything else.

use crate::error::{RepoError, RepoResult};
use crate::model::capability::{
    CREATED_AT, CREATED_BY, DELETED_AT, DELETED_BY, IS_DELETED, MODIFIED_AT, MODIFIED_BY,
    ROW_VERSION,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Column-name to value map produced from an entity (or read from a row).
pub type Record = serde_json::Map<String, JsonValue>;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Storage class of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Integer,
    Real,
    Text,
    /// JSON `true`/`false`, stored as `0`/`1`.
    Bool,
    /// RFC 3339 timestamp, stored as fixed-width UTC text so that text
    /// comparison matches chronological order.
    Timestamp,
    /// Hyphenated UUID text.
    Uuid,
    /// Arbitrary JSON value, stored as serialized text.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind }
    }

    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Integer)
    }

    pub const fn real(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Real)
    }

    pub const fn text(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Text)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Bool)
    }

    pub const fn timestamp(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Timestamp)
    }

    pub const fn uuid(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Uuid)
    }

    pub const fn json(name: &'static str) -> Self {
        Self::new(name, ColumnKind::Json)
    }
}

/// How a navigation joins the parent table to its target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// Target rows carry `foreign_key` pointing at the parent key; loads a
    /// JSON array.
    Collection { foreign_key: &'static str },
    /// The parent row carries `foreign_key` pointing at the target key; loads
    /// a JSON object or `null`.
    Reference { foreign_key: &'static str },
}

/// Eager-loadable relationship from one entity to another.
///
/// `name` is both the include-path segment and the serde field the loaded
/// rows are attached under.
#[derive(Debug, Clone, Copy)]
pub struct Navigation {
    pub name: &'static str,
    pub target: fn() -> &'static EntityDescriptor,
    pub kind: NavigationKind,
}

impl Navigation {
    pub const fn collection(
        name: &'static str,
        target: fn() -> &'static EntityDescriptor,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            target,
            kind: NavigationKind::Collection { foreign_key },
        }
    }

    pub const fn reference(
        name: &'static str,
        target: fn() -> &'static EntityDescriptor,
        foreign_key: &'static str,
    ) -> Self {
        Self {
            name,
            target,
            kind: NavigationKind::Reference { foreign_key },
        }
    }

    pub fn target_descriptor(&self) -> &'static EntityDescriptor {
        (self.target)()
    }
}

/// Capabilities an entity opts into. Each flag adds the matching columns to
/// the persisted column set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub auditable: bool,
    pub soft_delete: bool,
    pub deleted_by: bool,
    pub concurrency_token: bool,
}

/// Static mapping of one entity type onto one table.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Display name used in errors, logs and cache keys.
    pub name: &'static str,
    pub table: &'static str,
    pub key: Column,
    /// Data columns, excluding the key and capability columns.
    pub columns: &'static [Column],
    pub navigations: &'static [Navigation],
    pub capabilities: Capabilities,
}

impl EntityDescriptor {
    pub const fn new(name: &'static str, table: &'static str, key: Column) -> Self {
        Self {
            name,
            table,
            key,
            columns: &[],
            navigations: &[],
            capabilities: Capabilities {
                auditable: false,
                soft_delete: false,
                deleted_by: false,
                concurrency_token: false,
            },
        }
    }

    pub const fn with_columns(self, columns: &'static [Column]) -> Self {
        Self { columns, ..self }
    }

    pub const fn with_navigations(self, navigations: &'static [Navigation]) -> Self {
        Self {
            navigations,
            ..self
        }
    }

    /// Adds `created_at`, `created_by`, `modified_at`, `modified_by`.
    pub const fn auditable(self) -> Self {
        let mut capabilities = self.capabilities;
        capabilities.auditable = true;
        Self {
            capabilities,
            ..self
        }
    }

    /// Adds `is_deleted`, `deleted_at`.
    pub const fn soft_deletable(self) -> Self {
        let mut capabilities = self.capabilities;
        capabilities.soft_delete = true;
        Self {
            capabilities,
            ..self
        }
    }

    /// Adds `is_deleted`, `deleted_at`, `deleted_by`.
    pub const fn soft_deletable_by_user(self) -> Self {
        let mut capabilities = self.capabilities;
        capabilities.soft_delete = true;
        capabilities.deleted_by = true;
        Self {
            capabilities,
            ..self
        }
    }

    /// Adds the `row_version` concurrency token.
    pub const fn concurrency_checked(self) -> Self {
        let mut capabilities = self.capabilities;
        capabilities.concurrency_token = true;
        Self {
            capabilities,
            ..self
        }
    }

    pub fn is_auditable(&self) -> bool {
        self.capabilities.auditable
    }

    pub fn is_soft_deletable(&self) -> bool {
        self.capabilities.soft_delete
    }

    pub fn tracks_deleted_by(&self) -> bool {
        self.capabilities.soft_delete && self.capabilities.deleted_by
    }

    pub fn version_column(&self) -> Option<Column> {
        self.capabilities.concurrency_token.then_some(ROW_VERSION)
    }

    /// Every column written and read by the session, key first.
    pub fn persisted_columns(&self) -> Vec<Column> {
        let mut columns = Vec::with_capacity(self.columns.len() + 9);
        columns.push(self.key);
        columns.extend_from_slice(self.columns);
        if self.capabilities.auditable {
            columns.extend_from_slice(&[CREATED_AT, CREATED_BY, MODIFIED_AT, MODIFIED_BY]);
        }
        if self.capabilities.soft_delete {
            columns.extend_from_slice(&[IS_DELETED, DELETED_AT]);
            if self.capabilities.deleted_by {
                columns.push(DELETED_BY);
            }
        }
        if self.capabilities.concurrency_token {
            columns.push(ROW_VERSION);
        }
        columns
    }

    /// Resolves a persisted column by name.
    pub fn column(&self, name: &str) -> Option<Column> {
        self.persisted_columns()
            .into_iter()
            .find(|column| column.name == name)
    }

    /// Resolves a column or fails with a mapping error naming this entity.
    pub fn require_column(&self, name: &str) -> RepoResult<Column> {
        self.column(name).ok_or_else(|| {
            RepoError::mapping(format!("unknown column `{name}` on {}", self.name))
        })
    }

    pub fn navigation(&self, name: &str) -> Option<&Navigation> {
        self.navigations
            .iter()
            .find(|navigation| navigation.name == name)
    }

    /// Checks identifiers and name collisions.
    ///
    /// Navigation targets are checked one level deep; their own descriptors
    /// are validated when a repository for them is created.
    pub fn validate(&self) -> RepoResult<()> {
        check_identifier(self.name, "entity name", self.name)?;
        check_identifier(self.name, "table", self.table)?;

        let mut seen = HashSet::new();
        for column in self.persisted_columns() {
            check_identifier(self.name, "column", column.name)?;
            if !seen.insert(column.name) {
                return Err(RepoError::mapping(format!(
                    "column `{}` is declared twice on {}",
                    column.name, self.name
                )));
            }
        }

        for navigation in self.navigations {
            check_identifier(self.name, "navigation", navigation.name)?;
            if seen.contains(navigation.name) {
                return Err(RepoError::mapping(format!(
                    "navigation `{}` collides with a column on {}",
                    navigation.name, self.name
                )));
            }
            let target = navigation.target_descriptor();
            match navigation.kind {
                NavigationKind::Collection { foreign_key } => {
                    target.require_column(foreign_key)?;
                }
                NavigationKind::Reference { foreign_key } => {
                    self.require_column(foreign_key)?;
                }
            }
        }

        Ok(())
    }
}

fn check_identifier(entity: &str, role: &str, value: &str) -> RepoResult<()> {
    if IDENTIFIER.is_match(value) {
        return Ok(());
    }
    Err(RepoError::mapping(format!(
        "{role} `{value}` on {entity} is not a plain SQL identifier"
    )))
}

/// Key type of an entity.
pub trait EntityKey:
    Clone + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> EntityKey for K where
    K: Clone + Eq + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A record type managed by repositories.
pub trait Entity: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    type Key: EntityKey;

    fn descriptor() -> &'static EntityDescriptor;

    fn key(&self) -> Self::Key;
}

/// Serializes an entity into its column record.
pub(crate) fn to_record<T: Entity>(entity: &T) -> RepoResult<Record> {
    match serde_json::to_value(entity)? {
        JsonValue::Object(record) => Ok(record),
        other => Err(RepoError::InvalidData(format!(
            "{} must serialize to a JSON object, got `{other}`",
            T::descriptor().name
        ))),
    }
}

/// Deserializes an entity from a record (plus any attached navigations).
pub(crate) fn from_record<T: Entity>(record: Record) -> RepoResult<T> {
    serde_json::from_value(JsonValue::Object(record)).map_err(|err| {
        RepoError::InvalidData(format!(
            "row of `{}` does not decode into {}: {err}",
            T::descriptor().table,
            T::descriptor().name
        ))
    })
}

pub(crate) fn key_to_json<K: EntityKey>(key: &K) -> RepoResult<JsonValue> {
    Ok(serde_json::to_value(key)?)
}

#[cfg(test)]
mod tests {
    use super::{Column, EntityDescriptor, Navigation};
    use crate::error::RepoError;

    static PARENT: EntityDescriptor = EntityDescriptor::new("Parent", "parents", Column::integer("id"))
        .with_columns(&[Column::text("label")])
        .with_navigations(&[Navigation::collection("children", child, "parent_id")])
        .auditable()
        .soft_deletable_by_user()
        .concurrency_checked();

    static CHILD: EntityDescriptor = EntityDescriptor::new("Child", "children", Column::integer("id"))
        .with_columns(&[Column::integer("parent_id")]);

    fn child() -> &'static EntityDescriptor {
        &CHILD
    }

    #[test]
    fn capability_flags_extend_persisted_columns() {
        let names: Vec<_> = PARENT
            .persisted_columns()
            .into_iter()
            .map(|column| column.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "id",
                "label",
                "created_at",
                "created_by",
                "modified_at",
                "modified_by",
                "is_deleted",
                "deleted_at",
                "deleted_by",
                "row_version",
            ]
        );
        assert!(PARENT.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unquoted_identifiers() {
        static BAD: EntityDescriptor =
            EntityDescriptor::new("Bad", "bad table", Column::integer("id"));
        assert!(matches!(BAD.validate(), Err(RepoError::Mapping(_))));
    }

    #[test]
    fn validate_rejects_collection_without_foreign_key_on_target() {
        static BROKEN: EntityDescriptor = EntityDescriptor::new("Broken", "broken", Column::integer("id"))
            .with_navigations(&[Navigation::collection("children", child, "owner_id")]);
        let err = BROKEN.validate().unwrap_err();
        assert!(err.to_string().contains("owner_id"));
    }

    #[test]
    fn require_column_names_the_entity() {
        let err = PARENT.require_column("missing").unwrap_err();
        assert!(err.to_string().contains("Parent"));
    }
}
