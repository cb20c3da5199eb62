//! Opt-in entity capabilities: audit stamps, soft delete, concurrency token.
//!
//! # Responsibility
//! - Provide the field groups entities embed (`#[serde(flatten)]`) to gain a
//!   capability, and the column names the session maps them to.
//! - The descriptor's capability flags are the only switch; embedding a
//!   field group without the flag persists nothing.
//!
//! # Invariants
//! - Audit and tombstone fields are written by save interceptors only;
//!   values a caller puts there are overwritten or ignored.
//! - `is_deleted` never goes back to `false` through this crate.

use crate::model::entity::Column;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CREATED_AT: Column = Column::timestamp("created_at");
pub const CREATED_BY: Column = Column::text("created_by");
pub const MODIFIED_AT: Column = Column::timestamp("modified_at");
pub const MODIFIED_BY: Column = Column::text("modified_by");
pub const IS_DELETED: Column = Column::boolean("is_deleted");
pub const DELETED_AT: Column = Column::timestamp("deleted_at");
pub const DELETED_BY: Column = Column::text("deleted_by");
pub const ROW_VERSION: Column = Column::integer("row_version");

/// Creation and modification stamps.
///
/// `created_*` are `None` only before the first checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_by: Option<String>,
}

/// Logical-delete marker.
///
/// `deleted_by` is persisted only for descriptors built with
/// `soft_deletable_by_user()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_by: Option<String>,
}
