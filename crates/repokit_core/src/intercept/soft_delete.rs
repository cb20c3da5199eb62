//! Soft delete.

use crate::db::value::timestamp_json;
use crate::intercept::{InterceptContext, SaveInterceptor};
use crate::model::capability::{DELETED_AT, DELETED_BY, IS_DELETED};
use crate::session::{ChangeState, PendingChange};
use serde_json::Value as JsonValue;

/// Turns deletes of soft-deletable entities into tombstone updates and keeps
/// tombstone columns out of every other write.
///
/// - Delete: becomes an update of `is_deleted`, `deleted_at` and, when the
///   entity tracks it, `deleted_by`. The session only applies it to live
///   rows.
/// - Insert: starts live, whatever the caller set.
/// - Update: tombstone columns are protected; there is no undelete.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftDeleteInterceptor;

impl SaveInterceptor for SoftDeleteInterceptor {
    fn name(&self) -> &'static str {
        "soft_delete"
    }

    fn intercept(
        &self,
        mut changes: Vec<PendingChange>,
        context: &InterceptContext,
    ) -> Vec<PendingChange> {
        for change in changes
            .iter_mut()
            .filter(|change| change.descriptor.is_soft_deletable())
        {
            let tracks_user = change.descriptor.tracks_deleted_by();
            match change.state {
                ChangeState::Delete => {
                    change.state = ChangeState::Update;
                    change.narrow_to_set_columns();
                    change.set_column(IS_DELETED, JsonValue::Bool(true));
                    change.set_column(DELETED_AT, timestamp_json(&context.now));
                    if tracks_user {
                        change.set_column(DELETED_BY, JsonValue::String(context.user.clone()));
                    }
                }
                ChangeState::Insert => {
                    change.set_column(IS_DELETED, JsonValue::Bool(false));
                    change.set_column(DELETED_AT, JsonValue::Null);
                    if tracks_user {
                        change.set_column(DELETED_BY, JsonValue::Null);
                    }
                }
                ChangeState::Update => {
                    change.protect(IS_DELETED);
                    change.protect(DELETED_AT);
                    if tracks_user {
                        change.protect(DELETED_BY);
                    }
                }
            }
        }
        changes
    }
}
