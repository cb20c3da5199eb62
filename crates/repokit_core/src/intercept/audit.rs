//! Audit stamping.

use crate::db::value::timestamp_json;
use crate::intercept::{InterceptContext, SaveInterceptor};
use crate::model::capability::{CREATED_AT, CREATED_BY, MODIFIED_AT, MODIFIED_BY};
use crate::session::{ChangeState, PendingChange};
use serde_json::Value as JsonValue;

/// Writes creation stamps on insert and modification stamps on every
/// persisted mutation of auditable entities.
///
/// Updates protect `created_at`/`created_by`, so the values a caller holds
/// in memory can never overwrite the stored creation stamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditInterceptor;

impl SaveInterceptor for AuditInterceptor {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn intercept(
        &self,
        mut changes: Vec<PendingChange>,
        context: &InterceptContext,
    ) -> Vec<PendingChange> {
        let now = timestamp_json(&context.now);
        let user = JsonValue::String(context.user.clone());

        for change in changes
            .iter_mut()
            .filter(|change| change.descriptor.is_auditable())
        {
            match change.state {
                ChangeState::Insert => {
                    change.set_column(CREATED_AT, now.clone());
                    change.set_column(CREATED_BY, user.clone());
                    change.set_column(MODIFIED_AT, now.clone());
                    change.set_column(MODIFIED_BY, user.clone());
                }
                ChangeState::Update => {
                    change.set_column(MODIFIED_AT, now.clone());
                    change.set_column(MODIFIED_BY, user.clone());
                    change.protect(CREATED_AT);
                    change.protect(CREATED_BY);
                }
                ChangeState::Delete => {}
            }
        }
        changes
    }
}
