//! Pre-checkpoint rewriting of staged changes.
//!
//! # Responsibility
//! - Give audit stamping and soft delete one explicit place to run: after
//!   the caller stages changes and before the session flushes them.
//!
//! # Invariants
//! - Interceptors never fail a checkpoint and never touch the store.
//! - The standard pipeline runs soft delete before audit, so a soft delete
//!   is stamped as a modification.

use crate::session::PendingChange;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod audit;
pub mod soft_delete;

pub use audit::AuditInterceptor;
pub use soft_delete::SoftDeleteInterceptor;

/// Values shared by every interceptor of one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptContext {
    pub now: DateTime<Utc>,
    /// Resolved identity; never empty.
    pub user: String,
}

pub trait SaveInterceptor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the rewritten change set.
    fn intercept(&self, changes: Vec<PendingChange>, context: &InterceptContext)
        -> Vec<PendingChange>;
}

/// Ordered interceptor chain.
#[derive(Clone, Default)]
pub struct InterceptorPipeline {
    interceptors: Vec<Arc<dyn SaveInterceptor>>,
}

impl InterceptorPipeline {
    /// Empty pipeline; changes flush exactly as staged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft delete, then audit.
    pub fn standard() -> Self {
        Self::new()
            .with(SoftDeleteInterceptor)
            .with(AuditInterceptor)
    }

    pub fn with(mut self, interceptor: impl SaveInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors
            .iter()
            .map(|interceptor| interceptor.name())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn apply(
        &self,
        changes: Vec<PendingChange>,
        context: &InterceptContext,
    ) -> Vec<PendingChange> {
        self.interceptors
            .iter()
            .fold(changes, |changes, interceptor| {
                interceptor.intercept(changes, context)
            })
    }
}

impl std::fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("interceptors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{InterceptContext, InterceptorPipeline};
    use crate::model::entity::{Column, EntityDescriptor, Record};
    use crate::session::{ChangeState, PendingChange};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    static ENTRY: EntityDescriptor = EntityDescriptor::new("Entry", "entries", Column::integer("id"))
        .auditable()
        .soft_deletable();

    fn context() -> InterceptContext {
        InterceptContext {
            now: Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
            user: "ada".to_string(),
        }
    }

    #[test]
    fn standard_pipeline_stamps_soft_deletes_as_modifications() {
        let pipeline = InterceptorPipeline::standard();
        assert_eq!(pipeline.names(), vec!["soft_delete", "audit"]);

        let mut record = Record::new();
        record.insert("id".to_string(), json!(1));
        let changes = pipeline.apply(vec![PendingChange::delete(&ENTRY, record)], &context());

        let change = &changes[0];
        assert_eq!(change.state, ChangeState::Update);
        assert_eq!(change.origin, ChangeState::Delete);
        assert_eq!(change.record["is_deleted"], json!(true));
        assert_eq!(change.record["modified_by"], json!("ada"));
        assert!(change.is_protected("created_at"));
    }

    #[test]
    fn empty_pipeline_passes_changes_through() {
        let mut record = Record::new();
        record.insert("id".to_string(), json!(1));
        let changes =
            InterceptorPipeline::new().apply(vec![PendingChange::delete(&ENTRY, record)], &context());
        assert_eq!(changes[0].state, ChangeState::Delete);
    }
}
