//! Generic data-access layer over SQLite.
//!
//! Repositories evaluate specifications into parameterized SQL, stage
//! mutations on a unit of work and flush them in atomic checkpoints that
//! stamp audit fields, tombstone soft deletes and check row versions.

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod intercept;
pub mod logging;
pub mod model;
pub mod repo;
pub mod session;
pub mod spec;
pub mod uow;

pub use cache::{CacheBackend, JsonCodec, MemoryCache, PayloadCodec};
pub use config::{ConfigError, CoreConfig};
pub use context::{
    AnonymousUser, Clock, CurrentUserProvider, FixedUser, ManualClock, SystemClock, SYSTEM_USER,
};
pub use db::{open_db, open_db_in_memory, DbError, Migration, StoreOptions};
pub use error::{RepoError, RepoResult, TransactionMisuse};
pub use intercept::{
    AuditInterceptor, InterceptContext, InterceptorPipeline, SaveInterceptor,
    SoftDeleteInterceptor,
};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingOptions};
pub use model::capability::{AuditStamp, Tombstone};
pub use model::entity::{Column, ColumnKind, Entity, EntityDescriptor, Navigation, Record};
pub use model::paged::PagedResult;
pub use repo::{
    CacheKey, CachedRepository, Grouping, NoopRepository, ReadRepository, Repository,
    SqlRepository,
};
pub use spec::{field, Filter, FilterValue, Paging, SortDirection, Specification};
pub use uow::{TransactionState, UnitOfWork, UnitOfWorkFactory};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
