//! Unit of work: one session, one transaction, one checkpoint pipeline.
//!
//! # Responsibility
//! - Own the persistence session for a logical scope and hand out typed
//!   repositories over it.
//! - Run interceptors and flush staged changes on `save`.
//! - Drive the transaction state machine and roll back on dispose.
//!
//! # Invariants
//! - At most one transaction is open at a time.
//! - A failed checkpoint leaves the staged changes in place.
//! - A failed commit attempts a rollback and reports the original error.
//! - Dropping a unit of work with an open transaction rolls it back.

use crate::cache::CacheBackend;
use crate::config::CoreConfig;
use crate::context::clock::{Clock, SystemClock};
use crate::context::user::{resolve_user, AnonymousUser, CurrentUserProvider};
use crate::error::{RepoError, RepoResult, TransactionMisuse};
use crate::intercept::{InterceptContext, InterceptorPipeline};
use crate::model::entity::Entity;
use crate::repo::{CachedRepository, SqlRepository};
use crate::session::{PersistenceSession, SqliteSession};
use futures::future::BoxFuture;
use log::{error, info, warn};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod factory;

pub use factory::UnitOfWorkFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Open,
    Committed,
    RolledBack,
}

impl TransactionState {
    fn is_open(self) -> bool {
        self == Self::Open
    }
}

/// Builds a [`UnitOfWork`] over an opened, migrated connection.
pub struct UnitOfWorkBuilder {
    conn: Connection,
    pipeline: InterceptorPipeline,
    clock: Arc<dyn Clock>,
    users: Arc<dyn CurrentUserProvider>,
    config: CoreConfig,
    cancel: CancellationToken,
}

impl UnitOfWorkBuilder {
    pub fn interceptors(mut self, pipeline: InterceptorPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn user_provider(mut self, users: Arc<dyn CurrentUserProvider>) -> Self {
        self.users = users;
        self
    }

    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancels the unit of work whenever `parent` is cancelled.
    pub fn cancelled_by(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn build(self) -> UnitOfWork {
        let session = SqliteSession::new(self.conn, self.cancel.clone());
        UnitOfWork {
            session: Arc::new(session),
            pipeline: self.pipeline,
            clock: self.clock,
            users: self.users,
            config: self.config,
            state: Mutex::new(TransactionState::Idle),
            cancel: self.cancel,
        }
    }
}

/// Coordinates repositories, checkpoints and the transaction of one scope.
///
/// Not meant to be shared across concurrent call sites.
pub struct UnitOfWork {
    session: Arc<dyn PersistenceSession>,
    pipeline: InterceptorPipeline,
    clock: Arc<dyn Clock>,
    users: Arc<dyn CurrentUserProvider>,
    config: CoreConfig,
    state: Mutex<TransactionState>,
    cancel: CancellationToken,
}

impl UnitOfWork {
    /// Standard interceptors, system clock, anonymous user, default config.
    pub fn builder(conn: Connection) -> UnitOfWorkBuilder {
        UnitOfWorkBuilder {
            conn,
            pipeline: InterceptorPipeline::standard(),
            clock: Arc::new(SystemClock),
            users: Arc::new(AnonymousUser),
            config: CoreConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn new(conn: Connection) -> Self {
        Self::builder(conn).build()
    }

    pub fn repository<T: Entity>(&self) -> RepoResult<SqlRepository<T>> {
        SqlRepository::try_new(Arc::clone(&self.session))
    }

    /// Repository behind a read-through cache with the configured TTL.
    pub fn cached_repository<T: Entity>(
        &self,
        backend: Arc<dyn CacheBackend>,
    ) -> RepoResult<CachedRepository<T, SqlRepository<T>>> {
        Ok(CachedRepository::new(self.repository::<T>()?, backend).with_ttl(self.config.cache_ttl()))
    }

    /// Fails with `MissingRequiredTable`/`MissingRequiredColumn` when the
    /// store does not match `T`'s mapping.
    pub async fn verify_schema<T: Entity>(&self) -> RepoResult<()> {
        T::descriptor().validate()?;
        self.session.verify_schema(T::descriptor()).await
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn transaction_state(&self) -> TransactionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn has_changes(&self) -> bool {
        self.session.pending_count() > 0
    }

    pub fn pending_changes(&self) -> usize {
        self.session.pending_count()
    }

    /// Drops every staged change; returns how many were dropped.
    pub fn discard_changes(&self) -> usize {
        let discarded = self.session.discard_pending();
        if discarded > 0 {
            info!("event=uow_discard module=uow status=ok changes={discarded}");
        }
        discarded
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Checkpoint: runs interceptors over the staged changes and flushes them
    /// atomically. Returns the number of rows written.
    ///
    /// On failure the changes stay staged as the caller left them, except
    /// after [`RepoError::CommitOutcomeUnknown`]: the flush may have landed,
    /// so the changes are dropped and a plain retry cannot apply them twice.
    /// Re-read before staging them again.
    pub async fn save(&self) -> RepoResult<usize> {
        if self.cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        let staged = self.session.take_pending();
        if staged.is_empty() {
            return Ok(0);
        }

        let started_at = Instant::now();
        let context = InterceptContext {
            now: self.clock.utc_now(),
            user: resolve_user(self.users.as_ref(), &self.config.system_user),
        };
        let changes = self.pipeline.apply(staged.clone(), &context);

        match self.session.flush(&changes).await {
            Ok(written) => {
                info!(
                    "event=uow_save module=uow status=ok changes={} rows={} duration_ms={}",
                    changes.len(),
                    written,
                    started_at.elapsed().as_millis()
                );
                Ok(written)
            }
            Err(err) => {
                error!(
                    "event=uow_save module=uow status=error changes={} duration_ms={} error={}",
                    changes.len(),
                    started_at.elapsed().as_millis(),
                    err
                );
                if !matches!(err, RepoError::CommitOutcomeUnknown) {
                    self.session.restore_pending(staged);
                }
                Err(err)
            }
        }
    }

    pub async fn begin_transaction(&self) -> RepoResult<()> {
        if self.transaction_state().is_open() {
            return Err(RepoError::Transaction(TransactionMisuse::AlreadyOpen));
        }
        self.session.begin().await?;
        self.set_state(TransactionState::Open);
        info!("event=uow_begin module=uow status=ok");
        Ok(())
    }

    /// Final checkpoint plus store commit.
    ///
    /// When either step fails the transaction is rolled back and the
    /// original error is returned.
    pub async fn commit(&self) -> RepoResult<()> {
        if !self.transaction_state().is_open() {
            return Err(RepoError::Transaction(TransactionMisuse::NotOpen));
        }

        let outcome = match self.save().await {
            Ok(_) => self.session.commit().await,
            Err(err) => Err(err),
        };
        match outcome {
            Ok(()) => {
                self.set_state(TransactionState::Committed);
                info!("event=uow_commit module=uow status=ok");
                Ok(())
            }
            Err(err) => {
                warn!("event=uow_commit module=uow status=error error={err}");
                if let Err(rollback_err) = self.session.rollback().await {
                    error!(
                        "event=uow_commit module=uow status=rollback_failed error={rollback_err}"
                    );
                }
                self.set_state(TransactionState::RolledBack);
                Err(err)
            }
        }
    }

    /// Discards the store transaction. Staged changes are kept.
    pub async fn rollback(&self) -> RepoResult<()> {
        if !self.transaction_state().is_open() {
            return Err(RepoError::Transaction(TransactionMisuse::NotOpen));
        }
        let result = self.session.rollback().await;
        self.set_state(TransactionState::RolledBack);
        result
    }

    /// Runs `work` inside a transaction: commit on `Ok`, rollback on `Err`.
    pub async fn in_transaction<R, F>(&self, work: F) -> RepoResult<R>
    where
        F: for<'a> FnOnce(&'a UnitOfWork) -> BoxFuture<'a, RepoResult<R>>,
    {
        self.begin_transaction().await?;
        match work(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if self.transaction_state().is_open() {
                    if let Err(rollback_err) = self.rollback().await {
                        error!(
                            "event=uow_in_transaction module=uow status=rollback_failed error={rollback_err}"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Ends the scope, rolling back an open transaction.
    pub async fn dispose(self) -> RepoResult<()> {
        if self.transaction_state().is_open() {
            self.rollback().await?;
        }
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.transaction_state().is_open() {
            return;
        }
        warn!("event=uow_drop module=uow status=rollback reason=open_transaction");
        if let Err(err) = self.session.rollback_blocking() {
            error!("event=uow_drop module=uow status=error error={err}");
        }
        self.set_state(TransactionState::RolledBack);
    }
}
