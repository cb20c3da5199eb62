//! Creates units of work over one database file.

use crate::config::CoreConfig;
use crate::context::clock::{Clock, SystemClock};
use crate::context::user::{AnonymousUser, CurrentUserProvider};
use crate::db::{open_db, Migration};
use crate::error::RepoResult;
use crate::intercept::InterceptorPipeline;
use crate::uow::UnitOfWork;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Each `create` opens its own connection, so units of work from one
/// factory are independent scopes over the same file.
#[derive(Clone)]
pub struct UnitOfWorkFactory {
    path: PathBuf,
    migrations: Arc<[Migration]>,
    config: CoreConfig,
    clock: Arc<dyn Clock>,
    users: Arc<dyn CurrentUserProvider>,
    pipeline: InterceptorPipeline,
}

impl UnitOfWorkFactory {
    pub fn new(path: impl AsRef<Path>, migrations: Vec<Migration>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            migrations: migrations.into(),
            config: CoreConfig::default(),
            clock: Arc::new(SystemClock),
            users: Arc::new(AnonymousUser),
            pipeline: InterceptorPipeline::standard(),
        }
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_user_provider(mut self, users: Arc<dyn CurrentUserProvider>) -> Self {
        self.users = users;
        self
    }

    pub fn with_interceptors(mut self, pipeline: InterceptorPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn create(&self) -> RepoResult<UnitOfWork> {
        self.create_with_cancellation(&CancellationToken::new())
            .await
    }

    /// The returned unit of work is cancelled together with `parent`.
    pub async fn create_with_cancellation(
        &self,
        parent: &CancellationToken,
    ) -> RepoResult<UnitOfWork> {
        let path = self.path.clone();
        let migrations = Arc::clone(&self.migrations);
        let options = self.config.store_options();
        let conn =
            tokio::task::spawn_blocking(move || open_db(&path, &migrations, &options)).await??;

        Ok(UnitOfWork::builder(conn)
            .config(self.config.clone())
            .clock(Arc::clone(&self.clock))
            .user_provider(Arc::clone(&self.users))
            .interceptors(self.pipeline.clone())
            .cancelled_by(parent)
            .build())
    }
}
