//! Repository-level error taxonomy.
//!
//! # Responsibility
//! - Give callers one error type for every repository, session, cache and
//!   unit-of-work operation.
//! - Keep the kinds distinguishable: a store failure is never reported as a
//!   concurrency conflict, and an ambiguous commit is never reported as a
//!   plain cancellation.
//!
//! # Invariants
//! - `Validation` and `Mapping` are raised before any store round-trip.
//! - `Store` wraps the underlying SQLite error unchanged.

use crate::db::DbError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Misuse of the unit-of-work transaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMisuse {
    /// `begin_transaction` while a transaction is already open.
    AlreadyOpen,
    /// `commit`/`rollback` with no open transaction.
    NotOpen,
}

#[derive(Debug)]
pub enum RepoError {
    NotFound {
        entity: &'static str,
        key: String,
    },
    Concurrency {
        entity: &'static str,
        key: String,
    },
    MultipleMatches {
        entity: &'static str,
        count: usize,
    },
    Validation(String),
    Mapping(String),
    Transaction(TransactionMisuse),
    Store(DbError),
    Cancelled,
    /// Cancellation raced a commit that had already been issued; the store
    /// may or may not have applied it.
    CommitOutcomeUnknown,
    InvalidData(String),
    Serialization(serde_json::Error),
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    Runtime(String),
}

impl RepoError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn mapping(message: impl Into<String>) -> Self {
        Self::Mapping(message.into())
    }

    /// Returns whether the caller has to re-read the store to learn the
    /// outcome of the failed operation.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, Self::CommitOutcomeUnknown)
    }

    /// Returns whether the error is a stale concurrency token.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, key } => write!(f, "{entity} not found: {key}"),
            Self::Concurrency { entity, key } => write!(
                f,
                "{entity} {key} was modified or deleted since it was read"
            ),
            Self::MultipleMatches { entity, count } => write!(
                f,
                "expected at most one {entity} but the specification matched {count}"
            ),
            Self::Validation(message) => write!(f, "validation failed: {message}"),
            Self::Mapping(message) => write!(f, "mapping failed: {message}"),
            Self::Transaction(TransactionMisuse::AlreadyOpen) => {
                write!(f, "a transaction is already open on this unit of work")
            }
            Self::Transaction(TransactionMisuse::NotOpen) => {
                write!(f, "no transaction is open on this unit of work")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::CommitOutcomeUnknown => write!(
                f,
                "operation cancelled after the commit was issued; outcome unknown"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Serialization(err) => write!(f, "serialization failed: {err}"),
            Self::MissingRequiredTable(table) => {
                write!(f, "required table `{table}` is missing")
            }
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "required column `{table}.{column}` is missing")
            }
            Self::Runtime(message) => write!(f, "runtime failure: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Store(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

impl From<tokio::task::JoinError> for RepoError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Runtime(format!("blocking store task failed: {value}"))
    }
}
