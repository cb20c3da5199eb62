//! Entity model shared by specifications, sessions and repositories.
//!
//! # Responsibility
//! - Define the entity contract and its static table mapping.
//! - Define opt-in capabilities (audit, soft delete, concurrency token).
//! - Define the paged result envelope.
//!
//! # Invariants
//! - Every entity is identified by a stable key.
//! - Soft-deletable entities are tombstoned, never physically removed.

pub mod capability;
pub mod entity;
pub mod paged;
