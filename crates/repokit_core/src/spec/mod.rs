//! Specification-based querying.
//!
//! # Responsibility
//! - Describe queries as composable values ([`Specification`]).
//! - Resolve include paths and turn specifications into executable
//!   [`Query`] values.

pub mod evaluator;
pub mod filter;
pub mod include;
pub mod specification;

pub use evaluator::{Query, SpecificationEvaluator};
pub use filter::{field, CompareOp, FieldRef, Filter, FilterValue};
pub use include::{IncludeNode, IncludeTree};
pub use specification::{GroupedInclude, OrderSpec, Paging, SortDirection, Specification};
