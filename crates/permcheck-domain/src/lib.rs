//! permcheck-domain: Permission check evaluation core
//!
//! This crate contains the relationship-based authorization core:
//! - Entity, subject, tuple and schema rewrite tree types
//! - The check engine and its bounded union/intersection combinators
//! - Memoization of direct relation checks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              permcheck-domain                │
//! ├─────────────────────────────────────────────┤
//! │  model/  - Tuples, subjects, rewrite trees  │
//! │  check/  - Engine, combinators, traits      │
//! │  cache/  - Direct relation memoization      │
//! │  error   - DomainError taxonomy             │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod check;
pub mod error;
pub mod model;

// Re-export commonly used types at the crate root
pub use cache::{CacheKey, CheckCache, CheckCacheConfig, ResultCache};
pub use check::{
    CheckConfig, CheckEngine, CheckOutcomeExt, CheckRequest, CheckResponse, CheckResult, Checker,
};
pub use error::{DomainError, DomainResult};
