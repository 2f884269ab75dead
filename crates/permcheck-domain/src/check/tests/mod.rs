//! Tests for the check engine.
//!
//! Organized by functionality:
//! - Direct relations and userset indirection
//! - Rewrite trees (union, intersection, exclusion, tuple-to-userset)
//! - Contextual data, attributes and rule calls
//! - Memoization
//! - Safety (depth, cancellation, timeouts, malformed schemas)

mod mocks;
