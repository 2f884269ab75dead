//! Permission check evaluation.
//!
//! [`CheckEngine`] implements [`Checker`] over a [`SchemaReader`] and a
//! [`RelationshipReader`]. Sub-checks fan out through the bounded
//! [`union`] and [`intersection`] combinators.

mod combinator;
mod config;
mod engine;
mod node;
mod traits;
mod types;

#[cfg(test)]
mod tests;

pub use combinator::{intersection, union, BoxFuture, Evaluation};
pub use config::{CheckConfig, DEFAULT_DEPTH};
pub use engine::{CacheMetrics, CacheMetricsSnapshot, CheckEngine};
pub use traits::{
    CandidateReader, Checker, RelationshipReader, RuleCall, RuleEvaluator, SchemaReader, TupleStream,
};
pub use types::{
    CheckMetadata, CheckOutcomeExt, CheckRequest, CheckResponse, CheckResult, Context,
    ResponseMetadata,
};
