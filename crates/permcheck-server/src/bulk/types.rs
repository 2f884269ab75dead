//! Bulk checker types.

use std::sync::Arc;

use permcheck_domain::check::{CheckRequest, CheckResult};
use permcheck_domain::DomainError;
use thiserror::Error;

/// Which side of the request a bulk checker varies, and sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCheckerType {
    /// Requests differ by entity; ordered by entity id.
    Entity,
    /// Requests differ by subject; ordered by subject id.
    Subject,
}

impl BulkCheckerType {
    /// The id this kind of checker orders and reports by.
    pub fn key<'a>(&self, request: &'a CheckRequest) -> &'a str {
        match self {
            Self::Entity => &request.entity.id,
            Self::Subject => &request.subject.id,
        }
    }
}

/// Configuration for the bulk checker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkCheckerConfig {
    /// Maximum checks in flight at once.
    pub concurrency_limit: usize,
    /// Capacity of the publish channel.
    pub buffer_size: usize,
}

impl Default for BulkCheckerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            buffer_size: 1000,
        }
    }
}

impl BulkCheckerConfig {
    /// Replaces unset (zero) fields with their defaults.
    pub fn with_defaults(self) -> Self {
        let defaults = Self::default();
        Self {
            concurrency_limit: if self.concurrency_limit == 0 {
                defaults.concurrency_limit
            } else {
                self.concurrency_limit
            },
            buffer_size: if self.buffer_size == 0 {
                defaults.buffer_size
            } else {
                self.buffer_size
            },
        }
    }
}

/// One published check. A known result skips evaluation.
#[derive(Debug, Clone)]
pub struct BulkCheckRequest {
    pub request: CheckRequest,
    pub result: Option<CheckResult>,
}

/// Receives `(id, continuation_token)` for every allowed request.
pub type ResultCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Errors from building or running a bulk checker.
#[derive(Debug, Error)]
pub enum BulkCheckError {
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A check failed; the rest of the batch was abandoned.
    #[error("bulk execution failed: {0}")]
    Check(#[from] DomainError),

    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Result type for bulk operations.
pub type BulkCheckResult<T> = Result<T, BulkCheckError>;

impl From<BulkCheckError> for DomainError {
    fn from(err: BulkCheckError) -> Self {
        match err {
            BulkCheckError::InvalidArgument { message } => DomainError::InvalidArgument { message },
            BulkCheckError::Check(inner) => inner,
            BulkCheckError::Internal { message } => DomainError::Internal { message },
        }
    }
}
