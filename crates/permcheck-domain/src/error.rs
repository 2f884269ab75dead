//! Domain error types for permission check evaluation.

use thiserror::Error;

/// Domain-specific errors for permission check evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// No schema is published for the tenant at the requested version.
    #[error("schema not found: tenant '{tenant_id}', version '{version}'")]
    SchemaNotFound { tenant_id: String, version: String },

    /// Entity type or one of its relations/permissions/attributes is unknown.
    #[error("reference '{name}' not found on entity type '{entity_type}'")]
    ReferenceNotFound { entity_type: String, name: String },

    /// A rewrite tree child is neither a rewrite nor a recognised leaf.
    #[error("undefined child kind in permission '{permission}'")]
    UndefinedChildKind { permission: String },

    /// A rewrite node carries an operation other than union or intersection.
    #[error("undefined rewrite type in permission '{permission}'")]
    UndefinedChildType { permission: String },

    /// Recursion budget exhausted.
    #[error("depth limit exceeded")]
    DepthExceeded,

    /// The caller's execution context was cancelled.
    #[error("check cancelled")]
    Cancelled,

    /// The top-level deadline expired.
    #[error("timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Failure reported by a schema or relationship collaborator.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Failure evaluating a rule call or a non-boolean attribute.
    #[error("rule evaluation error: {message}")]
    RuleEvaluation { message: String },

    /// Bad argument or configuration.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Unexpected runtime failure, such as a panicked evaluation task.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DomainError {
    /// True for outcomes caused by cancellation or deadline expiry rather
    /// than by the data or schema.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DomainError::Cancelled | DomainError::Timeout { .. })
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
