//! Storage error types.

use permcheck_domain::DomainError;
use thiserror::Error;

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No schema has been written for the tenant.
    #[error("no schema for tenant: {tenant_id}")]
    SchemaNotFound { tenant_id: String },

    /// The schema version does not exist.
    #[error("schema version not found: tenant '{tenant_id}', version '{version}'")]
    VersionNotFound { tenant_id: String, version: String },

    /// The schema version exists but has no such entity type.
    #[error("entity type '{entity_type}' not defined in version '{version}'")]
    EntityTypeNotFound { entity_type: String, version: String },

    /// A schema version was written twice.
    #[error("schema version already exists: {version}")]
    VersionAlreadyExists { version: String },

    /// Snapshot token is not one this store issued.
    #[error("invalid snapshot token: {token}")]
    InvalidSnapshot { token: String },

    /// Invalid input error.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
}

impl From<StorageError> for DomainError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::VersionNotFound { tenant_id, version } => {
                DomainError::SchemaNotFound { tenant_id, version }
            }
            StorageError::SchemaNotFound { tenant_id } => DomainError::SchemaNotFound {
                tenant_id,
                version: String::new(),
            },
            StorageError::EntityTypeNotFound { entity_type, .. } => {
                DomainError::ReferenceNotFound {
                    name: entity_type.clone(),
                    entity_type,
                }
            }
            other => DomainError::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
