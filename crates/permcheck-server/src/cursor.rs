//! Continuation tokens for paginated lookups.
//!
//! A token carries the id the next page starts at, encoded as standard
//! base64 so callers treat it as opaque.

use base64::{engine::general_purpose::STANDARD, Engine};
use permcheck_domain::{DomainError, DomainResult};

/// The id a paginated lookup resumes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken {
    pub next_id: String,
}

impl ContinuationToken {
    pub fn new(next_id: impl Into<String>) -> Self {
        Self {
            next_id: next_id.into(),
        }
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(self.next_id.as_bytes())
    }

    /// Decodes a token produced by [`ContinuationToken::encode`].
    ///
    /// An empty string decodes to `None` (first page).
    pub fn decode(encoded: &str) -> DomainResult<Option<Self>> {
        if encoded.is_empty() {
            return Ok(None);
        }
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| DomainError::InvalidArgument {
                message: format!("malformed continuation token: {e}"),
            })?;
        let next_id = String::from_utf8(bytes).map_err(|_| DomainError::InvalidArgument {
            message: "continuation token is not valid UTF-8".to_string(),
        })?;
        Ok(Some(Self { next_id }))
    }
}
