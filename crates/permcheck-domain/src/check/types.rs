//! Request and response types for permission checks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainResult;
use crate::model::{Attribute, Entity, Subject, Tuple};

use super::config::DEFAULT_DEPTH;

/// Per-call evaluation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMetadata {
    /// Point-in-time marker for every read. Empty means "use the head".
    pub snap_token: String,
    /// Schema version. Empty means "use the head".
    pub schema_version: String,
    /// Remaining recursion budget.
    pub depth: u32,
    /// Invert the final result of this call.
    pub exclusion: bool,
}

impl Default for CheckMetadata {
    fn default() -> Self {
        Self {
            snap_token: String::new(),
            schema_version: String::new(),
            depth: DEFAULT_DEPTH,
            exclusion: false,
        }
    }
}

impl CheckMetadata {
    /// Metadata for a recursive hop: one less depth, no exclusion.
    pub fn descend(&self) -> Self {
        Self {
            snap_token: self.snap_token.clone(),
            schema_version: self.schema_version.clone(),
            depth: self.depth.saturating_sub(1),
            exclusion: false,
        }
    }
}

/// Contextual data supplied inline with a request. It overlays stored data
/// for this call only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    pub tuples: Vec<Tuple>,
    pub attributes: Vec<Attribute>,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty() && self.attributes.is_empty()
    }

    /// Contextual value of `name` on `entity`, if one was supplied.
    pub fn attribute(&self, entity: &Entity, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.entity == *entity && a.name == name)
    }
}

/// A permission check request.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub tenant_id: String,
    pub entity: Entity,
    /// Relation, permission or boolean attribute name.
    pub permission: String,
    pub subject: Subject,
    pub metadata: CheckMetadata,
    /// Shared across every sub-request of the call.
    pub context: Arc<Context>,
}

impl CheckRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        entity: Entity,
        permission: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity,
            permission: permission.into(),
            subject,
            metadata: CheckMetadata::default(),
            context: Arc::new(Context::default()),
        }
    }

    pub fn with_metadata(mut self, metadata: CheckMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.metadata.depth = depth;
        self
    }

    pub fn with_snap_token(mut self, snap_token: impl Into<String>) -> Self {
        self.metadata.snap_token = snap_token.into();
        self
    }

    pub fn with_exclusion(mut self, exclusion: bool) -> Self {
        self.metadata.exclusion = exclusion;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Builds the request for one recursive hop from this one.
    pub fn sub_request(
        &self,
        entity: Entity,
        permission: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            tenant_id: self.tenant_id.clone(),
            entity,
            permission: permission.into(),
            subject,
            metadata: self.metadata.descend(),
            context: Arc::clone(&self.context),
        }
    }

    /// True when the subject is the userset being asked about, e.g.
    /// `group:1#member` checked for `member` on `group:1`.
    pub fn is_self_reference(&self) -> bool {
        self.subject.subject_type == self.entity.entity_type
            && self.subject.id == self.entity.id
            && self.subject.normalized_relation() == Some(self.permission.as_str())
    }
}

/// Outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckResult {
    Allowed,
    Denied,
}

impl CheckResult {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            CheckResult::Allowed
        } else {
            CheckResult::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        self == CheckResult::Allowed
    }

    pub fn invert(self) -> Self {
        match self {
            CheckResult::Allowed => CheckResult::Denied,
            CheckResult::Denied => CheckResult::Allowed,
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckResult::Allowed => f.write_str("ALLOWED"),
            CheckResult::Denied => f.write_str("DENIED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    /// Relation-level evaluations not served by the cache.
    pub check_count: u32,
}

/// Result of a check plus cost accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResponse {
    pub can: CheckResult,
    pub metadata: ResponseMetadata,
}

impl CheckResponse {
    pub fn new(can: CheckResult, check_count: u32) -> Self {
        Self {
            can,
            metadata: ResponseMetadata { check_count },
        }
    }

    pub fn allowed(check_count: u32) -> Self {
        Self::new(CheckResult::Allowed, check_count)
    }

    pub fn denied(check_count: u32) -> Self {
        Self::new(CheckResult::Denied, check_count)
    }

    pub fn inverted(self) -> Self {
        Self::new(self.can.invert(), self.metadata.check_count)
    }

    /// Applies an exclusion flag.
    pub fn excluded_if(self, exclusion: bool) -> Self {
        if exclusion {
            self.inverted()
        } else {
            self
        }
    }

    pub fn with_added_checks(self, count: u32) -> Self {
        Self::new(self.can, self.metadata.check_count.saturating_add(count))
    }
}

/// Reads any check outcome as a result, failed checks being `Denied`.
pub trait CheckOutcomeExt {
    fn can(&self) -> CheckResult;
}

impl CheckOutcomeExt for DomainResult<CheckResponse> {
    fn can(&self) -> CheckResult {
        match self {
            Ok(response) => response.can,
            Err(_) => CheckResult::Denied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;

    #[test]
    fn test_descend_decrements_depth_and_clears_exclusion() {
        let metadata = CheckMetadata {
            snap_token: "7".to_string(),
            schema_version: "v1".to_string(),
            depth: 3,
            exclusion: true,
        };

        let next = metadata.descend();

        assert_eq!(next.depth, 2);
        assert!(!next.exclusion);
        assert_eq!(next.snap_token, "7");
        assert_eq!(CheckMetadata { depth: 0, ..metadata }.descend().depth, 0);
    }

    #[test]
    fn test_failed_outcome_reads_as_denied() {
        let failed: DomainResult<CheckResponse> = Err(DomainError::DepthExceeded);
        let allowed: DomainResult<CheckResponse> = Ok(CheckResponse::allowed(1));

        assert_eq!(failed.can(), CheckResult::Denied);
        assert_eq!(allowed.can(), CheckResult::Allowed);
    }

    #[test]
    fn test_self_reference_detection() {
        let request = CheckRequest::new(
            "t1",
            Entity::new("group", "1"),
            "member",
            Subject::userset("group", "1", "member"),
        );
        assert!(request.is_self_reference());

        let other = CheckRequest::new(
            "t1",
            Entity::new("group", "1"),
            "member",
            Subject::new("group", "1"),
        );
        assert!(!other.is_self_reference());
    }
}
