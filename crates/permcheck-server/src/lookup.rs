//! Lookup drivers.
//!
//! `lookup_entity` answers "which entities of a type can this subject reach
//! through a permission", `lookup_subject` answers "which subjects of a type
//! hold a permission on this entity". Both enumerate candidates from a
//! [`CandidateReader`], pin every check to one snapshot and feed the
//! candidates through a [`BulkChecker`].

use std::sync::{Arc, Mutex, PoisonError};

use permcheck_domain::check::{
    CandidateReader, CheckMetadata, CheckResult, Checker, Context, RelationshipReader,
};
use permcheck_domain::model::{Entity, Subject};
use permcheck_domain::{DomainError, DomainResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::bulk::{
    BulkChecker, BulkCheckerConfig, BulkCheckerType, BulkEntityPublisher, BulkSubjectPublisher,
};
use crate::cursor::ContinuationToken;

#[derive(Debug, Clone)]
pub struct LookupEntityRequest {
    pub tenant_id: String,
    pub entity_type: String,
    pub permission: String,
    pub subject: Subject,
    pub metadata: CheckMetadata,
    pub context: Context,
    pub page_size: u32,
    /// Empty for the first page.
    pub continuous_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupEntityResponse {
    pub entity_ids: Vec<String>,
    /// Empty when there is no further page.
    pub continuous_token: String,
}

#[derive(Debug, Clone)]
pub struct LookupSubjectRequest {
    pub tenant_id: String,
    pub entity: Entity,
    pub permission: String,
    pub subject_type: String,
    /// Userset relation of the returned subjects, if any.
    pub subject_relation: Option<String>,
    pub metadata: CheckMetadata,
    pub context: Context,
    pub page_size: u32,
    pub continuous_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupSubjectResponse {
    pub subject_ids: Vec<String>,
    pub continuous_token: String,
}

/// Page collected from bulk checker callbacks.
#[derive(Default)]
struct Page {
    ids: Vec<String>,
    last_token: String,
}

impl Page {
    fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Takes the collected page. The token is only kept for a full page.
    fn finish(page: &Mutex<Self>, page_size: u32) -> (Vec<String>, String) {
        let mut page = page.lock().unwrap_or_else(PoisonError::into_inner);
        let ids = std::mem::take(&mut page.ids);
        let full = u32::try_from(ids.len()).map_or(true, |len| len >= page_size);
        let token = if full {
            std::mem::take(&mut page.last_token)
        } else {
            String::new()
        };
        (ids, token)
    }
}

fn collect_into(page: &Arc<Mutex<Page>>) -> impl Fn(&str, &str) + Send + Sync + 'static {
    let page = Arc::clone(page);
    move |id, continuation| {
        let mut page = page.lock().unwrap_or_else(PoisonError::into_inner);
        page.ids.push(id.to_string());
        page.last_token = continuation.to_string();
    }
}

/// Drives entity and subject lookups.
pub struct LookupEngine<R> {
    checker: Arc<dyn Checker>,
    reader: Arc<R>,
    config: BulkCheckerConfig,
}

impl<R> LookupEngine<R>
where
    R: CandidateReader + RelationshipReader + 'static,
{
    pub fn new(checker: Arc<dyn Checker>, reader: Arc<R>) -> Self {
        Self {
            checker,
            reader,
            config: BulkCheckerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: BulkCheckerConfig) -> Self {
        self.config = config;
        self
    }

    /// Fills an empty snapshot token with the head so every check and the
    /// candidate scan read the same point in time.
    async fn pin_snapshot(&self, tenant_id: &str, metadata: &mut CheckMetadata) -> DomainResult<()> {
        if metadata.snap_token.is_empty() {
            metadata.snap_token = self.reader.head_snapshot(tenant_id).await?;
        }
        Ok(())
    }

    #[instrument(
        skip(self, token, request),
        fields(
            tenant_id = %request.tenant_id,
            entity_type = %request.entity_type,
            permission = %request.permission,
        )
    )]
    pub async fn lookup_entity(
        &self,
        token: &CancellationToken,
        mut request: LookupEntityRequest,
    ) -> DomainResult<LookupEntityResponse> {
        validate_page_size(request.page_size)?;
        let start = ContinuationToken::decode(&request.continuous_token)?;
        self.pin_snapshot(&request.tenant_id, &mut request.metadata)
            .await?;

        let candidates = self
            .reader
            .entity_ids(
                &request.tenant_id,
                &request.entity_type,
                &request.metadata.snap_token,
            )
            .await?;

        let page = Page::shared();
        let bulk = BulkChecker::builder(Arc::clone(&self.checker), BulkCheckerType::Entity)
            .with_token(token.clone())
            .with_callback(collect_into(&page))
            .with_config(self.config)
            .build()?;
        let publisher = BulkEntityPublisher::new(
            &bulk,
            request.tenant_id.as_str(),
            request.permission.as_str(),
            request.subject.clone(),
        );

        let context = Arc::new(request.context);
        let mut published = 0usize;
        for id in resume_from(candidates, start.as_ref()) {
            let entity = Entity::new(request.entity_type.as_str(), id);
            let known = is_subject_itself(&entity, &request.permission, &request.subject)
                .then_some(CheckResult::Allowed);
            publisher
                .publish(entity, request.metadata.clone(), Arc::clone(&context), known)
                .await;
            published += 1;
        }
        debug!(published, "entity candidates published");

        bulk.execute_requests(request.page_size).await?;
        let (entity_ids, continuous_token) = Page::finish(&page, request.page_size);
        Ok(LookupEntityResponse {
            entity_ids,
            continuous_token,
        })
    }

    #[instrument(
        skip(self, token, request),
        fields(
            tenant_id = %request.tenant_id,
            entity = %request.entity,
            permission = %request.permission,
            subject_type = %request.subject_type,
        )
    )]
    pub async fn lookup_subject(
        &self,
        token: &CancellationToken,
        mut request: LookupSubjectRequest,
    ) -> DomainResult<LookupSubjectResponse> {
        validate_page_size(request.page_size)?;
        let start = ContinuationToken::decode(&request.continuous_token)?;
        self.pin_snapshot(&request.tenant_id, &mut request.metadata)
            .await?;

        let candidates = self
            .reader
            .subject_ids(
                &request.tenant_id,
                &request.subject_type,
                &request.metadata.snap_token,
            )
            .await?;

        let page = Page::shared();
        let bulk = BulkChecker::builder(Arc::clone(&self.checker), BulkCheckerType::Subject)
            .with_token(token.clone())
            .with_callback(collect_into(&page))
            .with_config(self.config)
            .build()?;
        let publisher = BulkSubjectPublisher::new(
            &bulk,
            request.tenant_id.as_str(),
            request.entity.clone(),
            request.permission.as_str(),
        );

        let context = Arc::new(request.context);
        for id in resume_from(candidates, start.as_ref()) {
            let subject = match &request.subject_relation {
                Some(relation) => Subject::userset(request.subject_type.as_str(), id, relation.as_str()),
                None => Subject::new(request.subject_type.as_str(), id),
            };
            let known = is_subject_itself(&request.entity, &request.permission, &subject)
                .then_some(CheckResult::Allowed);
            publisher
                .publish(subject, request.metadata.clone(), Arc::clone(&context), known)
                .await;
        }

        bulk.execute_requests(request.page_size).await?;
        let (subject_ids, continuous_token) = Page::finish(&page, request.page_size);
        Ok(LookupSubjectResponse {
            subject_ids,
            continuous_token,
        })
    }
}

fn validate_page_size(page_size: u32) -> DomainResult<()> {
    if page_size == 0 {
        return Err(DomainError::InvalidArgument {
            message: "page size must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Candidates at or after the id the token points at.
fn resume_from(
    candidates: Vec<String>,
    start: Option<&ContinuationToken>,
) -> impl Iterator<Item = String> + '_ {
    candidates
        .into_iter()
        .filter(move |id| start.map_or(true, |token| id.as_str() >= token.next_id.as_str()))
}

/// `group:1#member` always holds `member` on `group:1`.
fn is_subject_itself(entity: &Entity, permission: &str, subject: &Subject) -> bool {
    subject.subject_type == entity.entity_type
        && subject.id == entity.id
        && subject.normalized_relation() == Some(permission)
}
