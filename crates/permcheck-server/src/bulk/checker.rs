//! Bulk checker execution.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use permcheck_domain::check::{
    CheckMetadata, CheckRequest, CheckResult, Checker, Context,
};
use permcheck_domain::model::{Entity, Subject};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, instrument, warn};

use super::types::{
    BulkCheckError, BulkCheckRequest, BulkCheckResult, BulkCheckerConfig, BulkCheckerType,
    ResultCallback,
};
use crate::cursor::ContinuationToken;

/// Builder for [`BulkChecker`].
pub struct BulkCheckerBuilder {
    checker: Arc<dyn Checker>,
    kind: BulkCheckerType,
    token: Option<CancellationToken>,
    callback: Option<ResultCallback>,
    config: BulkCheckerConfig,
}

impl BulkCheckerBuilder {
    /// Cancellation scope of the whole batch. Required.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Receives each allowed id with its continuation token. Required.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_config(mut self, config: BulkCheckerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the checker and starts collecting published requests.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> BulkCheckResult<BulkChecker> {
        let parent = self.token.ok_or_else(|| BulkCheckError::InvalidArgument {
            message: "bulk checker requires a cancellation token".to_string(),
        })?;
        let callback = self.callback.ok_or_else(|| BulkCheckError::InvalidArgument {
            message: "bulk checker requires a result callback".to_string(),
        })?;
        let config = self.config.with_defaults();

        let token = parent.child_token();
        let stop = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(config.buffer_size);
        let collector = tokio::spawn(collect(
            receiver,
            stop.clone(),
            token.clone(),
            config.buffer_size,
        ));

        Ok(BulkChecker {
            kind: self.kind,
            checker: self.checker,
            config,
            token: token.clone(),
            callback,
            sender,
            stop,
            collector,
            _guard: token.drop_guard(),
        })
    }
}

/// Evaluates a published batch of checks with bounded concurrency.
///
/// Dropping the checker without executing it cancels collection.
pub struct BulkChecker {
    kind: BulkCheckerType,
    checker: Arc<dyn Checker>,
    config: BulkCheckerConfig,
    token: CancellationToken,
    callback: ResultCallback,
    sender: mpsc::Sender<BulkCheckRequest>,
    stop: CancellationToken,
    collector: JoinHandle<Vec<BulkCheckRequest>>,
    _guard: DropGuard,
}

impl BulkChecker {
    pub fn builder(checker: Arc<dyn Checker>, kind: BulkCheckerType) -> BulkCheckerBuilder {
        BulkCheckerBuilder {
            checker,
            kind,
            token: None,
            callback: None,
            config: BulkCheckerConfig::default(),
        }
    }

    pub fn kind(&self) -> BulkCheckerType {
        self.kind
    }

    pub fn config(&self) -> &BulkCheckerConfig {
        &self.config
    }

    fn publisher(&self) -> Publisher {
        Publisher {
            sender: self.sender.clone(),
            token: self.token.clone(),
        }
    }

    /// Stops collection, then evaluates the batch in ascending id order.
    ///
    /// At most `page_size` allowed ids are delivered. Cancellation ends the
    /// run early with `Ok(())`; a failed check aborts it with the error.
    /// Ids already delivered stay delivered either way.
    #[instrument(skip(self), fields(kind = ?self.kind))]
    pub async fn execute_requests(self, page_size: u32) -> BulkCheckResult<()> {
        if page_size == 0 {
            return Err(BulkCheckError::InvalidArgument {
                message: "page size must be greater than 0".to_string(),
            });
        }

        let Self {
            kind,
            checker,
            config,
            token,
            callback,
            sender,
            stop,
            collector,
            _guard,
        } = self;

        drop(sender);
        stop.cancel();
        let mut requests = collector.await.map_err(|e| BulkCheckError::Internal {
            message: format!("request collector failed: {e}"),
        })?;
        if requests.is_empty() || token.is_cancelled() {
            return Ok(());
        }

        requests.sort_by(|a, b| kind.key(&a.request).cmp(kind.key(&b.request)));
        let ids = requests
            .iter()
            .map(|r| kind.key(&r.request).to_string())
            .collect();
        let mut emitter = OrderedEmitter::new(ids, page_size, callback);
        debug!(requests = requests.len(), page_size, "executing bulk checks");

        let mut results = stream::iter(requests.into_iter().enumerate())
            .map(|(index, bulk)| {
                let checker = Arc::clone(&checker);
                let token = token.clone();
                async move {
                    let result = match bulk.result {
                        Some(known) => Ok(known),
                        None => checker.check(&token, bulk.request).await.map(|r| r.can),
                    };
                    (index, result)
                }
            })
            .buffer_unordered(config.concurrency_limit);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(delivered = emitter.delivered, "bulk execution cancelled");
                    return Ok(());
                }
                next = results.next() => next,
            };
            let Some((index, result)) = next else {
                break;
            };
            match result {
                Ok(can) => {
                    if emitter.record(index, can) {
                        debug!("page filled");
                        break;
                    }
                }
                // only the batch token ends a run quietly; a check's own timeout is a failure
                Err(e) if token.is_cancelled() => {
                    debug!(error = %e, delivered = emitter.delivered, "bulk execution cancelled");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "bulk check failed");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

async fn collect(
    mut receiver: mpsc::Receiver<BulkCheckRequest>,
    stop: CancellationToken,
    token: CancellationToken,
    capacity: usize,
) -> Vec<BulkCheckRequest> {
    let mut requests = Vec::with_capacity(capacity);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = stop.cancelled() => {
                while let Ok(request) = receiver.try_recv() {
                    requests.push(request);
                }
                break;
            }
            next = receiver.recv() => match next {
                Some(request) => requests.push(request),
                None => break,
            },
        }
    }
    requests
}

/// Releases results in sorted order as the completed prefix grows.
struct OrderedEmitter {
    ids: Vec<String>,
    results: Vec<Option<CheckResult>>,
    next: usize,
    delivered: u32,
    page_size: u32,
    callback: ResultCallback,
}

impl OrderedEmitter {
    fn new(ids: Vec<String>, page_size: u32, callback: ResultCallback) -> Self {
        let results = vec![None; ids.len()];
        Self {
            ids,
            results,
            next: 0,
            delivered: 0,
            page_size,
            callback,
        }
    }

    /// Stores the result at `index`. Returns true once the page is full.
    fn record(&mut self, index: usize, result: CheckResult) -> bool {
        if let Some(slot) = self.results.get_mut(index) {
            *slot = Some(result);
        }
        while self.delivered < self.page_size {
            let Some(Some(result)) = self.results.get(self.next).copied() else {
                break;
            };
            if result.is_allowed() {
                let continuation = self
                    .ids
                    .get(self.next + 1)
                    .map(|id| ContinuationToken::new(id.as_str()).encode())
                    .unwrap_or_default();
                (self.callback)(&self.ids[self.next], &continuation);
                self.delivered += 1;
            }
            self.next += 1;
        }
        self.delivered >= self.page_size
    }
}

#[derive(Clone)]
struct Publisher {
    sender: mpsc::Sender<BulkCheckRequest>,
    token: CancellationToken,
}

impl Publisher {
    async fn send(&self, request: BulkCheckRequest) {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {}
            sent = self.sender.send(request) => {
                if sent.is_err() {
                    debug!("bulk checker stopped collecting, request dropped");
                }
            }
        }
    }
}

/// Publishes entity candidates for one (permission, subject) pair.
#[derive(Clone)]
pub struct BulkEntityPublisher {
    publisher: Publisher,
    tenant_id: String,
    permission: String,
    subject: Subject,
}

impl BulkEntityPublisher {
    pub fn new(
        bulk: &BulkChecker,
        tenant_id: impl Into<String>,
        permission: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            publisher: bulk.publisher(),
            tenant_id: tenant_id.into(),
            permission: permission.into(),
            subject,
        }
    }

    /// Enqueues a check of `entity`. Dropped if the batch was cancelled.
    pub async fn publish(
        &self,
        entity: Entity,
        metadata: CheckMetadata,
        context: Arc<Context>,
        result: Option<CheckResult>,
    ) {
        let mut request = CheckRequest::new(
            self.tenant_id.clone(),
            entity,
            self.permission.clone(),
            self.subject.clone(),
        )
        .with_metadata(metadata);
        request.context = context;
        self.publisher.send(BulkCheckRequest { request, result }).await;
    }
}

/// Publishes subject candidates for one (entity, permission) pair.
#[derive(Clone)]
pub struct BulkSubjectPublisher {
    publisher: Publisher,
    tenant_id: String,
    entity: Entity,
    permission: String,
}

impl BulkSubjectPublisher {
    pub fn new(
        bulk: &BulkChecker,
        tenant_id: impl Into<String>,
        entity: Entity,
        permission: impl Into<String>,
    ) -> Self {
        Self {
            publisher: bulk.publisher(),
            tenant_id: tenant_id.into(),
            entity,
            permission: permission.into(),
        }
    }

    /// Enqueues a check of `subject`. Dropped if the batch was cancelled.
    pub async fn publish(
        &self,
        subject: Subject,
        metadata: CheckMetadata,
        context: Arc<Context>,
        result: Option<CheckResult>,
    ) {
        let mut request = CheckRequest::new(
            self.tenant_id.clone(),
            self.entity.clone(),
            self.permission.clone(),
            subject,
        )
        .with_metadata(metadata);
        request.context = context;
        self.publisher.send(BulkCheckRequest { request, result }).await;
    }
}
