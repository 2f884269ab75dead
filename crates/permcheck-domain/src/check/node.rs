//! Deferred evaluations: one [`CheckNode`] per rewrite tree node or
//! userset hop.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{DomainError, DomainResult};

use super::combinator::{intersection, union, BoxFuture, Evaluation};
use super::engine::CheckEngine;
use super::traits::{RelationshipReader, SchemaReader};
use super::types::{CheckRequest, CheckResponse};

pub(crate) enum NodeKind<S, D> {
    /// Evaluate the node's request itself (userset indirection and
    /// tuple-to-userset targets).
    Invoke,
    ComputedUserSet {
        relation: String,
    },
    TupleToUserSet {
        tupleset: String,
        computed: String,
    },
    Call {
        rule_name: String,
        arguments: Vec<String>,
    },
    Union(Vec<CheckNode<S, D>>),
    Intersection(Vec<CheckNode<S, D>>),
    /// Malformed tree node.
    Fail(DomainError),
}

pub(crate) struct CheckNode<S, D> {
    engine: CheckEngine<S, D>,
    request: Arc<CheckRequest>,
    kind: NodeKind<S, D>,
    exclusion: bool,
}

impl<S, D> CheckNode<S, D>
where
    S: SchemaReader + 'static,
    D: RelationshipReader + 'static,
{
    pub(crate) fn new(
        engine: CheckEngine<S, D>,
        request: Arc<CheckRequest>,
        kind: NodeKind<S, D>,
        exclusion: bool,
    ) -> Self {
        Self {
            engine,
            request,
            kind,
            exclusion,
        }
    }

    pub(crate) fn invoke(engine: CheckEngine<S, D>, request: CheckRequest) -> Self {
        Self::new(engine, Arc::new(request), NodeKind::Invoke, false)
    }

    async fn evaluate_kind(self, token: CancellationToken) -> DomainResult<CheckResponse> {
        let limit = self.engine.config().concurrency_limit;
        let request = self.request;
        match self.kind {
            NodeKind::Invoke => {
                let request = Arc::try_unwrap(request).unwrap_or_else(|r| (*r).clone());
                self.engine.invoke(token.child_token(), request).await
            }
            NodeKind::ComputedUserSet { relation } => {
                let sub = request.sub_request(
                    request.entity.clone(),
                    relation,
                    request.subject.clone(),
                );
                self.engine.invoke(token.child_token(), sub).await
            }
            NodeKind::TupleToUserSet { tupleset, computed } => {
                self.engine
                    .check_tuple_to_userset(&token, &request, &tupleset, &computed)
                    .await
            }
            NodeKind::Call {
                rule_name,
                arguments,
            } => {
                self.engine
                    .check_call(&token, &request, &rule_name, &arguments)
                    .await
            }
            NodeKind::Union(children) => union(&token, children, limit).await,
            NodeKind::Intersection(children) => intersection(&token, children, limit).await,
            NodeKind::Fail(err) => Err(err),
        }
    }
}

impl<S, D> Evaluation for CheckNode<S, D>
where
    S: SchemaReader + 'static,
    D: RelationshipReader + 'static,
{
    fn evaluate(self, token: CancellationToken) -> BoxFuture<'static, DomainResult<CheckResponse>> {
        Box::pin(async move {
            let exclusion = self.exclusion;
            Ok(self.evaluate_kind(token).await?.excluded_if(exclusion))
        })
    }
}
