//! Bounded fan-out over deferred evaluations, with union and intersection
//! reducers.
//!
//! # Lifecycle of one combinator call
//!
//! ```text
//!  caller ──child token──► supervisor ──permit──► worker 1 ─┐
//!    ▲                        │        ──permit──► worker 2 ─┤ results
//!    │                        │           ...                │ (capacity N)
//!    └────────────── rx ◄─────┴──────────────────────────────┘
//! ```
//!
//! The result queue holds exactly N entries, so a worker never blocks on
//! send even after the caller stopped reading. Whatever the exit path, the
//! caller cancels the child token, awaits the supervisor (which joins every
//! admitted worker) and drains the queue before returning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{DomainError, DomainResult};

use super::types::{CheckResponse, CheckResult};

/// Boxed future used for recursive evaluation.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A deferred, cancellable sub-check.
pub trait Evaluation: Send + 'static {
    fn evaluate(self, token: CancellationToken) -> BoxFuture<'static, DomainResult<CheckResponse>>;
}

impl<F> Evaluation for F
where
    F: FnOnce(CancellationToken) -> BoxFuture<'static, DomainResult<CheckResponse>>
        + Send
        + 'static,
{
    fn evaluate(self, token: CancellationToken) -> BoxFuture<'static, DomainResult<CheckResponse>> {
        self(token)
    }
}

#[derive(Debug, Clone, Copy)]
enum Reducer {
    Union,
    Intersection,
}

impl Reducer {
    /// Result for an empty input, or for an input with no decisive child.
    fn identity(self) -> CheckResult {
        match self {
            Reducer::Union => CheckResult::Denied,
            Reducer::Intersection => CheckResult::Allowed,
        }
    }

    /// Result that ends the call as soon as one child reports it.
    fn decisive(self) -> CheckResult {
        self.identity().invert()
    }
}

/// Allowed as soon as any evaluation is allowed.
///
/// The first error wins. An empty input is `Denied`.
pub async fn union<E: Evaluation>(
    token: &CancellationToken,
    evaluations: Vec<E>,
    limit: usize,
) -> DomainResult<CheckResponse> {
    combine(token, evaluations, limit, Reducer::Union).await
}

/// Denied as soon as any evaluation is denied.
///
/// The first error wins. An empty input is `Allowed`.
pub async fn intersection<E: Evaluation>(
    token: &CancellationToken,
    evaluations: Vec<E>,
    limit: usize,
) -> DomainResult<CheckResponse> {
    combine(token, evaluations, limit, Reducer::Intersection).await
}

async fn combine<E: Evaluation>(
    token: &CancellationToken,
    evaluations: Vec<E>,
    limit: usize,
    reducer: Reducer,
) -> DomainResult<CheckResponse> {
    let total = evaluations.len();
    if total == 0 {
        return Ok(CheckResponse::new(reducer.identity(), 0));
    }

    let child = token.child_token();
    // Cancels the workers if this future is dropped mid-flight.
    let _guard = child.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel(total);
    let runner = run(child.clone(), evaluations, limit, tx);

    let mut received = 0;
    let mut check_count = 0u32;
    let outcome = loop {
        if received == total {
            break Ok(CheckResponse::new(reducer.identity(), check_count));
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break Err(DomainError::Cancelled),
            next = rx.recv() => match next {
                Some(Ok(response)) => {
                    received += 1;
                    check_count = check_count.saturating_add(response.metadata.check_count);
                    if response.can == reducer.decisive() {
                        break Ok(CheckResponse::new(response.can, check_count));
                    }
                }
                Some(Err(err)) => break Err(err),
                // The supervisor stopped admitting work before every
                // evaluation ran, which only happens on cancellation.
                None => break Err(DomainError::Cancelled),
            },
        }
    };

    child.cancel();
    if let Err(err) = runner.await {
        warn!(error = %err, "combinator supervisor terminated abnormally");
    }
    rx.close();
    while rx.try_recv().is_ok() {}

    outcome
}

/// Spawns the supervisor: admits evaluations through a gate of `limit`
/// permits until all are admitted or `token` is cancelled, then joins every
/// admitted worker.
fn run<E: Evaluation>(
    token: CancellationToken,
    evaluations: Vec<E>,
    limit: usize,
    tx: mpsc::Sender<DomainResult<CheckResponse>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let gate = Arc::new(Semaphore::new(limit.max(1)));
        let mut workers = JoinSet::new();

        for evaluation in evaluations {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = Arc::clone(&gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let tx = tx.clone();
            let token = token.clone();
            workers.spawn(async move {
                let result = evaluation.evaluate(token).await;
                // Capacity equals the number of evaluations.
                let _ = tx.try_send(result);
                drop(permit);
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                if err.is_panic() {
                    let _ = tx.try_send(Err(DomainError::Internal {
                        message: "check evaluation panicked".to_string(),
                    }));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fixed(result: DomainResult<CheckResponse>) -> impl Evaluation {
        move |_token: CancellationToken| -> BoxFuture<'static, DomainResult<CheckResponse>> {
            Box::pin(async move { result })
        }
    }

    fn allowed() -> impl Evaluation {
        fixed(Ok(CheckResponse::allowed(1)))
    }

    fn denied() -> impl Evaluation {
        fixed(Ok(CheckResponse::denied(1)))
    }

    /// Never completes on its own; finishes when its token is cancelled.
    fn pending() -> impl Evaluation {
        |token: CancellationToken| -> BoxFuture<'static, DomainResult<CheckResponse>> {
            Box::pin(async move {
                token.cancelled().await;
                Err(DomainError::Cancelled)
            })
        }
    }

    /// Tracks how many evaluations are running at once.
    #[derive(Clone, Default)]
    struct Gauge {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Gauge {
        fn tracked(&self, delay: Duration, result: CheckResult) -> impl Evaluation {
            let gauge = self.clone();
            move |_token: CancellationToken| -> BoxFuture<'static, DomainResult<CheckResponse>> {
                Box::pin(async move {
                    let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
                    gauge.peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    gauge.current.fetch_sub(1, Ordering::SeqCst);
                    Ok(CheckResponse::new(result, 1))
                })
            }
        }
    }

    // ========== Section 1: Identity Elements ==========

    #[tokio::test]
    async fn test_empty_union_is_denied() {
        let token = CancellationToken::new();
        let result = union::<BoxedEval>(&token, vec![], 4).await.unwrap();
        assert_eq!(result.can, CheckResult::Denied);
        assert_eq!(result.metadata.check_count, 0);
    }

    #[tokio::test]
    async fn test_empty_intersection_is_allowed() {
        let token = CancellationToken::new();
        let result = intersection::<BoxedEval>(&token, vec![], 4).await.unwrap();
        assert_eq!(result.can, CheckResult::Allowed);
    }

    type BoxedEval = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, DomainResult<CheckResponse>> + Send>;

    fn boxed(evaluation: impl Evaluation) -> BoxedEval {
        Box::new(move |token| evaluation.evaluate(token))
    }

    // ========== Section 2: Reduction ==========

    #[tokio::test]
    async fn test_union_allowed_when_any_child_allowed() {
        let token = CancellationToken::new();
        let children = vec![boxed(denied()), boxed(allowed()), boxed(denied())];

        let result = union(&token, children, 2).await.unwrap();

        assert_eq!(result.can, CheckResult::Allowed);
    }

    #[tokio::test]
    async fn test_union_denied_when_all_children_denied() {
        let token = CancellationToken::new();
        let children = vec![boxed(denied()), boxed(denied()), boxed(denied())];

        let result = union(&token, children, 2).await.unwrap();

        assert_eq!(result.can, CheckResult::Denied);
        assert_eq!(result.metadata.check_count, 3);
    }

    #[tokio::test]
    async fn test_intersection_denied_when_any_child_denied() {
        let token = CancellationToken::new();
        let children = vec![boxed(allowed()), boxed(denied())];

        let result = intersection(&token, children, 2).await.unwrap();

        assert_eq!(result.can, CheckResult::Denied);
    }

    #[tokio::test]
    async fn test_intersection_allowed_when_all_children_allowed() {
        let token = CancellationToken::new();
        let children = vec![boxed(allowed()), boxed(allowed()), boxed(allowed())];

        let result = intersection(&token, children, 1).await.unwrap();

        assert_eq!(result.can, CheckResult::Allowed);
        assert_eq!(result.metadata.check_count, 3);
    }

    // ========== Section 3: Short-circuit and Errors ==========

    #[tokio::test]
    async fn test_union_short_circuits_past_pending_children() {
        let token = CancellationToken::new();
        let children = vec![boxed(pending()), boxed(allowed()), boxed(pending())];

        let result = tokio::time::timeout(Duration::from_secs(2), union(&token, children, 3))
            .await
            .expect("union must not wait for undecided children");

        assert_eq!(result.unwrap().can, CheckResult::Allowed);
    }

    #[tokio::test]
    async fn test_intersection_short_circuits_on_denied() {
        let token = CancellationToken::new();
        let children = vec![boxed(pending()), boxed(denied())];

        let result = tokio::time::timeout(Duration::from_secs(2), intersection(&token, children, 2))
            .await
            .expect("intersection must not wait for undecided children");

        assert_eq!(result.unwrap().can, CheckResult::Denied);
    }

    #[tokio::test]
    async fn test_child_error_aborts_union() {
        let token = CancellationToken::new();
        let children = vec![
            boxed(pending()),
            boxed(fixed(Err(DomainError::Storage {
                message: "connection reset".to_string(),
            }))),
        ];

        let result = union(&token, children, 2).await;

        assert!(matches!(result, Err(DomainError::Storage { .. })));
    }

    #[tokio::test]
    async fn test_panicking_child_surfaces_as_internal_error() {
        let token = CancellationToken::new();
        let explode = true;
        let panicking =
            move |_token: CancellationToken| -> BoxFuture<'static, DomainResult<CheckResponse>> {
                Box::pin(async move {
                    if explode {
                        panic!("boom");
                    }
                    Ok(CheckResponse::denied(0))
                })
            };

        let result = union(&token, vec![boxed(panicking), boxed(denied())], 2).await;

        assert!(matches!(result, Err(DomainError::Internal { .. })));
    }

    // ========== Section 4: Cancellation and Leaks ==========

    #[tokio::test]
    async fn test_caller_cancellation_yields_cancelled() {
        let token = CancellationToken::new();
        let children = vec![boxed(pending()), boxed(pending())];
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = union(&token, children, 2).await;

        assert_eq!(result, Err(DomainError::Cancelled));
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let token = CancellationToken::new();
        let gauge = Gauge::default();
        let children: Vec<_> = (0..12)
            .map(|_| boxed(gauge.tracked(Duration::from_millis(5), CheckResult::Denied)))
            .collect();

        let result = union(&token, children, 3).await.unwrap();

        assert_eq!(result.can, CheckResult::Denied);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert!(gauge.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_no_evaluation_outlives_the_call() {
        let token = CancellationToken::new();
        let gauge = Gauge::default();
        let mut children = vec![boxed(allowed())];
        children.extend(
            (0..8).map(|_| boxed(gauge.tracked(Duration::from_millis(30), CheckResult::Denied))),
        );

        let result = union(&token, children, 4).await.unwrap();

        // Every admitted evaluation has finished by the time the call returns.
        assert_eq!(result.can, CheckResult::Allowed);
        assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
    }

    // ========== Section 5: Reducer Laws ==========

    fn evaluations(results: &[bool]) -> Vec<BoxedEval> {
        results
            .iter()
            .map(|allowed| {
                boxed(fixed(Ok(CheckResponse::new(
                    CheckResult::from_allowed(*allowed),
                    1,
                ))))
            })
            .collect()
    }

    proptest! {
        #[test]
        fn prop_union_is_any_and_intersection_is_all(
            results in proptest::collection::vec(any::<bool>(), 0..12),
            limit in 1usize..6,
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let token = CancellationToken::new();

            let any_allowed = runtime
                .block_on(union(&token, evaluations(&results), limit))
                .unwrap();
            let all_allowed = runtime
                .block_on(intersection(&token, evaluations(&results), limit))
                .unwrap();

            prop_assert_eq!(any_allowed.can.is_allowed(), results.iter().any(|r| *r));
            prop_assert_eq!(all_allowed.can.is_allowed(), results.iter().all(|r| *r));
        }
    }
}
