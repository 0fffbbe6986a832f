use crate::client::ClassificationClient;
use crate::consistency::assess;
use crate::errors::{ClassifyError, DispatchError};
use crate::evaluator::evaluate;
use crate::model::{CaseOutcome, EvaluationVerdict, RunMode, TestCase};
use crate::report::progress::{ProgressEvent, ProgressSink};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Bounded fan-out of a batch over the shared client.
///
/// Per-case failures become failing verdicts; only a service that is down for
/// the whole batch is reported as an error.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<ClassificationClient>,
    runs: NonZeroU32,
    use_cache: bool,
    preflight: bool,
}

impl Dispatcher {
    pub fn new(client: Arc<ClassificationClient>, runs: NonZeroU32) -> Self {
        Self {
            client,
            runs,
            use_cache: true,
            preflight: true,
        }
    }

    /// Send every accuracy call to the service, bypassing cached responses.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }

    pub fn client(&self) -> &Arc<ClassificationClient> {
        &self.client
    }

    pub fn runs(&self) -> NonZeroU32 {
        self.runs
    }

    /// Evaluate every case with at most `pool_size` in flight. Outcomes are in
    /// completion order; callers that need a stable order sort by id.
    pub async fn run_batch(
        &self,
        cases: &[TestCase],
        pool_size: usize,
        mode: RunMode,
        progress: Option<ProgressSink>,
    ) -> Result<Vec<CaseOutcome>, DispatchError> {
        if pool_size == 0 {
            return Err(DispatchError::InvalidInput(
                "pool size must be at least 1".into(),
            ));
        }
        if cases.is_empty() {
            return Ok(Vec::new());
        }

        if self.preflight {
            self.client
                .health()
                .await
                .map_err(|source| DispatchError::ServiceUnreachable { source })?;
        }

        info!(
            cases = cases.len(),
            pool_size,
            mode = mode.as_str(),
            runs = self.runs.get(),
            "starting batch"
        );
        let started = Instant::now();

        let sem = Arc::new(Semaphore::new(pool_size));
        let mut join_set = JoinSet::new();
        for case in cases {
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DispatchError::Worker(e.to_string()))?;
            let this = self.clone();
            let case = case.clone();
            join_set.spawn(async move {
                let _permit = permit;
                this.run_case(case, mode).await
            });
        }

        let total = cases.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut unavailable: Option<ClassifyError> = None;
        let mut unavailable_count = 0usize;
        while let Some(res) = join_set.join_next().await {
            let (outcome, error) = res.map_err(|e| DispatchError::Worker(e.to_string()))?;
            // An HTTP status means the service answered; only transport failures count.
            if let Some(e @ ClassifyError::ServiceUnavailable { status: None, .. }) = error {
                unavailable_count += 1;
                unavailable.get_or_insert(e);
            }
            outcomes.push(outcome);
            if let Some(ref sink) = progress {
                sink(ProgressEvent {
                    done: outcomes.len(),
                    total,
                });
            }
        }

        if unavailable_count == total {
            if let Some(source) = unavailable {
                return Err(DispatchError::ServiceUnreachable { source });
            }
        }

        let passed = outcomes.iter().filter(|o| o.verdict.passed).count();
        info!(
            cases = total,
            passed,
            network_calls = self.client.network_calls(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok(outcomes)
    }

    async fn run_case(
        &self,
        case: TestCase,
        mode: RunMode,
    ) -> (CaseOutcome, Option<ClassifyError>) {
        let started = Instant::now();
        let result = match mode {
            RunMode::Accuracy => self.accuracy(&case).await.map(|v| (v, None)),
            RunMode::Consistency => assess(&self.client, &case, self.runs).await.map(|a| {
                let verdict =
                    evaluate(&a.record.mode, &case.expected_codes, a.mean_latency_ms());
                (verdict, Some(a.record))
            }),
        };

        match result {
            Ok((verdict, consistency)) => (
                CaseOutcome {
                    case,
                    verdict,
                    consistency,
                },
                None,
            ),
            Err(e) => {
                warn!(case = %case.id, error = %e, "case failed");
                let verdict = EvaluationVerdict::failed_call(
                    e.failure_kind(),
                    &case.expected_codes,
                    started.elapsed().as_millis() as u64,
                );
                (
                    CaseOutcome {
                        case,
                        verdict,
                        consistency: None,
                    },
                    Some(e),
                )
            }
        }
    }

    async fn accuracy(&self, case: &TestCase) -> Result<EvaluationVerdict, ClassifyError> {
        let request = self.client.request_for(&case.input);
        let started = Instant::now();
        let response = if self.use_cache {
            self.client.classify(&request).await?
        } else {
            self.client.classify_uncached(&request).await?
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        Ok(evaluate(response.codes(), &case.expected_codes, latency_ms))
    }
}
