//! Test case manager: picks which cases to run, runs them, and records the results.

use crate::catalog::TestCatalog;
use crate::engine::Dispatcher;
use crate::errors::{EngineError, StoreResult};
use crate::model::{CaseOutcome, CaseStatus, RunMode, TestCase};
use crate::report::progress::ProgressSink;
use crate::storage::{ResultStore, Summary};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Builds a progress sink once the batch size is known.
pub type ProgressFactory = Arc<dyn Fn(usize) -> Option<ProgressSink> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CaseReport {
    pub outcome: CaseOutcome,
    pub status: CaseStatus,
}

/// Result of one manager run, sorted by case id.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    pub cases: Vec<CaseReport>,
    /// Cases left out because they were already passing.
    pub skipped: usize,
    pub network_calls: u64,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn evaluated(&self) -> usize {
        self.cases.len()
    }

    pub fn failing(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|c| c.status.bucket.needs_work())
    }

    pub fn all_passing(&self) -> bool {
        self.failing().next().is_none()
    }
}

pub struct TestManager {
    catalog: TestCatalog,
    store: ResultStore,
    dispatcher: Dispatcher,
    pool_size: usize,
    mode: RunMode,
    progress: Option<ProgressFactory>,
}

impl TestManager {
    pub fn new(
        catalog: TestCatalog,
        store: ResultStore,
        dispatcher: Dispatcher,
        pool_size: usize,
    ) -> Self {
        Self {
            catalog,
            store,
            dispatcher,
            pool_size,
            mode: RunMode::Accuracy,
            progress: None,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFactory) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn catalog(&self) -> &TestCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Every case, or with `force == false` every case not already `passing-both`.
    pub async fn run_all(&mut self, force: bool) -> Result<RunReport, EngineError> {
        let cases = if force {
            self.catalog.cases.clone()
        } else {
            self.catalog.select(&self.store.needs_work())
        };
        let skipped = self.catalog.len() - cases.len();
        self.run_cases(cases, skipped).await
    }

    /// Only cases in `needs-work` or `untested`.
    pub async fn run_needs_work(&mut self) -> Result<RunReport, EngineError> {
        let cases = self.catalog.select(&self.store.needs_work());
        self.run_cases(cases, 0).await
    }

    pub async fn run_category(&mut self, category: &str) -> Result<RunReport, EngineError> {
        let cases = self.catalog.by_category(category)?;
        self.run_cases(cases, 0).await
    }

    pub async fn run_ids(&mut self, ids: &BTreeSet<String>) -> Result<RunReport, EngineError> {
        let cases = self.catalog.select(ids);
        self.run_cases(cases, 0).await
    }

    async fn run_cases(
        &mut self,
        cases: Vec<TestCase>,
        skipped: usize,
    ) -> Result<RunReport, EngineError> {
        let started = Instant::now();
        let calls_before = self.dispatcher.client().network_calls();
        info!(
            selected = cases.len(),
            skipped,
            mode = self.mode.as_str(),
            "running test cases"
        );

        let progress = self.progress.as_ref().and_then(|f| f(cases.len()));
        let mut outcomes = self
            .dispatcher
            .run_batch(&cases, self.pool_size, self.mode, progress)
            .await?;
        outcomes.sort_by(|a, b| a.case.id.cmp(&b.case.id));

        // Persisted only after the whole batch returned.
        self.store
            .set_model(self.dispatcher.client().params().model.clone());
        self.store.record_outcomes(&outcomes)?;

        let mut reports = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let status = self.store.status_of(&outcome.case.id)?;
            reports.push(CaseReport { outcome, status });
        }

        Ok(RunReport {
            mode: self.mode,
            cases: reports,
            skipped,
            network_calls: self.dispatcher.client().network_calls() - calls_before,
            elapsed: started.elapsed(),
        })
    }

    pub fn passing(&self) -> BTreeSet<String> {
        self.store.passing()
    }

    pub fn needs_work(&self) -> BTreeSet<String> {
        self.store.needs_work()
    }

    pub fn summary(&self) -> Summary {
        self.store.summary()
    }

    pub fn reset(&mut self) -> StoreResult<()> {
        self.store.reset()
    }
}
