use crate::catalog::TestCatalog;
use crate::errors::{StoreError, StoreResult};
use crate::model::{Bucket, CaseOutcome, CaseStatus, ConsistencyRecord, EvaluationVerdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use tracing::{debug, info};

/// Everything the store persists. Timestamps live here, never in [`CaseStatus`],
/// so recording the same verdict twice leaves every status unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub model: Option<String>,
    /// Pool size recommended by the last `tune`; the default for later runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuned_pool_size: Option<usize>,
    #[serde(default)]
    pub cases: BTreeMap<String, CaseStatus>,
}

/// Durable home of a [`StoreDocument`].
pub trait ResultBackend: Send {
    /// Missing storage yields an empty document; undecodable storage is `Corrupt`.
    fn load(&self) -> StoreResult<StoreDocument>;

    /// Persist `doc`. `changed` lists ids written or removed since the last persist;
    /// ids in `changed` but absent from `doc.cases` are deletions.
    /// Must be durable before returning.
    fn persist(&mut self, doc: &StoreDocument, changed: &BTreeSet<String>) -> StoreResult<()>;

    fn location(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub accuracy_passed: usize,
    pub consistency_passed: usize,
    pub both_passed: usize,
    pub needs_work: usize,
    pub untested: usize,
}

/// Per-case pass/fail state across sessions, keyed by catalog id.
pub struct ResultStore {
    backend: Box<dyn ResultBackend>,
    doc: StoreDocument,
    catalog_ids: BTreeSet<String>,
    threshold: f64,
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("location", &self.backend.location())
            .field("recorded", &self.doc.cases.len())
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl ResultStore {
    /// Load from `backend`, drop statuses whose id is no longer in the catalog,
    /// and re-derive every bucket against `threshold`.
    pub fn open(
        backend: Box<dyn ResultBackend>,
        catalog: &TestCatalog,
        threshold: f64,
    ) -> StoreResult<Self> {
        let doc = backend.load()?;
        let mut store = Self {
            backend,
            doc,
            catalog_ids: catalog.ids(),
            threshold,
        };
        store.sync_catalog()?;
        store.rederive_buckets();
        Ok(store)
    }

    // Buckets are a function of the current threshold, not the one in force when recorded.
    fn rederive_buckets(&mut self) {
        let threshold = self.threshold;
        let mut moved = 0usize;
        for status in self.doc.cases.values_mut() {
            let Some(verdict) = status.verdict.clone() else {
                continue;
            };
            let derived = CaseStatus::derive(verdict, status.consistency.clone(), threshold);
            if derived.bucket != status.bucket {
                moved += 1;
                *status = derived;
            }
        }
        if moved > 0 {
            info!(moved, threshold, "re-derived buckets for the current consistency threshold");
        }
    }

    /// Status for a fresh verdict. An outcome without a consistency record keeps the
    /// last measured one, so an accuracy-only rerun cannot clear a consistency failure.
    fn next_status(
        &self,
        case_id: &str,
        verdict: EvaluationVerdict,
        consistency: Option<ConsistencyRecord>,
    ) -> CaseStatus {
        let consistency = consistency.or_else(|| {
            self.doc
                .cases
                .get(case_id)
                .and_then(|prior| prior.consistency.clone())
        });
        CaseStatus::derive(verdict, consistency, self.threshold)
    }

    pub fn in_memory(catalog: &TestCatalog, threshold: f64) -> StoreResult<Self> {
        Self::open(Box::new(super::MemoryBackend::default()), catalog, threshold)
    }

    fn sync_catalog(&mut self) -> StoreResult<()> {
        let stale: BTreeSet<String> = self
            .doc
            .cases
            .keys()
            .filter(|id| !self.catalog_ids.contains(*id))
            .cloned()
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        info!(count = stale.len(), "dropping results for cases no longer in catalog");
        let mut next = self.doc.clone();
        next.cases.retain(|id, _| !stale.contains(id));
        self.commit(next, stale)
    }

    /// Replace the status of one case. Durable before return.
    pub fn record(
        &mut self,
        case_id: &str,
        verdict: EvaluationVerdict,
        consistency: Option<ConsistencyRecord>,
    ) -> StoreResult<CaseStatus> {
        self.ensure_known(case_id)?;
        let status = self.next_status(case_id, verdict, consistency);
        let mut next = self.doc.clone();
        next.cases.insert(case_id.to_string(), status.clone());
        self.commit(next, BTreeSet::from([case_id.to_string()]))?;
        debug!(case = case_id, bucket = %status.bucket, "recorded result");
        Ok(status)
    }

    /// Record a whole batch with a single write. Unknown ids reject the batch before anything is written.
    pub fn record_outcomes(&mut self, outcomes: &[CaseOutcome]) -> StoreResult<()> {
        for o in outcomes {
            self.ensure_known(&o.case.id)?;
        }
        if outcomes.is_empty() {
            return Ok(());
        }
        let mut next = self.doc.clone();
        let mut changed = BTreeSet::new();
        for o in outcomes {
            let status = self.next_status(&o.case.id, o.verdict.clone(), o.consistency.clone());
            next.cases.insert(o.case.id.clone(), status);
            changed.insert(o.case.id.clone());
        }
        self.commit(next, changed)?;
        info!(count = outcomes.len(), location = %self.backend.location(), "results saved");
        Ok(())
    }

    pub fn status_of(&self, case_id: &str) -> StoreResult<CaseStatus> {
        self.ensure_known(case_id)?;
        Ok(self
            .doc
            .cases
            .get(case_id)
            .cloned()
            .unwrap_or_else(CaseStatus::untested))
    }

    /// Status of every catalog case, including never-evaluated ones.
    pub fn statuses(&self) -> BTreeMap<String, CaseStatus> {
        self.catalog_ids
            .iter()
            .map(|id| {
                let status = self
                    .doc
                    .cases
                    .get(id)
                    .cloned()
                    .unwrap_or_else(CaseStatus::untested);
                (id.clone(), status)
            })
            .collect()
    }

    fn bucket_of(&self, id: &str) -> Bucket {
        self.doc
            .cases
            .get(id)
            .map(|s| s.bucket)
            .unwrap_or(Bucket::Untested)
    }

    /// Ids in `needs-work` or `untested`.
    pub fn needs_work(&self) -> BTreeSet<String> {
        self.catalog_ids
            .iter()
            .filter(|id| self.bucket_of(id).needs_work())
            .cloned()
            .collect()
    }

    pub fn passing(&self) -> BTreeSet<String> {
        self.catalog_ids
            .iter()
            .filter(|id| self.bucket_of(id) == Bucket::PassingBoth)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> Summary {
        let mut s = Summary {
            total: self.catalog_ids.len(),
            ..Default::default()
        };
        for status in self.statuses().values() {
            if status.accuracy_passed() {
                s.accuracy_passed += 1;
            }
            if status.consistency_passed(self.threshold) {
                s.consistency_passed += 1;
            }
            match status.bucket {
                Bucket::PassingBoth => s.both_passed += 1,
                Bucket::NeedsWork => s.needs_work += 1,
                Bucket::Untested => s.untested += 1,
            }
        }
        s
    }

    /// Forget every recorded result.
    pub fn reset(&mut self) -> StoreResult<()> {
        let changed: BTreeSet<String> = self.doc.cases.keys().cloned().collect();
        let next = StoreDocument {
            last_updated: None,
            model: self.doc.model.clone(),
            tuned_pool_size: self.doc.tuned_pool_size,
            cases: BTreeMap::new(),
        };
        self.commit(next, changed)?;
        info!(location = %self.backend.location(), "results reset");
        Ok(())
    }

    /// Model identifier stamped into the document on the next write.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.doc.model = Some(model.into());
    }

    pub fn model(&self) -> Option<&str> {
        self.doc.model.as_deref()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.doc.last_updated
    }

    pub fn tuned_pool_size(&self) -> Option<usize> {
        self.doc.tuned_pool_size
    }

    /// Remember a tuned pool size. Leaves `last_updated` alone: no result changed.
    pub fn set_tuned_pool_size(&mut self, pool_size: NonZeroUsize) -> StoreResult<()> {
        let pool_size = pool_size.get();
        let mut next = self.doc.clone();
        next.tuned_pool_size = Some(pool_size);
        self.write(next, BTreeSet::new())?;
        info!(pool_size, location = %self.backend.location(), "saved tuned pool size");
        Ok(())
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn location(&self) -> String {
        self.backend.location()
    }

    fn ensure_known(&self, case_id: &str) -> StoreResult<()> {
        if self.catalog_ids.contains(case_id) {
            Ok(())
        } else {
            Err(StoreError::UnknownCase {
                case_id: case_id.to_string(),
            })
        }
    }

    // In-memory state only advances once the backend write succeeded.
    fn commit(&mut self, mut next: StoreDocument, changed: BTreeSet<String>) -> StoreResult<()> {
        next.last_updated = Some(Utc::now());
        self.write(next, changed)
    }

    fn write(&mut self, next: StoreDocument, changed: BTreeSet<String>) -> StoreResult<()> {
        self.backend.persist(&next, &changed)?;
        self.doc = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{code_set, CodeSet, FailureKind, TestCase};

    fn catalog(ids: &[&str]) -> TestCatalog {
        TestCatalog::from_cases(
            ids.iter()
                .map(|id| TestCase {
                    id: id.to_string(),
                    name: String::new(),
                    categories: vec!["general".into()],
                    input: format!("input {}", id),
                    expected_codes: code_set(["D0120"]),
                    expected_descriptions: vec![],
                })
                .collect(),
        )
        .unwrap()
    }

    fn verdict(passed: bool) -> EvaluationVerdict {
        EvaluationVerdict {
            passed,
            score: if passed { 1.0 } else { 0.0 },
            missing: if passed {
                CodeSet::new()
            } else {
                code_set(["D0120"])
            },
            unexpected: CodeSet::new(),
            failure: (!passed).then_some(FailureKind::Mismatch),
            latency_ms: 12,
        }
    }

    #[test]
    fn unrecorded_case_is_untested_and_unknown_is_rejected() {
        let store = ResultStore::in_memory(&catalog(&["a", "b"]), 0.75).unwrap();
        assert_eq!(store.status_of("a").unwrap().bucket, Bucket::Untested);
        assert!(matches!(
            store.status_of("zzz"),
            Err(StoreError::UnknownCase { .. })
        ));
        assert_eq!(store.needs_work(), BTreeSet::from(["a".into(), "b".into()]));
    }

    #[test]
    fn record_rejects_unknown_case() {
        let mut store = ResultStore::in_memory(&catalog(&["a"]), 0.75).unwrap();
        let err = store.record("nope", verdict(true), None).unwrap_err();
        assert!(matches!(err, StoreError::UnknownCase { case_id } if case_id == "nope"));
    }

    #[test]
    fn recording_twice_is_idempotent() {
        let mut store = ResultStore::in_memory(&catalog(&["a"]), 0.75).unwrap();
        store.record("a", verdict(true), None).unwrap();
        let first = store.status_of("a").unwrap();
        store.record("a", verdict(true), None).unwrap();
        assert_eq!(store.status_of("a").unwrap(), first);
        assert_eq!(first.bucket, Bucket::PassingBoth);
    }

    #[test]
    fn summary_counts_buckets() {
        let mut store = ResultStore::in_memory(&catalog(&["a", "b", "c"]), 0.75).unwrap();
        store.record("a", verdict(true), None).unwrap();
        store.record("b", verdict(false), None).unwrap();
        let s = store.summary();
        assert_eq!(s.total, 3);
        assert_eq!(s.accuracy_passed, 1);
        assert_eq!(s.both_passed, 1);
        assert_eq!(s.needs_work, 1);
        assert_eq!(s.untested, 1);
        assert_eq!(store.passing(), BTreeSet::from(["a".to_string()]));

        store.reset().unwrap();
        assert_eq!(store.summary().untested, 3);
    }

    fn consistency(score: f64) -> ConsistencyRecord {
        ConsistencyRecord {
            runs: vec![code_set(["D0120"]); 3],
            mode: code_set(["D0120"]),
            mode_count: 2,
            score,
            run_count: 3,
        }
    }

    #[test]
    fn accuracy_rerun_keeps_failed_consistency() {
        let mut store = ResultStore::in_memory(&catalog(&["a"]), 0.75).unwrap();
        store
            .record("a", verdict(true), Some(consistency(0.3333)))
            .unwrap();
        assert_eq!(store.status_of("a").unwrap().bucket, Bucket::NeedsWork);

        let status = store.record("a", verdict(true), None).unwrap();
        assert_eq!(status.bucket, Bucket::NeedsWork);
        assert_eq!(status.consistency.map(|c| c.score), Some(0.3333));
        assert!(store.needs_work().contains("a"));

        let status = store
            .record("a", verdict(true), Some(consistency(1.0)))
            .unwrap();
        assert_eq!(status.bucket, Bucket::PassingBoth);
    }

    #[test]
    fn reopen_rederives_buckets_for_new_threshold() {
        let cat = catalog(&["a"]);
        let mut store = ResultStore::in_memory(&cat, 0.5).unwrap();
        store
            .record("a", verdict(true), Some(consistency(0.6667)))
            .unwrap();
        assert_eq!(store.status_of("a").unwrap().bucket, Bucket::PassingBoth);
        let doc = store.doc.clone();

        let stricter = ResultStore::open(
            Box::new(super::super::MemoryBackend::with_document(doc.clone())),
            &cat,
            0.75,
        )
        .unwrap();
        assert_eq!(stricter.status_of("a").unwrap().bucket, Bucket::NeedsWork);
        assert!(stricter.needs_work().contains("a"));
        assert_eq!(stricter.summary().consistency_passed, 0);
        assert_eq!(stricter.summary().needs_work, 1);

        let looser = ResultStore::open(
            Box::new(super::super::MemoryBackend::with_document(doc)),
            &cat,
            0.5,
        )
        .unwrap();
        assert_eq!(looser.status_of("a").unwrap().bucket, Bucket::PassingBoth);
    }

    #[test]
    fn tuned_pool_size_survives_reset_and_keeps_timestamp() {
        let mut store = ResultStore::in_memory(&catalog(&["a"]), 0.75).unwrap();
        assert_eq!(store.tuned_pool_size(), None);
        store
            .set_tuned_pool_size(NonZeroUsize::new(6).unwrap())
            .unwrap();
        assert_eq!(store.tuned_pool_size(), Some(6));
        assert!(store.last_updated().is_none());

        store.record("a", verdict(true), None).unwrap();
        store.reset().unwrap();
        assert_eq!(store.tuned_pool_size(), Some(6));
    }
}
