//! Repeated-run agreement for a single case.

use crate::client::ClassificationClient;
use crate::errors::ClassifyError;
use crate::model::{CodeSet, ConsistencyRecord, TestCase};
use std::num::NonZeroU32;
use std::time::Instant;

/// A consistency record plus the wall-clock latency of each run.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub record: ConsistencyRecord,
    pub latencies_ms: Vec<u64>,
}

impl Assessment {
    pub fn mean_latency_ms(&self) -> u64 {
        if self.latencies_ms.is_empty() {
            return 0;
        }
        self.latencies_ms.iter().sum::<u64>() / self.latencies_ms.len() as u64
    }
}

/// Classify `case` `runs` times in sequence. Run 0 may come from the cache;
/// every later run goes to the service. The first failed run aborts the assessment.
pub async fn assess(
    client: &ClassificationClient,
    case: &TestCase,
    runs: NonZeroU32,
) -> Result<Assessment, ClassifyError> {
    let request = client.request_for(&case.input);
    let mut sets = Vec::with_capacity(runs.get() as usize);
    let mut latencies_ms = Vec::with_capacity(runs.get() as usize);

    for run in 0..runs.get() {
        let started = Instant::now();
        let response = if run == 0 {
            client.classify(&request).await?
        } else {
            client.classify_uncached(&request).await?
        };
        latencies_ms.push(started.elapsed().as_millis() as u64);
        sets.push(response.codes().clone());
    }

    Ok(Assessment {
        record: record_from_runs(sets),
        latencies_ms,
    })
}

/// Build a record from run-ordered code sets. `runs` must be non-empty.
pub fn record_from_runs(runs: Vec<CodeSet>) -> ConsistencyRecord {
    debug_assert!(!runs.is_empty(), "consistency needs at least one run");
    let (mode, mode_count) = modal_set(&runs);
    let run_count = runs.len() as u32;
    let score = round_sig(mode_count as f64 / run_count as f64, 4);
    ConsistencyRecord {
        runs,
        mode,
        mode_count,
        score,
        run_count,
    }
}

/// Most frequent set by exact equality; ties go to the set seen first.
pub fn modal_set(runs: &[CodeSet]) -> (CodeSet, u32) {
    let mut tally: Vec<(&CodeSet, u32)> = Vec::new();
    for set in runs {
        match tally.iter_mut().find(|(s, _)| *s == set) {
            Some((_, n)) => *n += 1,
            None => tally.push((set, 1)),
        }
    }

    let mut best: Option<(&CodeSet, u32)> = None;
    for (set, n) in tally {
        if best.is_none_or(|(_, b)| n > b) {
            best = Some((set, n));
        }
    }
    best.map(|(s, n)| (s.clone(), n))
        .unwrap_or_else(|| (CodeSet::new(), 0))
}

fn round_sig(x: f64, digits: i32) -> f64 {
    if x == 0.0 || !x.is_finite() {
        return x;
    }
    let magnitude = x.abs().log10().floor() as i32;
    let factor = 10f64.powi(digits - 1 - magnitude);
    (x * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{code_set, SamplingParams};
    use crate::providers::fake::{FakeReply, FakeService};
    use std::sync::Arc;
    use std::time::Duration;

    fn case(input: &str) -> TestCase {
        TestCase {
            id: "extraction".into(),
            name: String::new(),
            categories: vec!["surgical".into()],
            input: input.into(),
            expected_codes: code_set(["D7140"]),
            expected_descriptions: vec![],
        }
    }

    #[test]
    fn mode_and_score_from_five_runs() {
        let runs = vec![
            code_set(["D7140"]),
            code_set(["D7140"]),
            code_set(["D7140", "D9999"]),
            code_set(["D7140"]),
            code_set(["D7140"]),
        ];
        let rec = record_from_runs(runs);
        assert_eq!(rec.mode, code_set(["D7140"]));
        assert_eq!(rec.mode_count, 4);
        assert_eq!(rec.score, 0.8);
        assert_eq!(rec.run_count, 5);
        assert_eq!(rec.distinct_sets(), 2);
    }

    #[test]
    fn ties_go_to_earliest_set() {
        let runs = vec![
            code_set(["D2331"]),
            code_set(["D2330"]),
            code_set(["D2330"]),
            code_set(["D2331"]),
        ];
        let (mode, n) = modal_set(&runs);
        assert_eq!(mode, code_set(["D2331"]));
        assert_eq!(n, 2);
    }

    #[test]
    fn score_is_rounded_to_four_significant_digits() {
        let runs = vec![code_set(["A"]), code_set(["B"]), code_set(["C"])];
        assert_eq!(record_from_runs(runs).score, 0.3333);
        assert_eq!(round_sig(2.0 / 3.0, 4), 0.6667);
    }

    #[tokio::test]
    async fn assess_uses_cache_only_for_first_run() {
        let service = Arc::new(FakeService::new().with_replies(
            "Extracted tooth #3",
            vec![
                FakeReply::codes(["D7140"]),
                FakeReply::codes(["D7140"]),
                FakeReply::codes(["D7140", "D9999"]),
            ],
        ));
        let client = ClassificationClient::new(
            service.clone(),
            "sys",
            SamplingParams::default(),
            Duration::from_secs(5),
        );
        let c = case("Extracted tooth #3");
        client.classify(&client.request_for(&c.input)).await.unwrap();

        let runs = NonZeroU32::new(3).unwrap();
        let a = assess(&client, &c, runs).await.unwrap();
        // 1 warm-up + 2 uncached runs.
        assert_eq!(service.calls(), 3);
        assert_eq!(a.record.runs.len(), 3);
        assert_eq!(a.record.mode, code_set(["D7140"]));
        assert_eq!(a.record.score, 0.6667);
        assert_eq!(a.latencies_ms.len(), 3);
    }

    #[tokio::test]
    async fn failed_run_aborts_assessment() {
        let client = ClassificationClient::new(
            Arc::new(FakeService::unreachable()),
            "sys",
            SamplingParams::default(),
            Duration::from_secs(1),
        );
        let err = assess(&client, &case("x"), NonZeroU32::new(2).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifyError::ServiceUnavailable { .. }));
    }
}
