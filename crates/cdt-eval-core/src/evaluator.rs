use crate::model::{CodeSet, EvaluationVerdict, FailureKind};

/// Score `actual` against `expected`.
///
/// Passes iff every expected code is present; extra codes are reported but do
/// not fail the case. An empty expected set passes only when `actual` is empty too.
pub fn evaluate(actual: &CodeSet, expected: &CodeSet, latency_ms: u64) -> EvaluationVerdict {
    let missing: CodeSet = expected.difference(actual).cloned().collect();
    let unexpected: CodeSet = actual.difference(expected).cloned().collect();

    let (passed, score) = if expected.is_empty() {
        let ok = actual.is_empty();
        (ok, if ok { 1.0 } else { 0.0 })
    } else {
        let hits = expected.len() - missing.len();
        (missing.is_empty(), hits as f64 / expected.len() as f64)
    };

    EvaluationVerdict {
        passed,
        score,
        missing,
        unexpected,
        failure: (!passed).then_some(FailureKind::Mismatch),
        latency_ms,
    }
}
