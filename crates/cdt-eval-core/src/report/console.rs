use crate::catalog::TestCatalog;
use crate::manager::{CaseReport, RunReport};
use crate::model::{format_codes, Bucket, CaseStatus, FailureKind};
use crate::report::progress::{ProgressEvent, ProgressSink};
use crate::storage::{ResultStore, Summary};
use crate::tuner::TuneReport;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// --- Progress N/M (throttled, completion-order) ---

#[must_use]
pub fn format_progress_line(done: usize, total: usize) -> String {
    format!("Running case {}/{}...", done, total)
}

/// Minimum interval between progress updates to avoid log spam.
const PROGRESS_MIN_INTERVAL_MS: u64 = 200;

/// For large batches, emit at most every this many cases.
pub(crate) fn progress_step(total: usize) -> usize {
    if total <= 10 {
        1
    } else {
        std::cmp::max(1, total / 10)
    }
}

struct ThrottleState {
    last_emit: Option<Instant>,
}

/// Throttled stderr sink. `None` for single-case batches; always emits the final event.
pub fn default_progress_sink(total: usize) -> Option<ProgressSink> {
    if total <= 1 {
        return None;
    }
    let step = progress_step(total);
    let state = Arc::new(Mutex::new(ThrottleState { last_emit: None }));
    Some(Arc::new(move |ev: ProgressEvent| {
        if ev.total == 0 {
            return;
        }
        let now = Instant::now();
        let should_emit = match state.lock() {
            Ok(mut g) => {
                let emit_final = ev.done == ev.total;
                let emit_step = ev.done.is_multiple_of(step) || ev.done == 1;
                let interval_ok = g
                    .last_emit
                    .map(|t| {
                        now.saturating_duration_since(t)
                            >= Duration::from_millis(PROGRESS_MIN_INTERVAL_MS)
                    })
                    .unwrap_or(true);
                let ok = emit_final || (emit_step && interval_ok);
                if ok {
                    g.last_emit = Some(now);
                }
                ok
            }
            Err(_) => ev.done == ev.total,
        };
        if should_emit {
            eprintln!("{}", format_progress_line(ev.done, ev.total));
        }
    }))
}

fn icon(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::PassingBoth => "✅",
        Bucket::NeedsWork => "❌",
        Bucket::Untested => "⏸️ ",
    }
}

fn consistency_cell(status: &CaseStatus) -> String {
    status
        .consistency
        .as_ref()
        .map(|c| format!("{:.0}% of {}", c.score * 100.0, c.run_count))
        .unwrap_or_else(|| "-".into())
}

fn print_case(report: &CaseReport) {
    let o = &report.outcome;
    let v = &o.verdict;
    eprintln!(
        "{} {:<40} acc {:>4.0}%  cons {:<10} ({:.1}s)",
        icon(report.status.bucket),
        o.case.id,
        v.score * 100.0,
        consistency_cell(&report.status),
        v.latency_ms as f64 / 1000.0
    );
    match v.failure {
        Some(FailureKind::Timeout) => eprintln!("    timed out"),
        Some(FailureKind::ServiceUnavailable) => eprintln!("    service unavailable"),
        _ => {}
    }
    if !v.missing.is_empty() && v.failure == Some(FailureKind::Mismatch) {
        eprintln!("    missing:    {}", format_codes(&v.missing));
    }
    if !v.unexpected.is_empty() {
        eprintln!("    unexpected: {}", format_codes(&v.unexpected));
    }
    if let Some(c) = o.consistency.as_ref().filter(|c| !c.is_consistent()) {
        eprintln!(
            "    runs:       {} distinct answers, mode {}",
            c.distinct_sets(),
            format_codes(&c.mode)
        );
    }
}

pub fn print_run_report(report: &RunReport) {
    eprintln!();
    for case in &report.cases {
        print_case(case);
    }
    let failing = report.failing().count();
    eprintln!();
    println!(
        "Evaluated {} case(s) in {:.1}s ({} mode): {} passing, {} need work{}. Network calls: {}",
        report.evaluated(),
        report.elapsed.as_secs_f64(),
        report.mode.as_str(),
        report.evaluated() - failing,
        failing,
        if report.skipped > 0 {
            format!(", {} skipped as already passing", report.skipped)
        } else {
            String::new()
        },
        report.network_calls
    );
}

fn pct(n: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        n as f64 * 100.0 / total as f64
    }
}

pub fn format_summary(s: &Summary) -> String {
    format!(
        "Total: {}\nAccuracy passed: {} ({:.1}%)\nConsistency passed: {} ({:.1}%)\nPassing both: {} ({:.1}%)\nNeeds work: {}\nUntested: {}",
        s.total,
        s.accuracy_passed,
        pct(s.accuracy_passed, s.total),
        s.consistency_passed,
        pct(s.consistency_passed, s.total),
        s.both_passed,
        pct(s.both_passed, s.total),
        s.needs_work,
        s.untested
    )
}

pub fn print_status(store: &ResultStore, catalog: &TestCatalog) {
    println!("Results: {}", store.location());
    if let Some(model) = store.model() {
        println!("Model: {}", model);
    }
    if let Some(ts) = store.last_updated() {
        println!("Last updated: {}", ts.to_rfc3339());
    }
    if let Some(n) = store.tuned_pool_size() {
        println!("Tuned pool size: {}", n);
    }
    println!("{}", format_summary(&store.summary()));
    println!();

    for (id, status) in store.statuses() {
        let name = catalog.get(&id).map(|c| c.display_name()).unwrap_or("");
        let acc = match &status.verdict {
            Some(v) if v.passed => "PASS".to_string(),
            Some(v) => format!("FAIL ({})", v.failure.map(|f| f.as_str()).unwrap_or("mismatch")),
            None => "-".to_string(),
        };
        println!(
            "{} {:<40} {:<28} {:<30} cons {}",
            icon(status.bucket),
            id,
            name,
            acc,
            consistency_cell(&status)
        );
    }
}

pub fn print_id_list(title: &str, ids: &std::collections::BTreeSet<String>) {
    println!("{} ({}):", title, ids.len());
    for id in ids {
        println!("  {}", id);
    }
}

pub fn print_tune_report(report: &TuneReport) {
    println!(
        "Host: {} ({} logical CPUs, {} MB total, {} MB available)",
        report.host.hostname,
        report.host.logical_cpus,
        report.host.total_memory_mb,
        report.host.available_memory_mb
    );
    println!();
    println!(
        "{:>6} {:>10} {:>10} {:>8} {:>12} {:>9}",
        "pool", "wall (s)", "completed", "errors", "cases/sec", "success"
    );
    for t in &report.trials {
        let marker = if t.pool_size == report.best { " <- best" } else { "" };
        println!(
            "{:>6} {:>10.2} {:>10} {:>8} {:>12.2} {:>8.0}%{}",
            t.pool_size,
            t.wall_ms as f64 / 1000.0,
            t.completed,
            t.errors,
            t.throughput,
            t.success_rate * 100.0,
            marker
        );
    }
    println!();
    println!("Best pool size: {}", report.best);
    println!(
        "Recommended pool size: {} (capped at logical CPUs)",
        report.recommended
    );
}
