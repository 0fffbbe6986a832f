//! Worker pool size sweep.

use crate::engine::Dispatcher;
use crate::errors::DispatchError;
use crate::model::{FailureKind, RunMode, TestCase};
use serde::Serialize;
use std::time::Instant;
use sysinfo::System;
use tracing::info;

pub const DEFAULT_CANDIDATES: [usize; 9] = [1, 2, 4, 8, 12, 16, 20, 24, 32];

/// One pool size, one pass over the sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trial {
    pub pool_size: usize,
    pub wall_ms: u64,
    pub completed: usize,
    pub errors: usize,
    /// Completed cases per second.
    pub throughput: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub logical_cpus: usize,
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuneReport {
    pub trials: Vec<Trial>,
    pub best: usize,
    /// `best` capped at the host's logical CPU count.
    pub recommended: usize,
    pub host: HostInfo,
}

/// Highest throughput wins; ties go to the smaller pool.
pub fn pick_best(trials: &[Trial]) -> Option<usize> {
    trials
        .iter()
        .max_by(|a, b| {
            a.throughput
                .total_cmp(&b.throughput)
                .then_with(|| b.pool_size.cmp(&a.pool_size))
        })
        .map(|t| t.pool_size)
}

pub fn host_info() -> HostInfo {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();
    let logical_cpus = match sys.cpus().len() {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };
    HostInfo {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        logical_cpus,
        total_memory_mb: sys.total_memory() / (1024 * 1024),
        available_memory_mb: sys.available_memory() / (1024 * 1024),
    }
}

/// Run `sample` once per candidate size with caching disabled and report throughput.
pub async fn tune(
    dispatcher: &Dispatcher,
    candidates: &[usize],
    sample: &[TestCase],
) -> Result<TuneReport, DispatchError> {
    if candidates.is_empty() {
        return Err(DispatchError::InvalidInput(
            "at least one candidate pool size is required".into(),
        ));
    }
    if let Some(bad) = candidates.iter().find(|&&n| n == 0) {
        return Err(DispatchError::InvalidInput(format!(
            "candidate pool size must be at least 1, got {}",
            bad
        )));
    }
    if sample.is_empty() {
        return Err(DispatchError::InvalidInput("tuning sample is empty".into()));
    }

    let dispatcher = dispatcher.clone().without_cache();
    let mut trials = Vec::with_capacity(candidates.len());
    for (i, &pool_size) in candidates.iter().enumerate() {
        let d = dispatcher.clone().with_preflight(i == 0);
        let started = Instant::now();
        let outcomes = d
            .run_batch(sample, pool_size, RunMode::Accuracy, None)
            .await?;
        let elapsed = started.elapsed();

        let errors = outcomes
            .iter()
            .filter(|o| {
                o.verdict
                    .failure
                    .is_some_and(|k| k != FailureKind::Mismatch)
            })
            .count();
        let completed = outcomes.len() - errors;
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let trial = Trial {
            pool_size,
            wall_ms: elapsed.as_millis() as u64,
            completed,
            errors,
            throughput: completed as f64 / secs,
            success_rate: completed as f64 / outcomes.len().max(1) as f64,
        };
        info!(
            pool_size,
            throughput = trial.throughput,
            errors,
            wall_ms = trial.wall_ms,
            "tuning trial finished"
        );
        trials.push(trial);
    }

    let best = pick_best(&trials).unwrap_or(1);
    let host = host_info();
    let recommended = best.min(host.logical_cpus).max(1);
    Ok(TuneReport {
        trials,
        best,
        recommended,
        host,
    })
}
