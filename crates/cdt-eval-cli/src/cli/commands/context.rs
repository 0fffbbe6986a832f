//! Wiring from CLI flags to config, catalog, store, and dispatcher.

use super::super::args::{BackendKind, GlobalArgs, ModeArg};
use anyhow::Context;
use cdt_eval_core::config::{load_config, EvalConfig};
use cdt_eval_core::model::RunMode;
use cdt_eval_core::providers::ollama::OllamaService;
use cdt_eval_core::storage::{JsonBackend, ResultBackend, SqliteBackend};
use cdt_eval_core::{ClassificationClient, Dispatcher, ResultStore, TestCatalog, TestManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Resolve config: defaults, then the YAML file, then environment, then flags.
pub(crate) fn load_eval_config(g: &GlobalArgs) -> anyhow::Result<EvalConfig> {
    let mut cfg = match &g.config {
        Some(path) => load_config(path)?,
        None => EvalConfig::default(),
    }
    .with_env();

    if let Some(url) = &g.url {
        cfg = cfg.with_url(url.clone());
    }
    if let Some(model) = &g.model {
        cfg = cfg.with_model(model.clone());
    }
    if let Some(pool) = g.pool_size {
        cfg = cfg.with_pool_size(pool);
    }
    if let Some(runs) = g.runs {
        cfg = cfg.with_runs(runs);
    }
    if let Some(results) = &g.results {
        cfg.results_path = results.clone();
    }
    if let Some(catalog) = &g.catalog {
        cfg.catalog_path = Some(catalog.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

pub(crate) fn load_catalog(cfg: &EvalConfig) -> anyhow::Result<TestCatalog> {
    let catalog = match &cfg.catalog_path {
        Some(path) => TestCatalog::load(path)?,
        None => TestCatalog::embedded()?,
    };
    Ok(catalog)
}

/// SQLite keeps its own file next to the JSON default unless `--results` names one.
fn store_path(g: &GlobalArgs, cfg: &EvalConfig) -> PathBuf {
    match g.backend {
        BackendKind::Json => cfg.results_path.clone(),
        BackendKind::Sqlite if g.results.is_some() => cfg.results_path.clone(),
        BackendKind::Sqlite => cfg.results_path.with_extension("db"),
    }
}

pub(crate) fn open_store(
    g: &GlobalArgs,
    cfg: &EvalConfig,
    catalog: &TestCatalog,
) -> anyhow::Result<ResultStore> {
    let path = store_path(g, cfg);
    let backend: Box<dyn ResultBackend> = match g.backend {
        BackendKind::Json => Box::new(JsonBackend::new(&path)),
        BackendKind::Sqlite => Box::new(
            SqliteBackend::open(&path)
                .with_context(|| format!("failed to open sqlite store {}", path.display()))?,
        ),
    };
    let store = ResultStore::open(backend, catalog, cfg.consistency_threshold)?;
    Ok(store)
}

pub(crate) fn build_dispatcher(cfg: &EvalConfig) -> anyhow::Result<Dispatcher> {
    let service =
        OllamaService::new(cfg.url.clone(), cfg.timeout())?.with_model(cfg.params.model.clone());
    let client = ClassificationClient::new(
        Arc::new(service),
        cfg.system_message(),
        cfg.params.clone(),
        cfg.timeout(),
    );
    Ok(Dispatcher::new(Arc::new(client), cfg.runs()?))
}

pub(crate) fn run_mode(g: &GlobalArgs) -> RunMode {
    match g.mode {
        ModeArg::Accuracy => RunMode::Accuracy,
        ModeArg::Consistency => RunMode::Consistency,
    }
}

/// Everything a run command needs.
pub(crate) struct RunContext {
    pub cfg: EvalConfig,
    pub manager: TestManager,
}

/// Flag, then environment, then the size saved by `tune`, then the config value.
fn effective_pool_size(
    flag: Option<usize>,
    env_set: bool,
    tuned: Option<usize>,
    configured: usize,
) -> usize {
    match (flag, env_set, tuned) {
        (Some(n), _, _) => n,
        (None, false, Some(n)) => n,
        _ => configured,
    }
}

pub(crate) fn build_manager(g: &GlobalArgs) -> anyhow::Result<RunContext> {
    let mut cfg = load_eval_config(g)?;
    let catalog = load_catalog(&cfg)?;
    let store = open_store(g, &cfg, &catalog)?;
    let pool_size = effective_pool_size(
        g.pool_size,
        std::env::var_os("CDT_EVAL_POOL_SIZE").is_some(),
        store.tuned_pool_size(),
        cfg.pool_size,
    );
    if pool_size != cfg.pool_size {
        info!(pool_size, "using pool size saved by tune");
        cfg.pool_size = pool_size;
    }
    let dispatcher = build_dispatcher(&cfg)?;
    let manager = TestManager::new(catalog, store, dispatcher, cfg.pool_size)
        .with_mode(run_mode(g))
        .with_progress(Arc::new(
            cdt_eval_core::report::console::default_progress_sink,
        ));
    Ok(RunContext { cfg, manager })
}
