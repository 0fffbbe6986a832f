use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cdt-eval",
    version,
    about = "Accuracy and consistency testing for a CDT code classification service"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GlobalArgs {
    /// YAML config file (defaults are used when omitted)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Test catalog YAML (defaults to the built-in catalog)
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Result store location
    #[arg(long, global = true)]
    pub results: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = BackendKind::Json)]
    pub backend: BackendKind,

    /// Maximum concurrent classification calls
    #[arg(long, global = true)]
    pub pool_size: Option<usize>,

    /// Repeated runs per case in consistency mode
    #[arg(long, global = true)]
    pub runs: Option<u32>,

    #[arg(long, global = true, value_enum, default_value_t = ModeArg::Accuracy)]
    pub mode: ModeArg,

    /// Chat endpoint of the classification service
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[arg(long, global = true)]
    pub model: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Json,
    Sqlite,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Accuracy,
    Consistency,
}

#[derive(Subcommand)]
pub enum Command {
    /// Evaluate every test case
    RunAll(RunAllArgs),
    /// Show bucket counts and a per-case breakdown
    Status,
    /// Evaluate only cases that need work or were never run
    RunNeedsWork,
    /// Evaluate one category
    Run(RunArgs),
    /// Sweep worker pool sizes and recommend the fastest
    Tune(TuneArgs),
    /// List ids passing both accuracy and consistency
    Passed,
    /// List ids that need work or were never run
    NeedsWork,
    /// Clear all stored results
    Reset,
    /// List catalog categories with case counts
    Categories,
    /// Verify every expected code exists in a code table
    CheckCatalog(CheckCatalogArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunAllArgs {
    /// Also rerun cases that already pass
    #[arg(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long)]
    pub category: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct TuneArgs {
    /// Candidate pool sizes, comma separated
    #[arg(long, value_delimiter = ',')]
    pub sizes: Vec<usize>,

    /// Number of catalog cases to use as the sample (default: all)
    #[arg(long)]
    pub sample: Option<usize>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CheckCatalogArgs {
    /// JSON array of {"code": ..., "description": ...} objects
    #[arg(long)]
    pub codes: PathBuf,
}
