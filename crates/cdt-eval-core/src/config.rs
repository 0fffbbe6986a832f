use crate::errors::ConfigError;
use crate::model::SamplingParams;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System message sent with every request. Prompt wording is content, not engine logic;
/// override it with `system_message` in the config file.
pub const DEFAULT_SYSTEM_MESSAGE: &str = r#"You are a dental billing assistant with access to the CDT (Current Dental Terminology) code set. Given a procedure summary, return the appropriate CDT codes.

Always choose the most specific code that matches the procedure. If the summary describes more than one distinct service, return every relevant code. Default to adult codes when the patient's age is not stated.

Format your response as JSON with the following structure:
{
    "cdt_codes": [
        {"code": "D0120", "description": "Periodic oral evaluation - established patient", "confidence": "high"}
    ],
    "explanation": "Brief explanation of why these codes were selected"
}"#;

/// Engine configuration. Resolution order: defaults, YAML file, environment, CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Chat endpoint of the classification service.
    #[serde(default = "default_url")]
    pub url: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub system_message: Option<String>,

    #[serde(default)]
    pub params: SamplingParams,

    /// Repeated runs per case in consistency mode.
    #[serde(default = "default_runs")]
    pub runs_per_case: u32,

    /// Minimum consistency score for the `passing-both` bucket.
    #[serde(default = "default_threshold")]
    pub consistency_threshold: f64,

    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_results_path")]
    pub results_path: PathBuf,

    /// Test catalog YAML; the embedded catalog is used when unset.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

fn default_url() -> String {
    "http://localhost:11434/api/chat".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_runs() -> u32 {
    3
}

fn default_threshold() -> f64 {
    0.75
}

fn default_pool_size() -> usize {
    12
}

fn default_results_path() -> PathBuf {
    PathBuf::from("cdt_results.json")
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout(),
            system_message: None,
            params: SamplingParams::default(),
            runs_per_case: default_runs(),
            consistency_threshold: default_threshold(),
            pool_size: default_pool_size(),
            results_path: default_results_path(),
            catalog_path: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<EvalConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let cfg: EvalConfig = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    cfg.validate()?;
    Ok(cfg)
}

impl EvalConfig {
    /// Apply environment overrides.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `CDT_EVAL_URL` | Chat endpoint |
    /// | `CDT_EVAL_MODEL` | Model identifier |
    /// | `CDT_EVAL_TIMEOUT` | Per-call timeout in seconds |
    /// | `CDT_EVAL_POOL_SIZE` | Worker pool size |
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var("CDT_EVAL_URL") {
            self.url = url;
        }
        if let Ok(model) = std::env::var("CDT_EVAL_MODEL") {
            self.params.model = model;
        }
        if let Some(timeout) = std::env::var("CDT_EVAL_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.timeout_secs = timeout;
        }
        if let Some(pool) = std::env::var("CDT_EVAL_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.pool_size = pool;
        }
        self
    }

    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.params.model = model.into();
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_runs(mut self, runs: u32) -> Self {
        self.runs_per_case = runs;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be at least 1".into()));
        }
        if self.runs_per_case == 0 {
            return Err(ConfigError::Invalid(
                "runs_per_case must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.consistency_threshold) {
            return Err(ConfigError::Invalid(format!(
                "consistency_threshold must be within [0, 1], got {}",
                self.consistency_threshold
            )));
        }
        reqwest::Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("invalid url '{}': {}", self.url, e)))?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn runs(&self) -> Result<NonZeroU32, ConfigError> {
        NonZeroU32::new(self.runs_per_case)
            .ok_or_else(|| ConfigError::Invalid("runs_per_case must be at least 1".into()))
    }

    pub fn system_message(&self) -> &str {
        self.system_message
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_MESSAGE)
    }
}
