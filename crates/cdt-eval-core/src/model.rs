use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Opaque procedure code token (e.g. `D0120`).
pub type Code = String;

/// Order-irrelevant set of codes. `BTreeSet` keeps serialization and display stable.
pub type CodeSet = BTreeSet<Code>;

static EMPTY_CODES: CodeSet = BTreeSet::new();

pub fn code_set<I, S>(codes: I) -> CodeSet
where
    I: IntoIterator<Item = S>,
    S: Into<Code>,
{
    codes.into_iter().map(Into::into).collect()
}

pub fn format_codes(codes: &CodeSet) -> String {
    if codes.is_empty() {
        "(none)".to_string()
    } else {
        codes.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Immutable fixture pairing a procedure description with the codes it must produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub input: String,
    pub expected_codes: CodeSet,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_descriptions: Vec<String>,
}

impl TestCase {
    pub fn in_category(&self, category: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Sampling options forwarded to the classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default = "default_seed", skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

fn default_model() -> String {
    "llama3:8b".to_string()
}

fn default_top_p() -> f32 {
    0.9
}

fn default_top_k() -> u32 {
    40
}

fn default_repeat_penalty() -> f32 {
    1.1
}

fn default_seed() -> Option<u64> {
    Some(42)
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: 0.0,
            top_p: default_top_p(),
            top_k: default_top_k(),
            repeat_penalty: default_repeat_penalty(),
            seed: default_seed(),
            num_predict: None,
        }
    }
}

pub const USER_PROMPT_PREFIX: &str =
    "Please analyze this dental procedure summary and provide the appropriate CDT codes: ";

/// One classification call. Two requests are cache-equivalent iff they are structurally equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub input: String,
    pub system: String,
    pub params: SamplingParams,
}

impl ClassificationRequest {
    pub fn new(input: impl Into<String>, system: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            input: input.into(),
            system: system.into(),
            params,
        }
    }

    pub fn user_message(&self) -> String {
        format!("{}{}", USER_PROMPT_PREFIX, self.input)
    }
}

/// One `{code, description, confidence}` entry from a structured response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSuggestion {
    pub code: Code,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseStatus {
    Structured,
    RawFallback,
    Unparseable,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::RawFallback => "raw-fallback",
            Self::Unparseable => "unparseable",
        }
    }
}

/// Service answer, tagged by how its codes were recovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "parse_status", rename_all = "kebab-case")]
pub enum ClassificationResponse {
    Structured {
        raw: String,
        codes: CodeSet,
        suggestions: Vec<CodeSuggestion>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    RawFallback {
        raw: String,
        codes: CodeSet,
    },
    Unparseable {
        raw: String,
    },
}

impl ClassificationResponse {
    pub fn codes(&self) -> &CodeSet {
        match self {
            Self::Structured { codes, .. } | Self::RawFallback { codes, .. } => codes,
            Self::Unparseable { .. } => &EMPTY_CODES,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Structured { raw, .. } | Self::RawFallback { raw, .. } | Self::Unparseable { raw } => {
                raw
            }
        }
    }

    pub fn parse_status(&self) -> ParseStatus {
        match self {
            Self::Structured { .. } => ParseStatus::Structured,
            Self::RawFallback { .. } => ParseStatus::RawFallback,
            Self::Unparseable { .. } => ParseStatus::Unparseable,
        }
    }
}

/// Why a verdict did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Mismatch,
    Timeout,
    ServiceUnavailable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mismatch => "mismatch",
            Self::Timeout => "timeout",
            Self::ServiceUnavailable => "service_unavailable",
        }
    }
}

/// Accuracy outcome for one (case, response) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub passed: bool,
    /// Fraction of expected codes present in the actual set.
    pub score: f64,
    /// Expected but absent.
    pub missing: CodeSet,
    /// Returned but not expected.
    pub unexpected: CodeSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub latency_ms: u64,
}

impl EvaluationVerdict {
    /// Verdict for a case whose call never produced a response.
    pub fn failed_call(kind: FailureKind, expected: &CodeSet, latency_ms: u64) -> Self {
        Self {
            passed: false,
            score: 0.0,
            missing: expected.clone(),
            unexpected: CodeSet::new(),
            failure: Some(kind),
            latency_ms,
        }
    }

    pub fn symmetric_difference(&self) -> CodeSet {
        self.missing.union(&self.unexpected).cloned().collect()
    }
}

/// Agreement across R repeated runs of one case. Scores are only comparable for equal `run_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyRecord {
    /// Code sets in run-index order.
    pub runs: Vec<CodeSet>,
    pub mode: CodeSet,
    pub mode_count: u32,
    pub score: f64,
    pub run_count: u32,
}

impl ConsistencyRecord {
    pub fn is_consistent(&self) -> bool {
        self.score >= 1.0
    }

    pub fn distinct_sets(&self) -> usize {
        self.runs.iter().collect::<BTreeSet<_>>().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bucket {
    PassingBoth,
    NeedsWork,
    Untested,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassingBoth => "passing-both",
            Self::NeedsWork => "needs-work",
            Self::Untested => "untested",
        }
    }

    pub fn needs_work(&self) -> bool {
        !matches!(self, Self::PassingBoth)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted per-case state. Owned by the result store; everyone else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseStatus {
    #[serde(default)]
    pub verdict: Option<EvaluationVerdict>,
    #[serde(default)]
    pub consistency: Option<ConsistencyRecord>,
    pub bucket: Bucket,
}

impl CaseStatus {
    pub fn untested() -> Self {
        Self {
            verdict: None,
            consistency: None,
            bucket: Bucket::Untested,
        }
    }

    /// `passing-both` iff the verdict passed and any consistency record meets `threshold`.
    pub fn derive(
        verdict: EvaluationVerdict,
        consistency: Option<ConsistencyRecord>,
        threshold: f64,
    ) -> Self {
        let consistent = consistency
            .as_ref()
            .map(|c| c.score >= threshold)
            .unwrap_or(true);
        let bucket = if verdict.passed && consistent {
            Bucket::PassingBoth
        } else {
            Bucket::NeedsWork
        };
        Self {
            verdict: Some(verdict),
            consistency,
            bucket,
        }
    }

    pub fn accuracy_passed(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.passed)
    }

    pub fn consistency_passed(&self, threshold: f64) -> bool {
        self.consistency.as_ref().is_some_and(|c| c.score >= threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Accuracy,
    Consistency,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
            Self::Consistency => "consistency",
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accuracy" => Ok(Self::Accuracy),
            "consistency" => Ok(Self::Consistency),
            other => Err(format!(
                "unknown run mode '{}' (expected accuracy|consistency)",
                other
            )),
        }
    }
}

/// What a worker hands back for one case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutcome {
    pub case: TestCase,
    pub verdict: EvaluationVerdict,
    pub consistency: Option<ConsistencyRecord>,
}
