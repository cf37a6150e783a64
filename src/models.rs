//! Core data models used throughout Review Harness.
//!
//! These types represent the rules, findings, and results that flow through
//! the analysis pipeline, plus the rows persisted in the result store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Severity of a finding, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Blocker,
    Critical,
    Major,
    Minor,
    Info,
}

impl Severity {
    /// Numeric rank for sorting: blocker first (0), info last (4).
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Blocker => 0,
            Severity::Critical => 1,
            Severity::Major => 2,
            Severity::Minor => 3,
            Severity::Info => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Blocker => "blocker",
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Info => "info",
        }
    }

    /// Parse a lowercase severity name. Unknown names return `None` so
    /// callers can drop malformed provider output per-finding.
    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "blocker" => Some(Severity::Blocker),
            "critical" => Some(Severity::Critical),
            "major" => Some(Severity::Major),
            "minor" => Some(Severity::Minor),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source location of a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub path: PathBuf,
    pub start_line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
}

/// A single reported quality problem.
///
/// Findings are produced by response translation, filtered, deduplicated,
/// and scored; they are never mutated after construction. They round-trip
/// through the store as JSON, so every field is serde-visible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub rule_id: String,
    pub severity: Severity,
    pub location: Location,
    pub title: String,
    /// Why this is a problem.
    pub why: String,
    /// Suggested remediation steps.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Name of the pack composition that produced this finding.
    pub pack: String,
    /// Provenance tag (e.g. `"provider"`).
    pub source: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_confidence() -> f64 {
    1.0
}

impl Finding {
    /// Stable identity used for deduplication.
    ///
    /// Derived purely from the finding's own fields, never from insertion
    /// order: identical provider output for identical input yields the same
    /// identity across runs and across cache hits.
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.rule_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.location.path.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.location.start_line.to_le_bytes());
        hasher.update(b"\0");
        hasher.update(self.title.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// A discovered file: path plus full text content.
///
/// Ephemeral — produced by discovery, consumed once per run.
#[derive(Debug, Clone)]
pub struct FileUnit {
    pub path: PathBuf,
    pub content: String,
}

/// Trigger predicates restricting which files a rule applies to.
///
/// A rule with no trigger applies to every file; otherwise it applies when
/// any file glob or any content regex matches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleTrigger {
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub content_patterns: Vec<String>,
}

impl RuleTrigger {
    pub fn is_empty(&self) -> bool {
        self.file_patterns.is_empty() && self.content_patterns.is_empty()
    }
}

/// A semantic review rule. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// Namespaced identifier, e.g. `"rust/unwrap-in-library"`.
    pub id: String,
    pub name: String,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    /// Semantic checks the provider is asked to evaluate.
    #[serde(default)]
    pub checklist: Vec<String>,
    #[serde(default)]
    pub triggers: Option<RuleTrigger>,
}

/// Counters describing a single analysis run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMeta {
    pub files_analyzed: usize,
    pub cache_hits: usize,
    pub provider_calls: usize,
    pub duration_ms: u64,
}

/// Final output of an analysis run. Immutable once constructed.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub findings: Vec<Finding>,
    pub score: u8,
    pub gate_passed: bool,
    pub fail_reasons: Vec<String>,
    pub meta: RunMeta,
}

/// One persisted provider invocation. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct CallLogEntry {
    pub id: i64,
    pub timestamp: i64,
    pub model: String,
    pub pack: String,
    pub files: Vec<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
    pub duration_ms: i64,
    pub findings_found: i64,
    pub cached: bool,
}

/// Cache table statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: i64,
    pub size_bytes: u64,
}

/// Aggregated provider spend over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub total_calls: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub total_findings: i64,
}
