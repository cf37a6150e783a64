use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Severity;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub packs: PacksConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacksConfig {
    /// Pack names in composition order; later packs override earlier ones
    /// on rule-id collision.
    #[serde(default = "default_packs")]
    pub enabled: Vec<String>,
    /// Optional directory of custom rule TOML files, registered as the
    /// `custom` pack.
    #[serde(default)]
    pub custom_rules_dir: Option<PathBuf>,
}

impl Default for PacksConfig {
    fn default() -> Self {
        Self {
            enabled: default_packs(),
            custom_rules_dir: None,
        }
    }
}

fn default_packs() -> Vec<String> {
    vec!["rust".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Provider backend: `openai`, `ollama`, or `mock`.
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key (openai only).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Base URL override (ollama only; defaults to the local daemon).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            url: None,
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider_kind() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_concurrent() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Ceiling on provider calls per run; uncached files beyond this are
    /// skipped, not analyzed.
    #[serde(default = "default_max_provider_calls")]
    pub max_provider_calls: usize,
    /// Cache entry time-to-live, measured from creation.
    #[serde(default = "default_cache_ttl_hours")]
    pub cache_ttl_hours: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_provider_calls: default_max_provider_calls(),
            cache_ttl_hours: default_cache_ttl_hours(),
        }
    }
}

fn default_max_provider_calls() -> usize {
    20
}
fn default_cache_ttl_hours() -> u64 {
    168
}

#[derive(Debug, Deserialize, Clone)]
pub struct GateConfig {
    /// Severity names that fail the gate when at least one finding exists.
    #[serde(default = "default_fail_levels")]
    pub fail_levels: Vec<String>,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: u8,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            fail_levels: default_fail_levels(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_fail_levels() -> Vec<String> {
    vec![
        "blocker".to_string(),
        "critical".to_string(),
        "major".to_string(),
    ]
}
fn default_score_threshold() -> u8 {
    70
}

impl GateConfig {
    /// Parse the configured fail levels into typed severities.
    pub fn parsed_fail_levels(&self) -> Result<Vec<Severity>> {
        self.fail_levels
            .iter()
            .map(|s| {
                Severity::parse(s)
                    .ok_or_else(|| anyhow::anyhow!("Unknown severity in gate.fail_levels: '{}'", s))
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoveryConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.rs".to_string(),
        "**/*.py".to_string(),
        "**/*.js".to_string(),
        "**/*.ts".to_string(),
        "**/*.go".to_string(),
        "**/*.java".to_string(),
        "**/*.rb".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RulesConfig {
    /// Rule ids excluded from results (exact match).
    #[serde(default)]
    pub disabled: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.packs.enabled.is_empty() {
        anyhow::bail!("packs.enabled must list at least one pack");
    }

    if config.analysis.cache_ttl_hours == 0 {
        anyhow::bail!("analysis.cache_ttl_hours must be > 0");
    }

    if config.gate.score_threshold > 100 {
        anyhow::bail!("gate.score_threshold must be in [0, 100]");
    }
    config.gate.parsed_fail_levels()?;

    match config.provider.kind.as_str() {
        "openai" | "ollama" | "mock" => {}
        other => anyhow::bail!(
            "Unknown provider kind: '{}'. Must be openai, ollama, or mock.",
            other
        ),
    }

    if config.provider.max_concurrent == 0 {
        anyhow::bail!("provider.max_concurrent must be > 0");
    }

    Ok(())
}

impl Config {
    /// Minimal configuration for tests: defaults everywhere, mock provider,
    /// database at the given path.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            packs: PacksConfig::default(),
            provider: ProviderConfig {
                kind: "mock".to_string(),
                model: "mock/test-model".to_string(),
                ..ProviderConfig::default()
            },
            analysis: AnalysisConfig::default(),
            gate: GateConfig::default(),
            discovery: DiscoveryConfig::default(),
            rules: RulesConfig::default(),
        }
    }
}
