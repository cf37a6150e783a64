//! Analysis provider abstraction and implementations.
//!
//! Defines the [`AnalysisProvider`] trait and concrete backends:
//! - **[`OpenAiProvider`]** — calls the OpenAI chat completions API with a
//!   JSON response format, retry, and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/chat`
//!   endpoint in JSON mode.
//! - **[`MockProvider`]** — deterministic canned responses for tests and CI.
//!
//! Providers must be safe to call from multiple workers concurrently; the
//! implementations here hold no mutable request state.
//!
//! # Retry Strategy
//!
//! The remote providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! # Response Translation
//!
//! [`translate_response`] converts a structured response into [`Finding`]s.
//! Each malformed finding (unknown severity, zero start line, missing
//! fields) is dropped individually — one bad finding never discards the
//! rest of an otherwise valid response.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::models::{FileUnit, Finding, Location};

/// Structured response returned by every provider backend.
///
/// Issues are kept as raw JSON values so translation can reject malformed
/// entries one at a time instead of failing the whole response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewResponse {
    #[serde(default)]
    pub issues: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    start_line: u32,
    #[serde(default)]
    end_line: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    rule_id: String,
    level: String,
    location: RawLocation,
    title: String,
    why: String,
    #[serde(default, alias = "do")]
    actions: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    tags: Vec<String>,
}

fn default_confidence() -> f64 {
    1.0
}

/// Trait for analysis backends.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// Model identifier used for call logging and pricing.
    fn model_name(&self) -> &str;

    /// Maximum concurrent requests this backend tolerates.
    fn max_concurrent(&self) -> usize;

    /// Rough token estimate for cost/usage accounting.
    fn estimate_tokens(&self, text: &str) -> usize {
        text.len() / 4
    }

    /// Run one structured review request.
    async fn complete_structured(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ReviewResponse>;
}

/// Translate a provider response into findings for one file.
///
/// Malformed entries are skipped individually with a warning; location
/// lines are 1-based and a zero start line marks the entry malformed.
pub fn translate_response(
    response: &ReviewResponse,
    unit: &FileUnit,
    pack_name: &str,
) -> Vec<Finding> {
    let mut findings = Vec::with_capacity(response.issues.len());

    for value in &response.issues {
        let raw: RawFinding = match serde_json::from_value(value.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!(
                    "Warning: dropping malformed finding for {}: {}",
                    unit.path.display(),
                    e
                );
                continue;
            }
        };

        let Some(severity) = crate::models::Severity::parse(&raw.level) else {
            eprintln!(
                "Warning: dropping finding with unknown severity '{}' for {}",
                raw.level,
                unit.path.display()
            );
            continue;
        };
        if raw.location.start_line == 0 {
            eprintln!(
                "Warning: dropping finding with invalid location for {}",
                unit.path.display()
            );
            continue;
        }

        findings.push(Finding {
            rule_id: raw.rule_id,
            severity,
            location: Location {
                path: unit.path.clone(),
                start_line: raw.location.start_line,
                end_line: raw.location.end_line,
            },
            title: raw.title,
            why: raw.why,
            actions: raw.actions,
            pack: pack_name.to_string(),
            source: "provider".to_string(),
            confidence: raw.confidence,
            tags: raw.tags,
        });
    }

    findings
}

// ============ OpenAI Provider ============

/// Provider using the OpenAI chat completions API.
///
/// Requires the configured API key environment variable to be set.
pub struct OpenAiProvider {
    model: String,
    api_key: String,
    max_concurrent: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        Ok(Self {
            model: config.model.clone(),
            api_key,
            max_concurrent: config.max_concurrent,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl AnalysisProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    async fn complete_structured(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ReviewResponse> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "response_format": {"type": "json_object"},
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Provider call failed after retries")))
    }
}

/// Extract the assistant message content from a chat completions response
/// and parse it as a [`ReviewResponse`].
fn parse_chat_response(json: &serde_json::Value) -> Result<ReviewResponse> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing message content"))?;

    let response: ReviewResponse = serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Provider returned non-conforming JSON: {}", e))?;
    Ok(response)
}

// ============ Ollama Provider ============

/// Provider using a local Ollama instance.
///
/// Calls `POST /api/chat` in JSON mode on the configured URL
/// (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    url: String,
    max_concurrent: usize,
    max_retries: u32,
    timeout_secs: u64,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model: config.model.clone(),
            url,
            max_concurrent: config.max_concurrent,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl AnalysisProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    async fn complete_structured(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<ReviewResponse> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post(format!("{}/api/chat", self.url))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let content = json
                            .get("message")
                            .and_then(|m| m.get("content"))
                            .and_then(|c| c.as_str())
                            .ok_or_else(|| {
                                anyhow::anyhow!("Invalid Ollama response: missing message content")
                            })?;
                        let parsed: ReviewResponse =
                            serde_json::from_str(content).map_err(|e| {
                                anyhow::anyhow!("Provider returned non-conforming JSON: {}", e)
                            })?;
                        return Ok(parsed);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Provider call failed after retries")))
    }
}

// ============ Mock Provider ============

/// Deterministic provider for tests and offline runs.
///
/// Responses are keyed by prompt substring; the first key found in the
/// prompt wins, anything else returns an empty issue list. Every prompt is
/// recorded for assertion in tests.
pub struct MockProvider {
    model: String,
    responses: Vec<(String, ReviewResponse)>,
    calls: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_responses(vec![])
    }

    pub fn with_responses(responses: Vec<(String, ReviewResponse)>) -> Self {
        Self {
            model: "mock/test-model".to_string(),
            responses,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of `complete_structured` invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisProvider for MockProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_concurrent(&self) -> usize {
        4
    }

    async fn complete_structured(
        &self,
        prompt: &str,
        _system: Option<&str>,
        _max_tokens: u32,
        _temperature: f32,
    ) -> Result<ReviewResponse> {
        self.calls.lock().unwrap().push(prompt.to_string());

        for (key, response) in &self.responses {
            if prompt.contains(key) {
                return Ok(response.clone());
            }
        }
        Ok(ReviewResponse::default())
    }
}

/// Create the configured [`AnalysisProvider`].
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn AnalysisProvider>> {
    match config.kind.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => bail!("Unknown provider kind: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn unit() -> FileUnit {
        FileUnit {
            path: Path::new("src/lib.rs").to_path_buf(),
            content: "fn main() {}".to_string(),
        }
    }

    fn issue_json(rule_id: &str, level: &str, start_line: u32) -> serde_json::Value {
        serde_json::json!({
            "rule_id": rule_id,
            "level": level,
            "location": {"start_line": start_line, "end_line": start_line + 2},
            "title": "Something",
            "why": "Because",
            "do": ["Fix it"],
            "confidence": 0.9,
        })
    }

    #[test]
    fn translate_builds_findings() {
        let response = ReviewResponse {
            issues: vec![issue_json("rust/unwrap-in-library", "major", 5)],
        };
        let findings = translate_response(&response, &unit(), "rust");

        assert_eq!(findings.len(), 1);
        let f = &findings[0];
        assert_eq!(f.rule_id, "rust/unwrap-in-library");
        assert_eq!(f.severity, crate::models::Severity::Major);
        assert_eq!(f.location.start_line, 5);
        assert_eq!(f.location.end_line, Some(7));
        assert_eq!(f.actions, vec!["Fix it"]);
        assert_eq!(f.pack, "rust");
        assert_eq!(f.source, "provider");
    }

    #[test]
    fn translate_drops_malformed_findings_individually() {
        let response = ReviewResponse {
            issues: vec![
                issue_json("rust/good", "major", 5),
                serde_json::json!({"not": "a finding"}),
                issue_json("rust/bad-level", "severe", 5),
                issue_json("rust/bad-line", "minor", 0),
                issue_json("rust/also-good", "info", 9),
            ],
        };
        let findings = translate_response(&response, &unit(), "rust");

        let ids: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["rust/good", "rust/also-good"]);
    }

    #[test]
    fn translate_accepts_actions_field_name() {
        let response = ReviewResponse {
            issues: vec![serde_json::json!({
                "rule_id": "rust/x",
                "level": "minor",
                "location": {"start_line": 1},
                "title": "T",
                "why": "W",
                "actions": ["Do the thing"],
            })],
        };
        let findings = translate_response(&response, &unit(), "rust");
        assert_eq!(findings[0].actions, vec!["Do the thing"]);
        assert_eq!(findings[0].confidence, 1.0);
        assert_eq!(findings[0].location.end_line, None);
    }

    #[tokio::test]
    async fn mock_matches_prompt_substring() {
        let provider = MockProvider::with_responses(vec![(
            "book_list".to_string(),
            ReviewResponse {
                issues: vec![issue_json("django/n-plus-one", "major", 5)],
            },
        )]);

        let hit = provider
            .complete_structured("review this: def book_list(): ...", None, 4096, 0.1)
            .await
            .unwrap();
        assert_eq!(hit.issues.len(), 1);

        let miss = provider
            .complete_structured("review this: def other(): ...", None, 4096, 0.1)
            .await
            .unwrap();
        assert!(miss.issues.is_empty());

        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn parse_chat_response_extracts_content() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "{\"issues\": []}",
                }
            }]
        });
        let response = parse_chat_response(&json).unwrap();
        assert!(response.issues.is_empty());
    }

    #[test]
    fn parse_chat_response_rejects_non_json_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "sorry, I can't do that"}}]
        });
        assert!(parse_chat_response(&json).is_err());
    }

    #[test]
    fn create_provider_rejects_unknown_kind() {
        let config = ProviderConfig {
            kind: "litellm".to_string(),
            ..ProviderConfig::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
