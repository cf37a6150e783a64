//! Analysis pipeline orchestration.
//!
//! Coordinates the full review flow: pack composition → file discovery →
//! cache partition → bounded provider fan-out → merge → filter → dedup →
//! per-file cap → score/gate. One [`Engine::analyze`] call is one pass
//! through this sequence.
//!
//! Concurrency is confined to the provider dispatch stage: uncached files
//! fan out onto a semaphore-bounded task set and the driver blocks on a
//! full join barrier before aggregation, so downstream steps see the
//! complete result set. Results aggregate in completion order — the
//! filter/dedup/cap steps depend only on the content of the merged set,
//! plus the stable-dedup first-occurrence guarantee.
//!
//! Per-unit failures (provider errors, malformed responses) degrade to
//! zero findings for that unit and never abort the run. Fatal errors —
//! unknown packs, store/migration faults — propagate to the caller.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::discover;
use crate::hashing;
use crate::models::{AnalysisResult, FileUnit, Finding, RunMeta, Severity};
use crate::packs::{ComposedRuleSet, PackRegistry};
use crate::progress::ProgressReporter;
use crate::prompt;
use crate::provider::{self, AnalysisProvider};
use crate::scoring;
use crate::store::{LogCall, ResultStore};

/// Response token budget for a single provider call.
const MAX_TOKENS_PER_CALL: u32 = 4096;
/// Findings kept per file after severity-prioritized truncation.
const MAX_FINDINGS_PER_FILE: usize = 10;
const TEMPERATURE: f32 = 0.1;

/// Orchestrates the complete analysis pipeline.
pub struct Engine {
    config: Config,
    registry: PackRegistry,
    store: ResultStore,
    provider: Arc<dyn AnalysisProvider>,
}

enum UnitOutcome {
    /// No applicable rules — no call, no cache write.
    Skipped,
    Analyzed {
        findings: Vec<Finding>,
    },
    Failed {
        path: PathBuf,
        error: String,
    },
}

impl Engine {
    /// Build an engine with an explicit pack registry.
    ///
    /// Opens (and migrates) the result store and constructs the configured
    /// provider; both failure modes are fatal.
    pub async fn new(config: Config, registry: PackRegistry) -> Result<Self> {
        let store = ResultStore::open(&config).await?;
        let provider = provider::create_provider(&config.provider)?;
        Ok(Self {
            config,
            registry,
            store,
            provider,
        })
    }

    /// Build an engine from config alone: built-in packs plus any custom
    /// rules directory the config names.
    pub async fn from_config(config: Config) -> Result<Self> {
        let mut registry = PackRegistry::builtin();
        if let Some(dir) = &config.packs.custom_rules_dir {
            registry.register_custom_rules(dir)?;
        }
        Self::new(config, registry).await
    }

    /// Replace the provider (primarily for tests).
    pub fn with_provider(mut self, provider: Arc<dyn AnalysisProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Run the complete analysis pipeline.
    ///
    /// `rule_filter` is a result allow-list matched by substring on rule id;
    /// `diff_only` restricts discovery to locally changed files. Progress
    /// events are a side channel and never affect the result.
    pub async fn analyze(
        &self,
        paths: &[PathBuf],
        rule_filter: Option<&[String]>,
        progress: &dyn ProgressReporter,
        diff_only: bool,
    ) -> Result<AnalysisResult> {
        let start = Instant::now();

        // 1. Compose packs
        progress.report(
            "compose_packs",
            &format!("Loading packs: {}", self.config.packs.enabled.join(", ")),
        );
        let composed = Arc::new(self.registry.compose(&self.config.packs.enabled)?);
        progress.report(
            "compose_packs",
            &format!("Loaded {} rules", composed.rules().len()),
        );

        // 2. Discover files
        progress.report(
            "discover_files",
            &format!(
                "Scanning {}...",
                if diff_only {
                    "changed files".to_string()
                } else {
                    format!("{} path(s)", paths.len())
                }
            ),
        );
        let files = discover::discover(paths, diff_only, &self.config.discovery)?;
        progress.report(
            "discover_files",
            &format!("Found {} file(s) to analyze", files.len()),
        );

        // 3. Early exit
        if files.is_empty() {
            return Ok(AnalysisResult {
                findings: vec![],
                score: 100,
                gate_passed: true,
                fail_reasons: vec![],
                meta: RunMeta {
                    files_analyzed: 0,
                    cache_hits: 0,
                    provider_calls: 0,
                    duration_ms: start.elapsed().as_millis() as u64,
                },
            });
        }

        // 4. Cache partition
        progress.report("check_cache", "Checking cache for previous results...");
        let rules_hash = hashing::hash_rule_set(&composed.rule_ids());

        let mut all_findings: Vec<Finding> = Vec::new();
        let mut uncached: Vec<FileUnit> = Vec::new();
        let mut cache_hits = 0usize;

        for unit in &files {
            let file_hash = hashing::hash_content(&unit.content);
            match self
                .store
                .get(&file_hash, &composed.version, &rules_hash)
                .await?
            {
                Some(cached) => {
                    all_findings.extend(cached);
                    cache_hits += 1;
                }
                None => uncached.push(unit.clone()),
            }
        }
        progress.report(
            "check_cache",
            &format!("{} hit(s), {} miss(es)", cache_hits, uncached.len()),
        );

        // 5–7. Bounded provider dispatch with per-unit failure isolation
        let max_calls = self.config.analysis.max_provider_calls;
        let mut provider_calls = 0usize;

        if !uncached.is_empty() && max_calls > 0 {
            // Misses beyond the call ceiling are skipped, not analyzed.
            let to_analyze: Vec<FileUnit> = uncached.into_iter().take(max_calls).collect();
            progress.report(
                "analyze_files",
                &format!("Analyzing {} uncached file(s)...", to_analyze.len()),
            );

            let parallelism = self
                .provider
                .max_concurrent()
                .min(max_calls)
                .min(to_analyze.len())
                .max(1);
            let semaphore = Arc::new(Semaphore::new(parallelism));
            let mut workers = JoinSet::new();

            for unit in to_analyze {
                let semaphore = semaphore.clone();
                let composed = composed.clone();
                let rules_hash = rules_hash.clone();
                let store = self.store.clone();
                let provider = self.provider.clone();
                workers.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return UnitOutcome::Failed {
                                path: unit.path.clone(),
                                error: "worker pool shut down".to_string(),
                            }
                        }
                    };
                    analyze_unit(unit, &composed, &rules_hash, &store, provider.as_ref()).await
                });
            }

            // Full join barrier: nothing downstream observes partial results.
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(UnitOutcome::Analyzed { findings }) => {
                        all_findings.extend(findings);
                        provider_calls += 1;
                    }
                    Ok(UnitOutcome::Skipped) => {}
                    Ok(UnitOutcome::Failed { path, error }) => {
                        eprintln!("Warning: analysis failed for {}: {}", path.display(), error);
                    }
                    Err(e) => {
                        eprintln!("Warning: analysis worker panicked: {}", e);
                    }
                }
            }
        }

        // 9. Filters
        if let Some(filter) = rule_filter {
            if !filter.is_empty() {
                progress.report(
                    "filter_rules",
                    &format!("Filtering by rules: {}", filter.join(", ")),
                );
                all_findings
                    .retain(|f| filter.iter().any(|pat| f.rule_id.contains(pat.as_str())));
            }
        }
        if !self.config.rules.disabled.is_empty() {
            progress.report(
                "filter_disabled",
                &format!(
                    "Filtering {} disabled rule(s)",
                    self.config.rules.disabled.len()
                ),
            );
            let disabled = &self.config.rules.disabled;
            all_findings.retain(|f| !disabled.iter().any(|d| d == &f.rule_id));
        }

        // 10. Deduplicate
        progress.report(
            "deduplicate",
            &format!("Deduplicating {} finding(s)...", all_findings.len()),
        );
        let all_findings = deduplicate(all_findings);

        // 11. Per-file cap
        progress.report(
            "limit_findings",
            &format!("Limiting to {} findings per file...", MAX_FINDINGS_PER_FILE),
        );
        let all_findings = limit_per_file(all_findings, MAX_FINDINGS_PER_FILE);

        // 12. Score and gate
        progress.report(
            "calculate_score",
            &format!("Calculating score for {} finding(s)...", all_findings.len()),
        );
        let score = scoring::calculate_score(&all_findings);
        let fail_levels: Vec<Severity> = self.config.gate.parsed_fail_levels()?;
        let (gate_passed, fail_reasons) = scoring::check_gate(
            &all_findings,
            &fail_levels,
            self.config.gate.score_threshold,
        );

        // 13. Assemble
        let duration_ms = start.elapsed().as_millis() as u64;
        progress.report("complete", &format!("Analysis complete in {}ms", duration_ms));

        Ok(AnalysisResult {
            findings: all_findings,
            score,
            gate_passed,
            fail_reasons,
            meta: RunMeta {
                files_analyzed: files.len(),
                cache_hits,
                provider_calls,
                duration_ms,
            },
        })
    }
}

/// Analyze one file: applicability, provider call, translation, cache
/// write, call log. All fallible steps stay inside the unit boundary.
async fn analyze_unit(
    unit: FileUnit,
    composed: &ComposedRuleSet,
    rules_hash: &str,
    store: &ResultStore,
    provider: &dyn AnalysisProvider,
) -> UnitOutcome {
    match try_analyze_unit(&unit, composed, rules_hash, store, provider).await {
        Ok(Some(findings)) => UnitOutcome::Analyzed { findings },
        Ok(None) => UnitOutcome::Skipped,
        Err(e) => UnitOutcome::Failed {
            path: unit.path,
            error: e.to_string(),
        },
    }
}

async fn try_analyze_unit(
    unit: &FileUnit,
    composed: &ComposedRuleSet,
    rules_hash: &str,
    store: &ResultStore,
    provider: &dyn AnalysisProvider,
) -> Result<Option<Vec<Finding>>> {
    let rules = composed.rules_for_file(&unit.path, &unit.content);
    // An applicability-empty result is never cached: if rules change later,
    // the file gets re-evaluated.
    if rules.is_empty() {
        return Ok(None);
    }

    let user_prompt = prompt::build_user_prompt(unit, &rules);
    let system_prompt = prompt::build_system_prompt(&composed.name);

    let call_start = Instant::now();
    let response = provider
        .complete_structured(
            &user_prompt,
            Some(&system_prompt),
            MAX_TOKENS_PER_CALL,
            TEMPERATURE,
        )
        .await?;
    let call_duration_ms = call_start.elapsed().as_millis() as i64;

    let findings = provider::translate_response(&response, unit, &composed.name);

    // A confirmed "no issues" result is cacheable too.
    let file_hash = hashing::hash_content(&unit.content);
    store
        .put(&file_hash, &composed.version, rules_hash, &findings)
        .await?;

    let response_text = serde_json::to_string(&response.issues).unwrap_or_default();
    store
        .log_call(LogCall {
            model: provider.model_name().to_string(),
            pack: composed.name.clone(),
            files: vec![unit.path.display().to_string()],
            prompt_tokens: provider.estimate_tokens(&user_prompt) as i64,
            completion_tokens: provider.estimate_tokens(&response_text) as i64,
            duration_ms: call_duration_ms,
            findings_found: findings.len() as i64,
            cost_usd: None,
            cached: false,
        })
        .await?;

    Ok(Some(findings))
}

/// Keep the first occurrence of each finding identity; stable.
pub fn deduplicate(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    findings
        .into_iter()
        .filter(|f| seen.insert(f.identity()))
        .collect()
}

/// Cap findings per file, keeping the most severe.
///
/// Files stay in first-seen order; within one file a stable severity sort
/// decides which findings survive. Sorting never crosses file boundaries.
pub fn limit_per_file(findings: Vec<Finding>, cap: usize) -> Vec<Finding> {
    let mut order: Vec<String> = Vec::new();
    let mut by_file: HashMap<String, Vec<Finding>> = HashMap::new();

    for finding in findings {
        let key = finding.location.path.to_string_lossy().to_string();
        if !by_file.contains_key(&key) {
            order.push(key.clone());
        }
        by_file.entry(key).or_default().push(finding);
    }

    let mut limited = Vec::new();
    for key in order {
        if let Some(mut group) = by_file.remove(&key) {
            group.sort_by_key(|f| f.severity.rank());
            group.truncate(cap);
            limited.extend(group);
        }
    }
    limited
}
