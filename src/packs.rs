//! Rule packs: registration, composition, and per-file applicability.
//!
//! A pack is a named, versioned list of rules. The registry is an explicit
//! object constructed once at startup and passed into the engine — there is
//! no global mutable pack state, which keeps parallel tests isolated.
//!
//! Composition overlays packs in the order given; later packs win on
//! rule-id collision, and an overridden rule keeps its original position in
//! the set. Custom rules can be loaded from TOML files in a directory and
//! registered as the `custom` pack; malformed files are skipped with a
//! warning rather than failing the load.

use anyhow::{Context, Result};
use globset::{Glob, GlobSetBuilder};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

use crate::models::{Rule, RuleTrigger, Severity};

/// A named, versioned source of rules.
#[derive(Debug, Clone)]
pub struct RuleSource {
    pub name: String,
    pub version: String,
    pub rules: Vec<Rule>,
}

/// Explicit pack registry. Construct once, inject where needed.
pub struct PackRegistry {
    packs: HashMap<String, RuleSource>,
}

impl PackRegistry {
    pub fn new() -> Self {
        Self {
            packs: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in packs.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(rust_pack());
        registry.register(python_pack());
        registry
    }

    pub fn register(&mut self, pack: RuleSource) {
        self.packs.insert(pack.name.clone(), pack);
    }

    /// Load `*.toml` rule files from a directory and register them as the
    /// `custom` pack. Unreadable or malformed files are skipped with a
    /// warning on stderr.
    pub fn register_custom_rules(&mut self, rules_dir: &Path) -> Result<()> {
        let rules = load_rules_from_dir(rules_dir)?;
        self.register(RuleSource {
            name: "custom".to_string(),
            version: "local".to_string(),
            rules,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&RuleSource> {
        self.packs
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Pack not found: {}", name))
    }

    /// Overlay packs in order into a deduplicated rule set. Later packs win
    /// on id collision. Unknown pack names are fatal.
    pub fn compose(&self, pack_names: &[String]) -> Result<ComposedRuleSet> {
        let mut rules: Vec<Rule> = Vec::new();
        let mut index_by_id: HashMap<String, usize> = HashMap::new();
        let mut version_parts = Vec::with_capacity(pack_names.len());

        for name in pack_names {
            let pack = self.get(name)?;
            version_parts.push(format!("{}@{}", pack.name, pack.version));
            for rule in &pack.rules {
                match index_by_id.get(&rule.id) {
                    // Overridden rules keep their original position.
                    Some(&i) => rules[i] = rule.clone(),
                    None => {
                        index_by_id.insert(rule.id.clone(), rules.len());
                        rules.push(rule.clone());
                    }
                }
            }
        }

        Ok(ComposedRuleSet {
            name: pack_names.join("+"),
            version: version_parts.join("+"),
            rules,
        })
    }
}

impl Default for PackRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Immutable snapshot of the active rules for one analysis run.
#[derive(Debug, Clone)]
pub struct ComposedRuleSet {
    pub name: String,
    /// Deterministic for a given composition; part of the cache key triple.
    pub version: String,
    rules: Vec<Rule>,
}

impl ComposedRuleSet {
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.id.clone()).collect()
    }

    /// Rules whose triggers match the given file. A rule with no trigger
    /// applies to every file; otherwise any file-glob match or any
    /// content-regex match selects it.
    pub fn rules_for_file(&self, path: &Path, content: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule_applies(rule, path, content))
            .collect()
    }
}

fn rule_applies(rule: &Rule, path: &Path, content: &str) -> bool {
    let Some(trigger) = &rule.triggers else {
        return true;
    };
    if trigger.is_empty() {
        return true;
    }

    if matches_file_patterns(&trigger.file_patterns, path) {
        return true;
    }
    matches_content_patterns(&trigger.content_patterns, content)
}

fn matches_file_patterns(patterns: &[String], path: &Path) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                eprintln!("Warning: invalid file pattern '{}': {}", pattern, e);
            }
        }
    }
    match builder.build() {
        Ok(set) => set.is_match(path),
        Err(_) => false,
    }
}

fn matches_content_patterns(patterns: &[String], content: &str) -> bool {
    patterns.iter().any(|pattern| match Regex::new(pattern) {
        Ok(re) => re.is_match(content),
        Err(e) => {
            eprintln!("Warning: invalid content pattern '{}': {}", pattern, e);
            false
        }
    })
}

/// Load rules from `*.toml` files in a directory (one rule per file).
/// A missing directory yields an empty list; malformed files are skipped
/// with a warning.
pub fn load_rules_from_dir(rules_dir: &Path) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();

    if !rules_dir.exists() {
        return Ok(rules);
    }

    let entries = std::fs::read_dir(rules_dir)
        .with_context(|| format!("Failed to read rules directory: {}", rules_dir.display()))?;

    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();

    for path in paths {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Warning: failed to read rule file {}: {}", path.display(), e);
                continue;
            }
        };
        match toml::from_str::<Rule>(&content) {
            Ok(rule) => rules.push(rule),
            Err(e) => {
                eprintln!("Warning: failed to parse rule file {}: {}", path.display(), e);
            }
        }
    }

    Ok(rules)
}

fn rule(
    id: &str,
    name: &str,
    severity: Severity,
    description: &str,
    checklist: &[&str],
    triggers: Option<RuleTrigger>,
) -> Rule {
    Rule {
        id: id.to_string(),
        name: name.to_string(),
        severity,
        description: description.to_string(),
        checklist: checklist.iter().map(|s| s.to_string()).collect(),
        triggers,
    }
}

fn file_trigger(patterns: &[&str]) -> Option<RuleTrigger> {
    Some(RuleTrigger {
        file_patterns: patterns.iter().map(|s| s.to_string()).collect(),
        content_patterns: vec![],
    })
}

/// Built-in Rust pack: general correctness and robustness checks.
pub fn rust_pack() -> RuleSource {
    RuleSource {
        name: "rust".to_string(),
        version: "0.1.0".to_string(),
        rules: vec![
            rule(
                "rust/unwrap-in-library",
                "Unwrap in library code",
                Severity::Major,
                "Library code should propagate errors instead of panicking.",
                &[
                    "Calls to unwrap() or expect() on Result/Option outside tests",
                    "Panics reachable from public API entry points",
                ],
                file_trigger(&["**/*.rs"]),
            ),
            rule(
                "rust/blocking-in-async",
                "Blocking call in async context",
                Severity::Critical,
                "Blocking I/O or sleeps inside async functions stall the executor.",
                &[
                    "std::thread::sleep or blocking file/network I/O in async fn",
                    "Long CPU-bound loops without spawn_blocking",
                ],
                Some(RuleTrigger {
                    file_patterns: vec!["**/*.rs".to_string()],
                    content_patterns: vec![r"async\s+fn".to_string()],
                }),
            ),
            rule(
                "rust/missing-error-context",
                "Error without context",
                Severity::Minor,
                "Errors bubbled up bare lose the operation that failed.",
                &["I/O or parse errors propagated with ? but no context attached"],
                file_trigger(&["**/*.rs"]),
            ),
            rule(
                "rust/lock-across-await",
                "Lock held across await",
                Severity::Critical,
                "Holding a std mutex guard across an await point can deadlock the runtime.",
                &["MutexGuard or RwLockGuard alive across .await"],
                Some(RuleTrigger {
                    file_patterns: vec![],
                    content_patterns: vec![r"\.await".to_string()],
                }),
            ),
            rule(
                "rust/secret-in-source",
                "Hardcoded secret",
                Severity::Blocker,
                "Credentials and API keys must come from the environment, not source.",
                &["String literals that look like API keys, tokens, or passwords"],
                file_trigger(&["**/*.rs"]),
            ),
        ],
    }
}

/// Built-in Python pack.
pub fn python_pack() -> RuleSource {
    RuleSource {
        name: "python".to_string(),
        version: "0.1.0".to_string(),
        rules: vec![
            rule(
                "python/broad-except",
                "Overly broad exception handling",
                Severity::Major,
                "Bare or broad excepts swallow programming errors.",
                &[
                    "except: or except Exception: without re-raise or logging",
                    "Exception handlers that silently pass",
                ],
                file_trigger(&["**/*.py"]),
            ),
            rule(
                "python/mutable-default-arg",
                "Mutable default argument",
                Severity::Major,
                "Mutable defaults are shared across calls.",
                &["def f(x, items=[]) or similar dict/set defaults"],
                file_trigger(&["**/*.py"]),
            ),
            rule(
                "python/sql-injection",
                "SQL built from user input",
                Severity::Blocker,
                "String-formatted SQL invites injection; use parameterized queries.",
                &["f-strings, %, or + used to splice values into SQL text"],
                Some(RuleTrigger {
                    file_patterns: vec!["**/*.py".to_string()],
                    content_patterns: vec![r"(?i)(execute|cursor)".to_string()],
                }),
            ),
            rule(
                "python/secret-in-source",
                "Hardcoded secret",
                Severity::Blocker,
                "Credentials and API keys must come from the environment, not source.",
                &["String literals that look like API keys, tokens, or passwords"],
                file_trigger(&["**/*.py"]),
            ),
        ],
    }
}
