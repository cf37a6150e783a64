//! Persistent result store.
//!
//! A single SQLite file holds two tables: `analysis_cache` (findings keyed
//! by content hash + rules hash, with a creation timestamp for TTL expiry)
//! and `call_logs` (append-only provider usage records). The store's schema
//! version lives in `PRAGMA user_version` and is brought current by the
//! migration runner before any read or write.
//!
//! The pool is cheap to clone; concurrent analysis workers share one store
//! handle. Upserts are single independent transactions, so a completed
//! cache write survives even if the surrounding run is cancelled.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::{CacheStats, CallLogEntry, CostSummary, Finding};

/// Parameters for one appended call-log row.
#[derive(Debug, Clone)]
pub struct LogCall {
    pub model: String,
    pub pack: String,
    pub files: Vec<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub duration_ms: i64,
    pub findings_found: i64,
    /// Computed from the pricing table when `None`.
    pub cost_usd: Option<f64>,
    pub cached: bool,
}

#[derive(Clone)]
pub struct ResultStore {
    pool: SqlitePool,
    db_path: PathBuf,
    ttl: Duration,
}

impl ResultStore {
    /// Open (creating if missing) and migrate the store.
    ///
    /// Failures here — unreadable file, migration target mismatch — are
    /// fatal and propagate; nothing else may touch the store first.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db.path)
            .await
            .with_context(|| format!("Failed to open store at {}", config.db.path.display()))?;

        create_base_schema(&pool).await?;
        migrate::apply_pending(&pool, migrate::latest_version()).await?;

        Ok(Self {
            pool,
            db_path: config.db.path.clone(),
            ttl: Duration::from_secs(config.analysis.cache_ttl_hours * 3600),
        })
    }

    /// Look up cached findings for an exact (file hash, rule-set version,
    /// rules hash) triple. Expired entries are misses. Absence is a normal
    /// outcome, not an error.
    pub async fn get(
        &self,
        file_hash: &str,
        ruleset_version: &str,
        rules_hash: &str,
    ) -> Result<Option<Vec<Finding>>> {
        let row = sqlx::query(
            "SELECT findings_json, created_at FROM analysis_cache \
             WHERE file_hash = ? AND ruleset_version = ? AND rules_hash = ?",
        )
        .bind(file_hash)
        .bind(ruleset_version)
        .bind(rules_hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let created_at: i64 = row.get("created_at");
        let age = chrono::Utc::now().timestamp() - created_at;
        if age > self.ttl.as_secs() as i64 {
            return Ok(None);
        }

        let json: String = row.get("findings_json");
        let findings: Vec<Finding> = serde_json::from_str(&json)
            .with_context(|| "Failed to decode cached findings")?;
        Ok(Some(findings))
    }

    /// Upsert findings for a key triple. Replaces any existing entry for the
    /// same (file hash, rules hash) pair and resets its TTL window.
    pub async fn put(
        &self,
        file_hash: &str,
        ruleset_version: &str,
        rules_hash: &str,
        findings: &[Finding],
    ) -> Result<()> {
        let json = serde_json::to_string(findings)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO analysis_cache (file_hash, ruleset_version, rules_hash, findings_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(file_hash, rules_hash) DO UPDATE SET
                ruleset_version = excluded.ruleset_version,
                findings_json = excluded.findings_json,
                created_at = excluded.created_at
            "#,
        )
        .bind(file_hash)
        .bind(ruleset_version)
        .bind(rules_hash)
        .bind(&json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete all cache rows (call logs untouched). Returns the number removed.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM analysis_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_cache")
            .fetch_one(&self.pool)
            .await?;

        let size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(CacheStats {
            entries,
            size_bytes,
        })
    }

    /// Append one provider-call record and return its cost.
    pub async fn log_call(&self, call: LogCall) -> Result<f64> {
        let total_tokens = call.prompt_tokens + call.completion_tokens;
        let cost_usd = call.cost_usd.unwrap_or_else(|| {
            estimate_cost(&call.model, call.prompt_tokens, call.completion_tokens)
        });
        let now = chrono::Utc::now().timestamp();
        let files = serde_json::to_string(&call.files)?;

        sqlx::query(
            r#"
            INSERT INTO call_logs
                (timestamp, model, pack, files, prompt_tokens, completion_tokens,
                 total_tokens, cost_usd, duration_ms, findings_found, cached)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(now)
        .bind(&call.model)
        .bind(&call.pack)
        .bind(&files)
        .bind(call.prompt_tokens)
        .bind(call.completion_tokens)
        .bind(total_tokens)
        .bind(cost_usd)
        .bind(call.duration_ms)
        .bind(call.findings_found)
        .bind(call.cached)
        .execute(&self.pool)
        .await?;

        Ok(cost_usd)
    }

    /// Most-recent-first provider call records.
    pub async fn call_logs(&self, limit: i64) -> Result<Vec<CallLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, timestamp, model, pack, files, prompt_tokens, completion_tokens, \
             total_tokens, cost_usd, duration_ms, findings_found, cached \
             FROM call_logs ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let files_json: String = row.get("files");
            logs.push(CallLogEntry {
                id: row.get("id"),
                timestamp: row.get("timestamp"),
                model: row.get("model"),
                pack: row.get("pack"),
                files: serde_json::from_str(&files_json).unwrap_or_default(),
                prompt_tokens: row.get("prompt_tokens"),
                completion_tokens: row.get("completion_tokens"),
                total_tokens: row.get("total_tokens"),
                cost_usd: row.get("cost_usd"),
                duration_ms: row.get("duration_ms"),
                findings_found: row.get("findings_found"),
                cached: row.get("cached"),
            });
        }
        Ok(logs)
    }

    /// Aggregate spend over the trailing `days` window.
    pub async fn cost_summary(&self, days: i64) -> Result<CostSummary> {
        let since = chrono::Utc::now().timestamp() - days * 86400;

        let row = sqlx::query(
            "SELECT COUNT(*) AS total_calls, \
             COALESCE(SUM(total_tokens), 0) AS total_tokens, \
             COALESCE(SUM(cost_usd), 0.0) AS total_cost, \
             COALESCE(SUM(findings_found), 0) AS total_findings \
             FROM call_logs WHERE timestamp >= ?",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(CostSummary {
            total_calls: row.get("total_calls"),
            total_tokens: row.get("total_tokens"),
            total_cost: row.get("total_cost"),
            total_findings: row.get("total_findings"),
        })
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn create_base_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_hash TEXT NOT NULL,
            ruleset_version TEXT NOT NULL,
            rules_hash TEXT NOT NULL,
            findings_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(file_hash, rules_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            model TEXT NOT NULL,
            pack TEXT NOT NULL,
            files TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL,
            completion_tokens INTEGER NOT NULL,
            total_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL,
            duration_ms INTEGER NOT NULL,
            findings_found INTEGER NOT NULL,
            cached INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cache_lookup \
         ON analysis_cache(file_hash, rules_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_call_logs_timestamp \
         ON call_logs(timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-million-token (prompt, completion) USD prices by model prefix.
/// Unknown models cost 0 — spend tracking degrades, analysis does not.
const MODEL_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-sonnet-4", 3.00, 15.00),
];

fn estimate_cost(model: &str, prompt_tokens: i64, completion_tokens: i64) -> f64 {
    // Longest prefix wins so "gpt-4o-mini" does not price as "gpt-4o".
    let price = MODEL_PRICES
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len());

    match price {
        Some((_, prompt_price, completion_price)) => {
            prompt_tokens as f64 / 1_000_000.0 * prompt_price
                + completion_tokens as f64 / 1_000_000.0 * completion_price
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, Severity};
    use std::path::Path;
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir) -> ResultStore {
        let config = Config::minimal(tmp.path().join("cache.sqlite"));
        ResultStore::open(&config).await.unwrap()
    }

    fn sample_finding(rule_id: &str) -> Finding {
        Finding {
            rule_id: rule_id.to_string(),
            severity: Severity::Major,
            location: Location {
                path: Path::new("src/lib.rs").to_path_buf(),
                start_line: 10,
                end_line: Some(15),
            },
            title: "Test finding".to_string(),
            why: "Test reason".to_string(),
            actions: vec!["Fix it".to_string()],
            pack: "test".to_string(),
            source: "provider".to_string(),
            confidence: 0.9,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn put_and_get() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .put("hash1", "v1", "rules1", &[sample_finding("test/rule")])
            .await
            .unwrap();
        let result = store.get("hash1", "v1", "rules1").await.unwrap().unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].rule_id, "test/rule");
        assert_eq!(result[0].title, "Test finding");
    }

    #[tokio::test]
    async fn get_misses_on_any_differing_key_component() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .put("hash1", "v1", "rules1", &[sample_finding("test/rule")])
            .await
            .unwrap();

        assert!(store.get("hash2", "v1", "rules1").await.unwrap().is_none());
        assert!(store.get("hash1", "v2", "rules1").await.unwrap().is_none());
        assert!(store.get("hash1", "v1", "rules2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_replaces_existing_entry() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .put("hash1", "v1", "rules1", &[sample_finding("test/first")])
            .await
            .unwrap();
        store
            .put("hash1", "v1", "rules1", &[sample_finding("test/second")])
            .await
            .unwrap();

        let result = store.get("hash1", "v1", "rules1").await.unwrap().unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].rule_id, "test/second");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn empty_finding_list_is_cacheable() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store.put("hash1", "v1", "rules1", &[]).await.unwrap();
        let result = store.get("hash1", "v1", "rules1").await.unwrap();
        assert!(matches!(result, Some(ref findings) if findings.is_empty()));
    }

    #[tokio::test]
    async fn clear_removes_all_cache_rows() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .put("hash1", "v1", "rules1", &[sample_finding("a/b")])
            .await
            .unwrap();
        store
            .put("hash2", "v1", "rules1", &[sample_finding("a/b")])
            .await
            .unwrap();

        let deleted = store.clear().await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.get("hash1", "v1", "rules1").await.unwrap().is_none());
        assert!(store.get("hash2", "v1", "rules1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_leaves_call_logs() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        store
            .log_call(LogCall {
                model: "gpt-4o-mini".to_string(),
                pack: "rust".to_string(),
                files: vec!["src/lib.rs".to_string()],
                prompt_tokens: 100,
                completion_tokens: 50,
                duration_ms: 900,
                findings_found: 1,
                cost_usd: None,
                cached: false,
            })
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert_eq!(store.call_logs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stats_reports_entries_and_size() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        store
            .put("hash1", "v1", "rules1", &[sample_finding("a/b")])
            .await
            .unwrap();
        store
            .put("hash2", "v1", "rules1", &[sample_finding("a/b")])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entries, 2);
        assert!(stats.size_bytes > 0);
    }

    #[tokio::test]
    async fn log_call_computes_cost_and_total() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let cost = store
            .log_call(LogCall {
                model: "gpt-4o-mini".to_string(),
                pack: "rust".to_string(),
                files: vec!["src/lib.rs".to_string()],
                prompt_tokens: 1_000_000,
                completion_tokens: 1_000_000,
                duration_ms: 1500,
                findings_found: 3,
                cost_usd: None,
                cached: false,
            })
            .await
            .unwrap();
        assert!((cost - 0.75).abs() < 1e-9);

        let logs = store.call_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].model, "gpt-4o-mini");
        assert_eq!(logs[0].pack, "rust");
        assert_eq!(logs[0].total_tokens, 2_000_000);
        assert_eq!(logs[0].files, vec!["src/lib.rs"]);
    }

    #[tokio::test]
    async fn unknown_model_costs_zero() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        let cost = store
            .log_call(LogCall {
                model: "mock/test-model".to_string(),
                pack: "rust".to_string(),
                files: vec![],
                prompt_tokens: 5000,
                completion_tokens: 5000,
                duration_ms: 5,
                findings_found: 0,
                cost_usd: None,
                cached: false,
            })
            .await
            .unwrap();
        assert_eq!(cost, 0.0);
    }

    #[tokio::test]
    async fn cost_summary_aggregates_window() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;

        for (pt, ct, cost, found) in [(1000, 500, 0.01, 3), (800, 400, 0.008, 2)] {
            store
                .log_call(LogCall {
                    model: "gpt-4o-mini".to_string(),
                    pack: "rust".to_string(),
                    files: vec!["src/lib.rs".to_string()],
                    prompt_tokens: pt,
                    completion_tokens: ct,
                    duration_ms: 1200,
                    findings_found: found,
                    cost_usd: Some(cost),
                    cached: false,
                })
                .await
                .unwrap();
        }

        let summary = store.cost_summary(30).await.unwrap();
        assert_eq!(summary.total_calls, 2);
        assert_eq!(summary.total_tokens, 2700);
        assert!((summary.total_cost - 0.018).abs() < 1e-9);
        assert_eq!(summary.total_findings, 5);
    }

    #[tokio::test]
    async fn open_migrates_legacy_store() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("cache.sqlite");

        // Build a legacy (version 0) store with the since-removed columns.
        {
            let pool = db::connect(&db_path).await.unwrap();
            create_base_schema(&pool).await.unwrap();
            for column in ["prompt_text", "response_text"] {
                sqlx::query(&format!("ALTER TABLE call_logs ADD COLUMN {} TEXT", column))
                    .execute(&pool)
                    .await
                    .unwrap();
            }
            sqlx::query(
                "INSERT INTO call_logs \
                 (timestamp, model, pack, files, prompt_tokens, completion_tokens, total_tokens, \
                  cost_usd, duration_ms, findings_found, cached, prompt_text, response_text) \
                 VALUES (1700000000, 'gpt-4o-mini', 'rust', '[]', 10, 5, 15, 0.0, 100, 0, 0, 'p', 'r')",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        // One open cycle migrates and stamps the latest version.
        let config = Config::minimal(db_path.clone());
        let store = ResultStore::open(&config).await.unwrap();
        assert_eq!(
            migrate::schema_version(&store.pool).await.unwrap(),
            migrate::latest_version()
        );
        let logs = store.call_logs(10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].total_tokens, 15);
        store.close().await;

        // Opening a second time is a no-op and does not error.
        let store = ResultStore::open(&config).await.unwrap();
        assert_eq!(store.call_logs(10).await.unwrap().len(), 1);
    }

    #[test]
    fn longest_model_prefix_wins() {
        let mini = estimate_cost("gpt-4o-mini-2024-07-18", 1_000_000, 0);
        assert!((mini - 0.15).abs() < 1e-9);
        let full = estimate_cost("gpt-4o-2024-08-06", 1_000_000, 0);
        assert!((full - 2.50).abs() < 1e-9);
    }
}
