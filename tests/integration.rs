//! Black-box tests driving the `rvw` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rvw_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rvw");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    // Source files under review
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.rs"),
        "fn alpha() {\n    run().unwrap();\n}\n",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.py"),
        "def beta(items=[]):\n    return items\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/review.sqlite"

[packs]
enabled = ["rust", "python"]

[provider]
kind = "mock"
model = "mock/test-model"

[analysis]
max_provider_calls = 10

[gate]
score_threshold = 70
"#,
        root.display()
    );

    let config_path = root.join("rvw.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rvw(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rvw_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rvw binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn check_json(config_path: &Path, paths: &[&str]) -> serde_json::Value {
    let mut args = vec!["check", "--format", "json", "--progress", "off"];
    args.extend_from_slice(paths);
    let (stdout, stderr, success) = run_rvw(config_path, &args);
    assert!(success, "check failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).expect("check did not print valid JSON")
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rvw(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_rvw(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_rvw(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_check_empty_directory_passes() {
    let (tmp, config_path) = setup_test_env();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();

    run_rvw(&config_path, &["init"]);
    let doc = check_json(&config_path, &[empty.to_str().unwrap()]);

    assert_eq!(doc["summary"]["score"], 100);
    assert_eq!(doc["summary"]["gate"], "pass");
    assert_eq!(doc["summary"]["total_issues"], 0);
    assert_eq!(doc["meta"]["files_analyzed"], 0);
}

#[test]
fn test_check_uses_cache_on_second_run() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    run_rvw(&config_path, &["init"]);

    let first = check_json(&config_path, &[files.to_str().unwrap()]);
    assert_eq!(first["meta"]["cache_hits"], 0);
    assert_eq!(first["meta"]["provider_calls"], 2);

    let second = check_json(&config_path, &[files.to_str().unwrap()]);
    assert_eq!(second["meta"]["cache_hits"], 2);
    assert_eq!(second["meta"]["provider_calls"], 0);
}

#[test]
fn test_check_text_output() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    run_rvw(&config_path, &["init"]);
    let (stdout, _, success) = run_rvw(
        &config_path,
        &["check", "--progress", "off", files.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("Gate: PASS"));
    assert!(stdout.contains("Score: 100/100"));
    assert!(stdout.contains("No issues found!"));
}

#[test]
fn test_cache_stats_and_clear() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    run_rvw(&config_path, &["init"]);
    check_json(&config_path, &[files.to_str().unwrap()]);

    let (stdout, _, success) = run_rvw(&config_path, &["cache", "stats"]);
    assert!(success);
    assert!(stdout.contains("Cache entries: 2"));

    let (stdout, _, success) = run_rvw(&config_path, &["cache", "clear"]);
    assert!(success);
    assert!(stdout.contains("Removed 2 cache entries"));

    let (stdout, _, _) = run_rvw(&config_path, &["cache", "stats"]);
    assert!(stdout.contains("Cache entries: 0"));
}

#[test]
fn test_cache_cost_summary() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    run_rvw(&config_path, &["init"]);
    check_json(&config_path, &[files.to_str().unwrap()]);

    let (stdout, _, success) = run_rvw(&config_path, &["cache", "cost", "--days", "7"]);
    assert!(success);
    assert!(stdout.contains("Calls:    2"));

    let (stdout, _, success) = run_rvw(&config_path, &["cache", "logs"]);
    assert!(success);
    assert!(stdout.contains("mock/test-model"));
}

#[test]
fn test_rules_listing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rvw(&config_path, &["rules"]);
    assert!(success);
    assert!(stdout.contains("rust/unwrap-in-library"));
    assert!(stdout.contains("python/broad-except"));

    let (stdout, _, success) = run_rvw(&config_path, &["rules", "--pack", "rust"]);
    assert!(success);
    assert!(stdout.contains("rust/unwrap-in-library"));
    assert!(!stdout.contains("python/broad-except"));
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("missing.toml");

    let (_, stderr, success) = run_rvw(&config_path, &["cache", "stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_unknown_pack_fails_check() {
    let (tmp, config_path) = setup_test_env();
    let config = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        config.replace("enabled = [\"rust\", \"python\"]", "enabled = [\"golang\"]"),
    )
    .unwrap();

    let files = tmp.path().join("files");
    let (_, stderr, success) = run_rvw(
        &config_path,
        &[
            "check",
            "--format",
            "json",
            "--progress",
            "off",
            files.to_str().unwrap(),
        ],
    );
    assert!(!success);
    assert!(stderr.contains("Pack not found"));
}
