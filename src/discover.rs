//! File discovery.
//!
//! Turns a set of paths into the candidate [`FileUnit`]s for one analysis
//! run. Directories are walked with include/exclude globs (VCS and build
//! directories are always excluded); explicitly named files are taken
//! as-is. In diff-only mode discovery instead enumerates files with local
//! uncommitted changes plus untracked files, via `git status --porcelain`.
//!
//! Results are sorted by path so runs are deterministic regardless of
//! filesystem iteration order. Unreadable and non-UTF-8 files are skipped
//! with a warning — absence of analyzable content is not an error.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use crate::config::DiscoveryConfig;
use crate::models::FileUnit;

/// Discover candidate files under `paths`, or (in diff-only mode) the
/// locally changed files of the enclosing git repository.
pub fn discover(
    paths: &[PathBuf],
    diff_only: bool,
    config: &DiscoveryConfig,
) -> Result<Vec<FileUnit>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.venv/**".to_string(),
        "**/dist/**".to_string(),
        "**/build/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut units = Vec::new();

    if diff_only {
        collect_changed_files(&include_set, &exclude_set, &mut units)?;
    } else {
        for path in paths {
            if path.is_file() {
                // Explicitly named files bypass the include globs.
                if let Some(unit) = read_unit(path) {
                    units.push(unit);
                }
            } else if path.is_dir() {
                collect_dir(path, &include_set, &exclude_set, &mut units)?;
            }
            // Nonexistent paths are skipped: empty discovery is a normal
            // outcome, not an error.
        }
    }

    units.sort_by(|a, b| a.path.cmp(&b.path));
    units.dedup_by(|a, b| a.path == b.path);
    Ok(units)
}

fn collect_dir(
    root: &Path,
    include_set: &GlobSet,
    exclude_set: &GlobSet,
    units: &mut Vec<FileUnit>,
) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);

        if exclude_set.is_match(relative) {
            continue;
        }
        if !include_set.is_match(relative) {
            continue;
        }

        if let Some(unit) = read_unit(path) {
            units.push(unit);
        }
    }
    Ok(())
}

/// Enumerate modified + untracked files via `git status --porcelain`,
/// resolved against the repository root.
fn collect_changed_files(
    include_set: &GlobSet,
    exclude_set: &GlobSet,
    units: &mut Vec<FileUnit>,
) -> Result<()> {
    let toplevel = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .context("Failed to run git rev-parse")?;
    if !toplevel.status.success() {
        bail!("Not inside a git repository (required for --diff)");
    }
    let repo_root = PathBuf::from(
        String::from_utf8_lossy(&toplevel.stdout).trim().to_string(),
    );

    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(&repo_root)
        .output()
        .context("Failed to run git status")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git status failed: {}", stderr.trim());
    }

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        if line.len() < 4 {
            continue;
        }
        let status = &line[..2];
        // Deleted files have nothing to analyze.
        if status.contains('D') {
            continue;
        }

        // Renames are reported as "old -> new"; the new path is live.
        let raw_path = &line[3..];
        let rel = match raw_path.split_once(" -> ") {
            Some((_, new)) => new,
            None => raw_path,
        };

        if exclude_set.is_match(rel) || !include_set.is_match(rel) {
            continue;
        }

        if let Some(unit) = read_unit(&repo_root.join(rel)) {
            units.push(unit);
        }
    }
    Ok(())
}

fn read_unit(path: &Path) -> Option<FileUnit> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(FileUnit {
            path: path.to_path_buf(),
            content,
        }),
        Err(e) => {
            eprintln!("Warning: skipping unreadable file {}: {}", path.display(), e);
            None
        }
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
