//! Result rendering.
//!
//! Two output formats for an [`AnalysisResult`]: a human-readable text
//! report (findings grouped by file, severity tags, score/gate footer) and
//! a JSON document for programmatic consumption
//! (`{issues, summary, meta}`).

use anyhow::Result;
use std::fmt::Write;

use crate::models::{AnalysisResult, Finding};
use crate::scoring;

const SEPARATOR: &str =
    "────────────────────────────────────────────────────────────";
const FINDING_SEPARATOR: &str = "┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈┈";

/// Human-readable text report.
pub fn render_text(result: &AnalysisResult) -> String {
    let mut out = String::new();

    let gate = if result.gate_passed {
        "PASS"
    } else {
        "FAIL"
    };
    let mark = if result.gate_passed { "✓" } else { "✗" };

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", SEPARATOR);
    let _ = writeln!(
        out,
        "{} Analysis Complete - Gate: {} - Score: {}/100",
        mark, gate, result.score
    );
    let _ = writeln!(out, "{}", SEPARATOR);

    if !result.fail_reasons.is_empty() {
        let _ = writeln!(out, "\nFail reasons:");
        for reason in &result.fail_reasons {
            let _ = writeln!(out, "  • {}", reason);
        }
    }

    if result.findings.is_empty() {
        let _ = writeln!(out, "\n✓ No issues found!");
    } else {
        let _ = writeln!(out, "\nIssues ({}):", result.findings.len());

        for (path, group) in group_by_file(&result.findings) {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", SEPARATOR);
            let _ = writeln!(out, " {}", path);
            let _ = writeln!(out, "{}", SEPARATOR);

            for (i, finding) in group.iter().enumerate() {
                if i > 0 {
                    let _ = writeln!(out, "\n  {}", FINDING_SEPARATOR);
                }
                let _ = writeln!(
                    out,
                    "\n  [{}] {} (line {})",
                    finding.severity.as_str().to_uppercase(),
                    finding.title,
                    finding.location.start_line
                );
                let _ = writeln!(out, "     Rule: {}", finding.rule_id);
                let _ = writeln!(out, "\n     Why: {}", finding.why);
                if !finding.actions.is_empty() {
                    let _ = writeln!(out, "\n     Actions:");
                    for action in &finding.actions {
                        let _ = writeln!(out, "       • {}", action);
                    }
                }
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", SEPARATOR);
    let _ = writeln!(
        out,
        " Files: {} | Cache hits: {} | Provider calls: {} | Duration: {}ms",
        result.meta.files_analyzed,
        result.meta.cache_hits,
        result.meta.provider_calls,
        result.meta.duration_ms
    );
    let _ = writeln!(out, "{}", SEPARATOR);

    out
}

/// JSON report: `{issues, summary, meta}`.
pub fn render_json(result: &AnalysisResult) -> Result<String> {
    let counts = scoring::count_by_severity(&result.findings);

    let doc = serde_json::json!({
        "issues": result.findings,
        "summary": {
            "score": result.score,
            "max_score": 100,
            "gate": if result.gate_passed { "pass" } else { "fail" },
            "fail_reasons": result.fail_reasons,
            "counts": counts,
            "total_issues": result.findings.len(),
        },
        "meta": result.meta,
    });

    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Group findings by path, preserving first-seen file order.
fn group_by_file(findings: &[Finding]) -> Vec<(String, Vec<&Finding>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<&Finding>> =
        std::collections::HashMap::new();

    for finding in findings {
        let key = finding.location.path.to_string_lossy().to_string();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(finding);
    }

    order
        .into_iter()
        .map(|key| {
            let group = groups.remove(&key).unwrap_or_default();
            (key, group)
        })
        .collect()
}
