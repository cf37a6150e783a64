//! Scoring and gate logic.
//!
//! Pure, total functions over finding lists: a 0–100 quality score and a
//! pass/fail gate with human-readable reasons. Severity is always the typed
//! enum — no string re-derivation at call sites.

use std::collections::HashMap;

use crate::models::{Finding, Severity};

/// Penalty subtracted from 100 for each finding of a given severity.
pub fn severity_weight(severity: Severity) -> u32 {
    match severity {
        Severity::Blocker => 25,
        Severity::Critical => 15,
        Severity::Major => 8,
        Severity::Minor => 3,
        Severity::Info => 0,
    }
}

/// Default gate policy: fail on blockers, criticals, and majors.
pub const DEFAULT_FAIL_LEVELS: &[Severity] =
    &[Severity::Blocker, Severity::Critical, Severity::Major];

pub const DEFAULT_SCORE_THRESHOLD: u8 = 70;

/// Quality score in [0, 100], higher is better. No findings yields 100;
/// the penalty sum is floored at 0.
pub fn calculate_score(findings: &[Finding]) -> u8 {
    let penalty: u32 = findings
        .iter()
        .map(|f| severity_weight(f.severity))
        .sum();
    100u32.saturating_sub(penalty) as u8
}

/// Check findings against the gate policy.
///
/// Returns `(passed, reasons)`: one reason per fail level with at least one
/// finding, plus a threshold reason when the score falls below
/// `score_threshold`. The gate passes iff no reasons accumulate.
pub fn check_gate(
    findings: &[Finding],
    fail_levels: &[Severity],
    score_threshold: u8,
) -> (bool, Vec<String>) {
    let mut reasons = Vec::new();

    for level in fail_levels {
        let count = findings.iter().filter(|f| f.severity == *level).count();
        if count > 0 {
            reasons.push(format!("{} {} issue(s)", count, level));
        }
    }

    let score = calculate_score(findings);
    if score < score_threshold {
        reasons.push(format!(
            "Score {} below threshold {}",
            score, score_threshold
        ));
    }

    (reasons.is_empty(), reasons)
}

/// Finding counts by severity name, for summaries.
pub fn count_by_severity(findings: &[Finding]) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for finding in findings {
        *counts.entry(finding.severity.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use std::path::Path;

    fn finding(severity: Severity) -> Finding {
        Finding {
            rule_id: "test/rule".to_string(),
            severity,
            location: Location {
                path: Path::new("src/lib.rs").to_path_buf(),
                start_line: 1,
                end_line: None,
            },
            title: "Test".to_string(),
            why: "Test".to_string(),
            actions: vec![],
            pack: "test".to_string(),
            source: "provider".to_string(),
            confidence: 1.0,
            tags: vec![],
        }
    }

    #[test]
    fn empty_scores_100() {
        assert_eq!(calculate_score(&[]), 100);
    }

    #[test]
    fn single_finding_weights() {
        assert_eq!(calculate_score(&[finding(Severity::Blocker)]), 75);
        assert_eq!(calculate_score(&[finding(Severity::Critical)]), 85);
        assert_eq!(calculate_score(&[finding(Severity::Major)]), 92);
        assert_eq!(calculate_score(&[finding(Severity::Minor)]), 97);
        assert_eq!(calculate_score(&[finding(Severity::Info)]), 100);
    }

    #[test]
    fn score_floors_at_zero() {
        let findings: Vec<Finding> = (0..10).map(|_| finding(Severity::Blocker)).collect();
        assert_eq!(calculate_score(&findings), 0);
    }

    #[test]
    fn gate_fails_on_blocker() {
        let findings = vec![finding(Severity::Blocker)];
        let (passed, reasons) =
            check_gate(&findings, DEFAULT_FAIL_LEVELS, DEFAULT_SCORE_THRESHOLD);
        assert!(!passed);
        assert!(reasons.iter().any(|r| r.contains("blocker")));
    }

    #[test]
    fn gate_passes_on_minor_and_info_only() {
        let findings = vec![finding(Severity::Minor), finding(Severity::Info)];
        let (passed, reasons) =
            check_gate(&findings, DEFAULT_FAIL_LEVELS, DEFAULT_SCORE_THRESHOLD);
        assert!(passed, "unexpected reasons: {:?}", reasons);
    }

    #[test]
    fn gate_fails_below_threshold_even_without_fail_levels() {
        // Five majors: score 60, no blockers/criticals in the fail set.
        let findings: Vec<Finding> = (0..5).map(|_| finding(Severity::Major)).collect();
        let (passed, reasons) = check_gate(&findings, &[Severity::Blocker], 70);
        assert!(!passed);
        assert!(reasons.iter().any(|r| r.contains("below threshold")));
    }

    #[test]
    fn gate_reasons_count_per_level() {
        let findings = vec![
            finding(Severity::Critical),
            finding(Severity::Critical),
            finding(Severity::Major),
        ];
        let (_, reasons) = check_gate(&findings, DEFAULT_FAIL_LEVELS, 0);
        assert!(reasons.contains(&"2 critical issue(s)".to_string()));
        assert!(reasons.contains(&"1 major issue(s)".to_string()));
    }

    #[test]
    fn counts_by_severity() {
        let findings = vec![
            finding(Severity::Major),
            finding(Severity::Major),
            finding(Severity::Info),
        ];
        let counts = count_by_severity(&findings);
        assert_eq!(counts.get("major"), Some(&2));
        assert_eq!(counts.get("info"), Some(&1));
        assert_eq!(counts.get("blocker"), None);
    }
}
