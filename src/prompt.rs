//! Review prompt construction.
//!
//! Builds the system and user prompts for one file's analysis. The user
//! prompt carries the applicable rules (with their checklists) and the
//! numbered file body; the response contract is a JSON object with an
//! `issues` array matching the translation layer's expected shape.

use std::fmt::Write;

use crate::models::{FileUnit, Rule};

pub fn build_system_prompt(pack_name: &str) -> String {
    format!(
        "You are a rigorous code reviewer applying the '{}' rule pack. \
         Report only real, demonstrable problems covered by the given rules. \
         Respond with a single JSON object: {{\"issues\": [...]}}. Each issue \
         has rule_id, level (blocker|critical|major|minor|info), location \
         {{start_line, end_line}}, title, why, do (list of remediation \
         steps), confidence (0..1), and optional tags. Line numbers are \
         1-based. If nothing is wrong, return {{\"issues\": []}}.",
        pack_name
    )
}

pub fn build_user_prompt(unit: &FileUnit, rules: &[&Rule]) -> String {
    let mut prompt = String::new();

    prompt.push_str("Rules to apply:\n\n");
    for rule in rules {
        let _ = writeln!(prompt, "- {} [{}] {}", rule.id, rule.severity, rule.name);
        if !rule.description.is_empty() {
            let _ = writeln!(prompt, "  {}", rule.description);
        }
        for check in &rule.checklist {
            let _ = writeln!(prompt, "  * {}", check);
        }
    }

    let _ = writeln!(prompt, "\nFile: {}\n", unit.path.display());
    for (i, line) in unit.content.lines().enumerate() {
        let _ = writeln!(prompt, "{:>5} | {}", i + 1, line);
    }

    prompt
}
