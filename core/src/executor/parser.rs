//! Parses the text-shaped protocol between the Executor and the model:
//! `<think>` blocks, then the first of a `SKILL:`, `FINAL:`, or `ESCALATE:`
//! sentinel, whichever appears earliest in the reply.

use regex::Regex;

use crate::skills::SkillCall;

/// A `SKILL:` JSON body larger than this is rejected rather than decoded —
/// protects against a runaway model reply with a malformed multi-KB blob.
const SKILL_JSON_CAP_CHARS: usize = 8192;

const MARKERS: [&str; 3] = ["SKILL:", "FINAL:", "ESCALATE:"];

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Final(String),
    Skill(SkillCall),
    Escalate(String),
}

/// Strips every `<think>...</think>` block from `text`, returning the
/// stripped body plus the thinking blocks in order of appearance.
pub fn strip_thinking(text: &str) -> (String, Vec<String>) {
    let re = Regex::new(r"(?s)<think>(.*?)</think>").expect("static pattern compiles");
    let thoughts = re.captures_iter(text).map(|c| c[1].trim().to_string()).collect();
    let stripped = re.replace_all(text, "").to_string();
    (stripped, thoughts)
}

/// Scans `text` for the first `SKILL:`, `FINAL:`, or `ESCALATE:` marker —
/// whichever occurs earliest — and parses the directive it introduces.
/// Returns `None` if the reply contains neither (the Executor treats this
/// as a nudge).
pub fn parse_directive(text: &str) -> Option<Directive> {
    let (pos, marker) = MARKERS
        .iter()
        .filter_map(|m| text.find(m).map(|pos| (pos, *m)))
        .min_by_key(|(pos, _)| *pos)?;

    let after = &text[pos + marker.len()..];
    match marker {
        "SKILL:" => {
            let line = after.lines().next().unwrap_or("").trim();
            let capped: String = line.chars().take(SKILL_JSON_CAP_CHARS).collect();
            serde_json::from_str::<SkillCall>(&capped).ok().map(Directive::Skill)
        }
        "FINAL:" => Some(Directive::Final(after.trim().to_string())),
        "ESCALATE:" => Some(Directive::Escalate(after.trim().to_string())),
        _ => unreachable!(),
    }
}

/// Best-effort text to surface when the tool-call budget runs out before a
/// `FINAL:`/`ESCALATE:` directive ever appeared: strips `<think>` blocks and
/// any line starting with a directive marker, since what's left is whatever
/// prose the model wrote around its last tool call. Falls back to a fixed
/// placeholder if nothing usable remains.
pub fn extract_best_output(raw: &str) -> String {
    let (stripped, _) = strip_thinking(raw);
    let cleaned = stripped
        .lines()
        .filter(|line| !MARKERS.iter().any(|m| line.trim_start().starts_with(m)))
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "No output generated.".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn strips_a_think_block() {
        let (stripped, thoughts) = strip_thinking("<think>pondering</think>FINAL: done");
        assert_eq!(stripped, "FINAL: done");
        assert_eq!(thoughts, vec!["pondering".to_string()]);
    }

    #[test]
    fn text_without_think_blocks_is_unchanged() {
        let (stripped, thoughts) = strip_thinking("FINAL: done");
        assert_eq!(stripped, "FINAL: done");
        assert!(thoughts.is_empty());
    }

    #[test]
    fn parses_a_final_directive() {
        let directive = parse_directive("some reasoning\nFINAL: the answer is 42").unwrap();
        assert_eq!(directive, Directive::Final("the answer is 42".to_string()));
    }

    #[test]
    fn parses_an_escalate_directive() {
        let directive = parse_directive("ESCALATE: this needs a bigger model").unwrap();
        assert_eq!(directive, Directive::Escalate("this needs a bigger model".to_string()));
    }

    #[test]
    fn parses_a_skill_directive() {
        let directive = parse_directive(r#"SKILL: {"name": "shell", "args": {"command": "ls"}}"#).unwrap();
        let mut expected_args = HashMap::new();
        expected_args.insert("command".to_string(), serde_json::json!("ls"));
        assert_eq!(
            directive,
            Directive::Skill(SkillCall { name: "shell".to_string(), args: expected_args })
        );
    }

    #[test]
    fn earliest_marker_wins() {
        let directive = parse_directive("FINAL: nope ESCALATE: also nope").unwrap();
        assert!(matches!(directive, Directive::Final(_)));
    }

    #[test]
    fn neither_marker_present_returns_none() {
        assert_eq!(parse_directive("just some rambling thoughts"), None);
    }

    #[test]
    fn malformed_skill_json_returns_none() {
        assert_eq!(parse_directive("SKILL: not valid json"), None);
    }

    #[test]
    fn extract_best_output_strips_thinking_and_directive_lines() {
        let raw = "<think>let me check the weather</think>Here's what I found so far.\n\
                   SKILL: {\"name\": \"web_search\", \"args\": {}}";
        assert_eq!(extract_best_output(raw), "Here's what I found so far.");
    }

    #[test]
    fn extract_best_output_falls_back_when_nothing_remains() {
        assert_eq!(extract_best_output("<think>only thoughts</think>"), "No output generated.");
        assert_eq!(extract_best_output("SKILL: {\"name\": \"shell\", \"args\": {}}"), "No output generated.");
    }

    #[test]
    fn extract_best_output_keeps_plain_prose_untouched() {
        assert_eq!(extract_best_output("just rambling thoughts, no directive"), "just rambling thoughts, no directive");
    }
}
