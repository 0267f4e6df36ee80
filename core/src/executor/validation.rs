//! Post-execution output validation: a category-specific check that catches
//! empty, refused, truncated, or structurally-wrong FINAL answers before
//! they're accepted. Failure reasons feed back into the retry prompt.

const REFUSAL_PHRASES: &[&str] = &[
    "i cannot",
    "i can't",
    "as an ai",
    "i'm unable to",
    "i am unable to",
    "i'm not able to",
];

const INCOMPLETE_MARKERS: &[&str] = &["to be continued", "[truncated]", "...(continued)"];

fn min_length_for(category: &str) -> usize {
    match category {
        "coding" => 100,
        "skill_writing" => 150,
        "math" => 10,
        "creative_writing" => 60,
        _ => 20,
    }
}

/// Returns `Ok(())` if `output` passes every check for `category`, otherwise
/// `Err(reason)` describing the first failure.
pub fn validate_output(category: &str, output: &str) -> Result<(), String> {
    if output.trim().is_empty() {
        return Err("output is empty".to_string());
    }

    let lower = output.to_lowercase();
    for phrase in REFUSAL_PHRASES {
        if lower.contains(phrase) {
            return Err(format!("output contains a refusal phrase: \"{phrase}\""));
        }
    }
    for marker in INCOMPLETE_MARKERS {
        if lower.contains(marker) {
            return Err(format!("output looks incomplete: contains \"{marker}\""));
        }
    }

    let min_len = min_length_for(category);
    if output.chars().count() < min_len {
        return Err(format!(
            "output is {} characters, short of the {min_len}-character minimum for category '{category}'",
            output.chars().count()
        ));
    }

    match category {
        "coding" => {
            if !has_code_marker(output) {
                return Err("coding output has no recognizable code markers".to_string());
            }
        }
        "math" => {
            if !output.chars().any(|c| c.is_ascii_digit()) {
                return Err("math output contains no digits".to_string());
            }
        }
        "skill_writing" => {
            if !lower.contains("description") {
                return Err("skill_writing output is missing a DESCRIPTION section".to_string());
            }
            if !has_code_marker(output) {
                return Err("skill_writing output has no function definition".to_string());
            }
        }
        _ => {}
    }

    Ok(())
}

fn has_code_marker(output: &str) -> bool {
    output.contains("```") || output.contains("fn ") || output.contains("def ") || output.contains("function ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_fails() {
        assert!(validate_output("general_chat", "   ").is_err());
    }

    #[test]
    fn refusal_phrase_fails_regardless_of_category() {
        let err = validate_output("general_chat", "I cannot help with that request at all, sorry.");
        assert!(err.is_err());
    }

    #[test]
    fn short_coding_output_fails_length_check() {
        assert!(validate_output("coding", "```fn main() {}```").is_err());
    }

    #[test]
    fn coding_output_without_code_markers_fails() {
        let prose = "a".repeat(120);
        assert!(validate_output("coding", &prose).is_err());
    }

    #[test]
    fn valid_coding_output_passes() {
        let output = format!("```rust\nfn main() {{\n    println!(\"hi\");\n}}\n```\n{}", "explanation ".repeat(10));
        assert!(validate_output("coding", &output).is_ok());
    }

    #[test]
    fn math_output_without_digits_fails() {
        assert!(validate_output("math", "the answer is clearly correct and final").is_err());
    }

    #[test]
    fn skill_writing_requires_description_and_function() {
        let missing_fn = format!("DESCRIPTION: does a thing.\n{}", "padding ".repeat(20));
        assert!(validate_output("skill_writing", &missing_fn).is_err());

        let complete = format!(
            "DESCRIPTION: does a thing.\nfn run() {{ /* ... */ }}\n{}",
            "padding ".repeat(20)
        );
        assert!(validate_output("skill_writing", &complete).is_ok());
    }

    #[test]
    fn general_chat_only_needs_minimum_length() {
        assert!(validate_output("general_chat", "sure, happy to help with that today").is_ok());
    }
}
