//! Shell skill: runs a single command through the allowlist and safety
//! checker, refusing anything that requires force unless the caller asks
//! for it and refusing destructive patterns outright.

mod allowlist;
mod safety;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{HearthError, Result};
use crate::skills::Skill;

pub use allowlist::{AllowlistLevel, CommandAllowlist};
pub use safety::{CommandSafety, SafetyChecker};

const OUTPUT_CAP_CHARS: usize = 6144;

pub struct ShellSkill {
    allowlist: CommandAllowlist,
    safety: SafetyChecker,
}

impl Default for ShellSkill {
    fn default() -> Self {
        Self {
            allowlist: CommandAllowlist::default(),
            safety: SafetyChecker::new(),
        }
    }
}

#[async_trait]
impl Skill for ShellSkill {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Runs a single allowlisted shell command. Args: {\"command\": \"...\", \"force\": bool}. \
         File ops and network commands need force: true; destructive patterns are always refused."
    }

    async fn run(&self, args: &HashMap<String, serde_json::Value>) -> Result<String> {
        let command_str = args.get("command").and_then(|v| v.as_str()).ok_or_else(|| {
            HearthError::SkillError {
                name: "shell".to_string(),
                message: "missing required \"command\" argument".to_string(),
            }
        })?;
        let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);

        let parts = shell_words::split(command_str).map_err(|e| HearthError::SkillError {
            name: "shell".to_string(),
            message: format!("could not parse command: {e}"),
        })?;
        let (program, rest) = parts.split_first().ok_or_else(|| HearthError::SkillError {
            name: "shell".to_string(),
            message: "empty command".to_string(),
        })?;

        let safety = self.safety.assess(command_str, program, rest);
        if safety.is_dangerous() {
            return Err(HearthError::SkillError {
                name: "shell".to_string(),
                message: format!("refused to run a dangerous command: {}", safety.reason()),
            });
        }

        let level = self.allowlist.get_safety_level(program);
        if level == AllowlistLevel::Blocked {
            return Err(HearthError::SkillError {
                name: "shell".to_string(),
                message: format!("'{program}' is blocked"),
            });
        }
        if level.requires_force() && !force {
            return Err(HearthError::SkillError {
                name: "shell".to_string(),
                message: format!(
                    "'{program}' is {} and requires force: true to run",
                    level.description()
                ),
            });
        }

        let output = Command::new(program).args(rest).output().await.map_err(|e| {
            HearthError::SkillError {
                name: "shell".to_string(),
                message: e.to_string(),
            }
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            combined.push_str("\n--- stderr ---\n");
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        if !output.status.success() {
            combined.push_str(&format!("\n--- exit status: {} ---", output.status));
        }
        if combined.chars().count() > OUTPUT_CAP_CHARS {
            combined = combined.chars().take(OUTPUT_CAP_CHARS).collect();
        }
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_safe_allowlisted_command() {
        let skill = ShellSkill::default();
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("echo hello"));
        let result = skill.run(&args).await.unwrap();
        assert!(result.contains("hello"));
    }

    #[tokio::test]
    async fn refuses_a_command_that_requires_force() {
        let skill = ShellSkill::default();
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("curl https://example.com"));
        let err = skill.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("force"));
    }

    #[tokio::test]
    async fn runs_a_force_command_when_force_is_set() {
        let skill = ShellSkill::default();
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("mkdir -p /tmp/hearth-shell-test"));
        args.insert("force".to_string(), serde_json::json!(true));
        let result = skill.run(&args).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn refuses_a_destructive_pattern_even_with_force() {
        let skill = ShellSkill::default();
        let mut args = HashMap::new();
        args.insert("command".to_string(), serde_json::json!("rm -rf /tmp/whatever"));
        args.insert("force".to_string(), serde_json::json!(true));
        let err = skill.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("dangerous"));
    }

    #[tokio::test]
    async fn missing_command_argument_is_an_error() {
        let skill = ShellSkill::default();
        let err = skill.run(&HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("command"));
    }
}
