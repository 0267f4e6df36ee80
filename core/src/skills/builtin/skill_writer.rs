//! Skill-writer skill: the self-improvement loop's write path. Drops a new
//! `SkillManifest` TOML file into the skills directory and reloads the
//! registry so the new skill is callable in the very next turn.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::{HearthError, Result};
use crate::skills::manifest::SkillManifest;
use crate::skills::{Skill, SkillRegistry};

/// Names reserved for built-ins; a manifest under one of these is silently
/// shadowed by `SkillRegistry::reload()`, so refuse it up front with a
/// clearer message than a silent no-op.
const RESERVED_NAMES: &[&str] = &["shell", "memory_search", "web_search", "skill_writer"];

/// Holds a `Weak` handle rather than `Arc<SkillRegistry>`: this skill is
/// itself one of the registry's builtins, so the registry can't hand out a
/// strong reference to itself before it exists. Built via
/// `Arc::new_cyclic` at startup; see `src/main.rs`.
pub struct SkillWriterSkill {
    registry: Weak<SkillRegistry>,
    skills_dir: std::path::PathBuf,
}

impl SkillWriterSkill {
    pub fn new(registry: Weak<SkillRegistry>, skills_dir: std::path::PathBuf) -> Self {
        Self { registry, skills_dir }
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(HearthError::SkillError {
                name: "skill_writer".to_string(),
                message: format!("\"{name}\" is not a valid skill name (use letters, digits, underscore)"),
            });
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(HearthError::SkillError {
                name: "skill_writer".to_string(),
                message: format!("\"{name}\" is a built-in skill name and cannot be overridden"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Skill for SkillWriterSkill {
    fn name(&self) -> &str {
        "skill_writer"
    }

    fn description(&self) -> &str {
        "Creates a new command-template skill and reloads the registry. Args: \
         {\"name\": \"...\", \"description\": \"...\", \"command_template\": \"echo {{args.x}}\"}."
    }

    async fn run(&self, args: &HashMap<String, serde_json::Value>) -> Result<String> {
        let name = args.get("name").and_then(|v| v.as_str()).ok_or_else(|| HearthError::SkillError {
            name: "skill_writer".to_string(),
            message: "missing required \"name\" argument".to_string(),
        })?;
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HearthError::SkillError {
                name: "skill_writer".to_string(),
                message: "missing required \"description\" argument".to_string(),
            })?;
        let command_template = args
            .get("command_template")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HearthError::SkillError {
                name: "skill_writer".to_string(),
                message: "missing required \"command_template\" argument".to_string(),
            })?;

        Self::validate_name(name)?;

        let manifest = SkillManifest {
            name: name.to_string(),
            description: description.to_string(),
            command_template: command_template.to_string(),
        };
        let toml_string = toml::to_string_pretty(&manifest).map_err(|e| HearthError::SkillError {
            name: "skill_writer".to_string(),
            message: format!("failed to serialize manifest: {e}"),
        })?;

        tokio::fs::create_dir_all(&self.skills_dir).await.map_err(|e| HearthError::SkillError {
            name: "skill_writer".to_string(),
            message: format!("could not create skills directory: {e}"),
        })?;
        let path = self.skills_dir.join(format!("{name}.toml"));
        tokio::fs::write(&path, toml_string).await.map_err(|e| HearthError::SkillError {
            name: "skill_writer".to_string(),
            message: format!("could not write manifest: {e}"),
        })?;

        let registry = self.registry.upgrade().ok_or_else(|| HearthError::SkillError {
            name: "skill_writer".to_string(),
            message: "skill registry has been dropped".to_string(),
        })?;
        registry.reload().await?;

        if registry.get(name).await.is_none() {
            return Err(HearthError::SkillError {
                name: "skill_writer".to_string(),
                message: format!("wrote {} but it did not register after reload", path.display()),
            });
        }

        Ok(format!("created skill \"{name}\" at {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_a_manifest_and_it_becomes_callable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SkillRegistry::new(dir.path().to_path_buf(), Vec::new()));
        registry.load_all().await.unwrap();
        let writer = SkillWriterSkill::new(Arc::downgrade(&registry), dir.path().to_path_buf());

        let mut args = HashMap::new();
        args.insert("name".to_string(), serde_json::json!("greet"));
        args.insert("description".to_string(), serde_json::json!("says hi"));
        args.insert("command_template".to_string(), serde_json::json!("echo hi {{args.name}}"));

        let result = writer.run(&args).await.unwrap();
        assert!(result.contains("greet"));
        assert!(registry.get("greet").await.is_some());
    }

    #[tokio::test]
    async fn refuses_to_override_a_built_in_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SkillRegistry::new(dir.path().to_path_buf(), Vec::new()));
        let writer = SkillWriterSkill::new(Arc::downgrade(&registry), dir.path().to_path_buf());

        let mut args = HashMap::new();
        args.insert("name".to_string(), serde_json::json!("shell"));
        args.insert("description".to_string(), serde_json::json!("x"));
        args.insert("command_template".to_string(), serde_json::json!("echo x"));

        let err = writer.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("built-in"));
    }

    #[tokio::test]
    async fn refuses_an_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SkillRegistry::new(dir.path().to_path_buf(), Vec::new()));
        let writer = SkillWriterSkill::new(Arc::downgrade(&registry), dir.path().to_path_buf());

        let mut args = HashMap::new();
        args.insert("name".to_string(), serde_json::json!("not valid!"));
        args.insert("description".to_string(), serde_json::json!("x"));
        args.insert("command_template".to_string(), serde_json::json!("echo x"));

        let err = writer.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("not a valid skill name"));
    }
}
