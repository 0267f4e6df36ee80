//! Skill Registry: maps a skill name to a callable plus its self-description,
//! with hot-reload. Skills are opaque to the Executor — they are its
//! sandboxed effect surface.

pub mod builtin;
pub mod manifest;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{HearthError, Result};

/// `{name, args}` as parsed from a model's `SKILL:` sentinel line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCall {
    pub name: String,
    pub args: HashMap<String, serde_json::Value>,
}

/// A skill result is always a plain string; the Executor truncates it to the
/// configured cap before feeding it back to the model as an observation.
pub type SkillResult = String;

/// A skill: a named, described, callable effect. Held as `Arc<dyn Skill>` —
/// not `Box<dyn Skill>` — so the registry can hand out shared references to
/// callers without needing the trait object to be `Clone`.
#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn run(&self, args: &HashMap<String, serde_json::Value>) -> Result<SkillResult>;
}

/// Dynamic skill registry with hot-reload. Built-in skills are registered in
/// code at construction and survive `reload()`; file-based skills are
/// discovered from `skills_dir` (manifest TOML files, see `manifest.rs`) and
/// are replaced wholesale on every `reload()`.
pub struct SkillRegistry {
    skills_dir: PathBuf,
    builtins: Vec<Arc<dyn Skill>>,
    skills: RwLock<HashMap<String, Arc<dyn Skill>>>,
}

impl SkillRegistry {
    pub fn new(skills_dir: PathBuf, builtins: Vec<Arc<dyn Skill>>) -> Self {
        Self {
            skills_dir,
            builtins,
            skills: RwLock::new(HashMap::new()),
        }
    }

    /// Discovers skills from `skills_dir` at startup and registers the
    /// built-ins. Call once before serving traffic.
    pub async fn load_all(&self) -> Result<()> {
        self.reload().await
    }

    /// Re-scans `skills_dir`, rebuilding the registry from the built-ins plus
    /// whatever manifests currently parse. Used after `skill_writer` drops a
    /// new skill source file into the workspace.
    pub async fn reload(&self) -> Result<()> {
        let mut map: HashMap<String, Arc<dyn Skill>> = HashMap::new();
        for skill in &self.builtins {
            map.insert(skill.name().to_string(), skill.clone());
        }

        match manifest::load_manifests(&self.skills_dir).await {
            Ok(manifests) => {
                for skill in manifests {
                    if map.contains_key(skill.name()) {
                        warn!(skill = skill.name(), "manifest skill shadows a built-in, skipping");
                        continue;
                    }
                    map.insert(skill.name().to_string(), Arc::new(skill) as Arc<dyn Skill>);
                }
            }
            Err(e) => warn!(error = %e, "failed to load skill manifests, continuing with built-ins only"),
        }

        let count = map.len();
        *self.skills.write().await = map;
        info!(count, "skill registry reloaded");
        Ok(())
    }

    pub async fn names(&self) -> Vec<String> {
        self.skills.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Skill>> {
        self.skills.read().await.get(name).cloned()
    }

    /// Invokes `name` with `args`. If the skill is missing, retries once
    /// after a targeted reload (covers the common case of a skill having
    /// just been written to disk). An unknown skill after that is an error
    /// listing the currently available names.
    pub async fn run(&self, call: &SkillCall) -> Result<SkillResult> {
        if let Some(skill) = self.get(&call.name).await {
            return skill.run(&call.args).await;
        }

        self.reload().await?;
        if let Some(skill) = self.get(&call.name).await {
            return skill.run(&call.args).await;
        }

        let available = self.names().await;
        Err(HearthError::SkillNotFound {
            name: format!("{} (available: {})", call.name, available.join(", ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoSkill;

    #[async_trait]
    impl Skill for EchoSkill {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its args back as text"
        }
        async fn run(&self, args: &HashMap<String, serde_json::Value>) -> Result<SkillResult> {
            Ok(serde_json::to_string(args).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn builtins_survive_reload() {
        let registry = SkillRegistry::new(
            std::env::temp_dir().join("hearth-skills-test-nonexistent"),
            vec![Arc::new(EchoSkill)],
        );
        registry.load_all().await.unwrap();
        assert!(registry.get("echo").await.is_some());
        registry.reload().await.unwrap();
        assert!(registry.get("echo").await.is_some());
    }

    #[tokio::test]
    async fn unknown_skill_lists_available_names() {
        let registry = SkillRegistry::new(
            std::env::temp_dir().join("hearth-skills-test-nonexistent-2"),
            vec![Arc::new(EchoSkill)],
        );
        registry.load_all().await.unwrap();
        let err = registry
            .run(&SkillCall { name: "nope".to_string(), args: HashMap::new() })
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("echo"));
    }

    #[tokio::test]
    async fn known_skill_runs_and_returns_its_result() {
        let registry = SkillRegistry::new(
            std::env::temp_dir().join("hearth-skills-test-nonexistent-3"),
            vec![Arc::new(EchoSkill)],
        );
        registry.load_all().await.unwrap();
        let mut args = HashMap::new();
        args.insert("query".to_string(), serde_json::json!("hello"));
        let result = registry
            .run(&SkillCall { name: "echo".to_string(), args })
            .await
            .unwrap();
        assert!(result.contains("hello"));
    }
}
