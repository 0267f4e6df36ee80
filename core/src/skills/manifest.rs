//! File-based skills: a skill declared as a small TOML manifest rather than
//! compiled Rust. This is how `skill_writer` can add a new skill at runtime
//! without a recompile — it drops a manifest into the skills directory and
//! calls `SkillRegistry::reload()`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{HearthError, Result};
use crate::skills::Skill;

/// `{{args.key}}` placeholders in `command_template` are substituted with
/// the string form of `args["key"]` before the command is split and run.
/// `Serialize` is only exercised by `skill_writer`, which writes a manifest
/// back out to disk; `load_manifests` only ever deserializes one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub description: String,
    pub command_template: String,
}

pub struct ManifestSkill {
    manifest: SkillManifest,
}

#[async_trait]
impl Skill for ManifestSkill {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    async fn run(&self, args: &HashMap<String, serde_json::Value>) -> Result<String> {
        let command_str = substitute(&self.manifest.command_template, args);
        let parts = shell_words::split(&command_str)
            .map_err(|e| HearthError::SkillError { name: self.manifest.name.clone(), message: e.to_string() })?;
        let (program, rest) = parts
            .split_first()
            .ok_or_else(|| HearthError::SkillError {
                name: self.manifest.name.clone(),
                message: "empty command template".to_string(),
            })?;

        let output = Command::new(program)
            .args(rest)
            .output()
            .await
            .map_err(|e| HearthError::SkillError { name: self.manifest.name.clone(), message: e.to_string() })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            combined.push_str("\n--- stderr ---\n");
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        Ok(combined)
    }
}

fn substitute(template: &str, args: &HashMap<String, serde_json::Value>) -> String {
    let mut out = template.to_string();
    for (key, value) in args {
        let placeholder = format!("{{{{args.{}}}}}", key);
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&placeholder, &rendered);
    }
    out
}

/// Reads every `*.toml` file directly under `dir` and parses it as a
/// `SkillManifest`. Missing directory is not an error — a fresh
/// `$AGENT_HOME` simply has no file-based skills yet.
pub async fn load_manifests(dir: &Path) -> Result<Vec<ManifestSkill>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut skills = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path: PathBuf = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let contents = tokio::fs::read_to_string(&path).await?;
        match toml::from_str::<SkillManifest>(&contents) {
            Ok(manifest) => skills.push(ManifestSkill { manifest }),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unparsable skill manifest"),
        }
    }
    Ok(skills)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_named_placeholders() {
        let mut args = HashMap::new();
        args.insert("query".to_string(), serde_json::json!("rustlang"));
        let rendered = substitute("echo {{args.query}}", &args);
        assert_eq!(rendered, "echo rustlang");
    }

    #[tokio::test]
    async fn missing_skills_dir_is_not_an_error() {
        let dir = std::env::temp_dir().join("hearth-manifests-test-missing");
        let manifests = load_manifests(&dir).await.unwrap();
        assert!(manifests.is_empty());
    }

    #[tokio::test]
    async fn loads_a_manifest_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("greet.toml"),
            "name = \"greet\"\ndescription = \"says hi\"\ncommand_template = \"echo hi {{args.name}}\"\n",
        )
        .await
        .unwrap();

        let manifests = load_manifests(dir.path()).await.unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name(), "greet");
    }
}
