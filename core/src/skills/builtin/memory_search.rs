//! Memory-search skill: a thin wrapper over the semantic memory leaf so the
//! model can pull its own prior notes back into context mid-turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HearthError, Result};
use crate::memory::SemanticMemory;
use crate::skills::Skill;

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;

pub struct MemorySearchSkill {
    memory: Arc<dyn SemanticMemory>,
}

impl MemorySearchSkill {
    pub fn new(memory: Arc<dyn SemanticMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Skill for MemorySearchSkill {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Searches logged memory for entries relevant to a query. \
         Args: {\"query\": \"...\", \"limit\": int (default 5, max 20)}."
    }

    async fn run(&self, args: &HashMap<String, serde_json::Value>) -> Result<String> {
        let query = args.get("query").and_then(|v| v.as_str()).ok_or_else(|| HearthError::SkillError {
            name: "memory_search".to_string(),
            message: "missing required \"query\" argument".to_string(),
        })?;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| (n as usize).min(MAX_LIMIT))
            .unwrap_or(DEFAULT_LIMIT);

        let results = self.memory.search(query, limit).await.map_err(|e| HearthError::SkillError {
            name: "memory_search".to_string(),
            message: e.to_string(),
        })?;

        if results.is_empty() {
            return Ok("no matching memory entries".to_string());
        }
        Ok(results.into_iter().enumerate().map(|(i, entry)| format!("{}. {entry}", i + 1)).collect::<Vec<_>>().join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticMemory(Vec<String>);

    #[async_trait]
    impl SemanticMemory for StaticMemory {
        async fn search(&self, _query: &str, limit: usize) -> Result<Vec<String>> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
        async fn log(&self, _entry: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn returns_numbered_results() {
        let skill = MemorySearchSkill::new(Arc::new(StaticMemory(vec!["a".to_string(), "b".to_string()])));
        let mut args = HashMap::new();
        args.insert("query".to_string(), serde_json::json!("anything"));
        let result = skill.run(&args).await.unwrap();
        assert_eq!(result, "1. a\n2. b");
    }

    #[tokio::test]
    async fn empty_results_say_so() {
        let skill = MemorySearchSkill::new(Arc::new(StaticMemory(Vec::new())));
        let mut args = HashMap::new();
        args.insert("query".to_string(), serde_json::json!("anything"));
        let result = skill.run(&args).await.unwrap();
        assert!(result.contains("no matching"));
    }

    #[tokio::test]
    async fn missing_query_argument_is_an_error() {
        let skill = MemorySearchSkill::new(Arc::new(StaticMemory(Vec::new())));
        let err = skill.run(&HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn limit_is_capped() {
        let entries: Vec<String> = (0..30).map(|i| i.to_string()).collect();
        let skill = MemorySearchSkill::new(Arc::new(StaticMemory(entries)));
        let mut args = HashMap::new();
        args.insert("query".to_string(), serde_json::json!("numbers"));
        args.insert("limit".to_string(), serde_json::json!(1000));
        let result = skill.run(&args).await.unwrap();
        assert_eq!(result.lines().count(), MAX_LIMIT);
    }
}
