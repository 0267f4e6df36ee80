//! Web-search skill: a stub HTTP call to a configurable search endpoint.
//! No search provider is bundled — this hits whatever endpoint the
//! deployment points it at (a local SearXNG instance, a hosted API, etc.)
//! and returns the provider's response body as-is, capped to a sane size.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{HearthError, Result};
use crate::skills::Skill;
use crate::util::sanitize_base_url;

const RESULT_CAP_CHARS: usize = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Queries a single configured endpoint with `?q=<query>` and expects a
/// `{"results": [{"title", "snippet", "url"}]}` JSON body back. Absent a
/// configured endpoint, the skill reports so explicitly rather than
/// fabricating search results.
pub struct WebSearchSkill {
    http: reqwest::Client,
    endpoint: Option<String>,
}

impl WebSearchSkill {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint.and_then(|url| sanitize_base_url(&url, "web search endpoint").ok());
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            endpoint,
        }
    }
}

#[async_trait]
impl Skill for WebSearchSkill {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Searches the web via the configured search endpoint. Args: {\"query\": \"...\"}."
    }

    async fn run(&self, args: &HashMap<String, serde_json::Value>) -> Result<String> {
        let query = args.get("query").and_then(|v| v.as_str()).ok_or_else(|| HearthError::SkillError {
            name: "web_search".to_string(),
            message: "missing required \"query\" argument".to_string(),
        })?;

        let Some(endpoint) = &self.endpoint else {
            return Err(HearthError::SkillError {
                name: "web_search".to_string(),
                message: "no search endpoint is configured for this deployment".to_string(),
            });
        };

        let response = self
            .http
            .get(endpoint)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| HearthError::SkillError {
                name: "web_search".to_string(),
                message: format!("search request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(HearthError::SkillError {
                name: "web_search".to_string(),
                message: format!("search endpoint returned {}", response.status()),
            });
        }

        let body: SearchResponse = response.json().await.map_err(|e| HearthError::SkillError {
            name: "web_search".to_string(),
            message: format!("could not parse search response: {e}"),
        })?;

        if body.results.is_empty() {
            return Ok("no results".to_string());
        }

        let mut rendered = body
            .results
            .iter()
            .map(|r| format!("- {} ({})\n  {}", r.title, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n");
        if rendered.chars().count() > RESULT_CAP_CHARS {
            rendered = rendered.chars().take(RESULT_CAP_CHARS).collect();
            rendered.push_str("\n...[truncated]");
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_query_argument_is_an_error() {
        let skill = WebSearchSkill::new(Some("https://example.com/search".to_string()));
        let err = skill.run(&HashMap::new()).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn no_endpoint_configured_is_an_explicit_error() {
        let skill = WebSearchSkill::new(None);
        let mut args = HashMap::new();
        args.insert("query".to_string(), serde_json::json!("rust async traits"));
        let err = skill.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("no search endpoint"));
    }

    #[tokio::test]
    async fn unparsable_endpoint_is_treated_as_unconfigured() {
        let skill = WebSearchSkill::new(Some("not-a-url".to_string()));
        let mut args = HashMap::new();
        args.insert("query".to_string(), serde_json::json!("x"));
        let err = skill.run(&args).await.unwrap_err();
        assert!(err.to_string().contains("no search endpoint"));
    }
}
