//! The Model Gateway: the adapter between the orchestration layer and
//! whatever LLM runtime is actually installed. Exposes `generate`, `chat`,
//! `chat_streaming`, and `embed`, each with a timeout and an error channel
//! that distinguishes out-of-memory from a generic failure so the Router's
//! fallback chain can react appropriately.

use std::str::FromStr;
use std::time::Duration;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{HearthError, Result};
use crate::util::{sanitize_base_url, validate_api_key};

use super::chat::{ChatMessage, ChatOptions, ChatResponse, Role, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAiCompatible,
    GoogleGenerativeAi,
}

impl FromStr for LlmProvider {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "openai_compatible" | "openai-compatible" => Ok(Self::OpenAiCompatible),
            "gemini" | "google" | "google_generative_ai" => Ok(Self::GoogleGenerativeAi),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAiCompatible => write!(f, "openai_compatible"),
            Self::GoogleGenerativeAi => write!(f, "google_generative_ai"),
        }
    }
}

/// A single installed model the gateway knows how to reach. The Router's
/// fallback chain is filtered against the set the gateway reports via
/// `list_models`.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub id: String,
    pub provider: LlmProvider,
    pub base_url: String,
    pub api_key: Option<String>,
}

/// Thin adapter over one or more OpenAI-compatible / Gemini-compatible
/// HTTP endpoints. Holds no model-routing policy of its own — that lives in
/// the Router; the gateway only knows how to speak to a given `ModelSpec`.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    models: Vec<ModelSpec>,
}

impl LlmClient {
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self {
            http: reqwest::Client::new(),
            models,
        }
    }

    /// The installed models, as discovered at process start. Used by the
    /// Router to filter its fallback chain to what's actually reachable.
    pub fn list_models(&self) -> &[ModelSpec] {
        &self.models
    }

    fn spec(&self, model_id: &str) -> Result<&ModelSpec> {
        self.models
            .iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| HearthError::Internal {
                message: format!("model not installed: {model_id}"),
            })
    }

    /// Single-turn convenience wrapper over `chat`.
    pub async fn generate(
        &self,
        model_id: &str,
        prompt: &str,
        options: ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        self.chat(model_id, &[ChatMessage::user(prompt)], options, cancel).await
    }

    /// Non-streaming chat completion with retry-with-backoff and
    /// cancellation support.
    pub async fn chat(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let spec = self.spec(model_id)?.clone();
        self.retry_with_backoff(cancel, || self.chat_once(&spec, messages, options)).await
    }

    async fn chat_once(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse> {
        match spec.provider {
            LlmProvider::OpenAiCompatible => self.chat_openai(spec, messages, options).await,
            LlmProvider::GoogleGenerativeAi => self.chat_gemini(spec, messages, options).await,
        }
    }

    /// Streaming chat completion; each token is yielded as it arrives. The
    /// caller is responsible for forwarding tokens to its own channel in a
    /// non-blocking way and for parsing the accumulated reply once the
    /// stream ends.
    pub fn chat_stream<'a>(
        &'a self,
        model_id: &'a str,
        messages: &'a [ChatMessage],
        options: ChatOptions,
    ) -> impl Stream<Item = Result<String>> + 'a {
        stream! {
            let spec = match self.spec(model_id) {
                Ok(s) => s.clone(),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            match spec.provider {
                LlmProvider::OpenAiCompatible => {
                    let mut inner = Box::pin(self.chat_stream_openai(&spec, messages, options));
                    while let Some(item) = inner.next().await {
                        yield item;
                    }
                }
                LlmProvider::GoogleGenerativeAi => {
                    // Gemini streaming is not yet wired up; fall back to a
                    // single non-streamed chunk so callers still get a
                    // complete reply to parse.
                    match self.chat_gemini(&spec, messages, options).await {
                        Ok(resp) => yield Ok(resp.content),
                        Err(e) => yield Err(e),
                    }
                }
            }
        }
    }

    /// Embedding call, used by the semantic-memory leaf's small LRU cache.
    pub async fn embed(&self, model_id: &str, text: &str) -> Result<Vec<f32>> {
        let spec = self.spec(model_id)?;
        let url = format!("{}/embeddings", spec.base_url.trim_end_matches('/'));
        let mut req = self.http.post(&url).json(&json!({ "model": model_id, "input": text }));
        if let Some(key) = &spec.api_key {
            req = req.bearer_auth(key);
        }

        #[derive(Deserialize)]
        struct EmbedResponse {
            data: Vec<EmbedDatum>,
        }
        #[derive(Deserialize)]
        struct EmbedDatum {
            embedding: Vec<f32>,
        }

        let resp = req
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| HearthError::NetworkError { model: model_id.to_string(), message: e.to_string() })?;

        Self::raise_for_status(model_id, resp.status().as_u16())?;

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| HearthError::Internal { message: format!("bad embed response: {e}") })?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| HearthError::Internal { message: "empty embedding response".to_string() })
    }

    /// Exponential backoff with jitter around a single attempt, honoring
    /// `Retry-After` when the error carries one, and bailing out early if
    /// the cancellation token fires (a user pre-emption between tool
    /// calls).
    async fn retry_with_backoff<F, Fut>(&self, cancel: &CancellationToken, attempt: F) -> Result<ChatResponse>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<ChatResponse>>,
    {
        const MAX_ATTEMPTS: u32 = 4;
        let mut last_err = None;

        for attempt_no in 0..MAX_ATTEMPTS {
            if cancel.is_cancelled() {
                return Err(HearthError::CancelledByUser);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HearthError::CancelledByUser),
                result = attempt() => result,
            };

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_oom() => return Err(e),
                Err(e) if e.is_retryable() && attempt_no + 1 < MAX_ATTEMPTS => {
                    let base = e.retry_delay().unwrap_or_else(|| Duration::from_secs(1));
                    let jitter_ms = rand::thread_rng().gen_range(0..250);
                    let backoff = base * 2u32.pow(attempt_no) + Duration::from_millis(jitter_ms);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err(HearthError::CancelledByUser),
                    }
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(HearthError::Internal { message: "retry loop exhausted".to_string() }))
    }

    fn raise_for_status(model_id: &str, status: u16) -> Result<()> {
        match status {
            200..=299 => Ok(()),
            // Providers signal OOM/capacity exhaustion via 503 with no
            // Retry-After, or a dedicated 500 in local runtimes; both are
            // treated as an OOM signal so the Router's fallback chain
            // engages rather than retrying the same model.
            503 => Err(HearthError::ModelOom { model: model_id.to_string() }),
            429 => Err(HearthError::RateLimitExceeded { limit_type: model_id.to_string() }),
            status => Err(HearthError::ProviderError { status, message: format!("provider returned {status}") }),
        }
    }

    async fn chat_openai(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse> {
        let url = sanitize_base_url(&spec.base_url, "base_url")?;
        let url = format!("{}/chat/completions", url.trim_end_matches('/'));

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }

        let wire_messages: Vec<Msg> = messages
            .iter()
            .map(|m| Msg {
                role: match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        let body = json!({
            "model": spec.id,
            "messages": wire_messages,
            "temperature": options.temperature,
            "max_completion_tokens": options.max_tokens,
        });

        let mut req = self.http.post(&url).json(&body);
        if let Some(key) = &spec.api_key {
            let key = validate_api_key(key)?;
            req = req.bearer_auth(key);
        }

        let resp = req
            .timeout(Duration::from_secs(options.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HearthError::ModelTimeout {
                        model: spec.id.clone(),
                        duration: Duration::from_secs(options.timeout_secs),
                    }
                } else {
                    HearthError::NetworkError { model: spec.id.clone(), message: e.to_string() }
                }
            })?;

        Self::raise_for_status(&spec.id, resp.status().as_u16())?;

        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }
        #[derive(Deserialize)]
        struct Usage {
            prompt_tokens: u32,
            completion_tokens: u32,
            total_tokens: u32,
        }

        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| HearthError::Internal { message: format!("bad chat response: {e}") })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| HearthError::Internal { message: "empty choices array".to_string() })?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(ChatResponse { content, usage, model: spec.id.clone() })
    }

    fn chat_stream_openai<'a>(
        &'a self,
        spec: &'a ModelSpec,
        messages: &'a [ChatMessage],
        options: ChatOptions,
    ) -> impl Stream<Item = Result<String>> + 'a {
        stream! {
            let url = match sanitize_base_url(&spec.base_url, "base_url") {
                Ok(u) => format!("{}/chat/completions", u.trim_end_matches('/')),
                Err(e) => { yield Err(e); return; }
            };

            #[derive(Serialize)]
            struct Msg<'b> { role: &'b str, content: &'b str }
            let wire_messages: Vec<Msg> = messages.iter().map(|m| Msg {
                role: match m.role { Role::System => "system", Role::User => "user", Role::Assistant => "assistant" },
                content: &m.content,
            }).collect();

            let body = json!({
                "model": spec.id,
                "messages": wire_messages,
                "temperature": options.temperature,
                "max_completion_tokens": options.max_tokens,
                "stream": true,
            });

            let mut req = self.http.post(&url).json(&body);
            if let Some(key) = &spec.api_key {
                match validate_api_key(key) {
                    Ok(key) => req = req.bearer_auth(key),
                    Err(e) => { yield Err(e); return; }
                }
            }

            let resp = match req.timeout(Duration::from_secs(options.timeout_secs)).send().await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(HearthError::NetworkError { model: spec.id.clone(), message: e.to_string() });
                    return;
                }
            };

            if let Err(e) = Self::raise_for_status(&spec.id, resp.status().as_u16()) {
                yield Err(e);
                return;
            }

            let mut byte_stream = resp.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => { yield Err(HearthError::NetworkError { model: spec.id.clone(), message: e.to_string() }); return; }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        return;
                    }

                    #[derive(Deserialize)]
                    struct StreamChunk { choices: Vec<StreamChoice> }
                    #[derive(Deserialize)]
                    struct StreamChoice { delta: Delta }
                    #[derive(Deserialize, Default)]
                    struct Delta { #[serde(default)] content: Option<String> }

                    if let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) {
                        if let Some(choice) = parsed.choices.into_iter().next() {
                            if let Some(token) = choice.delta.content {
                                yield Ok(token);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn chat_gemini(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<ChatResponse> {
        let url = sanitize_base_url(&spec.base_url, "base_url")?;
        let key = spec.api_key.as_deref().unwrap_or("");
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            url.trim_end_matches('/'),
            spec.id,
            key
        );

        // Gemini has no system role; fold any system message into the
        // first user turn instead.
        let mut system_instruction: Option<String> = None;
        let mut contents = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => system_instruction = Some(msg.content.clone()),
                Role::User | Role::Assistant => {
                    let role = if msg.role == Role::Assistant { "model" } else { "user" };
                    contents.push(json!({ "role": role, "parts": [{ "text": msg.content }] }));
                }
            }
        }
        if let (Some(instruction), Some(first)) = (&system_instruction, contents.first_mut()) {
            if let Some(parts) = first.get_mut("parts").and_then(|p| p.as_array_mut()) {
                if let Some(serde_json::Value::Object(part)) = parts.first_mut() {
                    if let Some(serde_json::Value::String(text)) = part.get_mut("text") {
                        *text = format!("{instruction}\n\n{text}");
                    }
                }
            }
        }

        let body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": options.temperature,
                "maxOutputTokens": options.max_tokens,
            }
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(options.timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HearthError::ModelTimeout { model: spec.id.clone(), duration: Duration::from_secs(options.timeout_secs) }
                } else {
                    HearthError::NetworkError { model: spec.id.clone(), message: e.to_string() }
                }
            })?;

        Self::raise_for_status(&spec.id, resp.status().as_u16())?;

        #[derive(Deserialize)]
        struct Resp {
            candidates: Vec<Candidate>,
        }
        #[derive(Deserialize)]
        struct Candidate {
            content: Content,
        }
        #[derive(Deserialize)]
        struct Content {
            parts: Vec<Part>,
        }
        #[derive(Deserialize)]
        struct Part {
            text: String,
        }

        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| HearthError::Internal { message: format!("bad gemini response: {e}") })?;

        let content = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| HearthError::Internal { message: "empty gemini response".to_string() })?;

        Ok(ChatResponse { content, usage: TokenUsage::default(), model: spec.id.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_str_round_trips() {
        assert_eq!(LlmProvider::from_str("openai").unwrap(), LlmProvider::OpenAiCompatible);
        assert_eq!(LlmProvider::from_str("gemini").unwrap(), LlmProvider::GoogleGenerativeAi);
        assert!(LlmProvider::from_str("nonsense").is_err());
    }

    #[test]
    fn raise_for_status_maps_503_to_oom() {
        let err = LlmClient::raise_for_status("big-model", 503).unwrap_err();
        assert!(err.is_oom());
    }

    #[test]
    fn raise_for_status_maps_429_to_rate_limit() {
        let err = LlmClient::raise_for_status("model", 429).unwrap_err();
        assert!(matches!(err, HearthError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn chat_rejects_unknown_model() {
        let client = LlmClient::new(vec![]);
        let cancel = CancellationToken::new();
        let result = client
            .chat("missing-model", &[ChatMessage::user("hi")], ChatOptions::default(), &cancel)
            .await;
        assert!(result.is_err());
    }
}
