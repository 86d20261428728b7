//! LLM backend trait and concrete implementations.
//!
//! PaperScout only needs two things from a model: a short completion
//! (relevance scores, rewritten queries) and text embeddings for the
//! similarity index.
//!
//! Backends:
//!   OllamaBackend           — local Ollama (OpenAI-compatible chat, /api/embeddings)
//!   OpenAiCompatibleBackend — OpenAI or any OpenAI-compatible endpoint (vLLM, LMStudio, Groq, …)
//!   GeminiBackend           — Google Gemini API (generateContent, batchEmbedContents)

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
    #[error("expected {expected} embeddings, got {got}")]
    EmbeddingCount { expected: usize, got: usize },
}

// ── Request / Response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    /// A two-message (system + user) request, the shape every PaperScout prompt uses.
    pub fn prompt(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
            ..Default::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn max_tokens_or_default(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    fn temperature_or_default(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }
}

const DEFAULT_MAX_TOKENS: u32 = 512;
const DEFAULT_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError>;
    /// One vector per input text, in input order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError>;
    fn model_id(&self) -> &str;
    fn is_local(&self) -> bool;
}

// ── Shared HTTP plumbing ──────────────────────────────────────────────────────

/// HTTP timeout applied to backend requests unless overridden.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        warn!(error = %e, "failed to build LLM HTTP client, using reqwest defaults");
        reqwest::Client::new()
    })
}

/// Maps 429 and 4xx/5xx bodies to `LlmError`, then decodes the payload.
async fn read_json<T: for<'de> Deserialize<'de>>(resp: reqwest::Response) -> Result<T, LlmError> {
    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(LlmError::RateLimitExceeded);
    }
    let text = resp.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .ok()
            .and_then(ErrorEnvelope::message)
            .unwrap_or_else(|| text.chars().take(200).collect());
        return Err(LlmError::ApiError { status: status.as_u16(), message });
    }
    Ok(serde_json::from_str(&text)?)
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorDetail>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured { message: String },
    Plain(String),
}

impl ErrorEnvelope {
    fn message(self) -> Option<String> {
        match self.error {
            Some(ErrorDetail::Structured { message }) | Some(ErrorDetail::Plain(message)) => Some(message),
            None => self.message,
        }
    }
}

fn check_count(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, LlmError> {
    if vectors.len() != expected {
        return Err(LlmError::EmbeddingCount { expected, got: vectors.len() });
    }
    Ok(vectors)
}

// ── OpenAI-shaped chat completions (Ollama and compatible servers) ────────────

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatReply {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatReply {
    fn into_response(self, fallback_model: &str) -> LlmResponse {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        LlmResponse {
            content,
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            prompt_tokens: self.usage.prompt_tokens,
            completion_tokens: self.usage.completion_tokens,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingReply {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingReply {
    /// Restores input order when the server reports indices.
    fn into_vectors(mut self) -> Vec<Vec<f32>> {
        if self.data.iter().all(|d| d.index.is_some()) {
            self.data.sort_by_key(|d| d.index);
        }
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

/// A base URL plus optional bearer key speaking `/v1/chat/completions`.
struct ChatEndpoint {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl ChatEndpoint {
    fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.client = http_client(timeout);
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.client.post(self.url(path));
        match &self.api_key {
            Some(k) => req.bearer_auth(k),
            None => req,
        }
    }

    async fn chat(&self, default_model: &str, req: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = req.model.as_deref().unwrap_or(default_model);
        let body = ChatBody {
            model,
            messages: &req.messages,
            max_tokens: req.max_tokens_or_default(),
            temperature: req.temperature_or_default(),
        };
        let resp = self.post("/v1/chat/completions").json(&body).send().await?;
        let reply: ChatReply = read_json(resp).await?;
        Ok(reply.into_response(model))
    }

    fn is_loopback(&self) -> bool {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| matches!(h, "localhost" | "127.0.0.1" | "[::1]")))
            .unwrap_or(false)
    }
}

// ── 1. Ollama (local) ─────────────────────────────────────────────────────────

pub struct OllamaBackend {
    pub model: String,
    pub embedding_model: Option<String>,
    endpoint: ChatEndpoint,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self { model: model.into(), embedding_model: None, endpoint: ChatEndpoint::new(base_url.into(), None) }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.set_timeout(timeout);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.endpoint.timeout
    }
}

#[derive(Deserialize)]
struct OllamaEmbedding {
    embedding: Vec<f32>,
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.endpoint.chat(&self.model, &req).await
    }

    /// `/api/embeddings` takes one prompt per call.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self.embedding_model.as_deref().unwrap_or(&self.model);
        let mut out = Vec::with_capacity(texts.len());
        for text in &texts {
            let body = serde_json::json!({ "model": model, "prompt": text });
            let resp = self.endpoint.post("/api/embeddings").json(&body).send().await?;
            let reply: OllamaEmbedding = read_json(resp).await?;
            out.push(reply.embedding);
        }
        Ok(out)
    }

    fn model_id(&self) -> &str { &self.model }
    fn is_local(&self) -> bool { true }
}

// ── 2. OpenAI / OpenAI-compatible ────────────────────────────────────────────

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiCompatibleBackend {
    pub model: String,
    pub embedding_model: Option<String>,
    endpoint: ChatEndpoint,
}

impl OpenAiCompatibleBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self { model: model.into(), embedding_model: None, endpoint: ChatEndpoint::new(base_url.into(), api_key) }
    }

    /// The hosted OpenAI API with `text-embedding-3-small` for embeddings.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(OPENAI_BASE_URL, model, Some(api_key.into())).with_embedding_model("text-embedding-3-small")
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint.set_timeout(timeout);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.endpoint.timeout
    }

    pub fn base_url(&self) -> &str {
        &self.endpoint.base_url
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.endpoint.chat(&self.model, &req).await
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self.embedding_model.as_deref().unwrap_or(&self.model);
        let expected = texts.len();
        let body = serde_json::json!({ "model": model, "input": texts });
        let resp = self.endpoint.post("/v1/embeddings").json(&body).send().await?;
        let reply: EmbeddingReply = read_json(resp).await?;
        check_count(expected, reply.into_vectors())
    }

    fn model_id(&self) -> &str { &self.model }
    fn is_local(&self) -> bool { self.endpoint.is_loopback() }
}

// ── 3. Google Gemini ──────────────────────────────────────────────────────────

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiBackend {
    pub model: String,
    pub embedding_model: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBody {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GeminiGeneration,
}

#[derive(Serialize, Deserialize, Default)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGeneration {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiReply {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: GeminiUsage,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Deserialize)]
struct GeminiEmbeddings {
    #[serde(default)]
    embeddings: Vec<GeminiValues>,
}

#[derive(Deserialize)]
struct GeminiValues {
    values: Vec<f32>,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-004".to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            client: http_client(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.client = http_client(timeout);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    fn body(req: &LlmRequest) -> GeminiBody {
        let text = |m: &Message| vec![GeminiPart { text: m.content.clone() }];
        // Gemini takes a single system instruction outside the turn list.
        let system_instruction = req
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| GeminiContent { role: None, parts: text(m) });
        let contents = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| GeminiContent {
                role: Some(if m.role == Role::Assistant { "model" } else { "user" }.to_string()),
                parts: text(m),
            })
            .collect();
        GeminiBody {
            contents,
            system_instruction,
            generation_config: GeminiGeneration {
                max_output_tokens: req.max_tokens_or_default(),
                temperature: req.temperature_or_default(),
            },
        }
    }

    fn post(&self, url: String) -> reqwest::RequestBuilder {
        self.client.post(url).header("x-goog-api-key", &self.api_key)
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn complete(&self, req: LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = req.model.as_deref().unwrap_or(&self.model);
        let url = format!("{GEMINI_BASE_URL}/models/{model}:generateContent");
        let resp = self.post(url).json(&Self::body(&req)).send().await?;
        let reply: GeminiReply = read_json(resp).await?;

        let content = reply
            .candidates
            .into_iter()
            .next()
            .map(|c| c.content.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            model: model.to_string(),
            prompt_tokens: reply.usage_metadata.prompt_token_count,
            completion_tokens: reply.usage_metadata.candidates_token_count,
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = format!("{GEMINI_BASE_URL}/models/{}:batchEmbedContents", self.embedding_model);
        let model = format!("models/{}", self.embedding_model);
        let requests: Vec<_> = texts
            .iter()
            .map(|t| serde_json::json!({ "model": model, "content": { "parts": [{ "text": t }] } }))
            .collect();
        let resp = self.post(url).json(&serde_json::json!({ "requests": requests })).send().await?;
        let reply: GeminiEmbeddings = read_json(resp).await?;
        check_count(texts.len(), reply.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn model_id(&self) -> &str { &self.model }
    fn is_local(&self) -> bool { false }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_constructor_sets_embedding_model() {
        let b = OpenAiCompatibleBackend::openai("sk-test", "gpt-4o-mini");
        assert_eq!(b.model_id(), "gpt-4o-mini");
        assert_eq!(b.embedding_model.as_deref(), Some("text-embedding-3-small"));
        assert_eq!(b.base_url(), OPENAI_BASE_URL);
        assert!(!b.is_local());
    }

    #[test]
    fn test_loopback_detection_uses_the_host() {
        assert!(OpenAiCompatibleBackend::new("http://localhost:1234", "m", None).is_local());
        assert!(OpenAiCompatibleBackend::new("http://127.0.0.1:8000/", "m", None).is_local());
        assert!(!OpenAiCompatibleBackend::new("https://localhost.example.com", "m", None).is_local());
    }

    #[test]
    fn test_ollama_is_local() {
        let b = OllamaBackend::new("http://localhost:11434", "llama3:8b").with_embedding_model("nomic-embed-text");
        assert!(b.is_local());
        assert_eq!(b.embedding_model.as_deref(), Some("nomic-embed-text"));
    }

    #[test]
    fn test_chat_reply_without_usage_or_model() {
        let reply: ChatReply = serde_json::from_value(serde_json::json!({
            "choices": [{ "message": { "content": "0.8" } }]
        }))
        .unwrap();
        let r = reply.into_response("fallback");
        assert_eq!(r.content, "0.8");
        assert_eq!(r.model, "fallback");
        assert_eq!(r.prompt_tokens, 0);
    }

    #[test]
    fn test_embedding_reply_restores_input_order() {
        let reply: EmbeddingReply = serde_json::from_value(serde_json::json!({
            "data": [{ "index": 1, "embedding": [0.3, 0.4] }, { "index": 0, "embedding": [0.1, 0.2] }]
        }))
        .unwrap();
        let v = check_count(2, reply.into_vectors()).unwrap();
        assert_eq!(v[0], vec![0.1, 0.2]);
        assert!(matches!(check_count(3, v), Err(LlmError::EmbeddingCount { expected: 3, got: 2 })));
    }

    #[test]
    fn test_gemini_body_moves_system_prompt_out_of_turns() {
        let req = LlmRequest::prompt("Score relevance.", "Title: Graph attention").with_max_tokens(8);
        let body = serde_json::to_value(GeminiBackend::body(&req)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Score relevance.");
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 8);
    }

    #[test]
    fn test_error_envelope_shapes() {
        let nested: ErrorEnvelope = serde_json::from_str(r#"{"error":{"message":"bad key"}}"#).unwrap();
        assert_eq!(nested.message().as_deref(), Some("bad key"));
        let ollama: ErrorEnvelope = serde_json::from_str(r#"{"error":"model not found"}"#).unwrap();
        assert_eq!(ollama.message().as_deref(), Some("model not found"));
    }

    #[test]
    fn test_backends_carry_a_request_timeout() {
        assert_eq!(OllamaBackend::new("http://localhost:11434", "m").request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(GeminiBackend::new("k", "m").request_timeout(), DEFAULT_REQUEST_TIMEOUT);
        let b = OpenAiCompatibleBackend::openai("sk", "m").with_timeout(Duration::from_secs(5));
        assert_eq!(b.request_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept connections and never answer.
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        let backend = OllamaBackend::new(format!("http://{addr}"), "m").with_timeout(Duration::from_millis(200));
        let err = backend.complete(LlmRequest::prompt("sys", "usr")).await.unwrap_err();
        assert!(matches!(&err, LlmError::Http(e) if e.is_timeout()), "{err}");
    }

    #[test]
    fn test_messages_serialize_lowercase_roles() {
        let req = LlmRequest::prompt("sys", "usr").with_temperature(0.0);
        let json = serde_json::to_value(&req.messages).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(req.temperature_or_default(), 0.0);
        assert_eq!(req.max_tokens_or_default(), DEFAULT_MAX_TOKENS);
    }
}
