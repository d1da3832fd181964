//! External text-generation provider.
//!
//! The provider is an opaque collaborator: it receives a [`Prompt`] and returns the raw
//! text of its reply. Parsing and shape validation happen in the orchestrator so that a
//! bad reply is handled exactly like a transport failure (refund, then error).

use crate::prompt::{ModelClass, Prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),
    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("provider reply could not be decoded: {0}")]
    Decode(String),
    #[error("provider reply had no content")]
    EmptyReply,
    #[error(transparent)]
    Timeout(#[from] crate::timeout::TimedOut),
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Send `prompt` and return the reply text.
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError>;
}

#[async_trait]
impl<P> GenerationProvider for Arc<P>
where
    P: GenerationProvider + ?Sized,
{
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        (**self).complete(prompt).await
    }
}

/// Model names per [`ModelClass`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTable {
    pub fast: String,
    pub strong: String,
}

impl Default for ModelTable {
    fn default() -> Self {
        Self { fast: "gpt-4o-mini".into(), strong: "gpt-4o".into() }
    }
}

impl ModelTable {
    pub fn model_for(&self, class: ModelClass) -> &str {
        match class {
            ModelClass::Fast => &self.fast,
            ModelClass::Strong => &self.strong,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

/// Chat completions request body.
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: ModelTable,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("models", &self.models)
            .finish()
    }
}

impl OpenAiProvider {
    /// Build a client with connection pooling suited to one call per request.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, api_key))
    }

    pub fn with_client(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            models: ModelTable::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, models: ModelTable) -> Self {
        self.models = models;
        self
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        let body = ChatRequest {
            model: self.models.model_for(prompt.model),
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            max_tokens: prompt.max_tokens,
            temperature: 0.7,
            response_format: ResponseFormat { format_type: "json_object" },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ProviderError::Status { status: status.as_u16(), message });
        }

        let reply: ChatResponse =
            response.json().await.map_err(|e| ProviderError::Decode(e.to_string()))?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(ProviderError::EmptyReply)
    }
}

/// Provider that replies with canned text (or fails); counts calls.
///
/// Useful for tests, demos, and running the service without a provider key.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    reply: Result<String, String>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self { reply: Ok(reply.into()), delay: None, calls: Arc::new(AtomicUsize::new(0)) }
    }

    /// Every call fails with a transport error carrying `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { reply: Err(message.into()), delay: None, calls: Arc::new(AtomicUsize::new(0)) }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for StaticProvider {
    async fn complete(&self, _prompt: &Prompt) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone().map_err(ProviderError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt(model: ModelClass) -> Prompt {
        Prompt { system: "sys".into(), user: "usr".into(), model, max_tokens: 100 }
    }

    #[tokio::test]
    async fn sends_chat_completion_and_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("sk-test").unwrap().with_base_url(server.uri());
        let reply = provider.complete(&prompt(ModelClass::Strong)).await.unwrap();
        assert_eq!(reply, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn error_status_surfaces_api_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": {"message": "quota exceeded"}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("sk-test").unwrap().with_base_url(server.uri());
        match provider.complete(&prompt(ModelClass::Fast)).await {
            Err(ProviderError::Status { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "quota exceeded");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new("sk-test").unwrap().with_base_url(server.uri());
        assert!(matches!(
            provider.complete(&prompt(ModelClass::Fast)).await,
            Err(ProviderError::EmptyReply)
        ));
    }

    #[tokio::test]
    async fn static_provider_counts_calls() {
        let ok = StaticProvider::new("{}");
        let shared = Arc::new(ok.clone());
        assert_eq!(shared.complete(&prompt(ModelClass::Fast)).await.unwrap(), "{}");
        assert_eq!(ok.calls(), 1);

        let failing = StaticProvider::failing("down");
        assert!(matches!(
            failing.complete(&prompt(ModelClass::Fast)).await,
            Err(ProviderError::Transport(m)) if m == "down"
        ));
    }
}
