//! Email-audience providers that mirror marketing consent.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};

pub const RESEND_BASE_URL: &str = "https://api.resend.com";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudienceError {
    #[error("audience request failed: {0}")]
    Transport(String),
    #[error("audience provider returned {status}: {message}")]
    Status { status: u16, message: String },
}

#[async_trait]
pub trait AudienceProvider: Send + Sync {
    async fn subscribe(&self, email: &str) -> Result<(), AudienceError>;
    async fn unsubscribe(&self, email: &str) -> Result<(), AudienceError>;
}

#[derive(Serialize)]
struct CreateContact<'a> {
    email: &'a str,
    unsubscribed: bool,
}

#[derive(Serialize)]
struct UpdateContact {
    unsubscribed: bool,
}

/// Resend contacts API for one audience.
#[derive(Clone)]
pub struct ResendAudience {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    audience_id: String,
}

impl std::fmt::Debug for ResendAudience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResendAudience")
            .field("base_url", &self.base_url)
            .field("audience_id", &self.audience_id)
            .finish_non_exhaustive()
    }
}

impl ResendAudience {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, audience_id: impl Into<String>) -> Self {
        Self {
            client,
            base_url: RESEND_BASE_URL.to_string(),
            api_key: api_key.into(),
            audience_id: audience_id.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn contacts_url(&self) -> String {
        format!("{}/audiences/{}/contacts", self.base_url, self.audience_id)
    }

    async fn check(response: reqwest::Response) -> Result<(), AudienceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(AudienceError::Status { status: status.as_u16(), message })
    }
}

#[async_trait]
impl AudienceProvider for ResendAudience {
    async fn subscribe(&self, email: &str) -> Result<(), AudienceError> {
        let response = self
            .client
            .post(self.contacts_url())
            .bearer_auth(&self.api_key)
            .json(&CreateContact { email, unsubscribed: false })
            .send()
            .await
            .map_err(|e| AudienceError::Transport(e.to_string()))?;
        Self::check(response).await
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), AudienceError> {
        let response = self
            .client
            .patch(format!("{}/{}", self.contacts_url(), email))
            .bearer_auth(&self.api_key)
            .json(&UpdateContact { unsubscribed: true })
            .send()
            .await
            .map_err(|e| AudienceError::Transport(e.to_string()))?;
        Self::check(response).await
    }
}

/// Audience that records calls instead of talking to a provider.
///
/// Used when no audience is configured, and in tests.
#[derive(Debug, Clone, Default)]
pub struct NoopAudience {
    failure: Option<String>,
    calls: Arc<Mutex<Vec<(String, bool)>>>,
}

impl NoopAudience {
    /// Every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { failure: Some(message.into()), calls: Arc::default() }
    }

    /// `(email, subscribed)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn record(&self, email: &str, subscribed: bool) -> Result<(), AudienceError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((email.to_string(), subscribed));
        match &self.failure {
            Some(message) => Err(AudienceError::Transport(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AudienceProvider for NoopAudience {
    async fn subscribe(&self, email: &str) -> Result<(), AudienceError> {
        self.record(email, true)
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), AudienceError> {
        self.record(email, false)
    }
}
