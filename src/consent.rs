//! Marketing consent.
//!
//! States: `Unknown -> Granted <-> Revoked`. Each change is written to the consent
//! store (append-only history) and mirrored to the email-audience provider. The two
//! writes are independent: both are attempted and each outcome is reported, so a
//! caller can see that the database was updated while the mailing list was not.
//! The result maps to 200 (both succeeded), 207 (one failed) or 500 (both failed).

use crate::clock::{Clock, SystemClock};
use crate::request::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod audience;

pub use audience::{AudienceError, AudienceProvider, NoopAudience, ResendAudience};

/// Method recorded with consent changes made through the API.
pub const API_METHOD: &str = "api";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentState {
    Unknown,
    Granted,
    Revoked,
}

impl ConsentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentState::Unknown => "unknown",
            ConsentState::Granted => "granted",
            ConsentState::Revoked => "revoked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unknown" => Some(ConsentState::Unknown),
            "granted" => Some(ConsentState::Granted),
            "revoked" => Some(ConsentState::Revoked),
            _ => None,
        }
    }

    /// Grant is accepted from any state; revoke needs a prior decision.
    pub fn apply(self, action: ConsentAction) -> Option<ConsentState> {
        match (self, action) {
            (_, ConsentAction::Grant) => Some(ConsentState::Granted),
            (ConsentState::Unknown, ConsentAction::Revoke) => None,
            (_, ConsentAction::Revoke) => Some(ConsentState::Revoked),
        }
    }
}

impl fmt::Display for ConsentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentAction {
    Grant,
    Revoke,
}

/// Body of `manage-marketing-consent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub action: ConsentAction,
    #[serde(default)]
    pub consent_text: String,
}

/// One entry of a user's consent history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub user: UserId,
    pub state: ConsentState,
    pub consent_text: String,
    pub method: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("cannot {action:?} consent from state {from}")]
    InvalidTransition { from: ConsentState, action: ConsentAction },
    #[error("consent store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ConsentError {
    pub fn store<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ConsentError::Store(Box::new(err))
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ConsentError::InvalidTransition { .. } => 409,
            ConsentError::Store(_) => 500,
        }
    }
}

#[async_trait]
pub trait ConsentStore: Send + Sync {
    /// Most recent record, if any.
    async fn latest(&self, user: UserId) -> Result<Option<ConsentRecord>, ConsentError>;

    /// Append a record; earlier records are kept.
    async fn append(&self, record: ConsentRecord) -> Result<(), ConsentError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryConsentStore {
    history: Arc<Mutex<HashMap<UserId, Vec<ConsentRecord>>>>,
}

impl InMemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full history for `user`, oldest first.
    pub fn history(&self, user: UserId) -> Vec<ConsentRecord> {
        self.lock().get(&user).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Vec<ConsentRecord>>> {
        self.history.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ConsentStore for InMemoryConsentStore {
    async fn latest(&self, user: UserId) -> Result<Option<ConsentRecord>, ConsentError> {
        Ok(self.lock().get(&user).and_then(|h| h.last().cloned()))
    }

    async fn append(&self, record: ConsentRecord) -> Result<(), ConsentError> {
        self.lock().entry(record.user).or_default().push(record);
        Ok(())
    }
}

/// Outcome of one of the two writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub success: bool,
    pub error: Option<String>,
}

impl StepResult {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()) }
    }
}

/// Body of the consent response. The audience step is reported as `resend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsentReport {
    pub success: bool,
    pub database: StepResult,
    pub resend: StepResult,
    pub message: String,
}

impl ConsentReport {
    fn new(action: ConsentAction, database: StepResult, resend: StepResult) -> Self {
        let verb = match action {
            ConsentAction::Grant => "granted",
            ConsentAction::Revoke => "revoked",
        };
        let message = match (database.success, resend.success) {
            (true, true) => format!("Marketing consent {verb}"),
            (true, false) => format!("Marketing consent {verb}, but the mailing list could not be updated"),
            (false, true) => "Mailing list updated, but marketing consent could not be saved".to_string(),
            (false, false) => "Marketing consent could not be updated".to_string(),
        };
        Self { success: database.success && resend.success, database, resend, message }
    }

    /// 200 when both writes succeeded, 207 when exactly one did, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        match (self.database.success, self.resend.success) {
            (true, true) => 200,
            (false, false) => 500,
            _ => 207,
        }
    }
}

/// Applies consent changes to the store and the audience provider.
#[derive(Clone)]
pub struct ConsentService {
    store: Arc<dyn ConsentStore>,
    audience: Arc<dyn AudienceProvider>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ConsentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentService").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl ConsentService {
    pub fn new(store: Arc<dyn ConsentStore>, audience: Arc<dyn AudienceProvider>) -> Self {
        Self { store, audience, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current state (`Unknown` without history).
    pub async fn state(&self, user: UserId) -> Result<ConsentState, ConsentError> {
        Ok(self.store.latest(user).await?.map_or(ConsentState::Unknown, |r| r.state))
    }

    /// Apply `request` for `user`. `email` comes from the auth token and is only
    /// needed for the audience step.
    pub async fn apply(
        &self,
        user: UserId,
        email: Option<&str>,
        request: ConsentRequest,
    ) -> Result<ConsentReport, ConsentError> {
        let from = self.state(user).await?;
        let to = from
            .apply(request.action)
            .ok_or(ConsentError::InvalidTransition { from, action: request.action })?;

        let record = ConsentRecord {
            user,
            state: to,
            consent_text: request.consent_text,
            method: API_METHOD.to_string(),
            recorded_at: self.clock.now(),
        };
        let database = match self.store.append(record).await {
            Ok(()) => StepResult::ok(),
            Err(e) => {
                tracing::warn!(target: "studyforge::consent", user = %user, error = %e, "failed to save consent");
                StepResult::failed(e.to_string())
            }
        };

        let resend = match email {
            None => StepResult::failed("no email address on the account"),
            Some(email) => {
                let result = match request.action {
                    ConsentAction::Grant => self.audience.subscribe(email).await,
                    ConsentAction::Revoke => self.audience.unsubscribe(email).await,
                };
                match result {
                    Ok(()) => StepResult::ok(),
                    Err(e) => {
                        tracing::warn!(target: "studyforge::consent", user = %user, error = %e, "failed to update audience");
                        StepResult::failed(e.to_string())
                    }
                }
            }
        };

        let report = ConsentReport::new(request.action, database, resend);
        tracing::info!(
            target: "studyforge::consent",
            user = %user,
            from = %from,
            to = %to,
            status = report.status_code(),
            "consent updated"
        );
        Ok(report)
    }
}
