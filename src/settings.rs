//! Service settings.
//!
//! Every field has a default, so an empty source yields a working configuration
//! (no provider key, in-memory storage, no audience). The server binary layers an optional
//! file and `STUDYFORGE__*` environment variables on top with the `config` crate,
//! e.g. `STUDYFORGE__PROVIDER__API_KEY` or `STUDYFORGE__RATE_LIMITS__QUIZ__MAX_REQUESTS`.

use crate::pricing::PricingTable;
use crate::provider::{ModelTable, DEFAULT_BASE_URL};
use crate::rate_limit::strategies::DEFAULT_CLEANUP_PROBABILITY;
use crate::rate_limit::RateLimitRules;
use crate::store::DEFAULT_ARTIFACT_CAP;
use crate::timeout::{TimeoutError, TimeoutPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Socket address the HTTP server binds.
    pub bind: String,
    /// Postgres URL; in-memory backends are used when unset.
    pub database_url: Option<String>,
    pub pricing: PricingTable,
    pub rate_limits: RateLimitRules,
    /// Chance that an allowed request purges expired rate-limit entries.
    pub cleanup_probability: f64,
    /// Items kept per user and kind.
    pub artifact_cap: usize,
    pub provider: ProviderSettings,
    pub audience: AudienceSettings,
    pub auth: AuthSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            database_url: None,
            pricing: PricingTable::default(),
            rate_limits: RateLimitRules::default(),
            cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
            artifact_cap: DEFAULT_ARTIFACT_CAP,
            provider: ProviderSettings::default(),
            audience: AudienceSettings::default(),
            auth: AuthSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    /// Without a key generation requests fail and are refunded.
    pub api_key: Option<String>,
    pub models: ModelTable,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            models: ModelTable::default(),
            timeout_secs: 60,
        }
    }
}

impl ProviderSettings {
    pub fn timeout(&self) -> Result<TimeoutPolicy, TimeoutError> {
        TimeoutPolicy::new(Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceSettings {
    pub api_key: Option<String>,
    pub audience_id: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// HS256 secret used to verify bearer tokens.
    pub jwt_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Emit logs as JSON lines.
    pub json_logs: bool,
    /// Append generation events to this JSONL file.
    pub audit_log: Option<String>,
}
