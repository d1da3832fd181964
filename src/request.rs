//! Generation requests and their validation.
//!
//! Requests are transient: they are validated into a [`ValidPlanRequest`] or
//! [`ValidQuizRequest`] before anything else happens and are never stored. Only the
//! artifact they produce is persisted.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum topic length in characters (after trimming).
pub const MAX_TOPIC_CHARS: usize = 75;
/// Maximum number of comma-separated sub-topics.
pub const MAX_SUBTOPICS: usize = 3;

/// Identity of an authenticated user (the `sub` claim of the bearer token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Fresh random id; mostly useful in tests.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// The two kinds of generation; doubles as the rate-limit request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    LearningPlan,
    Quiz,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::LearningPlan => "learning_plan",
            RequestKind::Quiz => "quiz",
        }
    }

    /// Inverse of [`RequestKind::as_str`].
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "learning_plan" => Some(RequestKind::LearningPlan),
            "quiz" => Some(RequestKind::Quiz),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learning-plan tier: selects cost, model strength and output depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Premium,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Premium => "premium",
        }
    }

    /// Minimum number of resources each phase of a generated plan must carry.
    pub fn resources_per_phase(&self) -> usize {
        match self {
            PlanTier::Basic => 3,
            PlanTier::Premium => 5,
        }
    }
}

/// Quiz difficulty: selects cost and model strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn question_count(&self) -> usize {
        match self {
            Difficulty::Easy => 5,
            Difficulty::Medium => 8,
            Difficulty::Hard => 10,
        }
    }
}

/// Output language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
    Fr,
    De,
    It,
    Pt,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
            Language::It => "it",
            Language::Pt => "pt",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Es => "Spanish",
            Language::Fr => "French",
            Language::De => "German",
            Language::It => "Italian",
            Language::Pt => "Portuguese",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Budget {
    Free,
    Low,
    Medium,
    High,
}

impl Budget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Budget::Free => "free",
            Budget::Low => "low",
            Budget::Medium => "medium",
            Budget::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningStyle {
    Visual,
    Auditory,
    Reading,
    Kinesthetic,
    Mixed,
}

impl LearningStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningStyle::Visual => "visual",
            LearningStyle::Auditory => "auditory",
            LearningStyle::Reading => "reading",
            LearningStyle::Kinesthetic => "kinesthetic",
            LearningStyle::Mixed => "mixed",
        }
    }
}

/// Body of `generate-learning-plan`.
///
/// Enum fields outside their allowed sets fail at deserialization, which the HTTP
/// layer reports as a 400 like any other validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub topic: String,
    pub selected_tier: PlanTier,
    pub language: Language,
    pub budget: Budget,
    pub learning_style: LearningStyle,
}

/// Body of `generate-quiz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizRequest {
    pub topic: String,
    pub difficulty: Difficulty,
    pub language: Language,
}

/// Input validation failures. Always raised before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("topic must be at most {max} characters (got {len})")]
    TopicTooLong { len: usize, max: usize },
    #[error("at most {max} comma-separated topics are allowed (got {count})")]
    TooManyTopics { count: usize, max: usize },
    #[error("topic contains control characters")]
    ControlCharacters,
    #[error("invalid request body: {0}")]
    Malformed(String),
}

/// A topic that passed validation: trimmed, bounded, at most three sub-topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    text: String,
    parts: Vec<String>,
}

impl Topic {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }
        if text.chars().any(char::is_control) {
            return Err(ValidationError::ControlCharacters);
        }
        let len = text.chars().count();
        if len > MAX_TOPIC_CHARS {
            return Err(ValidationError::TopicTooLong { len, max: MAX_TOPIC_CHARS });
        }
        let parts: Vec<String> = text
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect();
        if parts.is_empty() {
            return Err(ValidationError::EmptyTopic);
        }
        if parts.len() > MAX_SUBTOPICS {
            return Err(ValidationError::TooManyTopics { count: parts.len(), max: MAX_SUBTOPICS });
        }
        Ok(Self { text: text.to_owned(), parts })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidPlanRequest {
    pub topic: Topic,
    pub tier: PlanTier,
    pub language: Language,
    pub budget: Budget,
    pub learning_style: LearningStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidQuizRequest {
    pub topic: Topic,
    pub difficulty: Difficulty,
    pub language: Language,
}

impl PlanRequest {
    pub fn validate(self) -> Result<ValidPlanRequest, ValidationError> {
        Ok(ValidPlanRequest {
            topic: Topic::parse(&self.topic)?,
            tier: self.selected_tier,
            language: self.language,
            budget: self.budget,
            learning_style: self.learning_style,
        })
    }
}

impl QuizRequest {
    pub fn validate(self) -> Result<ValidQuizRequest, ValidationError> {
        Ok(ValidQuizRequest {
            topic: Topic::parse(&self.topic)?,
            difficulty: self.difficulty,
            language: self.language,
        })
    }
}
