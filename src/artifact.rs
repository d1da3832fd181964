//! Generated documents and the structural checks applied to provider output.
//!
//! A provider reply is untrusted text. It is parsed into a [`LearningPlan`] or
//! [`Quiz`] and then checked against the shape the requested tier/difficulty
//! promises. A reply that fails either step costs the user nothing: the orchestrator
//! refunds the debit.

use crate::request::{PlanTier, RequestKind, UserId};
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Most phases a plan may have.
pub const MAX_PLAN_PHASES: usize = 8;
/// Highest quiz score.
pub const MAX_QUIZ_SCORE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration_weeks: Option<u32>,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPlan {
    pub title: String,
    #[serde(default)]
    pub overview: String,
    pub phases: Vec<Phase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    pub answer_index: usize,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<Question>,
}

/// Why a provider reply was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("reply is not valid JSON for this document: {0}")]
    Unparseable(String),
    #[error("plan has no phases")]
    NoPhases,
    #[error("plan has {count} phases (max {max})")]
    TooManyPhases { count: usize, max: usize },
    #[error("phase {phase} has {found} resources, {required} required")]
    MissingResources { phase: usize, found: usize, required: usize },
    #[error("phase {phase} resource {resource} has an invalid url: {url}")]
    InvalidUrl { phase: usize, resource: usize, url: String },
    #[error("quiz has no questions")]
    NoQuestions,
    #[error("question {question} is malformed: {reason}")]
    MalformedQuestion { question: usize, reason: &'static str },
}

/// Strip an optional markdown code fence (```json ... ```) around a reply.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// `http`/`https` URL with a host.
pub fn is_well_formed_url(raw: &str) -> bool {
    match Url::parse(raw.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

impl LearningPlan {
    pub fn parse(reply: &str) -> Result<Self, ShapeError> {
        serde_json::from_str(strip_code_fence(reply)).map_err(|e| ShapeError::Unparseable(e.to_string()))
    }

    /// Check phase count, per-phase resource count for `tier`, and every URL.
    pub fn validate(&self, tier: PlanTier) -> Result<(), ShapeError> {
        if self.phases.is_empty() {
            return Err(ShapeError::NoPhases);
        }
        if self.phases.len() > MAX_PLAN_PHASES {
            return Err(ShapeError::TooManyPhases { count: self.phases.len(), max: MAX_PLAN_PHASES });
        }
        let required = tier.resources_per_phase();
        for (p, phase) in self.phases.iter().enumerate() {
            if phase.resources.len() < required {
                return Err(ShapeError::MissingResources { phase: p, found: phase.resources.len(), required });
            }
            for (r, resource) in phase.resources.iter().enumerate() {
                if !is_well_formed_url(&resource.url) {
                    return Err(ShapeError::InvalidUrl { phase: p, resource: r, url: resource.url.clone() });
                }
            }
        }
        Ok(())
    }
}

impl Quiz {
    pub fn parse(reply: &str) -> Result<Self, ShapeError> {
        serde_json::from_str(strip_code_fence(reply)).map_err(|e| ShapeError::Unparseable(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        if self.questions.is_empty() {
            return Err(ShapeError::NoQuestions);
        }
        for (i, q) in self.questions.iter().enumerate() {
            if q.prompt.trim().is_empty() {
                return Err(ShapeError::MalformedQuestion { question: i, reason: "empty prompt" });
            }
            if q.options.len() < 2 {
                return Err(ShapeError::MalformedQuestion { question: i, reason: "fewer than two options" });
            }
            if q.answer_index >= q.options.len() {
                return Err(ShapeError::MalformedQuestion { question: i, reason: "answer index out of range" });
            }
        }
        Ok(())
    }
}

/// The structured document of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ArtifactDocument {
    LearningPlan(LearningPlan),
    Quiz(Quiz),
}

impl ArtifactDocument {
    pub fn kind(&self) -> RequestKind {
        match self {
            ArtifactDocument::LearningPlan(_) => RequestKind::LearningPlan,
            ArtifactDocument::Quiz(_) => RequestKind::Quiz,
        }
    }
}

/// An artifact ready to be inserted (no id or timestamp yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArtifact {
    pub user: UserId,
    pub topic: String,
    /// Tier or difficulty label, e.g. `premium` or `hard`.
    pub level: String,
    pub language: String,
    pub credits_charged: u32,
    pub document: ArtifactDocument,
}

impl NewArtifact {
    pub fn kind(&self) -> RequestKind {
        self.document.kind()
    }
}

/// A persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: RequestKind,
    pub topic: String,
    pub level: String,
    pub language: String,
    pub credits_charged: u32,
    pub created_at: DateTime<Utc>,
    pub document: ArtifactDocument,
    /// Quiz score attached after the user completes the quiz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl StoredArtifact {
    pub fn from_new(new: NewArtifact, id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user,
            kind: new.document.kind(),
            topic: new.topic,
            level: new.level,
            language: new.language,
            credits_charged: new.credits_charged,
            created_at,
            document: new.document,
            score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(url: &str) -> Resource {
        Resource { title: "Docs".into(), url: url.into(), kind: Some("article".into()) }
    }

    fn plan(resources_per_phase: usize, phases: usize) -> LearningPlan {
        LearningPlan {
            title: "Rust".into(),
            overview: String::new(),
            phases: (0..phases)
                .map(|i| Phase {
                    title: format!("Phase {}", i + 1),
                    description: String::new(),
                    duration_weeks: Some(2),
                    resources: (0..resources_per_phase)
                        .map(|j| resource(&format!("https://example.com/{}/{}", i, j)))
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn url_checks() {
        assert!(is_well_formed_url("https://doc.rust-lang.org/book/"));
        assert!(is_well_formed_url("http://example.com"));
        assert!(!is_well_formed_url("ftp://example.com/file"));
        assert!(!is_well_formed_url("not a url"));
        assert!(!is_well_formed_url("javascript:alert(1)"));
    }

    #[test]
    fn resource_count_depends_on_tier() {
        let basic_sized = plan(3, 2);
        assert!(basic_sized.validate(PlanTier::Basic).is_ok());
        assert_eq!(
            basic_sized.validate(PlanTier::Premium),
            Err(ShapeError::MissingResources { phase: 0, found: 3, required: 5 })
        );
        assert!(plan(5, 4).validate(PlanTier::Premium).is_ok());
    }

    #[test]
    fn phase_bounds() {
        assert_eq!(plan(3, 0).validate(PlanTier::Basic), Err(ShapeError::NoPhases));
        assert!(matches!(plan(3, 9).validate(PlanTier::Basic), Err(ShapeError::TooManyPhases { .. })));
    }

    #[test]
    fn bad_url_is_reported_with_position() {
        let mut p = plan(3, 2);
        p.phases[1].resources[2].url = "www.example.com".into();
        assert!(matches!(
            p.validate(PlanTier::Basic),
            Err(ShapeError::InvalidUrl { phase: 1, resource: 2, .. })
        ));
    }

    #[test]
    fn quiz_shape_checks() {
        let ok = r#"{"title":"T","questions":[{"prompt":"Q","options":["a","b"],"answerIndex":1}]}"#;
        assert!(Quiz::parse(ok).unwrap().validate().is_ok());

        let empty = r#"{"title":"T","questions":[]}"#;
        assert_eq!(Quiz::parse(empty).unwrap().validate(), Err(ShapeError::NoQuestions));

        let out_of_range = r#"{"title":"T","questions":[{"prompt":"Q","options":["a","b"],"answerIndex":2}]}"#;
        assert!(matches!(
            Quiz::parse(out_of_range).unwrap().validate(),
            Err(ShapeError::MalformedQuestion { question: 0, .. })
        ));

        assert!(matches!(Quiz::parse("sorry, I can't"), Err(ShapeError::Unparseable(_))));
    }

    #[test]
    fn document_serializes_with_type_tag() {
        let doc = ArtifactDocument::Quiz(Quiz { title: "T".into(), questions: vec![] });
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["type"], "quiz");
        assert_eq!(v["content"]["title"], "T");
    }
}
