//! Structured prompts for the generation provider.

use crate::request::{Difficulty, PlanTier, ValidPlanRequest, ValidQuizRequest};
use serde::{Deserialize, Serialize};

/// Model strength requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Fast,
    Strong,
}

impl ModelClass {
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Basic => ModelClass::Fast,
            PlanTier::Premium => ModelClass::Strong,
        }
    }

    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy | Difficulty::Medium => ModelClass::Fast,
            Difficulty::Hard => ModelClass::Strong,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub model: ModelClass,
    pub max_tokens: u32,
}

const PLAN_SYSTEM: &str = "You are an expert curriculum designer. Reply with a single JSON object and nothing else. \
Schema: {\"title\": string, \"overview\": string, \"phases\": [{\"title\": string, \"description\": string, \
\"durationWeeks\": integer, \"resources\": [{\"title\": string, \"url\": string, \"kind\": string}]}]}. \
Every url must be an absolute https link to a real, publicly reachable page.";

const QUIZ_SYSTEM: &str = "You are an expert teacher writing multiple-choice quizzes. Reply with a single JSON object and nothing else. \
Schema: {\"title\": string, \"questions\": [{\"prompt\": string, \"options\": [string], \"answerIndex\": integer, \
\"explanation\": string}]}. answerIndex is zero-based.";

pub fn plan_prompt(req: &ValidPlanRequest) -> Prompt {
    let phases = match req.tier {
        PlanTier::Basic => "3 to 4",
        PlanTier::Premium => "5 to 8",
    };
    let user = format!(
        "Create a learning plan about: {topics}.\n\
         Write it in {language}.\n\
         Use {phases} phases, each with at least {resources} resources.\n\
         Budget for paid resources: {budget}. Preferred learning style: {style}.",
        topics = req.topic.parts().join(", "),
        language = req.language.name(),
        phases = phases,
        resources = req.tier.resources_per_phase(),
        budget = req.budget.as_str(),
        style = req.learning_style.as_str(),
    );
    Prompt {
        system: PLAN_SYSTEM.to_string(),
        user,
        model: ModelClass::for_tier(req.tier),
        max_tokens: match req.tier {
            PlanTier::Basic => 2_000,
            PlanTier::Premium => 4_000,
        },
    }
}

pub fn quiz_prompt(req: &ValidQuizRequest) -> Prompt {
    let user = format!(
        "Write a {difficulty} quiz with {count} questions about: {topics}.\n\
         Write it in {language}. Each question has 4 options.",
        difficulty = req.difficulty.as_str(),
        count = req.difficulty.question_count(),
        topics = req.topic.parts().join(", "),
        language = req.language.name(),
    );
    Prompt {
        system: QUIZ_SYSTEM.to_string(),
        user,
        model: ModelClass::for_difficulty(req.difficulty),
        max_tokens: 2_500,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Budget, Language, LearningStyle, Topic};

    #[test]
    fn plan_prompt_carries_request_fields() {
        let req = ValidPlanRequest {
            topic: Topic::parse("Rust, WebAssembly").unwrap(),
            tier: PlanTier::Premium,
            language: Language::De,
            budget: Budget::Free,
            learning_style: LearningStyle::Kinesthetic,
        };
        let p = plan_prompt(&req);
        assert_eq!(p.model, ModelClass::Strong);
        assert!(p.user.contains("Rust, WebAssembly"));
        assert!(p.user.contains("German"));
        assert!(p.user.contains("at least 5 resources"));
        assert!(p.user.contains("kinesthetic"));
    }

    #[test]
    fn quiz_prompt_scales_with_difficulty() {
        let req = ValidQuizRequest {
            topic: Topic::parse("SQL").unwrap(),
            difficulty: Difficulty::Hard,
            language: Language::En,
        };
        let p = quiz_prompt(&req);
        assert_eq!(p.model, ModelClass::Strong);
        assert!(p.user.contains("10 questions"));
        assert_eq!(ModelClass::for_difficulty(Difficulty::Medium), ModelClass::Fast);
    }
}
