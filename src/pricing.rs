//! Fixed credit costs per tier/difficulty and the monthly allotment.

use crate::request::{Difficulty, PlanTier};
use serde::{Deserialize, Serialize};

/// Credits granted at account creation and restored at every monthly reset.
pub const DEFAULT_MONTHLY_ALLOTMENT: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingTable {
    pub basic_plan: u32,
    pub premium_plan: u32,
    pub easy_quiz: u32,
    pub medium_quiz: u32,
    pub hard_quiz: u32,
    pub monthly_allotment: u32,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            basic_plan: 40,
            premium_plan: 120,
            easy_quiz: 10,
            medium_quiz: 15,
            hard_quiz: 20,
            monthly_allotment: DEFAULT_MONTHLY_ALLOTMENT,
        }
    }
}

impl PricingTable {
    pub fn plan_cost(&self, tier: PlanTier) -> u32 {
        match tier {
            PlanTier::Basic => self.basic_plan,
            PlanTier::Premium => self.premium_plan,
        }
    }

    pub fn quiz_cost(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy_quiz,
            Difficulty::Medium => self.medium_quiz,
            Difficulty::Hard => self.hard_quiz,
        }
    }
}
