//! Profile access and the monthly credit reset.

use crate::clock::{Clock, SystemClock};
use crate::ledger::{next_month_start, CreditAccount, CreditLedger, LedgerError};
use crate::request::UserId;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Result of `reset-credits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    pub credits: u32,
    /// Set when this call performed the reset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_date: Option<DateTime<Utc>>,
    /// Set when the balance was already reset this month.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub months_until_reset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_reset_date: Option<DateTime<Utc>>,
}

impl ResetReport {
    pub fn was_reset(&self) -> bool {
        self.reset_date.is_some()
    }
}

/// Whole calendar months from `from` to `to` (at least 1).
fn months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u32 {
    let months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    months.max(1) as u32
}

/// Account creation on first access and the idempotent monthly reset.
#[derive(Clone)]
pub struct CreditService {
    ledger: Arc<dyn CreditLedger>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CreditService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditService").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl CreditService {
    pub fn new(ledger: Arc<dyn CreditLedger>) -> Self {
        Self { ledger, clock: Arc::new(SystemClock) }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The user's account, created with the monthly allotment on first access and
    /// topped back up on the first access of each new calendar month.
    pub async fn profile(&self, user: UserId) -> Result<CreditAccount, LedgerError> {
        let now = self.clock.now();
        self.ledger.ensure_account(user, now).await?;
        let outcome = self.ledger.reset_if_new_month(user, now).await?;
        if outcome.reset {
            tracing::info!(target: "studyforge::ledger", user = %user, credits = outcome.account.credits, "monthly credit reset on access");
        }
        Ok(outcome.account)
    }

    /// Reset the balance if this is the first reset request of a new calendar month.
    pub async fn reset_credits(&self, user: UserId) -> Result<ResetReport, LedgerError> {
        let now = self.clock.now();
        self.ledger.ensure_account(user, now).await?;
        let outcome = self.ledger.reset_if_new_month(user, now).await?;
        let account = outcome.account;

        if outcome.reset {
            tracing::info!(target: "studyforge::ledger", user = %user, credits = account.credits, "monthly credit reset");
            return Ok(ResetReport {
                credits: account.credits,
                reset_date: Some(account.last_credit_reset),
                months_until_reset: None,
                next_reset_date: None,
            });
        }

        let next = next_month_start(account.last_credit_reset);
        Ok(ResetReport {
            credits: account.credits,
            reset_date: None,
            months_until_reset: Some(months_between(now, next)),
            next_reset_date: Some(next),
        })
    }
}
