//! Per-user credit balances.
//!
//! The ledger owns one integer balance per user and exposes exactly three ways to
//! change it:
//!
//! - [`CreditLedger::debit`]: atomic check-and-subtract. Either the whole amount is
//!   taken or nothing changes and the caller learns `available`/`required`.
//! - [`CreditLedger::refund`]: atomic add, only used to compensate a debit whose
//!   downstream work failed.
//! - [`CreditLedger::reset_if_new_month`]: restore the monthly allotment on the first
//!   access in a new calendar month.
//!
//! Atomicity is the backend's job. [`InMemoryLedger`] does every operation inside one
//! critical section; the Postgres backend issues single conditional `UPDATE`s. Neither
//! reads the balance and writes it back in two steps.

use crate::request::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

mod memory;

pub use memory::InMemoryLedger;

/// A user's balance and the time of its last monthly reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditAccount {
    pub user: UserId,
    pub credits: u32,
    pub last_credit_reset: DateTime<Utc>,
}

/// Result of a debit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The amount was taken.
    Debited { new_balance: u32 },
    /// Not enough credits; the balance is unchanged.
    Insufficient { available: u32, required: u32 },
}

impl DebitOutcome {
    pub fn is_debited(&self) -> bool {
        matches!(self, DebitOutcome::Debited { .. })
    }
}

/// Result of a monthly reset check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Whether this call performed the reset.
    pub reset: bool,
    pub account: CreditAccount,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("no credit account for user {0}")]
    UnknownAccount(UserId),
    #[error("refund would overflow the balance of user {0}")]
    Overflow(UserId),
    #[error("ledger backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LedgerError::Backend(Box::new(err))
    }
}

/// Storage-agnostic credit ledger.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Return the user's account, creating it with the full allotment on first access.
    async fn ensure_account(&self, user: UserId, now: DateTime<Utc>) -> Result<CreditAccount, LedgerError>;

    /// Return the user's account without creating it.
    async fn account(&self, user: UserId) -> Result<CreditAccount, LedgerError>;

    /// Atomically subtract `amount` if the balance covers it.
    async fn debit(&self, user: UserId, amount: u32) -> Result<DebitOutcome, LedgerError>;

    /// Atomically add `amount` back; returns the new balance.
    async fn refund(&self, user: UserId, amount: u32) -> Result<u32, LedgerError>;

    /// Reset the balance to the allotment if `now` is in a later calendar month than the
    /// last reset. Idempotent within a month.
    async fn reset_if_new_month(&self, user: UserId, now: DateTime<Utc>) -> Result<ResetOutcome, LedgerError>;
}

/// Month-over-month comparison (calendar months, not elapsed days).
pub fn is_new_month(last_reset: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (now.year(), now.month()) > (last_reset.year(), last_reset.month())
}

/// First instant of the calendar month after `at`.
pub fn next_month_start(at: DateTime<Utc>) -> DateTime<Utc> {
    use chrono::TimeZone;
    let (year, month) = if at.month() == 12 { (at.year() + 1, 1) } else { (at.year(), at.month() + 1) };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn new_month_is_calendar_based() {
        let jan_31 = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 0).unwrap();
        let feb_1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 1, 0).unwrap();
        let jan_1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(is_new_month(jan_31, feb_1), "two minutes apart but a new month");
        assert!(!is_new_month(jan_1, jan_31), "thirty days apart, same month");
    }

    #[test]
    fn new_month_crosses_years_and_ignores_past() {
        let dec = Utc.with_ymd_and_hms(2023, 12, 15, 0, 0, 0).unwrap();
        let jan = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        assert!(is_new_month(dec, jan));
        assert!(!is_new_month(jan, dec));
    }

    #[test]
    fn next_month_start_rolls_over_december() {
        let dec = Utc.with_ymd_and_hms(2023, 12, 15, 10, 0, 0).unwrap();
        assert_eq!(next_month_start(dec), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mar = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(next_month_start(mar), Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    }
}
