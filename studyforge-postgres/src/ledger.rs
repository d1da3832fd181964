use crate::{queries, to_u32};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use studyforge::ledger::{CreditAccount, CreditLedger, DebitOutcome, LedgerError, ResetOutcome};
use studyforge::request::UserId;

/// Credit ledger in the `credit_accounts` table.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
    allotment: u32,
}

impl PgLedger {
    pub fn new(pool: PgPool, allotment: u32) -> Self {
        Self { pool, allotment }
    }

    pub fn allotment(&self) -> u32 {
        self.allotment
    }

    async fn fetch(&self, user: UserId) -> Result<Option<CreditAccount>, LedgerError> {
        let row = sqlx::query(queries::SELECT_ACCOUNT)
            .bind(user.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::backend)?;
        row.map(|row| account_from_row(user, &row)).transpose()
    }
}

fn account_from_row(user: UserId, row: &PgRow) -> Result<CreditAccount, LedgerError> {
    let credits: i64 = row.try_get("credits").map_err(LedgerError::backend)?;
    let last_credit_reset: DateTime<Utc> = row.try_get("last_credit_reset").map_err(LedgerError::backend)?;
    Ok(CreditAccount {
        user,
        credits: to_u32("credits", credits).map_err(LedgerError::backend)?,
        last_credit_reset,
    })
}

fn credits_from_row(row: &PgRow) -> Result<u32, LedgerError> {
    let credits: i64 = row.try_get("credits").map_err(LedgerError::backend)?;
    to_u32("credits", credits).map_err(LedgerError::backend)
}

#[async_trait]
impl CreditLedger for PgLedger {
    async fn ensure_account(&self, user: UserId, now: DateTime<Utc>) -> Result<CreditAccount, LedgerError> {
        let inserted = sqlx::query(queries::INSERT_ACCOUNT)
            .bind(user.as_uuid())
            .bind(i64::from(self.allotment))
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::backend)?;
        if let Some(row) = inserted {
            tracing::info!(target: "studyforge::ledger", user = %user, credits = self.allotment, "created credit account");
            return account_from_row(user, &row);
        }
        self.fetch(user).await?.ok_or(LedgerError::UnknownAccount(user))
    }

    async fn account(&self, user: UserId) -> Result<CreditAccount, LedgerError> {
        self.fetch(user).await?.ok_or(LedgerError::UnknownAccount(user))
    }

    async fn debit(&self, user: UserId, amount: u32) -> Result<DebitOutcome, LedgerError> {
        let row = sqlx::query(queries::DEBIT)
            .bind(user.as_uuid())
            .bind(i64::from(amount))
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::backend)?;
        match row {
            Some(row) => Ok(DebitOutcome::Debited { new_balance: credits_from_row(&row)? }),
            None => {
                let account = self.account(user).await?;
                Ok(DebitOutcome::Insufficient { available: account.credits, required: amount })
            }
        }
    }

    async fn refund(&self, user: UserId, amount: u32) -> Result<u32, LedgerError> {
        let row = sqlx::query(queries::REFUND)
            .bind(user.as_uuid())
            .bind(i64::from(amount))
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::backend)?;
        match row {
            Some(row) => credits_from_row(&row),
            None => {
                self.account(user).await?;
                Err(LedgerError::Overflow(user))
            }
        }
    }

    async fn reset_if_new_month(&self, user: UserId, now: DateTime<Utc>) -> Result<ResetOutcome, LedgerError> {
        let row = sqlx::query(queries::RESET_IF_NEW_MONTH)
            .bind(user.as_uuid())
            .bind(i64::from(self.allotment))
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(LedgerError::backend)?;
        match row {
            Some(row) => Ok(ResetOutcome { reset: true, account: account_from_row(user, &row)? }),
            None => Ok(ResetOutcome { reset: false, account: self.account(user).await? }),
        }
    }
}
