use super::{is_new_month, CreditAccount, CreditLedger, DebitOutcome, LedgerError, ResetOutcome};
use crate::pricing::DEFAULT_MONTHLY_ALLOTMENT;
use crate::request::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process ledger; each operation holds the lock for its whole check-and-update.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    accounts: Arc<Mutex<HashMap<UserId, CreditAccount>>>,
    allotment: u32,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MONTHLY_ALLOTMENT)
    }
}

impl InMemoryLedger {
    pub fn new(allotment: u32) -> Self {
        Self { accounts: Arc::new(Mutex::new(HashMap::new())), allotment }
    }

    pub fn allotment(&self) -> u32 {
        self.allotment
    }

    /// Seed an account with an arbitrary balance (tests, fixtures).
    pub fn insert_account(&self, user: UserId, credits: u32, last_credit_reset: DateTime<Utc>) {
        self.lock().insert(user, CreditAccount { user, credits, last_credit_reset });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, CreditAccount>> {
        self.accounts.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn ensure_account(&self, user: UserId, now: DateTime<Utc>) -> Result<CreditAccount, LedgerError> {
        let allotment = self.allotment;
        let account = *self.lock().entry(user).or_insert_with(|| {
            tracing::info!(target: "studyforge::ledger", user = %user, credits = allotment, "created credit account");
            CreditAccount { user, credits: allotment, last_credit_reset: now }
        });
        Ok(account)
    }

    async fn account(&self, user: UserId) -> Result<CreditAccount, LedgerError> {
        self.lock().get(&user).copied().ok_or(LedgerError::UnknownAccount(user))
    }

    async fn debit(&self, user: UserId, amount: u32) -> Result<DebitOutcome, LedgerError> {
        let mut guard = self.lock();
        let account = guard.get_mut(&user).ok_or(LedgerError::UnknownAccount(user))?;
        if account.credits < amount {
            return Ok(DebitOutcome::Insufficient { available: account.credits, required: amount });
        }
        account.credits -= amount;
        Ok(DebitOutcome::Debited { new_balance: account.credits })
    }

    async fn refund(&self, user: UserId, amount: u32) -> Result<u32, LedgerError> {
        let mut guard = self.lock();
        let account = guard.get_mut(&user).ok_or(LedgerError::UnknownAccount(user))?;
        account.credits = account.credits.checked_add(amount).ok_or(LedgerError::Overflow(user))?;
        Ok(account.credits)
    }

    async fn reset_if_new_month(&self, user: UserId, now: DateTime<Utc>) -> Result<ResetOutcome, LedgerError> {
        let mut guard = self.lock();
        let account = guard.get_mut(&user).ok_or(LedgerError::UnknownAccount(user))?;
        if !is_new_month(account.last_credit_reset, now) {
            return Ok(ResetOutcome { reset: false, account: *account });
        }
        account.credits = self.allotment;
        account.last_credit_reset = now;
        Ok(ResetOutcome { reset: true, account: *account })
    }
}
