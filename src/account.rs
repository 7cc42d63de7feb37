// src/account.rs
//
// Grounded in `ledger/src/value_object.rs`'s state-machine style
// (`ValueObjectState::can_transition_to`) for the account status lifecycle,
// and `ledger/src/balance.rs`'s `Balance` struct for field layout — but the
// storage model itself is new: spec §3 wants a single mutable balance row per
// account with a monotonic `lock_version`, not the teacher's fragmented
// value-object ledger. See DESIGN.md for why that "WHAT" was replaced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::SummaError;
use crate::hooks::{HookEvent, HookRegistry};
use crate::LedgerAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HolderType {
    Individual,
    Organization,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    /// Active is the only status from which a mutating operation is allowed
    /// to proceed (spec §4.4 step 2, §8 invariant 6).
    pub fn require_active(&self, account_id: Uuid) -> Result<(), SummaError> {
        match self {
            AccountStatus::Active => Ok(()),
            AccountStatus::Frozen => Err(SummaError::AccountFrozen(account_id)),
            AccountStatus::Closed => Err(SummaError::AccountClosed(account_id)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalBalance {
    Debit,
    Credit,
}

/// A user-held account (spec §3 "Account (user)").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub ledger_id: Uuid,
    pub holder_id: Uuid,
    pub holder_type: HolderType,
    pub status: AccountStatus,
    pub currency: String,
    pub balance: i64,
    pub credit_balance: i64,
    pub debit_balance: i64,
    pub pending_credit: i64,
    pub pending_debit: i64,
    pub allow_overdraft: bool,
    pub overdraft_limit: i64,
    pub account_type: Option<String>,
    pub normal_balance: Option<NormalBalance>,
    pub parent_account_id: Option<Uuid>,
    pub indicator: Option<String>,
    pub lock_version: i64,
    pub metadata: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub frozen_at: Option<DateTime<Utc>>,
    pub frozen_by: Option<Uuid>,
    pub frozen_reason: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
    pub closed_reason: Option<String>,
}

impl Account {
    pub fn new(ledger_id: Uuid, holder_id: Uuid, holder_type: HolderType, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            ledger_id,
            holder_id,
            holder_type,
            status: AccountStatus::Active,
            currency: currency.to_string(),
            balance: 0,
            credit_balance: 0,
            debit_balance: 0,
            pending_credit: 0,
            pending_debit: 0,
            allow_overdraft: false,
            overdraft_limit: 0,
            account_type: None,
            normal_balance: None,
            parent_account_id: None,
            indicator: None,
            lock_version: 0,
            metadata: Json::Object(Default::default()),
            created_at: now,
            updated_at: now,
            frozen_at: None,
            frozen_by: None,
            frozen_reason: None,
            closed_at: None,
            closed_by: None,
            closed_reason: None,
        }
    }

    /// Invariant A2: funds not already earmarked by an in-flight hold.
    pub fn available_balance(&self) -> i64 {
        self.balance - self.pending_debit
    }

    /// Invariant A1 check, accounting for debit-normal chart-of-accounts
    /// entries (spec §3).
    pub fn signed_balance(&self) -> i64 {
        match self.normal_balance {
            Some(NormalBalance::Debit) => self.debit_balance - self.credit_balance,
            _ => self.credit_balance - self.debit_balance,
        }
    }

    pub fn is_debit_normal(&self) -> bool {
        matches!(self.normal_balance, Some(NormalBalance::Debit))
    }
}

/// A ledger-owned counterparty account (spec §3 "System account"). No
/// row-level locking on the hot path — balance is advanced in bulk by the
/// hot-account pipeline (`hot_account.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemAccount {
    pub id: Uuid,
    pub ledger_id: Uuid,
    /// Must begin with '@' (spec §3).
    pub identifier: String,
    pub currency: String,
    pub balance: i64,
    pub credit_balance: i64,
    pub debit_balance: i64,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SystemAccount {
    pub fn new(ledger_id: Uuid, identifier: &str, currency: &str) -> Result<Self, SummaError> {
        if !identifier.starts_with('@') {
            return Err(SummaError::InvalidArgument(format!(
                "system account identifier '{identifier}' must begin with '@'"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            ledger_id,
            identifier: identifier.to_string(),
            currency: currency.to_string(),
            balance: 0,
            credit_balance: 0,
            debit_balance: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Thin wrapper around the account-lifecycle adapter calls that dispatches
/// the `AccountCreated`/`AccountFrozen`/`AccountClosed` lifecycle hooks and
/// the generic `beforeOperation`/`afterOperation` matcher hooks (spec §4.9)
/// around them, mirroring `TransactionManager`/`HoldManager`'s shape.
pub struct AccountManager<'a> {
    adapter: &'a dyn LedgerAdapter,
    hooks: &'a HookRegistry,
}

impl<'a> AccountManager<'a> {
    pub fn new(adapter: &'a dyn LedgerAdapter, hooks: &'a HookRegistry) -> Self {
        Self { adapter, hooks }
    }

    #[tracing::instrument(skip(self, account))]
    pub async fn create_account(&self, account: Account) -> Result<Account, SummaError> {
        self.hooks.dispatch_before(HookEvent::AccountCreated, &account).await?;
        self.hooks.dispatch_before_operation("account.create", &account).await?;
        let created = self.adapter.create_account(account).await?;
        self.hooks.dispatch_after(HookEvent::AccountCreated, &created).await?;
        self.hooks.dispatch_after_operation("account.create", &created).await?;
        Ok(created)
    }

    #[tracing::instrument(skip(self))]
    pub async fn freeze_account(&self, ledger_id: Uuid, account_id: Uuid, by: Uuid, reason: &str) -> Result<Account, SummaError> {
        self.hooks
            .dispatch_before(HookEvent::AccountFrozen, &(account_id, reason))
            .await?;
        self.hooks
            .dispatch_before_operation("account.freeze", &(account_id, reason))
            .await?;
        let frozen = self.adapter.freeze_account(ledger_id, account_id, by, reason).await?;
        self.hooks.dispatch_after(HookEvent::AccountFrozen, &frozen).await?;
        self.hooks.dispatch_after_operation("account.freeze", &frozen).await?;
        Ok(frozen)
    }

    #[tracing::instrument(skip(self))]
    pub async fn unfreeze_account(&self, ledger_id: Uuid, account_id: Uuid) -> Result<Account, SummaError> {
        self.adapter.unfreeze_account(ledger_id, account_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn close_account(&self, ledger_id: Uuid, account_id: Uuid, by: Uuid, reason: &str) -> Result<Account, SummaError> {
        self.hooks
            .dispatch_before(HookEvent::AccountClosed, &(account_id, reason))
            .await?;
        self.hooks
            .dispatch_before_operation("account.close", &(account_id, reason))
            .await?;
        let closed = self.adapter.close_account(ledger_id, account_id, by, reason).await?;
        self.hooks.dispatch_after(HookEvent::AccountClosed, &closed).await?;
        self.hooks.dispatch_after_operation("account.close", &closed).await?;
        Ok(closed)
    }
}

/// Overdraft policy check, spec §4.4 step 3. Pure function so it is unit
/// tested without a database, exactly mirroring the prose of the spec.
pub fn check_overdraft(
    account_id: Uuid,
    available_balance: i64,
    amount: i64,
    allow_overdraft: bool,
    overdraft_limit: i64,
) -> Result<(), SummaError> {
    if !allow_overdraft {
        if available_balance < amount {
            return Err(SummaError::InsufficientBalance {
                account_id,
                requested: amount,
                available: available_balance,
            });
        }
        return Ok(());
    }

    if overdraft_limit == 0 {
        // allow_overdraft with no configured limit: unlimited.
        return Ok(());
    }

    if available_balance - amount < -overdraft_limit {
        return Err(SummaError::InsufficientBalance {
            account_id,
            requested: amount,
            available: available_balance,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct() -> Uuid {
        Uuid::now_v7()
    }

    #[test]
    fn no_overdraft_requires_sufficient_available() {
        let id = acct();
        assert!(check_overdraft(id, 100, 100, false, 0).is_ok());
        assert!(check_overdraft(id, 99, 100, false, 0).is_err());
    }

    #[test]
    fn unlimited_overdraft_allows_any_debit() {
        let id = acct();
        assert!(check_overdraft(id, 0, 1_000_000, true, 0).is_ok());
    }

    #[test]
    fn bounded_overdraft_respects_limit() {
        let id = acct();
        // available 0, limit 500: can go to -500.
        assert!(check_overdraft(id, 0, 500, true, 500).is_ok());
        assert!(check_overdraft(id, 0, 501, true, 500).is_err());
    }

    #[test]
    fn available_balance_subtracts_pending_debit() {
        let mut a = Account::new(Uuid::now_v7(), Uuid::now_v7(), HolderType::Individual, "USD");
        a.balance = 10_000;
        a.pending_debit = 4_000;
        assert_eq!(a.available_balance(), 6_000);
    }

    #[test]
    fn status_gate_maps_to_correct_error() {
        let id = Uuid::now_v7();
        assert!(AccountStatus::Active.require_active(id).is_ok());
        assert!(matches!(
            AccountStatus::Frozen.require_active(id),
            Err(SummaError::AccountFrozen(_))
        ));
        assert!(matches!(
            AccountStatus::Closed.require_active(id),
            Err(SummaError::AccountClosed(_))
        ));
    }
}
