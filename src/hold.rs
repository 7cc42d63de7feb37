// src/hold.rs
//
// New module — the teacher's `holding.rs` names a different concept (an
// asset position, not a reservation); grounded instead on the general
// "reserve now, settle later" shape its `adapters/postgres.rs` applies to
// value-object selection, transplanted onto spec §4.6's two-phase hold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::SummaError;
use crate::hooks::{HookEvent, HookRegistry};
use crate::transaction::TransactionOutcome;
use crate::LedgerAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldStatus {
    Pending,
    Committed,
    Voided,
    Expired,
}

/// Spec §4.6 Hold record. Reserves funds against `account_id` without
/// moving them until `commit` settles to one or more destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub id: Uuid,
    pub ledger_id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub status: HoldStatus,
    pub reference: String,
    pub metadata: Json,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Hold {
    pub fn new(
        ledger_id: Uuid,
        account_id: Uuid,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: Json,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            ledger_id,
            account_id,
            amount,
            currency: currency.to_string(),
            status: HoldStatus::Pending,
            reference: reference.to_string(),
            metadata,
            expires_at,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn require_pending(&self) -> Result<(), SummaError> {
        match self.status {
            HoldStatus::Pending => Ok(()),
            other => Err(SummaError::Conflict(format!(
                "hold {} is not pending (status: {other:?})",
                self.id
            ))),
        }
    }
}

/// One destination leg of a hold settlement (spec §4.6 "multi-destination
/// settlement"): a hold for 10000 can commit 7000 to the merchant and 3000
/// to a fee account in one call. At most one destination may omit `amount`
/// and receive whatever remains of the held amount after the explicit
/// settlements.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub destination_account_id: Uuid,
    pub amount: Option<i64>,
}

impl Settlement {
    pub fn exact(destination_account_id: Uuid, amount: i64) -> Self {
        Self {
            destination_account_id,
            amount: Some(amount),
        }
    }

    pub fn remainder(destination_account_id: Uuid) -> Self {
        Self {
            destination_account_id,
            amount: None,
        }
    }
}

/// Spec §4.6: resolves every settlement to a concrete amount, folding at
/// most one remainder destination in against `hold_amount - explicit_total`.
/// Returns the resolved `(destination_account_id, amount)` pairs in the
/// caller's original order.
pub fn resolve_settlements(settlements: &[Settlement], hold_amount: i64) -> Result<Vec<(Uuid, i64)>, SummaError> {
    if settlements.is_empty() {
        return Err(SummaError::InvalidArgument(
            "commit_hold requires at least one settlement".into(),
        ));
    }
    let remainder_count = settlements.iter().filter(|s| s.amount.is_none()).count();
    if remainder_count > 1 {
        return Err(SummaError::InvalidArgument(
            "at most one settlement may omit its amount to receive the remainder".into(),
        ));
    }
    if settlements.iter().any(|s| s.amount.is_some_and(|a| a <= 0)) {
        return Err(SummaError::InvalidArgument(
            "explicit settlement amounts must be positive".into(),
        ));
    }
    let explicit_total: i64 = settlements.iter().filter_map(|s| s.amount).sum();
    if explicit_total > hold_amount {
        return Err(SummaError::InvalidArgument(format!(
            "settlement total {explicit_total} exceeds held amount {hold_amount}"
        )));
    }
    let remainder = hold_amount - explicit_total;
    if remainder_count == 0 && remainder != 0 {
        return Err(SummaError::InvalidArgument(format!(
            "settlement total {explicit_total} is less than held amount {hold_amount} and no destination claims the remainder"
        )));
    }
    if remainder_count == 1 && remainder <= 0 {
        return Err(SummaError::InvalidArgument(
            "remainder settlement would receive a non-positive amount".into(),
        ));
    }
    Ok(settlements
        .iter()
        .map(|s| (s.destination_account_id, s.amount.unwrap_or(remainder)))
        .collect())
}

pub struct HoldManager<'a> {
    adapter: &'a dyn LedgerAdapter,
    hooks: &'a HookRegistry,
}

impl<'a> HoldManager<'a> {
    pub fn new(adapter: &'a dyn LedgerAdapter, hooks: &'a HookRegistry) -> Self {
        Self { adapter, hooks }
    }

    /// Spec §4.6 `createHold`: debits nothing, increases `pending_debit` so
    /// the reserved amount is excluded from `available_balance` (invariant
    /// A2) while remaining part of `balance` until commit/void/expire.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn create_hold(
        &self,
        ledger_id: Uuid,
        account_id: Uuid,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: Json,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Hold, SummaError> {
        if amount <= 0 {
            return Err(SummaError::InvalidArgument("hold amount must be positive".into()));
        }
        self.hooks
            .dispatch_before(HookEvent::HoldCreated, &(account_id, amount))
            .await?;
        self.hooks
            .dispatch_before_operation("hold.create", &(account_id, amount))
            .await?;
        let hold = self
            .adapter
            .create_hold(ledger_id, account_id, amount, currency, reference, metadata, expires_at)
            .await?;
        self.hooks.dispatch_after(HookEvent::HoldCreated, &hold).await?;
        self.hooks.dispatch_after_operation("hold.create", &hold).await?;
        Ok(hold)
    }

    /// Spec §4.6 `commitHold`: settles part or all of the held amount to one
    /// or more destinations; any un-settled remainder is released back to
    /// `available_balance` in the same transaction.
    #[tracing::instrument(skip(self, settlements))]
    pub async fn commit_hold(
        &self,
        ledger_id: Uuid,
        hold_id: Uuid,
        settlements: Vec<Settlement>,
    ) -> Result<TransactionOutcome, SummaError> {
        let hold = self.adapter.get_hold(ledger_id, hold_id).await?;
        hold.require_pending()?;
        // Resolve the remainder destination (if any) up front so the
        // adapter only ever sees explicit, positive settlement amounts.
        let resolved = resolve_settlements(&settlements, hold.amount)?;
        let settlements: Vec<Settlement> = resolved
            .into_iter()
            .map(|(destination_account_id, amount)| Settlement::exact(destination_account_id, amount))
            .collect();

        self.hooks.dispatch_before_operation("hold.commit", &hold).await?;
        let outcome = self.adapter.commit_hold(ledger_id, hold_id, settlements).await?;
        self.hooks.dispatch_after(HookEvent::HoldCommitted, &outcome).await?;
        self.hooks.dispatch_after_operation("hold.commit", &outcome).await?;
        Ok(outcome)
    }

    /// Spec §4.6 `voidHold`: releases the full reserved amount, no funds
    /// move.
    #[tracing::instrument(skip(self))]
    pub async fn void_hold(&self, ledger_id: Uuid, hold_id: Uuid, reason: &str) -> Result<Hold, SummaError> {
        let hold = self.adapter.get_hold(ledger_id, hold_id).await?;
        hold.require_pending()?;
        self.hooks.dispatch_before_operation("hold.void", &hold).await?;
        let voided = self.adapter.void_hold(ledger_id, hold_id, reason).await?;
        self.hooks.dispatch_after(HookEvent::HoldVoided, &voided).await?;
        self.hooks.dispatch_after_operation("hold.void", &voided).await?;
        Ok(voided)
    }

    /// Spec §4.6 `expireHolds`: background-worker entry point (see
    /// `worker.rs`), releases every hold past `expires_at` still pending.
    #[tracing::instrument(skip(self))]
    pub async fn expire_holds(&self, ledger_id: Uuid) -> Result<Vec<Hold>, SummaError> {
        let expired = self.adapter.expire_holds(ledger_id, Utc::now()).await?;
        for hold in &expired {
            self.hooks.dispatch_after(HookEvent::HoldVoided, hold).await?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_hold_passes_require_pending() {
        let hold = Hold::new(Uuid::now_v7(), Uuid::now_v7(), 100, "USD", "ref", serde_json::json!({}), None);
        assert!(hold.require_pending().is_ok());
    }

    #[test]
    fn committed_hold_fails_require_pending() {
        let mut hold = Hold::new(Uuid::now_v7(), Uuid::now_v7(), 100, "USD", "ref", serde_json::json!({}), None);
        hold.status = HoldStatus::Committed;
        assert!(hold.require_pending().is_err());
    }

    #[test]
    fn remainder_destination_gets_leftover_amount() {
        let merchant = Uuid::now_v7();
        let fee_account = Uuid::now_v7();
        let resolved = resolve_settlements(
            &[Settlement::exact(merchant, 7000), Settlement::remainder(fee_account)],
            10_000,
        )
        .unwrap();
        assert_eq!(resolved, vec![(merchant, 7000), (fee_account, 3000)]);
    }

    #[test]
    fn two_remainder_destinations_are_rejected() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        assert!(resolve_settlements(&[Settlement::remainder(a), Settlement::remainder(b)], 100).is_err());
    }

    #[test]
    fn unclaimed_remainder_is_rejected() {
        let merchant = Uuid::now_v7();
        assert!(resolve_settlements(&[Settlement::exact(merchant, 7000)], 10_000).is_err());
    }

    #[test]
    fn all_explicit_settlements_matching_hold_amount_is_allowed() {
        let a = Uuid::now_v7();
        let resolved = resolve_settlements(&[Settlement::exact(a, 10_000)], 10_000).unwrap();
        assert_eq!(resolved, vec![(a, 10_000)]);
    }
}
