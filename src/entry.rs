// src/entry.rs
//
// Grounded in `ledger/src/transaction.rs`'s per-leg bookkeeping (teacher
// tracks debit/credit `Money` on a `Transaction`); spec §3 promotes that to
// a first-class `Entry` row so a transaction can hold more than two legs
// (journal entries, multi-destination transfers).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Debit,
    Credit,
}

/// One leg of a transaction (spec §3 Entry invariants E1/E2). A posted
/// transaction always carries at least two entries whose signed amounts
/// net to zero per currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub entry_type: EntryType,
    pub amount: i64,
    pub currency: String,
    /// Running balance on this account immediately before/after the entry
    /// posted, captured for audit trail purposes (not used for
    /// reconciliation). Equal to each other for a hot-account leg, whose
    /// balance effect is deferred to the batch aggregation pass.
    pub balance_before: i64,
    pub balance_after: i64,
    /// `Account.lock_version`/`SystemAccount.version` at the moment this
    /// entry was written — the unlocked snapshot value for a hot-account
    /// leg, since no row lock was taken.
    pub account_lock_version: i64,
    /// Spec §4.7: `true` when this leg was routed through the hot-account
    /// pipeline rather than applied synchronously.
    pub is_hot_account: bool,
    /// Spec §4.5 `transfer`: set on the converted leg alongside
    /// `exchange_rate` when the entry's currency differs from the
    /// transaction's source currency.
    pub original_amount: Option<i64>,
    pub original_currency: Option<String>,
    pub exchange_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_id: Uuid,
        account_id: Uuid,
        entry_type: EntryType,
        amount: i64,
        currency: &str,
        balance_before: i64,
        balance_after: i64,
        account_lock_version: i64,
        is_hot_account: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id,
            account_id,
            entry_type,
            amount,
            currency: currency.to_string(),
            balance_before,
            balance_after,
            account_lock_version,
            is_hot_account,
            original_amount: None,
            original_currency: None,
            exchange_rate: None,
            created_at: Utc::now(),
        }
    }

    /// Spec §4.5 `transfer`: records the pre-conversion amount/currency and
    /// the resolved rate on the destination leg.
    pub fn with_fx(mut self, original_amount: i64, original_currency: &str, exchange_rate: f64) -> Self {
        self.original_amount = Some(original_amount);
        self.original_currency = Some(original_currency.to_string());
        self.exchange_rate = Some(exchange_rate);
        self
    }

    pub fn signed_amount(&self) -> i64 {
        match self.entry_type {
            EntryType::Debit => self.amount,
            EntryType::Credit => -self.amount,
        }
    }
}

/// Invariant E2: the debit legs and credit legs of a posted transaction must
/// balance per currency. Grouped by currency so a cross-currency journal
/// (each leg settled in its own currency) is validated leg-group by
/// leg-group rather than rejected outright.
pub fn nets_to_zero(entries: &[Entry]) -> bool {
    use std::collections::HashMap;
    let mut totals: HashMap<&str, i64> = HashMap::new();
    for e in entries {
        *totals.entry(e.currency.as_str()).or_insert(0) += e.signed_amount();
    }
    totals.values().all(|v| *v == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(entry_type: EntryType, amount: i64, balance_after: i64) -> Entry {
        Entry::new(Uuid::now_v7(), Uuid::now_v7(), entry_type, amount, "USD", 0, balance_after, 1, false)
    }

    #[test]
    fn two_leg_transfer_nets_to_zero() {
        let entries = vec![entry(EntryType::Debit, 500, 500), entry(EntryType::Credit, 500, 1500)];
        assert!(nets_to_zero(&entries));
    }

    #[test]
    fn unbalanced_entries_fail_nets_to_zero() {
        let entries = vec![entry(EntryType::Debit, 500, 500), entry(EntryType::Credit, 400, 1400)];
        assert!(!nets_to_zero(&entries));
    }

    #[test]
    fn multi_destination_journal_nets_per_currency() {
        let entries = vec![
            entry(EntryType::Debit, 1000, 0),
            entry(EntryType::Credit, 600, 0),
            entry(EntryType::Credit, 400, 0),
        ];
        assert!(nets_to_zero(&entries));
    }

    #[test]
    fn fx_leg_carries_original_amount_and_rate() {
        let e = entry(EntryType::Credit, 920, 920).with_fx(1000, "USD", 0.92);
        assert_eq!(e.original_amount, Some(1000));
        assert_eq!(e.original_currency.as_deref(), Some("USD"));
        assert_eq!(e.exchange_rate, Some(0.92));
    }
}
