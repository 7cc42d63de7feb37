// src/transaction.rs
//
// Grounded in `ledger/src/transaction.rs`'s `Transaction` record and its
// `TransactionManager`-equivalent free functions (`create_transaction`,
// `record_transaction_internal_tx`), but replacing the teacher's
// `Money`/`MoneySlice` UTXO-selection algorithm with the plan-based
// double-entry flow spec §4.5 describes: the manager assembles a
// `TransactionPlan` describing every leg up front (amounts are already
// known, unlike a UTXO coin-selection problem), then hands it to whichever
// `LedgerAdapter` owns the actual row locks and DB transaction boundary —
// the same division of labor the teacher's `PostgresLedgerAdapter` blanket
// impl has between plan construction and `execute_plan`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::entry::{Entry, EntryType};
use crate::error::SummaError;
use crate::fx::FxResolver;
use crate::hooks::{HookEvent, HookRegistry};
use crate::idempotency;
use crate::{Balance, LedgerAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Credit,
    Debit,
    Transfer,
    MultiTransfer,
    Journal,
    Refund,
    Correction,
    Adjustment,
}

impl TransactionType {
    /// `operation.type` string for the generic `beforeOperation`/
    /// `afterOperation` hooks (spec §4.9), e.g. `"transaction.credit"`.
    pub fn operation_type(&self) -> &'static str {
        match self {
            TransactionType::Credit => "transaction.credit",
            TransactionType::Debit => "transaction.debit",
            TransactionType::Transfer => "transaction.transfer",
            TransactionType::MultiTransfer => "transaction.multi_transfer",
            TransactionType::Journal => "transaction.journal",
            TransactionType::Refund => "transaction.refund",
            TransactionType::Correction => "transaction.correction",
            TransactionType::Adjustment => "transaction.adjustment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Posted,
    Reversed,
}

/// Spec §3 Transaction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub ledger_id: Uuid,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: Json,
    pub correlation_id: Uuid,
    /// Set when this transaction reverses or corrects another.
    pub parent_transaction_id: Option<Uuid>,
    pub effective_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One leg to apply as part of a `TransactionPlan`. Amounts are always
/// non-negative; sign comes from `entry_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegPlan {
    pub account_id: Uuid,
    pub entry_type: EntryType,
    pub amount: i64,
    pub currency: String,
    /// `true` for a forced debit (spec §4.5 step for `force_debit`): skips
    /// the overdraft check entirely instead of honoring `allow_overdraft`.
    pub force: bool,
    /// Spec §4.5 `transfer`: set on a currency-converted leg alongside
    /// `exchange_rate`, carried onto the posted `Entry` verbatim.
    pub original_amount: Option<i64>,
    pub original_currency: Option<String>,
    pub exchange_rate: Option<f64>,
}

impl LegPlan {
    pub fn new(account_id: Uuid, entry_type: EntryType, amount: i64, currency: &str, force: bool) -> Self {
        Self {
            account_id,
            entry_type,
            amount,
            currency: currency.to_string(),
            force,
            original_amount: None,
            original_currency: None,
            exchange_rate: None,
        }
    }

    pub fn with_fx(mut self, original_amount: i64, original_currency: &str, exchange_rate: f64) -> Self {
        self.original_amount = Some(original_amount);
        self.original_currency = Some(original_currency.to_string());
        self.exchange_rate = Some(exchange_rate);
        self
    }
}

/// Everything `LedgerAdapter::execute_transaction_plan` needs to post one
/// transaction atomically: lock every named account in ascending id order,
/// apply each leg's delta, write the transaction + entry rows, append one
/// event per touched account, and (if an idempotency key was supplied)
/// record the dedupe row — all inside a single DB transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPlan {
    pub ledger_id: Uuid,
    pub transaction_type: TransactionType,
    pub reference: String,
    pub amount: i64,
    pub currency: String,
    pub description: Option<String>,
    pub metadata: Json,
    pub correlation_id: Uuid,
    pub parent_transaction_id: Option<Uuid>,
    pub effective_date: DateTime<Utc>,
    pub legs: Vec<LegPlan>,
    pub idempotency_key: Option<String>,
}

impl TransactionPlan {
    /// Deadlock avoidance (spec §4.5, §8 invariant 5): every adapter must
    /// lock accounts in this order before touching any of them.
    pub fn accounts_to_lock(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.legs.iter().map(|l| l.account_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Spec §8 boundary behavior: an unbalanced plan is rejected with
    /// `INVALID_ARGUMENT` before any leg is applied, never discovered after
    /// partially mutating account balances (invariant E2).
    pub fn legs_net_to_zero(&self) -> bool {
        use std::collections::HashMap;
        let mut totals: HashMap<&str, i64> = HashMap::new();
        for leg in &self.legs {
            let signed = match leg.entry_type {
                EntryType::Debit => leg.amount,
                EntryType::Credit => -leg.amount,
            };
            *totals.entry(leg.currency.as_str()).or_insert(0) += signed;
        }
        totals.values().all(|v| *v == 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub transaction: Transaction,
    pub entries: Vec<Entry>,
    pub balances: Vec<Balance>,
    /// `true` when an idempotency key matched a prior request and the
    /// returned transaction is the original, not a new posting.
    pub replayed: bool,
}

pub struct TransactionManager<'a> {
    adapter: &'a dyn LedgerAdapter,
    hooks: &'a HookRegistry,
    fx: &'a dyn FxResolver,
    max_transaction_amount: i64,
}

impl<'a> TransactionManager<'a> {
    pub fn new(
        adapter: &'a dyn LedgerAdapter,
        hooks: &'a HookRegistry,
        fx: &'a dyn FxResolver,
        max_transaction_amount: i64,
    ) -> Self {
        Self {
            adapter,
            hooks,
            fx,
            max_transaction_amount,
        }
    }

    fn validate_amount(&self, amount: i64) -> Result<(), SummaError> {
        if amount <= 0 {
            return Err(SummaError::InvalidArgument("amount must be positive".into()));
        }
        if amount > self.max_transaction_amount {
            return Err(SummaError::LimitExceeded(format!(
                "amount {amount} exceeds configured maximum {}",
                self.max_transaction_amount
            )));
        }
        Ok(())
    }

    async fn run(&self, plan: TransactionPlan) -> Result<TransactionOutcome, SummaError> {
        let operation_type = plan.transaction_type.operation_type();
        self.hooks
            .dispatch_before(HookEvent::TransactionPosting, &plan)
            .await?;
        self.hooks.dispatch_before_operation(operation_type, &plan).await?;
        let outcome = self.adapter.execute_transaction_plan(plan).await?;
        if !outcome.replayed {
            self.hooks
                .dispatch_after(HookEvent::TransactionPosted, &outcome)
                .await?;
            self.hooks.dispatch_after_operation(operation_type, &outcome).await?;
        }
        Ok(outcome)
    }

    /// Spec §4.5 `credit`: single leg crediting `account_id`, countered by
    /// the ledger's system clearing account picked by the caller via
    /// `counter_account_id` (usually `@clearing` or `@deposits`).
    #[tracing::instrument(skip(self, metadata))]
    #[allow(clippy::too_many_arguments)]
    pub async fn credit(
        &self,
        ledger_id: Uuid,
        account_id: Uuid,
        counter_account_id: Uuid,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: Json,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        self.validate_amount(amount)?;
        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Credit,
            reference: reference.to_string(),
            amount,
            currency: currency.to_string(),
            description: None,
            metadata,
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            legs: vec![
                LegPlan::new(account_id, EntryType::Credit, amount, currency, false),
                LegPlan::new(counter_account_id, EntryType::Debit, amount, currency, true),
            ],
            idempotency_key,
        };
        self.run(plan).await
    }

    /// Spec §4.5 `debit`. Honors `allow_overdraft`/`overdraft_limit`.
    #[tracing::instrument(skip(self, metadata))]
    #[allow(clippy::too_many_arguments)]
    pub async fn debit(
        &self,
        ledger_id: Uuid,
        account_id: Uuid,
        counter_account_id: Uuid,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: Json,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        self.validate_amount(amount)?;
        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Debit,
            reference: reference.to_string(),
            amount,
            currency: currency.to_string(),
            description: None,
            metadata,
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            legs: vec![
                LegPlan::new(account_id, EntryType::Debit, amount, currency, false),
                LegPlan::new(counter_account_id, EntryType::Credit, amount, currency, true),
            ],
            idempotency_key,
        };
        self.run(plan).await
    }

    /// Spec §4.5 `forceDebit`: bypasses the overdraft policy entirely,
    /// reserved for administrative corrections.
    #[tracing::instrument(skip(self, metadata))]
    #[allow(clippy::too_many_arguments)]
    pub async fn force_debit(
        &self,
        ledger_id: Uuid,
        account_id: Uuid,
        counter_account_id: Uuid,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: Json,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        self.validate_amount(amount)?;
        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Debit,
            reference: reference.to_string(),
            amount,
            currency: currency.to_string(),
            description: Some("force debit".to_string()),
            metadata,
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            legs: vec![
                LegPlan::new(account_id, EntryType::Debit, amount, currency, true),
                LegPlan::new(counter_account_id, EntryType::Credit, amount, currency, true),
            ],
            idempotency_key,
        };
        self.run(plan).await
    }

    /// Spec §4.5 `transfer`: two accounts, same currency unless an
    /// `FxResolver` is configured, in which case the destination leg is
    /// converted and the resolved rate is recorded on the destination
    /// `Entry` (not the transaction's `metadata` — spec §4.5).
    #[tracing::instrument(skip(self, metadata))]
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer(
        &self,
        ledger_id: Uuid,
        source_account_id: Uuid,
        destination_account_id: Uuid,
        amount: i64,
        source_currency: &str,
        destination_currency: &str,
        reference: &str,
        idempotency_key: Option<String>,
        metadata: Json,
    ) -> Result<TransactionOutcome, SummaError> {
        self.validate_amount(amount)?;

        let mut destination_leg = LegPlan::new(destination_account_id, EntryType::Credit, amount, destination_currency, false);
        if source_currency != destination_currency {
            let quote = self
                .fx
                .convert(source_currency, destination_currency, amount)
                .await?;
            destination_leg.amount = quote.converted_amount;
            destination_leg = destination_leg.with_fx(amount, source_currency, quote.rate);
        }

        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Transfer,
            reference: reference.to_string(),
            amount,
            currency: source_currency.to_string(),
            description: None,
            metadata,
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            legs: vec![
                LegPlan::new(source_account_id, EntryType::Debit, amount, source_currency, false),
                destination_leg,
            ],
            idempotency_key,
        };
        self.run(plan).await
    }

    /// Spec §4.5 `multiTransfer`: one source, many destinations, amounts
    /// must sum to `amount` (validated against `TransactionPlan::legs_net_to_zero`
    /// before the adapter applies anything).
    #[tracing::instrument(skip(self, metadata, destinations))]
    pub async fn multi_transfer(
        &self,
        ledger_id: Uuid,
        source_account_id: Uuid,
        destinations: Vec<(Uuid, i64)>,
        currency: &str,
        reference: &str,
        metadata: Json,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        let total: i64 = destinations.iter().map(|(_, amount)| amount).sum();
        self.validate_amount(total)?;
        if destinations.iter().any(|(_, amount)| *amount <= 0) {
            return Err(SummaError::InvalidArgument(
                "every destination amount must be positive".into(),
            ));
        }

        let mut legs = vec![LegPlan::new(source_account_id, EntryType::Debit, total, currency, false)];
        for (destination_account_id, amount) in destinations {
            legs.push(LegPlan::new(destination_account_id, EntryType::Credit, amount, currency, false));
        }

        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::MultiTransfer,
            reference: reference.to_string(),
            amount: total,
            currency: currency.to_string(),
            description: None,
            metadata,
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            legs,
            idempotency_key,
        };
        self.run(plan).await
    }

    /// Spec §4.5 `journal`: caller supplies arbitrary debit/credit legs that
    /// must net to zero per currency; used for chart-of-accounts postings
    /// that don't fit the credit/debit/transfer shape.
    #[tracing::instrument(skip(self, metadata, legs))]
    pub async fn journal(
        &self,
        ledger_id: Uuid,
        legs: Vec<LegPlan>,
        reference: &str,
        description: Option<String>,
        metadata: Json,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        if legs.len() < 2 {
            return Err(SummaError::InvalidArgument(
                "a journal entry needs at least two legs".into(),
            ));
        }
        let amount: i64 = legs
            .iter()
            .filter(|l| l.entry_type == EntryType::Debit)
            .map(|l| l.amount)
            .sum();
        let currency = legs[0].currency.clone();

        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Journal,
            reference: reference.to_string(),
            amount,
            currency,
            description,
            metadata,
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            legs,
            idempotency_key,
        };
        // Spec §8 boundary: reject an unbalanced journal up front rather than
        // letting the adapter discover it after mutating balances.
        if !plan.legs_net_to_zero() {
            return Err(SummaError::InvalidArgument(
                "journal legs do not net to zero per currency".into(),
            ));
        }
        self.run(plan).await
    }

    /// Spec §4.5 `refund`: reverses a posted transaction's legs, capped by
    /// (and referencing) the original.
    #[tracing::instrument(skip(self))]
    pub async fn refund(
        &self,
        ledger_id: Uuid,
        original_transaction_id: Uuid,
        amount: Option<i64>,
        reference: &str,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        let original = self.adapter.get_transaction(ledger_id, original_transaction_id).await?;
        let entries = self.adapter.get_entries(original_transaction_id).await?;
        let refund_amount = amount.unwrap_or(original.amount);
        if refund_amount > original.amount {
            return Err(SummaError::InvalidArgument(
                "refund amount cannot exceed the original transaction amount".into(),
            ));
        }

        let scale = refund_amount as f64 / original.amount as f64;
        let legs: Vec<LegPlan> = entries
            .iter()
            .map(|e| {
                let reversed_type = match e.entry_type {
                    EntryType::Debit => EntryType::Credit,
                    EntryType::Credit => EntryType::Debit,
                };
                LegPlan::new(
                    e.account_id,
                    reversed_type,
                    ((e.amount as f64) * scale).round() as i64,
                    &e.currency,
                    true,
                )
            })
            .collect();

        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Refund,
            reference: reference.to_string(),
            amount: refund_amount,
            currency: original.currency.clone(),
            description: Some(format!("refund of {original_transaction_id}")),
            metadata: serde_json::json!({}),
            correlation_id: original.correlation_id,
            parent_transaction_id: Some(original_transaction_id),
            effective_date: Utc::now(),
            legs,
            idempotency_key,
        };
        self.run(plan).await
    }

    /// Spec §4.5 `correct`: books an exact reversal of every leg plus a
    /// corrected replacement, leaving both the original and the correction
    /// visible in the ledger (never mutates or deletes history).
    #[tracing::instrument(skip(self, corrected_legs))]
    pub async fn correct(
        &self,
        ledger_id: Uuid,
        original_transaction_id: Uuid,
        corrected_legs: Vec<LegPlan>,
        reference: &str,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        let original = self.adapter.get_transaction(ledger_id, original_transaction_id).await?;
        let amount: i64 = corrected_legs
            .iter()
            .filter(|l| l.entry_type == EntryType::Debit)
            .map(|l| l.amount)
            .sum();

        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Correction,
            reference: reference.to_string(),
            amount,
            currency: original.currency,
            description: Some(format!("correction of {original_transaction_id}")),
            metadata: serde_json::json!({}),
            correlation_id: original.correlation_id,
            parent_transaction_id: Some(original_transaction_id),
            effective_date: Utc::now(),
            legs: corrected_legs,
            idempotency_key,
        };
        if !plan.legs_net_to_zero() {
            return Err(SummaError::InvalidArgument(
                "correction legs do not net to zero per currency".into(),
            ));
        }
        self.run(plan).await
    }

    /// Spec §4.5 `adjust`: administrative single-account delta against a
    /// system adjustment account, always forced (bypasses overdraft).
    #[tracing::instrument(skip(self, metadata))]
    #[allow(clippy::too_many_arguments)]
    pub async fn adjust(
        &self,
        ledger_id: Uuid,
        account_id: Uuid,
        adjustment_account_id: Uuid,
        delta: i64,
        currency: &str,
        reference: &str,
        metadata: Json,
        idempotency_key: Option<String>,
    ) -> Result<TransactionOutcome, SummaError> {
        if delta == 0 {
            return Err(SummaError::InvalidArgument("adjustment delta must not be zero".into()));
        }
        let amount = delta.abs();
        let (account_leg, adjustment_leg) = if delta > 0 {
            (EntryType::Credit, EntryType::Debit)
        } else {
            (EntryType::Debit, EntryType::Credit)
        };

        let plan = TransactionPlan {
            ledger_id,
            transaction_type: TransactionType::Adjustment,
            reference: reference.to_string(),
            amount,
            currency: currency.to_string(),
            description: Some("manual adjustment".to_string()),
            metadata,
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            legs: vec![
                LegPlan::new(account_id, account_leg, amount, currency, true),
                LegPlan::new(adjustment_account_id, adjustment_leg, amount, currency, true),
            ],
            idempotency_key,
        };
        self.run(plan).await
    }
}

/// Shared by `execute_transaction_plan` implementations: step 1 of spec
/// §4.3 — a stored record under the same idempotency key replays when its
/// `reference` matches this plan's `reference`, and conflicts otherwise.
pub fn check_idempotency(
    existing: Option<&crate::idempotency::IdempotencyRecord>,
    plan: &TransactionPlan,
) -> Result<idempotency::IdempotencyOutcome, SummaError> {
    if plan.idempotency_key.is_none() {
        return Ok(idempotency::IdempotencyOutcome::Fresh);
    }
    idempotency::check(existing, &plan.reference)
}
