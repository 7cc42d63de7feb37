// src/adapters/memory.rs
//
// Grounded in `ledger/src/adapters/memory.rs`'s "hold the mutex for the
// entire operation" pattern — this adapter's `execute_transaction_plan` is
// its equivalent of BEGIN/SELECT FOR UPDATE/COMMIT. No other task can enter
// a mutating method while the lock is held, which is exactly the isolation
// `adapters::postgres::PgAdapter` gets from a real DB transaction. Used by
// this crate's own integration tests and by embedders that want a
// dependency-free dry run (spec §4.1: Postgres-only is the supported
// production backend, but nothing in the domain layer assumes it).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::{Account, SystemAccount};
use crate::balance::{self, Balance, BalanceDelta};
use crate::currency::Currency;
use crate::entry::{Entry, EntryType};
use crate::error::SummaError;
use crate::event::{self, AggregateType, EventRow, HashSnapshot};
use crate::hold::{Hold, HoldStatus, Settlement};
use crate::hot_account::{self, BatchOutcome, HotAccountEntry};
use crate::idempotency::{self, IdempotencyOutcome, IdempotencyRecord};
use crate::transaction::{Transaction, TransactionOutcome, TransactionPlan, TransactionStatus};
use crate::LedgerAdapter;

struct Store {
    accounts: HashMap<Uuid, Account>,
    account_index: HashMap<(Uuid, Uuid, String), Uuid>,
    system_accounts: HashMap<Uuid, SystemAccount>,
    system_account_index: HashMap<(Uuid, String), Uuid>,
    currencies: HashMap<String, Currency>,
    transactions: HashMap<Uuid, Transaction>,
    transaction_index: HashMap<(Uuid, String), Uuid>,
    entries: HashMap<Uuid, Vec<Entry>>,
    idempotency: HashMap<(Uuid, String), IdempotencyRecord>,
    holds: HashMap<Uuid, Hold>,
    hot_entries: Vec<HotAccountEntry>,
    events: HashMap<(Uuid, AggregateType, Uuid), Vec<EventRow>>,
    snapshots: HashMap<(Uuid, AggregateType, Uuid), HashSnapshot>,
    leases: HashMap<String, (String, DateTime<Utc>)>,
}

impl Store {
    fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            account_index: HashMap::new(),
            system_accounts: HashMap::new(),
            system_account_index: HashMap::new(),
            currencies: HashMap::new(),
            transactions: HashMap::new(),
            transaction_index: HashMap::new(),
            entries: HashMap::new(),
            idempotency: HashMap::new(),
            holds: HashMap::new(),
            hot_entries: Vec::new(),
            events: HashMap::new(),
            snapshots: HashMap::new(),
            leases: HashMap::new(),
        }
    }

    /// Appends one event to an aggregate's stream, folding in the current
    /// tip hash (spec §4.2 steps 2-4). Mirrors what `PgAdapter` does under
    /// `pg_advisory_xact_lock`.
    fn append_event(
        &mut self,
        ledger_id: Uuid,
        aggregate_type: AggregateType,
        aggregate_id: Uuid,
        event_type: &str,
        event_data: serde_json::Value,
        hmac_secret: Option<&str>,
    ) {
        let key = (ledger_id, aggregate_type, aggregate_id);
        let stream = self.events.entry(key).or_default();
        let (prev_version, prev_hash) = stream
            .last()
            .map(|e| (e.version, Some(e.hash.clone())))
            .unwrap_or((0, None));
        let row = event::next_event(
            ledger_id,
            aggregate_type,
            aggregate_id,
            prev_version,
            prev_hash.as_deref(),
            event_type,
            event_data,
            hmac_secret,
        );
        stream.push(row);
    }
}

pub struct MemoryAdapter {
    store: Mutex<Store>,
    hmac_secret: Option<String>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::new()),
            hmac_secret: None,
        }
    }

    pub fn with_hmac_secret(mut self, secret: impl Into<String>) -> Self {
        self.hmac_secret = Some(secret.into());
        self
    }

    fn hmac(&self) -> Option<&str> {
        self.hmac_secret.as_deref()
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerAdapter for MemoryAdapter {
    async fn get_account(&self, ledger_id: Uuid, account_id: Uuid) -> Result<Account, SummaError> {
        let store = self.store.lock().unwrap();
        store
            .accounts
            .get(&account_id)
            .filter(|a| a.ledger_id == ledger_id)
            .cloned()
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))
    }

    async fn get_account_by_holder(
        &self,
        ledger_id: Uuid,
        holder_id: Uuid,
        currency: &str,
    ) -> Result<Account, SummaError> {
        let store = self.store.lock().unwrap();
        let id = store
            .account_index
            .get(&(ledger_id, holder_id, currency.to_string()))
            .ok_or_else(|| SummaError::NotFound(format!("account for holder {holder_id}")))?;
        Ok(store.accounts[id].clone())
    }

    async fn create_account(&self, account: Account) -> Result<Account, SummaError> {
        let mut store = self.store.lock().unwrap();
        let key = (account.ledger_id, account.holder_id, account.currency.clone());
        if store.account_index.contains_key(&key) {
            return Err(SummaError::Conflict(format!(
                "account already exists for holder {} in {}",
                account.holder_id, account.currency
            )));
        }
        store.account_index.insert(key, account.id);
        store.accounts.insert(account.id, account.clone());
        store.append_event(
            account.ledger_id,
            AggregateType::Account,
            account.id,
            "account.created",
            serde_json::to_value(&account).unwrap_or_default(),
            self.hmac(),
        );
        Ok(account)
    }

    async fn freeze_account(&self, ledger_id: Uuid, account_id: Uuid, by: Uuid, reason: &str) -> Result<Account, SummaError> {
        let mut store = self.store.lock().unwrap();
        let account = store
            .accounts
            .get_mut(&account_id)
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        account.status = crate::account::AccountStatus::Frozen;
        account.frozen_at = Some(Utc::now());
        account.frozen_by = Some(by);
        account.frozen_reason = Some(reason.to_string());
        let snapshot = account.clone();
        store.append_event(
            ledger_id,
            AggregateType::Account,
            account_id,
            "account.frozen",
            serde_json::json!({ "by": by, "reason": reason }),
            self.hmac(),
        );
        Ok(snapshot)
    }

    async fn unfreeze_account(&self, ledger_id: Uuid, account_id: Uuid) -> Result<Account, SummaError> {
        let mut store = self.store.lock().unwrap();
        let account = store
            .accounts
            .get_mut(&account_id)
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        account.status = crate::account::AccountStatus::Active;
        account.frozen_at = None;
        account.frozen_by = None;
        account.frozen_reason = None;
        let snapshot = account.clone();
        store.append_event(
            ledger_id,
            AggregateType::Account,
            account_id,
            "account.unfrozen",
            serde_json::json!({}),
            self.hmac(),
        );
        Ok(snapshot)
    }

    async fn close_account(&self, ledger_id: Uuid, account_id: Uuid, by: Uuid, reason: &str) -> Result<Account, SummaError> {
        let mut store = self.store.lock().unwrap();
        let account = store
            .accounts
            .get(&account_id)
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        if account.balance != 0 {
            return Err(SummaError::Conflict(format!(
                "account {account_id} has a non-zero balance and cannot be closed"
            )));
        }
        let account = store.accounts.get_mut(&account_id).unwrap();
        account.status = crate::account::AccountStatus::Closed;
        account.closed_at = Some(Utc::now());
        account.closed_by = Some(by);
        account.closed_reason = Some(reason.to_string());
        let snapshot = account.clone();
        store.append_event(
            ledger_id,
            AggregateType::Account,
            account_id,
            "account.closed",
            serde_json::json!({ "by": by, "reason": reason }),
            self.hmac(),
        );
        Ok(snapshot)
    }

    async fn get_system_account(&self, ledger_id: Uuid, identifier: &str) -> Result<SystemAccount, SummaError> {
        let store = self.store.lock().unwrap();
        let id = store
            .system_account_index
            .get(&(ledger_id, identifier.to_string()))
            .ok_or_else(|| SummaError::NotFound(format!("system account {identifier}")))?;
        Ok(store.system_accounts[id].clone())
    }

    async fn create_system_account(&self, account: SystemAccount) -> Result<SystemAccount, SummaError> {
        let mut store = self.store.lock().unwrap();
        let key = (account.ledger_id, account.identifier.clone());
        if store.system_account_index.contains_key(&key) {
            return Err(SummaError::Conflict(format!(
                "system account {} already exists",
                account.identifier
            )));
        }
        store.system_account_index.insert(key, account.id);
        store.system_accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_currency(&self, code: &str) -> Result<Currency, SummaError> {
        let store = self.store.lock().unwrap();
        store
            .currencies
            .get(code)
            .cloned()
            .or_else(|| crate::currency::well_known(code))
            .ok_or_else(|| SummaError::NotFound(format!("currency {code}")))
    }

    async fn create_currency(&self, currency: Currency) -> Result<Currency, SummaError> {
        let mut store = self.store.lock().unwrap();
        store.currencies.insert(currency.code.clone(), currency.clone());
        Ok(currency)
    }

    async fn get_transaction(&self, ledger_id: Uuid, id: Uuid) -> Result<Transaction, SummaError> {
        let store = self.store.lock().unwrap();
        store
            .transactions
            .get(&id)
            .filter(|t| t.ledger_id == ledger_id)
            .cloned()
            .ok_or_else(|| SummaError::NotFound(format!("transaction {id}")))
    }

    async fn get_transaction_by_reference(
        &self,
        ledger_id: Uuid,
        reference: &str,
    ) -> Result<Option<Transaction>, SummaError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .transaction_index
            .get(&(ledger_id, reference.to_string()))
            .map(|id| store.transactions[id].clone()))
    }

    async fn get_entries(&self, transaction_id: Uuid) -> Result<Vec<Entry>, SummaError> {
        let store = self.store.lock().unwrap();
        Ok(store.entries.get(&transaction_id).cloned().unwrap_or_default())
    }

    async fn execute_transaction_plan(&self, plan: TransactionPlan) -> Result<TransactionOutcome, SummaError> {
        let mut store = self.store.lock().unwrap();

        if let Some(key) = &plan.idempotency_key {
            let existing = store.idempotency.get(&(plan.ledger_id, key.clone()));
            let outcome = crate::transaction::check_idempotency(existing, &plan)?;
            if outcome == IdempotencyOutcome::Replay {
                let existing = existing.unwrap();
                let tx: Transaction = serde_json::from_value(existing.response_body.clone())
                    .map_err(|e| SummaError::Internal(e.into()))?;
                let entries = store.entries.get(&tx.id).cloned().unwrap_or_default();
                return Ok(TransactionOutcome {
                    transaction: tx,
                    entries,
                    balances: Vec::new(),
                    replayed: true,
                });
            }
        }

        if store.transaction_index.contains_key(&(plan.ledger_id, plan.reference.clone())) {
            return Err(SummaError::Conflict(format!(
                "reference '{}' already used",
                plan.reference
            )));
        }

        // Deadlock avoidance: touch every account in ascending id order
        // before mutating any of them (spec §8 invariant 5).
        for account_id in plan.accounts_to_lock() {
            if !store.accounts.contains_key(&account_id) && !store.system_accounts.contains_key(&account_id) {
                return Err(SummaError::NotFound(format!("account {account_id}")));
            }
        }

        let transaction = Transaction {
            id: Uuid::now_v7(),
            ledger_id: plan.ledger_id,
            transaction_type: plan.transaction_type,
            status: TransactionStatus::Posted,
            reference: plan.reference.clone(),
            amount: plan.amount,
            currency: plan.currency.clone(),
            description: plan.description.clone(),
            metadata: plan.metadata.clone(),
            correlation_id: plan.correlation_id,
            parent_transaction_id: plan.parent_transaction_id,
            effective_date: plan.effective_date,
            created_at: Utc::now(),
        };

        // Spec §8 boundary: an unbalanced plan is rejected before any leg is
        // applied, so a rejected journal never leaves partially-mutated
        // balances behind (invariant E2 stays intact on the error path).
        if !plan.legs_net_to_zero() {
            return Err(SummaError::InvalidArgument(
                "transaction legs do not net to zero".into(),
            ));
        }

        let mut entries = Vec::with_capacity(plan.legs.len());
        let mut balances = Vec::with_capacity(plan.legs.len());
        let mut hot_enqueues = Vec::new();
        for leg in &plan.legs {
            let mut posted = if let Some(account) = store.accounts.get_mut(&leg.account_id) {
                let balance_before = account.balance;
                let delta = match leg.entry_type {
                    EntryType::Debit => BalanceDelta::debit(leg.amount),
                    EntryType::Credit => BalanceDelta::credit(leg.amount),
                };
                balance::apply_delta(account, delta, self.hmac(), leg.force)?;
                balances.push(Balance::from(&*account));
                Entry::new(
                    transaction.id,
                    leg.account_id,
                    leg.entry_type,
                    leg.amount,
                    &leg.currency,
                    balance_before,
                    account.balance,
                    account.lock_version,
                    false,
                )
            } else {
                // Spec §4.5 step 8 / §4.7: a system-account leg is never
                // locked synchronously — its balance effect is deferred to
                // the hot-account batch pass.
                let sys = store.system_accounts.get(&leg.account_id).unwrap();
                hot_enqueues.push(HotAccountEntry::new(
                    plan.ledger_id,
                    leg.account_id,
                    transaction.id,
                    leg.entry_type,
                    leg.amount,
                ));
                Entry::new(
                    transaction.id,
                    leg.account_id,
                    leg.entry_type,
                    leg.amount,
                    &leg.currency,
                    sys.balance,
                    sys.balance,
                    sys.version,
                    true,
                )
            };
            if let (Some(original_amount), Some(original_currency), Some(exchange_rate)) =
                (leg.original_amount, leg.original_currency.as_deref(), leg.exchange_rate)
            {
                posted = posted.with_fx(original_amount, original_currency, exchange_rate);
            }
            entries.push(posted);
        }
        for hot_entry in hot_enqueues {
            store.hot_entries.push(hot_entry);
        }

        store.transaction_index.insert((plan.ledger_id, plan.reference.clone()), transaction.id);
        store.transactions.insert(transaction.id, transaction.clone());
        store.entries.insert(transaction.id, entries.clone());

        // Spec §6: the posted event's payload is fixed as
        // `{postedAt, entries: [{accountId, entryType, amount, balanceBefore, balanceAfter}]}`.
        let event_data = serde_json::json!({
            "postedAt": transaction.created_at,
            "entries": entries.iter().map(|e| serde_json::json!({
                "accountId": e.account_id,
                "entryType": e.entry_type,
                "amount": e.amount,
                "balanceBefore": e.balance_before,
                "balanceAfter": e.balance_after,
            })).collect::<Vec<_>>(),
        });
        for account_id in plan.accounts_to_lock() {
            store.append_event(
                plan.ledger_id,
                AggregateType::Account,
                account_id,
                "account.transaction_posted",
                event_data.clone(),
                self.hmac(),
            );
        }

        if let Some(key) = &plan.idempotency_key {
            let record = idempotency::new_record(
                plan.ledger_id,
                key,
                &plan.reference,
                serde_json::to_value(&transaction).unwrap_or_default(),
                Duration::from_secs(24 * 3600),
            );
            store.idempotency.insert((plan.ledger_id, key.clone()), record);
        }

        Ok(TransactionOutcome {
            transaction,
            entries,
            balances,
            replayed: false,
        })
    }

    async fn get_idempotency_record(&self, ledger_id: Uuid, key: &str) -> Result<Option<IdempotencyRecord>, SummaError> {
        let store = self.store.lock().unwrap();
        Ok(store.idempotency.get(&(ledger_id, key.to_string())).cloned())
    }

    async fn cleanup_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64, SummaError> {
        let mut store = self.store.lock().unwrap();
        let before = store.idempotency.len();
        store.idempotency.retain(|_, record| !idempotency::is_expired(record, now));
        Ok((before - store.idempotency.len()) as u64)
    }

    async fn get_hold(&self, ledger_id: Uuid, id: Uuid) -> Result<Hold, SummaError> {
        let store = self.store.lock().unwrap();
        store
            .holds
            .get(&id)
            .filter(|h| h.ledger_id == ledger_id)
            .cloned()
            .ok_or_else(|| SummaError::NotFound(format!("hold {id}")))
    }

    async fn create_hold(
        &self,
        ledger_id: Uuid,
        account_id: Uuid,
        amount: i64,
        currency: &str,
        reference: &str,
        metadata: serde_json::Value,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Hold, SummaError> {
        let mut store = self.store.lock().unwrap();
        let account = store
            .accounts
            .get_mut(&account_id)
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        balance::apply_delta(account, BalanceDelta::pending_debit(amount), self.hmac(), false)?;

        let hold = Hold::new(ledger_id, account_id, amount, currency, reference, metadata, expires_at);
        store.holds.insert(hold.id, hold.clone());
        store.append_event(
            ledger_id,
            AggregateType::Hold,
            hold.id,
            "hold.created",
            serde_json::to_value(&hold).unwrap_or_default(),
            self.hmac(),
        );
        Ok(hold)
    }

    async fn commit_hold(
        &self,
        ledger_id: Uuid,
        hold_id: Uuid,
        settlements: Vec<Settlement>,
    ) -> Result<TransactionOutcome, SummaError> {
        let mut store = self.store.lock().unwrap();
        let hold = store
            .holds
            .get(&hold_id)
            .filter(|h| h.ledger_id == ledger_id)
            .cloned()
            .ok_or_else(|| SummaError::NotFound(format!("hold {hold_id}")))?;
        hold.require_pending()?;

        let total: i64 = settlements
            .iter()
            .map(|s| {
                s.amount
                    .ok_or_else(|| SummaError::InvalidArgument("settlement amount must be resolved".into()))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .sum();
        let source = store
            .accounts
            .get_mut(&hold.account_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {}", hold.account_id)))?;
        let source_balance_before = source.balance;
        // release the full hold from pending, then re-debit only what settles.
        balance::apply_delta(source, BalanceDelta { pending_debit_delta: -hold.amount, ..Default::default() }, self.hmac(), true)?;
        balance::apply_delta(source, BalanceDelta::debit(total), self.hmac(), true)?;
        let source_balance_after = source.balance;
        let source_lock_version = source.lock_version;

        let transaction = Transaction {
            id: Uuid::now_v7(),
            ledger_id,
            transaction_type: crate::transaction::TransactionType::Transfer,
            status: TransactionStatus::Posted,
            reference: format!("hold-commit:{hold_id}"),
            amount: total,
            currency: hold.currency.clone(),
            description: Some(format!("settlement of hold {hold_id}")),
            metadata: serde_json::json!({ "hold_id": hold_id }),
            correlation_id: Uuid::now_v7(),
            parent_transaction_id: None,
            effective_date: Utc::now(),
            created_at: Utc::now(),
        };

        let mut entries = vec![Entry::new(
            transaction.id,
            hold.account_id,
            EntryType::Debit,
            total,
            &hold.currency,
            source_balance_before,
            source_balance_after,
            source_lock_version,
            false,
        )];
        let mut balances = vec![Balance::from(&*store.accounts.get(&hold.account_id).unwrap())];
        let mut hot_enqueues = Vec::new();

        for settlement in &settlements {
            let amount = settlement
                .amount
                .ok_or_else(|| SummaError::InvalidArgument("settlement amount must be resolved".into()))?;
            if let Some(dest) = store.accounts.get_mut(&settlement.destination_account_id) {
                let balance_before = dest.balance;
                balance::apply_delta(dest, BalanceDelta::credit(amount), self.hmac(), false)?;
                entries.push(Entry::new(
                    transaction.id,
                    settlement.destination_account_id,
                    EntryType::Credit,
                    amount,
                    &hold.currency,
                    balance_before,
                    dest.balance,
                    dest.lock_version,
                    false,
                ));
                balances.push(Balance::from(&*dest));
            } else {
                // Spec §4.5 step 8 / §4.7: route system-account settlement
                // destinations through the hot-account pipeline instead of
                // locking the row synchronously.
                let sys = store
                    .system_accounts
                    .get(&settlement.destination_account_id)
                    .ok_or_else(|| SummaError::NotFound(format!("account {}", settlement.destination_account_id)))?;
                entries.push(Entry::new(
                    transaction.id,
                    settlement.destination_account_id,
                    EntryType::Credit,
                    amount,
                    &hold.currency,
                    sys.balance,
                    sys.balance,
                    sys.version,
                    true,
                ));
                hot_enqueues.push(HotAccountEntry::new(
                    ledger_id,
                    settlement.destination_account_id,
                    transaction.id,
                    EntryType::Credit,
                    amount,
                ));
            }
        }
        for hot_entry in hot_enqueues {
            store.hot_entries.push(hot_entry);
        }

        store.transactions.insert(transaction.id, transaction.clone());
        store.entries.insert(transaction.id, entries.clone());

        let hold_mut = store.holds.get_mut(&hold_id).unwrap();
        hold_mut.status = HoldStatus::Committed;
        hold_mut.resolved_at = Some(Utc::now());
        store.append_event(
            ledger_id,
            AggregateType::Hold,
            hold_id,
            "hold.committed",
            serde_json::json!({ "transaction_id": transaction.id }),
            self.hmac(),
        );

        Ok(TransactionOutcome {
            transaction,
            entries,
            balances,
            replayed: false,
        })
    }

    async fn void_hold(&self, ledger_id: Uuid, hold_id: Uuid, reason: &str) -> Result<Hold, SummaError> {
        let mut store = self.store.lock().unwrap();
        let hold = store
            .holds
            .get(&hold_id)
            .filter(|h| h.ledger_id == ledger_id)
            .cloned()
            .ok_or_else(|| SummaError::NotFound(format!("hold {hold_id}")))?;
        hold.require_pending()?;

        let account = store
            .accounts
            .get_mut(&hold.account_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {}", hold.account_id)))?;
        balance::apply_delta(
            account,
            BalanceDelta { pending_debit_delta: -hold.amount, ..Default::default() },
            self.hmac(),
            true,
        )?;

        let hold_mut = store.holds.get_mut(&hold_id).unwrap();
        hold_mut.status = HoldStatus::Voided;
        hold_mut.resolved_at = Some(Utc::now());
        let snapshot = hold_mut.clone();
        store.append_event(
            ledger_id,
            AggregateType::Hold,
            hold_id,
            "hold.voided",
            serde_json::json!({ "reason": reason }),
            self.hmac(),
        );
        Ok(snapshot)
    }

    async fn expire_holds(&self, ledger_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Hold>, SummaError> {
        let mut store = self.store.lock().unwrap();
        let due: Vec<Uuid> = store
            .holds
            .values()
            .filter(|h| {
                h.ledger_id == ledger_id
                    && h.status == HoldStatus::Pending
                    && h.expires_at.is_some_and(|exp| exp <= now)
            })
            .map(|h| h.id)
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for hold_id in due {
            let hold = store.holds[&hold_id].clone();
            if let Some(account) = store.accounts.get_mut(&hold.account_id) {
                balance::apply_delta(
                    account,
                    BalanceDelta { pending_debit_delta: -hold.amount, ..Default::default() },
                    self.hmac(),
                    true,
                )?;
            }
            let hold_mut = store.holds.get_mut(&hold_id).unwrap();
            hold_mut.status = HoldStatus::Expired;
            hold_mut.resolved_at = Some(now);
            expired.push(hold_mut.clone());
            store.append_event(
                ledger_id,
                AggregateType::Hold,
                hold_id,
                "hold.expired",
                serde_json::json!({}),
                self.hmac(),
            );
        }
        Ok(expired)
    }

    async fn enqueue_hot_entry(&self, entry: HotAccountEntry) -> Result<(), SummaError> {
        let mut store = self.store.lock().unwrap();
        store.hot_entries.push(entry);
        Ok(())
    }

    async fn process_hot_account_batch(&self, ledger_id: Uuid, batch_size: u32) -> Result<BatchOutcome, SummaError> {
        let mut store = self.store.lock().unwrap();
        let claimed: Vec<HotAccountEntry> = store
            .hot_entries
            .iter()
            .filter(|e| e.ledger_id == ledger_id && !e.processed)
            .take(batch_size as usize)
            .cloned()
            .collect();

        let outcome = hot_account::aggregate_batch(&claimed);
        for (account_id, delta) in &outcome.net_deltas {
            if let Some(sys) = store.system_accounts.get_mut(account_id) {
                if *delta >= 0 {
                    sys.credit_balance += delta;
                } else {
                    sys.debit_balance += -delta;
                }
                sys.balance = sys.credit_balance - sys.debit_balance;
                sys.version += 1;
                sys.updated_at = Utc::now();
            }
        }
        let now = Utc::now();
        for entry in store.hot_entries.iter_mut() {
            if outcome.consumed_ids.contains(&entry.id) {
                entry.processed = true;
                entry.processed_at = Some(now);
            }
        }
        Ok(outcome)
    }

    async fn cleanup_hot_entries(&self, ledger_id: Uuid, now: DateTime<Utc>, retention_hours: u64) -> Result<u64, SummaError> {
        let mut store = self.store.lock().unwrap();
        let before = store.hot_entries.len();
        store
            .hot_entries
            .retain(|e| !(e.ledger_id == ledger_id && hot_account::is_eligible_for_cleanup(e, now, retention_hours)));
        Ok((before - store.hot_entries.len()) as u64)
    }

    async fn get_events(&self, ledger_id: Uuid, aggregate_type: AggregateType, aggregate_id: Uuid) -> Result<Vec<EventRow>, SummaError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .events
            .get(&(ledger_id, aggregate_type, aggregate_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_latest_snapshot(&self, ledger_id: Uuid, aggregate_type: AggregateType, aggregate_id: Uuid) -> Result<Option<HashSnapshot>, SummaError> {
        let store = self.store.lock().unwrap();
        Ok(store.snapshots.get(&(ledger_id, aggregate_type, aggregate_id)).cloned())
    }

    async fn write_snapshot(&self, snapshot: HashSnapshot) -> Result<(), SummaError> {
        let mut store = self.store.lock().unwrap();
        store.snapshots.insert(
            (snapshot.ledger_id, snapshot.aggregate_type, snapshot.aggregate_id),
            snapshot,
        );
        Ok(())
    }

    async fn list_chain_heads(&self, ledger_id: Uuid) -> Result<Vec<(AggregateType, Uuid)>, SummaError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .events
            .keys()
            .filter(|(lid, _, _)| *lid == ledger_id)
            .map(|(_, aggregate_type, aggregate_id)| (*aggregate_type, *aggregate_id))
            .collect())
    }

    async fn acquire_worker_lease(&self, worker_name: &str, holder_id: &str, ttl: Duration) -> Result<bool, SummaError> {
        let mut store = self.store.lock().unwrap();
        let now = Utc::now();
        let acquired = match store.leases.get(worker_name) {
            Some((holder, expires_at)) if *expires_at > now && holder != holder_id => false,
            _ => true,
        };
        if acquired {
            let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60));
            store.leases.insert(worker_name.to_string(), (holder_id.to_string(), expires_at));
        }
        Ok(acquired)
    }

    async fn release_worker_lease(&self, worker_name: &str, holder_id: &str) -> Result<(), SummaError> {
        let mut store = self.store.lock().unwrap();
        if let Some((holder, _)) = store.leases.get(worker_name) {
            if holder == holder_id {
                store.leases.remove(worker_name);
            }
        }
        Ok(())
    }

    async fn cleanup_stale_leases(&self, now: DateTime<Utc>) -> Result<u64, SummaError> {
        let mut store = self.store.lock().unwrap();
        let before = store.leases.len();
        store.leases.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - store.leases.len()) as u64)
    }

    async fn sum_all_balances(&self, ledger_id: Uuid) -> Result<i64, SummaError> {
        let store = self.store.lock().unwrap();
        let accounts_sum: i64 = store
            .accounts
            .values()
            .filter(|a| a.ledger_id == ledger_id)
            .map(|a| a.signed_balance())
            .sum();
        let system_sum: i64 = store
            .system_accounts
            .values()
            .filter(|a| a.ledger_id == ledger_id)
            .map(|a| a.credit_balance - a.debit_balance)
            .sum();
        // Invariant HA1 (spec §4.7): pending hot-account entries already
        // posted their transaction/entry rows, so they must count toward
        // the global zero-sum check even before their batch pass lands.
        let hot_sum = hot_account::pending_sum(&store.hot_entries, ledger_id);
        Ok(accounts_sum + system_sum + hot_sum)
    }
}
