// src/adapters/postgres.rs
//
// Grounded in `ledger/src/adapters/postgres.rs`'s `PostgresLedgerAdapter`/
// `init_ledger_schema` pair — a `get_pool()`-style trait plus a blanket
// schema-initializer is replaced here by a single concrete `PgAdapter` since
// this crate has exactly one production backend (spec §14 Non-goals), but
// the DDL-in-code, `CREATE TABLE IF NOT EXISTS` + explicit index list style
// is carried over directly, now schema-qualified through `TableResolver` and
// routed through `adapters::replica::ReadReplicaRouter` instead of a bare
// `PgPool`. Row locking follows spec §4.4/§4.5/§8 invariant 5: every
// mutating query selects its rows `FOR UPDATE` (or `NOWAIT`, per
// `config::LockMode`) in ascending id order, and hash-chain appends take
// `pg_advisory_xact_lock` on the aggregate id first (spec §4.2 step 1).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction as PgTx};
use uuid::Uuid;

use crate::account::{Account, AccountStatus, HolderType, NormalBalance, SystemAccount};
use crate::adapters::dialect::{Dialect, PostgresDialect, TableResolver};
use crate::adapters::replica::ReadReplicaRouter;
use crate::balance::{self, Balance, BalanceDelta};
use crate::config::EngineConfig;
use crate::currency::Currency;
use crate::entry::{Entry, EntryType};
use crate::error::SummaError;
use crate::event::{self, AggregateType, EventRow, HashSnapshot};
use crate::hold::{Hold, HoldStatus, Settlement};
use crate::hot_account::{self, BatchOutcome, HotAccountEntry};
use crate::idempotency::{self, IdempotencyOutcome, IdempotencyRecord};
use crate::transaction::{
    Transaction, TransactionOutcome, TransactionPlan, TransactionStatus, TransactionType,
};
use crate::LedgerAdapter;

pub struct PgAdapter {
    router: ReadReplicaRouter,
    dialect: PostgresDialect,
    tables: TableResolver,
    lock_mode: crate::config::LockMode,
    hmac_secret: Option<String>,
}

impl PgAdapter {
    pub fn new(primary: PgPool, replicas: Vec<PgPool>, cfg: &EngineConfig) -> Self {
        Self {
            router: ReadReplicaRouter::new(primary, replicas),
            dialect: PostgresDialect,
            tables: TableResolver::new(&cfg.schema),
            lock_mode: cfg.lock_mode,
            hmac_secret: cfg.hash_chain_hmac_secret.clone(),
        }
    }

    fn hmac(&self) -> Option<&str> {
        self.hmac_secret.as_deref()
    }

    fn lock_clause(&self) -> &'static str {
        self.dialect.lock_clause(self.lock_mode)
    }

    fn t(&self, name: &str) -> String {
        self.tables.table(name)
    }

    /// Mirrors `init_ledger_schema` — one `CREATE TABLE IF NOT EXISTS` per
    /// aggregate plus its supporting indexes, run inside a single
    /// transaction so a partially applied migration never lands.
    pub async fn init_schema(&self) -> Result<(), SummaError> {
        let mut tx = self.router.primary().begin().await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {accounts} (
                id UUID PRIMARY KEY,
                ledger_id UUID NOT NULL,
                holder_id UUID NOT NULL,
                holder_type TEXT NOT NULL,
                status TEXT NOT NULL,
                currency TEXT NOT NULL,
                balance BIGINT NOT NULL DEFAULT 0,
                credit_balance BIGINT NOT NULL DEFAULT 0,
                debit_balance BIGINT NOT NULL DEFAULT 0,
                pending_credit BIGINT NOT NULL DEFAULT 0,
                pending_debit BIGINT NOT NULL DEFAULT 0,
                allow_overdraft BOOLEAN NOT NULL DEFAULT FALSE,
                overdraft_limit BIGINT NOT NULL DEFAULT 0,
                account_type TEXT,
                normal_balance TEXT,
                parent_account_id UUID,
                indicator TEXT,
                lock_version BIGINT NOT NULL DEFAULT 0,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                frozen_at TIMESTAMPTZ,
                frozen_by UUID,
                frozen_reason TEXT,
                closed_at TIMESTAMPTZ,
                closed_by UUID,
                closed_reason TEXT,
                UNIQUE (ledger_id, holder_id, currency)
            )
            "#,
            accounts = self.t("accounts")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{accounts}_ledger ON {accounts}(ledger_id)",
            accounts = self.t("accounts")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {system_accounts} (
                id UUID PRIMARY KEY,
                ledger_id UUID NOT NULL,
                identifier TEXT NOT NULL,
                currency TEXT NOT NULL,
                balance BIGINT NOT NULL DEFAULT 0,
                credit_balance BIGINT NOT NULL DEFAULT 0,
                debit_balance BIGINT NOT NULL DEFAULT 0,
                version BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (ledger_id, identifier)
            )
            "#,
            system_accounts = self.t("system_accounts")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {currencies} (
                code TEXT PRIMARY KEY,
                minor_unit BIGINT NOT NULL,
                decimals SMALLINT NOT NULL
            )
            "#,
            currencies = self.t("currencies")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {transactions} (
                id UUID PRIMARY KEY,
                ledger_id UUID NOT NULL,
                transaction_type TEXT NOT NULL,
                status TEXT NOT NULL,
                reference TEXT NOT NULL,
                amount BIGINT NOT NULL,
                currency TEXT NOT NULL,
                description TEXT,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                correlation_id UUID NOT NULL,
                parent_transaction_id UUID,
                effective_date TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (ledger_id, reference)
            )
            "#,
            transactions = self.t("transactions")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {entries} (
                id UUID PRIMARY KEY,
                transaction_id UUID NOT NULL REFERENCES {transactions}(id),
                account_id UUID NOT NULL,
                entry_type TEXT NOT NULL,
                amount BIGINT NOT NULL,
                currency TEXT NOT NULL,
                balance_before BIGINT NOT NULL,
                balance_after BIGINT NOT NULL,
                account_lock_version BIGINT NOT NULL,
                is_hot_account BOOLEAN NOT NULL DEFAULT FALSE,
                original_amount BIGINT,
                original_currency TEXT,
                exchange_rate DOUBLE PRECISION,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            entries = self.t("entries"),
            transactions = self.t("transactions"),
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{entries}_transaction ON {entries}(transaction_id)",
            entries = self.t("entries")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{entries}_account ON {entries}(account_id, created_at ASC)",
            entries = self.t("entries")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {idempotency} (
                ledger_id UUID NOT NULL,
                key TEXT NOT NULL,
                reference TEXT NOT NULL,
                response_body JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                expires_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (ledger_id, key)
            )
            "#,
            idempotency = self.t("idempotency_keys")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {holds} (
                id UUID PRIMARY KEY,
                ledger_id UUID NOT NULL,
                account_id UUID NOT NULL,
                amount BIGINT NOT NULL,
                currency TEXT NOT NULL,
                status TEXT NOT NULL,
                reference TEXT NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                expires_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                resolved_at TIMESTAMPTZ
            )
            "#,
            holds = self.t("holds")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{holds}_expiry ON {holds}(ledger_id, status, expires_at)",
            holds = self.t("holds")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {hot_entries} (
                id UUID PRIMARY KEY,
                ledger_id UUID NOT NULL,
                system_account_id UUID NOT NULL,
                transaction_id UUID NOT NULL,
                entry_type TEXT NOT NULL,
                amount BIGINT NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                processed_at TIMESTAMPTZ
            )
            "#,
            hot_entries = self.t("hot_account_entries")
        ))
        .execute(&mut *tx)
        .await?;

        // Partial index so the `FOR UPDATE SKIP LOCKED` claim query (spec
        // §4.7 step 1) never scans already-processed rows.
        sqlx::query(&format!(
            r#"
            CREATE INDEX IF NOT EXISTS idx_{hot_entries}_pending
            ON {hot_entries}(ledger_id, system_account_id, created_at ASC)
            WHERE processed = FALSE
            "#,
            hot_entries = self.t("hot_account_entries")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {events} (
                id UUID PRIMARY KEY,
                ledger_id UUID NOT NULL,
                aggregate_type TEXT NOT NULL,
                aggregate_id UUID NOT NULL,
                version BIGINT NOT NULL,
                event_type TEXT NOT NULL,
                event_data JSONB NOT NULL,
                prev_hash TEXT,
                hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (ledger_id, aggregate_type, aggregate_id, version)
            )
            "#,
            events = self.t("events")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {snapshots} (
                ledger_id UUID NOT NULL,
                aggregate_type TEXT NOT NULL,
                aggregate_id UUID NOT NULL,
                version BIGINT NOT NULL,
                hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (ledger_id, aggregate_type, aggregate_id)
            )
            "#,
            snapshots = self.t("hash_snapshots")
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {leases} (
                worker_name TEXT PRIMARY KEY,
                holder_id TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL
            )
            "#,
            leases = self.t("worker_leases")
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    fn row_to_account(row: &sqlx::postgres::PgRow) -> Result<Account, SummaError> {
        let holder_type: String = row.try_get("holder_type")?;
        let status: String = row.try_get("status")?;
        let normal_balance: Option<String> = row.try_get("normal_balance")?;
        Ok(Account {
            id: row.try_get("id")?,
            ledger_id: row.try_get("ledger_id")?,
            holder_id: row.try_get("holder_id")?,
            holder_type: parse_holder_type(&holder_type),
            status: parse_account_status(&status),
            currency: row.try_get("currency")?,
            balance: row.try_get("balance")?,
            credit_balance: row.try_get("credit_balance")?,
            debit_balance: row.try_get("debit_balance")?,
            pending_credit: row.try_get("pending_credit")?,
            pending_debit: row.try_get("pending_debit")?,
            allow_overdraft: row.try_get("allow_overdraft")?,
            overdraft_limit: row.try_get("overdraft_limit")?,
            account_type: row.try_get("account_type")?,
            normal_balance: normal_balance.map(|s| parse_normal_balance(&s)),
            parent_account_id: row.try_get("parent_account_id")?,
            indicator: row.try_get("indicator")?,
            lock_version: row.try_get("lock_version")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            frozen_at: row.try_get("frozen_at")?,
            frozen_by: row.try_get("frozen_by")?,
            frozen_reason: row.try_get("frozen_reason")?,
            closed_at: row.try_get("closed_at")?,
            closed_by: row.try_get("closed_by")?,
            closed_reason: row.try_get("closed_reason")?,
        })
    }

    fn row_to_system_account(row: &sqlx::postgres::PgRow) -> Result<SystemAccount, SummaError> {
        Ok(SystemAccount {
            id: row.try_get("id")?,
            ledger_id: row.try_get("ledger_id")?,
            identifier: row.try_get("identifier")?,
            currency: row.try_get("currency")?,
            balance: row.try_get("balance")?,
            credit_balance: row.try_get("credit_balance")?,
            debit_balance: row.try_get("debit_balance")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, SummaError> {
        let transaction_type: String = row.try_get("transaction_type")?;
        let status: String = row.try_get("status")?;
        Ok(Transaction {
            id: row.try_get("id")?,
            ledger_id: row.try_get("ledger_id")?,
            transaction_type: parse_transaction_type(&transaction_type),
            status: if status == "reversed" {
                TransactionStatus::Reversed
            } else {
                TransactionStatus::Posted
            },
            reference: row.try_get("reference")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            description: row.try_get("description")?,
            metadata: row.try_get("metadata")?,
            correlation_id: row.try_get("correlation_id")?,
            parent_transaction_id: row.try_get("parent_transaction_id")?,
            effective_date: row.try_get("effective_date")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<Entry, SummaError> {
        let entry_type: String = row.try_get("entry_type")?;
        Ok(Entry {
            id: row.try_get("id")?,
            transaction_id: row.try_get("transaction_id")?,
            account_id: row.try_get("account_id")?,
            entry_type: if entry_type == "credit" {
                EntryType::Credit
            } else {
                EntryType::Debit
            },
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            balance_before: row.try_get("balance_before")?,
            balance_after: row.try_get("balance_after")?,
            account_lock_version: row.try_get("account_lock_version")?,
            is_hot_account: row.try_get("is_hot_account")?,
            original_amount: row.try_get("original_amount")?,
            original_currency: row.try_get("original_currency")?,
            exchange_rate: row.try_get("exchange_rate")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_hold(row: &sqlx::postgres::PgRow) -> Result<Hold, SummaError> {
        let status: String = row.try_get("status")?;
        Ok(Hold {
            id: row.try_get("id")?,
            ledger_id: row.try_get("ledger_id")?,
            account_id: row.try_get("account_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            status: parse_hold_status(&status),
            reference: row.try_get("reference")?,
            metadata: row.try_get("metadata")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<EventRow, SummaError> {
        let aggregate_type: String = row.try_get("aggregate_type")?;
        Ok(EventRow {
            id: row.try_get("id")?,
            ledger_id: row.try_get("ledger_id")?,
            aggregate_type: parse_aggregate_type(&aggregate_type),
            aggregate_id: row.try_get("aggregate_id")?,
            version: row.try_get("version")?,
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            prev_hash: row.try_get("prev_hash")?,
            hash: row.try_get("hash")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn lock_account(
        &self,
        tx: &mut PgTx<'_, Postgres>,
        account_id: Uuid,
    ) -> Result<Option<Account>, SummaError> {
        let query = format!(
            "SELECT * FROM {} WHERE id = $1 {}",
            self.t("accounts"),
            self.lock_clause()
        );
        let row = sqlx::query(&query).bind(account_id).fetch_optional(&mut **tx).await?;
        row.map(|r| Self::row_to_account(&r)).transpose()
    }

    async fn lock_system_account(
        &self,
        tx: &mut PgTx<'_, Postgres>,
        account_id: Uuid,
    ) -> Result<Option<SystemAccount>, SummaError> {
        let query = format!(
            "SELECT * FROM {} WHERE id = $1 {}",
            self.t("system_accounts"),
            self.lock_clause()
        );
        let row = sqlx::query(&query).bind(account_id).fetch_optional(&mut **tx).await?;
        row.map(|r| Self::row_to_system_account(&r)).transpose()
    }

    async fn persist_account(&self, tx: &mut PgTx<'_, Postgres>, account: &Account) -> Result<(), SummaError> {
        sqlx::query(&format!(
            r#"
            UPDATE {} SET status = $2, balance = $3, credit_balance = $4, debit_balance = $5,
                pending_credit = $6, pending_debit = $7, lock_version = $8, updated_at = $9,
                frozen_at = $10, frozen_by = $11, frozen_reason = $12,
                closed_at = $13, closed_by = $14, closed_reason = $15
            WHERE id = $1
            "#,
            self.t("accounts")
        ))
        .bind(account.id)
        .bind(format!("{:?}", account.status).to_lowercase())
        .bind(account.balance)
        .bind(account.credit_balance)
        .bind(account.debit_balance)
        .bind(account.pending_credit)
        .bind(account.pending_debit)
        .bind(account.lock_version)
        .bind(account.updated_at)
        .bind(account.frozen_at)
        .bind(account.frozen_by)
        .bind(&account.frozen_reason)
        .bind(account.closed_at)
        .bind(account.closed_by)
        .bind(&account.closed_reason)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn persist_system_account(
        &self,
        tx: &mut PgTx<'_, Postgres>,
        account: &SystemAccount,
    ) -> Result<(), SummaError> {
        sqlx::query(&format!(
            r#"
            UPDATE {} SET balance = $2, credit_balance = $3, debit_balance = $4,
                version = $5, updated_at = $6
            WHERE id = $1
            "#,
            self.t("system_accounts")
        ))
        .bind(account.id)
        .bind(account.balance)
        .bind(account.credit_balance)
        .bind(account.debit_balance)
        .bind(account.version)
        .bind(account.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn append_event_tx(
        &self,
        tx: &mut PgTx<'_, Postgres>,
        ledger_id: Uuid,
        aggregate_type: AggregateType,
        aggregate_id: Uuid,
        event_type: &str,
        event_data: serde_json::Value,
    ) -> Result<(), SummaError> {
        // spec §4.2 step 1: serialize concurrent appenders to the same
        // aggregate with a session-scoped advisory lock keyed on its id.
        sqlx::query(&format!(
            "SELECT {}(hashtext($1::text))",
            self.dialect.advisory_lock_fn()
        ))
        .bind(aggregate_id.to_string())
        .execute(&mut **tx)
        .await?;

        let tip = sqlx::query(&format!(
            "SELECT version, hash FROM {} WHERE ledger_id = $1 AND aggregate_type = $2 AND aggregate_id = $3 ORDER BY version DESC LIMIT 1",
            self.t("events")
        ))
        .bind(ledger_id)
        .bind(format!("{aggregate_type:?}").to_lowercase())
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?;

        let (prev_version, prev_hash): (i64, Option<String>) = match tip {
            Some(row) => (row.try_get("version")?, Some(row.try_get("hash")?)),
            None => (0, None),
        };

        let row = event::next_event(
            ledger_id,
            aggregate_type,
            aggregate_id,
            prev_version,
            prev_hash.as_deref(),
            event_type,
            event_data,
            self.hmac(),
        );

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, ledger_id, aggregate_type, aggregate_id, version, event_type, event_data, prev_hash, hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
            self.t("events")
        ))
        .bind(row.id)
        .bind(row.ledger_id)
        .bind(format!("{:?}", row.aggregate_type).to_lowercase())
        .bind(row.aggregate_id)
        .bind(row.version)
        .bind(&row.event_type)
        .bind(&row.event_data)
        .bind(&row.prev_hash)
        .bind(&row.hash)
        .bind(row.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

fn parse_holder_type(s: &str) -> HolderType {
    match s {
        "organization" => HolderType::Organization,
        "system" => HolderType::System,
        _ => HolderType::Individual,
    }
}

fn parse_account_status(s: &str) -> AccountStatus {
    match s {
        "frozen" => AccountStatus::Frozen,
        "closed" => AccountStatus::Closed,
        _ => AccountStatus::Active,
    }
}

fn parse_normal_balance(s: &str) -> NormalBalance {
    if s == "debit" {
        NormalBalance::Debit
    } else {
        NormalBalance::Credit
    }
}

fn parse_transaction_type(s: &str) -> TransactionType {
    match s {
        "debit" => TransactionType::Debit,
        "transfer" => TransactionType::Transfer,
        "multi_transfer" => TransactionType::MultiTransfer,
        "journal" => TransactionType::Journal,
        "refund" => TransactionType::Refund,
        "correction" => TransactionType::Correction,
        "adjustment" => TransactionType::Adjustment,
        _ => TransactionType::Credit,
    }
}

fn parse_hold_status(s: &str) -> HoldStatus {
    match s {
        "committed" => HoldStatus::Committed,
        "voided" => HoldStatus::Voided,
        "expired" => HoldStatus::Expired,
        _ => HoldStatus::Pending,
    }
}

fn parse_aggregate_type(s: &str) -> AggregateType {
    match s {
        "systemaccount" => AggregateType::SystemAccount,
        "transaction" => AggregateType::Transaction,
        "hold" => AggregateType::Hold,
        _ => AggregateType::Account,
    }
}

#[async_trait]
impl LedgerAdapter for PgAdapter {
    async fn get_account(&self, ledger_id: Uuid, account_id: Uuid) -> Result<Account, SummaError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE id = $1 AND ledger_id = $2",
            self.t("accounts")
        ))
        .bind(account_id)
        .bind(ledger_id)
        .fetch_optional(self.router.read_pool())
        .await?
        .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        Self::row_to_account(&row)
    }

    async fn get_account_by_holder(
        &self,
        ledger_id: Uuid,
        holder_id: Uuid,
        currency: &str,
    ) -> Result<Account, SummaError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE ledger_id = $1 AND holder_id = $2 AND currency = $3",
            self.t("accounts")
        ))
        .bind(ledger_id)
        .bind(holder_id)
        .bind(currency)
        .fetch_optional(self.router.read_pool())
        .await?
        .ok_or_else(|| SummaError::NotFound(format!("account for holder {holder_id}")))?;
        Self::row_to_account(&row)
    }

    async fn create_account(&self, account: Account) -> Result<Account, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, ledger_id, holder_id, holder_type, status, currency, balance,
                credit_balance, debit_balance, pending_credit, pending_debit, allow_overdraft,
                overdraft_limit, account_type, normal_balance, parent_account_id, indicator,
                lock_version, metadata, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21)
            "#,
            self.t("accounts")
        ))
        .bind(account.id)
        .bind(account.ledger_id)
        .bind(account.holder_id)
        .bind(format!("{:?}", account.holder_type).to_lowercase())
        .bind(format!("{:?}", account.status).to_lowercase())
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.credit_balance)
        .bind(account.debit_balance)
        .bind(account.pending_credit)
        .bind(account.pending_debit)
        .bind(account.allow_overdraft)
        .bind(account.overdraft_limit)
        .bind(&account.account_type)
        .bind(account.normal_balance.map(|n| format!("{n:?}").to_lowercase()))
        .bind(account.parent_account_id)
        .bind(&account.indicator)
        .bind(account.lock_version)
        .bind(&account.metadata)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *tx)
        .await?;

        self.append_event_tx(
            &mut tx,
            account.ledger_id,
            AggregateType::Account,
            account.id,
            "account.created",
            serde_json::to_value(&account).unwrap_or_default(),
        )
        .await?;

        tx.commit().await?;
        Ok(account)
    }

    async fn freeze_account(&self, ledger_id: Uuid, account_id: Uuid, by: Uuid, reason: &str) -> Result<Account, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        let mut account = self
            .lock_account(&mut tx, account_id)
            .await?
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        account.status = AccountStatus::Frozen;
        account.frozen_at = Some(Utc::now());
        account.frozen_by = Some(by);
        account.frozen_reason = Some(reason.to_string());
        self.persist_account(&mut tx, &account).await?;
        self.append_event_tx(
            &mut tx,
            ledger_id,
            AggregateType::Account,
            account_id,
            "account.frozen",
            serde_json::json!({ "by": by, "reason": reason }),
        )
        .await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn unfreeze_account(&self, ledger_id: Uuid, account_id: Uuid) -> Result<Account, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        let mut account = self
            .lock_account(&mut tx, account_id)
            .await?
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        account.status = AccountStatus::Active;
        account.frozen_at = None;
        account.frozen_by = None;
        account.frozen_reason = None;
        self.persist_account(&mut tx, &account).await?;
        self.append_event_tx(
            &mut tx,
            ledger_id,
            AggregateType::Account,
            account_id,
            "account.unfrozen",
            serde_json::json!({}),
        )
        .await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn close_account(&self, ledger_id: Uuid, account_id: Uuid, by: Uuid, reason: &str) -> Result<Account, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        let mut account = self
            .lock_account(&mut tx, account_id)
            .await?
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        if account.balance != 0 {
            return Err(SummaError::Conflict(format!(
                "account {account_id} has a non-zero balance and cannot be closed"
            )));
        }
        account.status = AccountStatus::Closed;
        account.closed_at = Some(Utc::now());
        account.closed_by = Some(by);
        account.closed_reason = Some(reason.to_string());
        self.persist_account(&mut tx, &account).await?;
        self.append_event_tx(
            &mut tx,
            ledger_id,
            AggregateType::Account,
            account_id,
            "account.closed",
            serde_json::json!({ "by": by, "reason": reason }),
        )
        .await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn get_system_account(&self, ledger_id: Uuid, identifier: &str) -> Result<SystemAccount, SummaError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE ledger_id = $1 AND identifier = $2",
            self.t("system_accounts")
        ))
        .bind(ledger_id)
        .bind(identifier)
        .fetch_optional(self.router.read_pool())
        .await?
        .ok_or_else(|| SummaError::NotFound(format!("system account {identifier}")))?;
        Self::row_to_system_account(&row)
    }

    async fn create_system_account(&self, account: SystemAccount) -> Result<SystemAccount, SummaError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, ledger_id, identifier, currency, balance, credit_balance,
                debit_balance, version, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            "#,
            self.t("system_accounts")
        ))
        .bind(account.id)
        .bind(account.ledger_id)
        .bind(&account.identifier)
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.credit_balance)
        .bind(account.debit_balance)
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(self.router.primary())
        .await?;
        Ok(account)
    }

    async fn get_currency(&self, code: &str) -> Result<Currency, SummaError> {
        if let Some(known) = crate::currency::well_known(code) {
            return Ok(known);
        }
        let row = sqlx::query(&format!("SELECT * FROM {} WHERE code = $1", self.t("currencies")))
            .bind(code)
            .fetch_optional(self.router.read_pool())
            .await?
            .ok_or_else(|| SummaError::NotFound(format!("currency {code}")))?;
        Ok(Currency {
            code: row.try_get("code")?,
            minor_unit: row.try_get("minor_unit")?,
            decimals: row.try_get::<i16, _>("decimals")? as u8,
        })
    }

    async fn create_currency(&self, currency: Currency) -> Result<Currency, SummaError> {
        sqlx::query(&format!(
            "INSERT INTO {} (code, minor_unit, decimals) VALUES ($1, $2, $3) ON CONFLICT (code) DO UPDATE SET minor_unit = $2, decimals = $3",
            self.t("currencies")
        ))
        .bind(&currency.code)
        .bind(currency.minor_unit)
        .bind(currency.decimals as i16)
        .execute(self.router.primary())
        .await?;
        Ok(currency)
    }

    async fn get_transaction(&self, ledger_id: Uuid, id: Uuid) -> Result<Transaction, SummaError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE id = $1 AND ledger_id = $2",
            self.t("transactions")
        ))
        .bind(id)
        .bind(ledger_id)
        .fetch_optional(self.router.read_pool())
        .await?
        .ok_or_else(|| SummaError::NotFound(format!("transaction {id}")))?;
        Self::row_to_transaction(&row)
    }

    async fn get_transaction_by_reference(
        &self,
        ledger_id: Uuid,
        reference: &str,
    ) -> Result<Option<Transaction>, SummaError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE ledger_id = $1 AND reference = $2",
            self.t("transactions")
        ))
        .bind(ledger_id)
        .bind(reference)
        .fetch_optional(self.router.read_pool())
        .await?;
        row.map(|r| Self::row_to_transaction(&r)).transpose()
    }

    async fn get_entries(&self, transaction_id: Uuid) -> Result<Vec<Entry>, SummaError> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE transaction_id = $1 ORDER BY created_at ASC",
            self.t("entries")
        ))
        .bind(transaction_id)
        .fetch_all(self.router.read_pool())
        .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn execute_transaction_plan(&self, plan: TransactionPlan) -> Result<TransactionOutcome, SummaError> {
        let mut tx = self.router.primary().begin().await?;

        if let Some(key) = &plan.idempotency_key {
            let existing_row = sqlx::query(&format!(
                "SELECT * FROM {} WHERE ledger_id = $1 AND key = $2",
                self.t("idempotency_keys")
            ))
            .bind(plan.ledger_id)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
            let existing = existing_row
                .map(|r| -> Result<IdempotencyRecord, SummaError> {
                    Ok(IdempotencyRecord {
                        ledger_id: r.try_get("ledger_id")?,
                        key: r.try_get("key")?,
                        reference: r.try_get("reference")?,
                        response_body: r.try_get("response_body")?,
                        created_at: r.try_get("created_at")?,
                        expires_at: r.try_get("expires_at")?,
                    })
                })
                .transpose()?;
            let outcome = crate::transaction::check_idempotency(existing.as_ref(), &plan)?;
            if outcome == IdempotencyOutcome::Replay {
                let existing = existing.unwrap();
                let transaction: Transaction = serde_json::from_value(existing.response_body)
                    .map_err(|e| SummaError::Internal(e.into()))?;
                let entries = self.get_entries(transaction.id).await?;
                tx.rollback().await?;
                return Ok(TransactionOutcome {
                    transaction,
                    entries,
                    balances: Vec::new(),
                    replayed: true,
                });
            }
        }

        let taken = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE ledger_id = $1 AND reference = $2",
            self.t("transactions")
        ))
        .bind(plan.ledger_id)
        .bind(&plan.reference)
        .fetch_optional(&mut *tx)
        .await?;
        if taken.is_some() {
            return Err(SummaError::Conflict(format!(
                "reference '{}' already used",
                plan.reference
            )));
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

        // Ascending-id lock order avoids deadlocking against a concurrent
        // transaction that touches the same two accounts in reverse order.
        for account_id in plan.accounts_to_lock() {
            if self.lock_account(&mut tx, account_id).await?.is_none()
                && self.lock_system_account(&mut tx, account_id).await?.is_none()
            {
                return Err(SummaError::NotFound(format!("account {account_id}")));
            }
        }

        for leg in &plan.legs {
            let mut posted = if let Some(mut account) = self.lock_account(&mut tx, leg.account_id).await? {
                let balance_before = account.balance;
                let delta = match leg.entry_type {
                    EntryType::Debit => BalanceDelta::debit(leg.amount),
                    EntryType::Credit => BalanceDelta::credit(leg.amount),
                };
                balance::apply_delta(&mut account, delta, self.hmac(), leg.force)?;
                self.persist_account(&mut tx, &account).await?;
                balances.push(Balance::from(&account));
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
                let sys = self
                    .lock_system_account(&mut tx, leg.account_id)
                    .await?
                    .ok_or_else(|| SummaError::NotFound(format!("account {}", leg.account_id)))?;
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

        for hot_entry in &hot_enqueues {
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (id, ledger_id, system_account_id, transaction_id, entry_type, amount, processed, created_at, processed_at)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                "#,
                self.t("hot_account_entries")
            ))
            .bind(hot_entry.id)
            .bind(hot_entry.ledger_id)
            .bind(hot_entry.system_account_id)
            .bind(hot_entry.transaction_id)
            .bind(format!("{:?}", hot_entry.entry_type).to_lowercase())
            .bind(hot_entry.amount)
            .bind(hot_entry.processed)
            .bind(hot_entry.created_at)
            .bind(hot_entry.processed_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, ledger_id, transaction_type, status, reference, amount, currency,
                description, metadata, correlation_id, parent_transaction_id, effective_date, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
            self.t("transactions")
        ))
        .bind(transaction.id)
        .bind(transaction.ledger_id)
        .bind(format!("{:?}", transaction.transaction_type).to_lowercase())
        .bind("posted")
        .bind(&transaction.reference)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(&transaction.description)
        .bind(&transaction.metadata)
        .bind(transaction.correlation_id)
        .bind(transaction.parent_transaction_id)
        .bind(transaction.effective_date)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await?;

        for e in &entries {
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (id, transaction_id, account_id, entry_type, amount, currency,
                    balance_before, balance_after, account_lock_version, is_hot_account,
                    original_amount, original_currency, exchange_rate, created_at)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
                "#,
                self.t("entries")
            ))
            .bind(e.id)
            .bind(e.transaction_id)
            .bind(e.account_id)
            .bind(format!("{:?}", e.entry_type).to_lowercase())
            .bind(e.amount)
            .bind(&e.currency)
            .bind(e.balance_before)
            .bind(e.balance_after)
            .bind(e.account_lock_version)
            .bind(e.is_hot_account)
            .bind(e.original_amount)
            .bind(&e.original_currency)
            .bind(e.exchange_rate)
            .bind(e.created_at)
            .execute(&mut *tx)
            .await?;
        }

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
            self.append_event_tx(
                &mut tx,
                plan.ledger_id,
                AggregateType::Account,
                account_id,
                "account.transaction_posted",
                event_data.clone(),
            )
            .await?;
        }

        if let Some(key) = &plan.idempotency_key {
            let record = idempotency::new_record(
                plan.ledger_id,
                key,
                &plan.reference,
                serde_json::to_value(&transaction).unwrap_or_default(),
                Duration::from_secs(24 * 3600),
            );
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (ledger_id, key, reference, response_body, created_at, expires_at)
                VALUES ($1,$2,$3,$4,$5,$6)
                "#,
                self.t("idempotency_keys")
            ))
            .bind(record.ledger_id)
            .bind(&record.key)
            .bind(&record.reference)
            .bind(&record.response_body)
            .bind(record.created_at)
            .bind(record.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(TransactionOutcome {
            transaction,
            entries,
            balances,
            replayed: false,
        })
    }

    async fn get_idempotency_record(&self, ledger_id: Uuid, key: &str) -> Result<Option<IdempotencyRecord>, SummaError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE ledger_id = $1 AND key = $2",
            self.t("idempotency_keys")
        ))
        .bind(ledger_id)
        .bind(key)
        .fetch_optional(self.router.read_pool())
        .await?;
        row.map(|r| -> Result<IdempotencyRecord, SummaError> {
            Ok(IdempotencyRecord {
                ledger_id: r.try_get("ledger_id")?,
                key: r.try_get("key")?,
                reference: r.try_get("reference")?,
                response_body: r.try_get("response_body")?,
                created_at: r.try_get("created_at")?,
                expires_at: r.try_get("expires_at")?,
            })
        })
        .transpose()
    }

    async fn cleanup_idempotency_keys(&self, now: DateTime<Utc>) -> Result<u64, SummaError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE expires_at <= $1", self.t("idempotency_keys")))
            .bind(now)
            .execute(self.router.primary())
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_hold(&self, ledger_id: Uuid, id: Uuid) -> Result<Hold, SummaError> {
        let row = sqlx::query(&format!("SELECT * FROM {} WHERE id = $1 AND ledger_id = $2", self.t("holds")))
            .bind(id)
            .bind(ledger_id)
            .fetch_optional(self.router.read_pool())
            .await?
            .ok_or_else(|| SummaError::NotFound(format!("hold {id}")))?;
        Self::row_to_hold(&row)
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
        let mut tx = self.router.primary().begin().await?;
        let mut account = self
            .lock_account(&mut tx, account_id)
            .await?
            .filter(|a| a.ledger_id == ledger_id)
            .ok_or_else(|| SummaError::NotFound(format!("account {account_id}")))?;
        balance::apply_delta(&mut account, BalanceDelta::pending_debit(amount), self.hmac(), false)?;
        self.persist_account(&mut tx, &account).await?;

        let hold = Hold::new(ledger_id, account_id, amount, currency, reference, metadata, expires_at);
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, ledger_id, account_id, amount, currency, status, reference, metadata, expires_at, created_at, resolved_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
            self.t("holds")
        ))
        .bind(hold.id)
        .bind(hold.ledger_id)
        .bind(hold.account_id)
        .bind(hold.amount)
        .bind(&hold.currency)
        .bind("pending")
        .bind(&hold.reference)
        .bind(&hold.metadata)
        .bind(hold.expires_at)
        .bind(hold.created_at)
        .bind(hold.resolved_at)
        .execute(&mut *tx)
        .await?;

        self.append_event_tx(
            &mut tx,
            ledger_id,
            AggregateType::Hold,
            hold.id,
            "hold.created",
            serde_json::to_value(&hold).unwrap_or_default(),
        )
        .await?;

        tx.commit().await?;
        Ok(hold)
    }

    async fn commit_hold(
        &self,
        ledger_id: Uuid,
        hold_id: Uuid,
        settlements: Vec<Settlement>,
    ) -> Result<TransactionOutcome, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        let hold_row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE id = $1 AND ledger_id = $2 {}",
            self.t("holds"),
            self.lock_clause()
        ))
        .bind(hold_id)
        .bind(ledger_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SummaError::NotFound(format!("hold {hold_id}")))?;
        let hold = Self::row_to_hold(&hold_row)?;
        hold.require_pending()?;

        let total: i64 = settlements
            .iter()
            .map(|s| s.amount.ok_or_else(|| SummaError::InvalidArgument("settlement amount must be resolved".into())))
            .collect::<Result<Vec<i64>, SummaError>>()?
            .into_iter()
            .sum();
        let mut source = self
            .lock_account(&mut tx, hold.account_id)
            .await?
            .ok_or_else(|| SummaError::NotFound(format!("account {}", hold.account_id)))?;
        let source_balance_before = source.balance;
        balance::apply_delta(
            &mut source,
            BalanceDelta { pending_debit_delta: -hold.amount, ..Default::default() },
            self.hmac(),
            true,
        )?;
        balance::apply_delta(&mut source, BalanceDelta::debit(total), self.hmac(), true)?;
        self.persist_account(&mut tx, &source).await?;

        let transaction = Transaction {
            id: Uuid::now_v7(),
            ledger_id,
            transaction_type: TransactionType::Transfer,
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
            source.balance,
            source.lock_version,
            false,
        )];
        let mut balances = vec![Balance::from(&source)];
        let mut hot_enqueues = Vec::new();

        for settlement in &settlements {
            let amount = settlement
                .amount
                .ok_or_else(|| SummaError::InvalidArgument("settlement amount must be resolved".into()))?;
            if let Some(mut dest) = self.lock_account(&mut tx, settlement.destination_account_id).await? {
                let balance_before = dest.balance;
                balance::apply_delta(&mut dest, BalanceDelta::credit(amount), self.hmac(), false)?;
                self.persist_account(&mut tx, &dest).await?;
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
                balances.push(Balance::from(&dest));
            } else {
                // Spec §4.5 step 8 / §4.7: route system-account settlement
                // destinations through the hot-account pipeline instead of
                // locking the row synchronously.
                let sys = self
                    .lock_system_account(&mut tx, settlement.destination_account_id)
                    .await?
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
        for hot_entry in &hot_enqueues {
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (id, ledger_id, system_account_id, transaction_id, entry_type, amount, processed, created_at, processed_at)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                "#,
                self.t("hot_account_entries")
            ))
            .bind(hot_entry.id)
            .bind(hot_entry.ledger_id)
            .bind(hot_entry.system_account_id)
            .bind(hot_entry.transaction_id)
            .bind(format!("{:?}", hot_entry.entry_type).to_lowercase())
            .bind(hot_entry.amount)
            .bind(hot_entry.processed)
            .bind(hot_entry.created_at)
            .bind(hot_entry.processed_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, ledger_id, transaction_type, status, reference, amount, currency,
                description, metadata, correlation_id, parent_transaction_id, effective_date, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            "#,
            self.t("transactions")
        ))
        .bind(transaction.id)
        .bind(transaction.ledger_id)
        .bind("transfer")
        .bind("posted")
        .bind(&transaction.reference)
        .bind(transaction.amount)
        .bind(&transaction.currency)
        .bind(&transaction.description)
        .bind(&transaction.metadata)
        .bind(transaction.correlation_id)
        .bind(transaction.parent_transaction_id)
        .bind(transaction.effective_date)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await?;

        for e in &entries {
            sqlx::query(&format!(
                r#"
                INSERT INTO {} (id, transaction_id, account_id, entry_type, amount, currency,
                    balance_before, balance_after, account_lock_version, is_hot_account,
                    original_amount, original_currency, exchange_rate, created_at)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
                "#,
                self.t("entries")
            ))
            .bind(e.id)
            .bind(e.transaction_id)
            .bind(e.account_id)
            .bind(format!("{:?}", e.entry_type).to_lowercase())
            .bind(e.amount)
            .bind(&e.currency)
            .bind(e.balance_before)
            .bind(e.balance_after)
            .bind(e.account_lock_version)
            .bind(e.is_hot_account)
            .bind(e.original_amount)
            .bind(&e.original_currency)
            .bind(e.exchange_rate)
            .bind(e.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(&format!(
            "UPDATE {} SET status = 'committed', resolved_at = $2 WHERE id = $1",
            self.t("holds")
        ))
        .bind(hold_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        self.append_event_tx(
            &mut tx,
            ledger_id,
            AggregateType::Hold,
            hold_id,
            "hold.committed",
            serde_json::json!({ "transaction_id": transaction.id }),
        )
        .await?;

        tx.commit().await?;

        Ok(TransactionOutcome {
            transaction,
            entries,
            balances,
            replayed: false,
        })
    }

    async fn void_hold(&self, ledger_id: Uuid, hold_id: Uuid, reason: &str) -> Result<Hold, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        let hold_row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE id = $1 AND ledger_id = $2 {}",
            self.t("holds"),
            self.lock_clause()
        ))
        .bind(hold_id)
        .bind(ledger_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SummaError::NotFound(format!("hold {hold_id}")))?;
        let mut hold = Self::row_to_hold(&hold_row)?;
        hold.require_pending()?;

        let mut account = self
            .lock_account(&mut tx, hold.account_id)
            .await?
            .ok_or_else(|| SummaError::NotFound(format!("account {}", hold.account_id)))?;
        balance::apply_delta(
            &mut account,
            BalanceDelta { pending_debit_delta: -hold.amount, ..Default::default() },
            self.hmac(),
            true,
        )?;
        self.persist_account(&mut tx, &account).await?;

        hold.status = HoldStatus::Voided;
        hold.resolved_at = Some(Utc::now());
        sqlx::query(&format!(
            "UPDATE {} SET status = 'voided', resolved_at = $2 WHERE id = $1",
            self.t("holds")
        ))
        .bind(hold_id)
        .bind(hold.resolved_at)
        .execute(&mut *tx)
        .await?;

        self.append_event_tx(
            &mut tx,
            ledger_id,
            AggregateType::Hold,
            hold_id,
            "hold.voided",
            serde_json::json!({ "reason": reason }),
        )
        .await?;

        tx.commit().await?;
        Ok(hold)
    }

    async fn expire_holds(&self, ledger_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Hold>, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        let due_rows = sqlx::query(&format!(
            "SELECT id FROM {} WHERE ledger_id = $1 AND status = 'pending' AND expires_at <= $2 {}",
            self.t("holds"),
            self.lock_clause()
        ))
        .bind(ledger_id)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let mut expired = Vec::with_capacity(due_rows.len());
        for row in due_rows {
            let hold_id: Uuid = row.try_get("id")?;
            let hold_row = sqlx::query(&format!("SELECT * FROM {} WHERE id = $1", self.t("holds")))
                .bind(hold_id)
                .fetch_one(&mut *tx)
                .await?;
            let mut hold = Self::row_to_hold(&hold_row)?;

            if let Some(mut account) = self.lock_account(&mut tx, hold.account_id).await? {
                balance::apply_delta(
                    &mut account,
                    BalanceDelta { pending_debit_delta: -hold.amount, ..Default::default() },
                    self.hmac(),
                    true,
                )?;
                self.persist_account(&mut tx, &account).await?;
            }

            hold.status = HoldStatus::Expired;
            hold.resolved_at = Some(now);
            sqlx::query(&format!(
                "UPDATE {} SET status = 'expired', resolved_at = $2 WHERE id = $1",
                self.t("holds")
            ))
            .bind(hold_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            self.append_event_tx(&mut tx, ledger_id, AggregateType::Hold, hold_id, "hold.expired", serde_json::json!({}))
                .await?;
            expired.push(hold);
        }

        tx.commit().await?;
        Ok(expired)
    }

    async fn enqueue_hot_entry(&self, entry: HotAccountEntry) -> Result<(), SummaError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, ledger_id, system_account_id, transaction_id, entry_type, amount, processed, created_at, processed_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
            self.t("hot_account_entries")
        ))
        .bind(entry.id)
        .bind(entry.ledger_id)
        .bind(entry.system_account_id)
        .bind(entry.transaction_id)
        .bind(format!("{:?}", entry.entry_type).to_lowercase())
        .bind(entry.amount)
        .bind(entry.processed)
        .bind(entry.created_at)
        .bind(entry.processed_at)
        .execute(self.router.primary())
        .await?;
        Ok(())
    }

    async fn process_hot_account_batch(&self, ledger_id: Uuid, batch_size: u32) -> Result<BatchOutcome, SummaError> {
        let mut tx = self.router.primary().begin().await?;
        // spec §4.7 step 1: SKIP LOCKED lets several workers drain the queue
        // concurrently without blocking on each other's claimed rows.
        let rows = sqlx::query(&format!(
            r#"
            SELECT * FROM {} WHERE ledger_id = $1 AND processed = FALSE
            ORDER BY created_at ASC LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
            self.t("hot_account_entries")
        ))
        .bind(ledger_id)
        .bind(batch_size as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry_type: String = row.try_get("entry_type")?;
            claimed.push(HotAccountEntry {
                id: row.try_get("id")?,
                ledger_id: row.try_get("ledger_id")?,
                system_account_id: row.try_get("system_account_id")?,
                transaction_id: row.try_get("transaction_id")?,
                entry_type: if entry_type == "credit" { EntryType::Credit } else { EntryType::Debit },
                amount: row.try_get("amount")?,
                processed: row.try_get("processed")?,
                created_at: row.try_get("created_at")?,
                processed_at: row.try_get("processed_at")?,
            });
        }

        let outcome = hot_account::aggregate_batch(&claimed);
        for (account_id, delta) in &outcome.net_deltas {
            if let Some(mut sys) = self.lock_system_account(&mut tx, *account_id).await? {
                if *delta >= 0 {
                    sys.credit_balance += delta;
                } else {
                    sys.debit_balance += -delta;
                }
                sys.balance = sys.credit_balance - sys.debit_balance;
                sys.version += 1;
                sys.updated_at = Utc::now();
                self.persist_system_account(&mut tx, &sys).await?;
            }
        }

        let now = Utc::now();
        for id in &outcome.consumed_ids {
            sqlx::query(&format!(
                "UPDATE {} SET processed = TRUE, processed_at = $2 WHERE id = $1",
                self.t("hot_account_entries")
            ))
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn cleanup_hot_entries(&self, ledger_id: Uuid, now: DateTime<Utc>, retention_hours: u64) -> Result<u64, SummaError> {
        let cutoff = now - chrono::Duration::hours(retention_hours as i64);
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE ledger_id = $1 AND processed = TRUE AND processed_at <= $2",
            self.t("hot_account_entries")
        ))
        .bind(ledger_id)
        .bind(cutoff)
        .execute(self.router.primary())
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_events(&self, ledger_id: Uuid, aggregate_type: AggregateType, aggregate_id: Uuid) -> Result<Vec<EventRow>, SummaError> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} WHERE ledger_id = $1 AND aggregate_type = $2 AND aggregate_id = $3 ORDER BY version ASC",
            self.t("events")
        ))
        .bind(ledger_id)
        .bind(format!("{aggregate_type:?}").to_lowercase())
        .bind(aggregate_id)
        .fetch_all(self.router.read_pool())
        .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn get_latest_snapshot(&self, ledger_id: Uuid, aggregate_type: AggregateType, aggregate_id: Uuid) -> Result<Option<HashSnapshot>, SummaError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE ledger_id = $1 AND aggregate_type = $2 AND aggregate_id = $3",
            self.t("hash_snapshots")
        ))
        .bind(ledger_id)
        .bind(format!("{aggregate_type:?}").to_lowercase())
        .bind(aggregate_id)
        .fetch_optional(self.router.read_pool())
        .await?;
        row.map(|r| -> Result<HashSnapshot, SummaError> {
            let aggregate_type: String = r.try_get("aggregate_type")?;
            Ok(HashSnapshot {
                ledger_id: r.try_get("ledger_id")?,
                aggregate_type: parse_aggregate_type(&aggregate_type),
                aggregate_id: r.try_get("aggregate_id")?,
                version: r.try_get("version")?,
                hash: r.try_get("hash")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
    }

    async fn write_snapshot(&self, snapshot: HashSnapshot) -> Result<(), SummaError> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (ledger_id, aggregate_type, aggregate_id, version, hash, created_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (ledger_id, aggregate_type, aggregate_id)
            DO UPDATE SET version = $4, hash = $5, created_at = $6
            "#,
            self.t("hash_snapshots")
        ))
        .bind(snapshot.ledger_id)
        .bind(format!("{:?}", snapshot.aggregate_type).to_lowercase())
        .bind(snapshot.aggregate_id)
        .bind(snapshot.version)
        .bind(&snapshot.hash)
        .bind(snapshot.created_at)
        .execute(self.router.primary())
        .await?;
        Ok(())
    }

    async fn list_chain_heads(&self, ledger_id: Uuid) -> Result<Vec<(AggregateType, Uuid)>, SummaError> {
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT aggregate_type, aggregate_id FROM {} WHERE ledger_id = $1",
            self.t("events")
        ))
        .bind(ledger_id)
        .fetch_all(self.router.read_pool())
        .await?;
        rows.iter()
            .map(|row| {
                let aggregate_type: String = row.try_get("aggregate_type")?;
                let aggregate_id: Uuid = row.try_get("aggregate_id")?;
                Ok((parse_aggregate_type(&aggregate_type), aggregate_id))
            })
            .collect()
    }

    async fn acquire_worker_lease(&self, worker_name: &str, holder_id: &str, ttl: Duration) -> Result<bool, SummaError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60));
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {t} (worker_name, holder_id, expires_at) VALUES ($1, $2, $3)
            ON CONFLICT (worker_name) DO UPDATE
                SET holder_id = EXCLUDED.holder_id, expires_at = EXCLUDED.expires_at
                WHERE {t}.expires_at <= $4 OR {t}.holder_id = $2
            "#,
            t = self.t("worker_leases"),
        ))
        .bind(worker_name)
        .bind(holder_id)
        .bind(expires_at)
        .bind(now)
        .execute(self.router.primary())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_worker_lease(&self, worker_name: &str, holder_id: &str) -> Result<(), SummaError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE worker_name = $1 AND holder_id = $2",
            self.t("worker_leases")
        ))
        .bind(worker_name)
        .bind(holder_id)
        .execute(self.router.primary())
        .await?;
        Ok(())
    }

    async fn cleanup_stale_leases(&self, now: DateTime<Utc>) -> Result<u64, SummaError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE expires_at <= $1", self.t("worker_leases")))
            .bind(now)
            .execute(self.router.primary())
            .await?;
        Ok(result.rows_affected())
    }

    async fn sum_all_balances(&self, ledger_id: Uuid) -> Result<i64, SummaError> {
        let account_sum: Option<i64> = sqlx::query(&format!(
            "SELECT SUM(CASE WHEN normal_balance = 'debit' THEN debit_balance - credit_balance ELSE credit_balance - debit_balance END) AS total FROM {} WHERE ledger_id = $1",
            self.t("accounts")
        ))
        .bind(ledger_id)
        .fetch_one(self.router.read_pool())
        .await?
        .try_get("total")?;

        let system_sum: Option<i64> = sqlx::query(&format!(
            "SELECT SUM(credit_balance - debit_balance) AS total FROM {} WHERE ledger_id = $1",
            self.t("system_accounts")
        ))
        .bind(ledger_id)
        .fetch_one(self.router.read_pool())
        .await?
        .try_get("total")?;

        // Invariant HA1 (spec §4.7): pending hot-account entries have already
        // posted their transaction/entry rows — only the system account's own
        // balance mutation is deferred, so the zero-sum check must count them
        // as if they had already landed.
        let pending_sum: Option<i64> = sqlx::query(&format!(
            "SELECT SUM(CASE WHEN entry_type = 'credit' THEN amount ELSE -amount END) AS total FROM {} WHERE ledger_id = $1 AND processed = FALSE",
            self.t("hot_account_entries")
        ))
        .bind(ledger_id)
        .fetch_one(self.router.read_pool())
        .await?
        .try_get("total")?;

        Ok(account_sum.unwrap_or(0) + system_sum.unwrap_or(0) + pending_sum.unwrap_or(0))
    }
}
