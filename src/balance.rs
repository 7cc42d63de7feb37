// src/balance.rs
//
// Grounded in `ledger/src/balance.rs`'s `Balance` view struct, generalized
// from the teacher's UTXO-fragment sum to the direct balance-column model
// spec §3/§4.4 describes. The actual row lock is taken by whichever adapter
// owns the SQL connection (`adapters::postgres`/`adapters::memory`); this
// module holds the pure computation both adapters call so the algorithm is
// defined exactly once, the same relationship the teacher's
// `PostgresInternalLedgerAdapter` blanket impl has to its callers.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::future::Future;
use uuid::Uuid;

use crate::account::Account;
use crate::config::EngineConfig;
use crate::error::SummaError;

/// A read-only balance view, spec §3 fields `available_balance`/`balance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub account_id: Uuid,
    pub currency: String,
    pub balance: i64,
    pub available_balance: i64,
    pub credit_balance: i64,
    pub debit_balance: i64,
    pub pending_credit: i64,
    pub pending_debit: i64,
    pub lock_version: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for Balance {
    fn from(a: &Account) -> Self {
        Self {
            account_id: a.id,
            currency: a.currency.clone(),
            balance: a.balance,
            available_balance: a.available_balance(),
            credit_balance: a.credit_balance,
            debit_balance: a.debit_balance,
            pending_credit: a.pending_credit,
            pending_debit: a.pending_debit,
            lock_version: a.lock_version,
            updated_at: a.updated_at,
        }
    }
}

/// A delta to apply to an account's four running counters in one mutation.
/// Positive `debit_delta` triggers the overdraft check; pending deltas model
/// hold creation/release without touching `balance` itself (invariant H1).
#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceDelta {
    pub credit_delta: i64,
    pub debit_delta: i64,
    pub pending_credit_delta: i64,
    pub pending_debit_delta: i64,
}

impl BalanceDelta {
    pub fn credit(amount: i64) -> Self {
        Self {
            credit_delta: amount,
            ..Default::default()
        }
    }

    pub fn debit(amount: i64) -> Self {
        Self {
            debit_delta: amount,
            ..Default::default()
        }
    }

    pub fn pending_debit(amount: i64) -> Self {
        Self {
            pending_debit_delta: amount,
            ..Default::default()
        }
    }
}

/// Append-only row spec §3 calls `account_balance_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceVersion {
    pub account_id: Uuid,
    pub lock_version: i64,
    pub balance: i64,
    pub credit_balance: i64,
    pub debit_balance: i64,
    pub pending_credit: i64,
    pub pending_debit: i64,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Spec §4.4 steps 2-4: status check, overdraft policy, apply the delta and
/// bump `lock_version`. Mutates `account` in place; returns the appended
/// `account_balance_version` row (step 5) so the caller can persist it
/// alongside the account row update in the same DB transaction.
pub fn apply_delta(
    account: &mut Account,
    delta: BalanceDelta,
    hmac_secret: Option<&str>,
    force: bool,
) -> Result<BalanceVersion, SummaError> {
    account.status.require_active(account.id)?;

    if delta.debit_delta > 0 && !force {
        let available = account.available_balance();
        crate::account::check_overdraft(
            account.id,
            available,
            delta.debit_delta,
            account.allow_overdraft,
            account.overdraft_limit,
        )?;
    }

    account.credit_balance += delta.credit_delta;
    account.debit_balance += delta.debit_delta;
    account.pending_credit += delta.pending_credit_delta;
    account.pending_debit += delta.pending_debit_delta;
    account.balance = account.signed_balance();
    account.lock_version += 1;
    account.updated_at = Utc::now();

    let checksum = compute_checksum(account.id, account.balance, account.lock_version, hmac_secret);

    Ok(BalanceVersion {
        account_id: account.id,
        lock_version: account.lock_version,
        balance: account.balance,
        credit_balance: account.credit_balance,
        debit_balance: account.debit_balance,
        pending_credit: account.pending_credit,
        pending_debit: account.pending_debit,
        checksum,
        created_at: account.updated_at,
    })
}

/// Optional HMAC checksum over `(id, balance, version)` for external audit
/// (spec §4.4 step 6). `None` when no secret is configured.
pub fn compute_checksum(
    account_id: Uuid,
    balance: i64,
    version: i64,
    hmac_secret: Option<&str>,
) -> Option<String> {
    let secret = hmac_secret?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(account_id.as_bytes());
    mac.update(&balance.to_be_bytes());
    mac.update(&version.to_be_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Runs `op` under the configured retry policy for `LockMode::NoWait`:
/// exponential backoff with jitter, bounded by `lock_retry_count`. Surfaces
/// `SummaError::LockTimeout` once attempts are exhausted.
pub async fn with_lock_retry<F, Fut, T>(cfg: &EngineConfig, mut op: F) -> Result<T, SummaError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SummaError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < cfg.lock_retry_count => {
                tokio::time::sleep(cfg.lock_retry_delay(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::HolderType;

    fn account() -> Account {
        Account::new(Uuid::now_v7(), Uuid::now_v7(), HolderType::Individual, "USD")
    }

    #[test]
    fn credit_then_debit_matches_scenario_1() {
        let mut a = account();
        apply_delta(&mut a, BalanceDelta::credit(25_000), None, false).unwrap();
        apply_delta(&mut a, BalanceDelta::debit(10_000), None, false).unwrap();
        assert_eq!(a.balance, 15_000);
        assert_eq!(a.credit_balance, 25_000);
        assert_eq!(a.debit_balance, 10_000);
        assert_eq!(a.available_balance(), 15_000);
    }

    #[test]
    fn debit_over_balance_without_overdraft_fails() {
        let mut a = account();
        apply_delta(&mut a, BalanceDelta::credit(1_000), None, false).unwrap();
        let err = apply_delta(&mut a, BalanceDelta::debit(1_001), None, false).unwrap_err();
        assert!(matches!(err, SummaError::InsufficientBalance { .. }));
        // rejected mutation must not have partially applied.
        assert_eq!(a.balance, 1_000);
    }

    #[test]
    fn lock_version_increases_monotonically() {
        let mut a = account();
        apply_delta(&mut a, BalanceDelta::credit(100), None, false).unwrap();
        apply_delta(&mut a, BalanceDelta::credit(100), None, false).unwrap();
        assert_eq!(a.lock_version, 2);
    }

    #[test]
    fn checksum_present_only_when_secret_configured() {
        assert!(compute_checksum(Uuid::now_v7(), 100, 1, None).is_none());
        assert!(compute_checksum(Uuid::now_v7(), 100, 1, Some("k")).is_some());
    }

    #[test]
    fn frozen_account_rejects_mutation() {
        let mut a = account();
        a.status = crate::account::AccountStatus::Frozen;
        let err = apply_delta(&mut a, BalanceDelta::credit(1), None, false).unwrap_err();
        assert!(matches!(err, SummaError::AccountFrozen(_)));
    }
}
