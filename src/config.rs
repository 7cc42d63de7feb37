// src/config.rs
//
// Configuration surface for the engine. Grounded in the way
// `backend::Config::from_env` reads `DATABASE_URL`/`IP_ADDRESS` — a flat,
// `env::var`-driven struct rather than a layered config-file loader, since the
// core engine is embedded rather than its own deployable.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Row-lock acquisition strategy for balance mutation (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LockMode {
    /// `SELECT ... FOR UPDATE`, bounded by `lock_timeout_ms`.
    #[default]
    Wait,
    /// `SELECT ... FOR UPDATE NOWAIT`, caller-side retry with backoff+jitter.
    NoWait,
    /// Compare-and-swap on `lock_version`. Reserved: built and tested, not the
    /// default (spec §9 Open Question).
    Optimistic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Schema all SQL is prefixed with. `"public"` skips the prefix.
    pub schema: String,
    pub statement_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub transaction_timeout_ms: u64,
    pub lock_mode: LockMode,
    pub lock_retry_count: u32,
    pub lock_retry_base_delay_ms: u64,
    pub lock_retry_max_delay_ms: u64,
    pub idempotency_ttl: Duration,
    pub max_transaction_amount: i64,
    pub hot_account_batch_size: u32,
    pub hot_account_flush_interval: Duration,
    pub hot_account_retention_hours: u64,
    pub hold_expiry_interval: Duration,
    pub worker_lease_ttl_multiplier: u32,
    /// When set, event hashes are `HMAC-SHA256(secret, ...)` instead of plain
    /// `SHA256(...)`. A single secret per deployment (spec §9 Open Question).
    pub hash_chain_hmac_secret: Option<String>,
    /// Open transactions with `SERIALIZABLE` instead of `READ COMMITTED`.
    pub serializable_transactions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schema: "summa".to_string(),
            statement_timeout_ms: 30_000,
            lock_timeout_ms: 3_000,
            transaction_timeout_ms: 30_000,
            lock_mode: LockMode::Wait,
            lock_retry_count: 5,
            lock_retry_base_delay_ms: 20,
            lock_retry_max_delay_ms: 500,
            idempotency_ttl: Duration::from_secs(24 * 3600),
            max_transaction_amount: 100_000_000_000,
            hot_account_batch_size: 500,
            hot_account_flush_interval: Duration::from_secs(30),
            hot_account_retention_hours: 6,
            hold_expiry_interval: Duration::from_secs(60),
            worker_lease_ttl_multiplier: 2,
            hash_chain_hmac_secret: None,
            serializable_transactions: false,
        }
    }
}

impl EngineConfig {
    /// Reads `SUMMA_*` environment variables, falling back to `Default` for
    /// anything unset or unparsable. Never panics — a misconfigured
    /// environment just gets the documented default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SUMMA_SCHEMA") {
            cfg.schema = v;
        }
        if let Some(v) = env_u64("SUMMA_STATEMENT_TIMEOUT_MS") {
            cfg.statement_timeout_ms = v;
        }
        if let Some(v) = env_u64("SUMMA_LOCK_TIMEOUT_MS") {
            cfg.lock_timeout_ms = v;
        }
        if let Some(v) = env_u64("SUMMA_TRANSACTION_TIMEOUT_MS") {
            cfg.transaction_timeout_ms = v;
        }
        if let Ok(v) = std::env::var("SUMMA_LOCK_MODE") {
            cfg.lock_mode = match v.to_ascii_lowercase().as_str() {
                "nowait" | "no_wait" => LockMode::NoWait,
                "optimistic" => LockMode::Optimistic,
                _ => LockMode::Wait,
            };
        }
        if let Some(v) = env_u64("SUMMA_IDEMPOTENCY_TTL_SECS") {
            cfg.idempotency_ttl = Duration::from_secs(v);
        }
        if let Some(v) = std::env::var("SUMMA_MAX_TRANSACTION_AMOUNT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            cfg.max_transaction_amount = v;
        }
        if let Ok(v) = std::env::var("SUMMA_HASH_CHAIN_HMAC_SECRET") {
            cfg.hash_chain_hmac_secret = Some(v);
        }
        if let Ok(v) = std::env::var("SUMMA_SERIALIZABLE_TRANSACTIONS") {
            cfg.serializable_transactions = v == "1" || v.eq_ignore_ascii_case("true");
        }

        cfg
    }

    pub fn lock_retry_delay(&self, attempt: u32) -> Duration {
        let base = self.lock_retry_base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = base.min(self.lock_retry_max_delay_ms);
        let jitter = rand::Rng::gen_range(&mut rand::thread_rng(), 0..=capped / 2 + 1);
        Duration::from_millis(capped / 2 + jitter)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parses the `\d+(\.\d+)?\s?(s|m|h|d)` interval grammar from spec §4.8.
/// Negative or unitless values are rejected — the worker runner treats a
/// malformed interval string as fatal at registration time.
pub fn parse_interval(input: &str) -> Result<Duration, crate::error::SummaError> {
    let trimmed = input.trim();
    let unit_idx = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| {
            crate::error::SummaError::InvalidArgument(format!(
                "interval '{input}' has no unit (expected s|m|h|d)"
            ))
        })?;

    let (number_part, unit_part) = trimmed.split_at(unit_idx);
    let number_part = number_part.trim();
    let unit_part = unit_part.trim();

    let value: f64 = number_part.parse().map_err(|_| {
        crate::error::SummaError::InvalidArgument(format!(
            "interval '{input}' has a non-numeric magnitude"
        ))
    })?;

    if value <= 0.0 {
        return Err(crate::error::SummaError::InvalidArgument(format!(
            "interval '{input}' must be positive"
        )));
    }

    let seconds = match unit_part {
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        "d" => value * 86_400.0,
        other => {
            return Err(crate::error::SummaError::InvalidArgument(format!(
                "interval '{input}' has unknown unit '{other}'"
            )));
        }
    };

    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_intervals() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_interval("1.5m").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("2 h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_negative_and_unitless() {
        assert!(parse_interval("-5s").is_err());
        assert!(parse_interval("30").is_err());
        assert!(parse_interval("0s").is_err());
        assert!(parse_interval("5x").is_err());
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.schema, "summa");
        assert_eq!(cfg.lock_timeout_ms, 3_000);
        assert_eq!(cfg.statement_timeout_ms, 30_000);
        assert_eq!(cfg.max_transaction_amount, 100_000_000_000);
        assert_eq!(cfg.lock_mode, LockMode::Wait);
    }
}
