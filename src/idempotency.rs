// src/idempotency.rs
//
// New module — grounded in `ledger/src/transaction.rs`'s reference-based
// dedupe check (`find_transaction_by_reference` before insert). Spec §4.3
// step 1 keys the dedupe decision off the request's `reference` string
// directly: same idempotency key + same reference replays the cached
// response; same key + a different reference is a client error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::SummaError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub ledger_id: Uuid,
    pub key: String,
    pub reference: String,
    pub response_body: Json,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// No prior record; caller should proceed and then `record`.
    Fresh,
    /// Same key, same reference: caller should return `response_body`
    /// without re-executing anything.
    Replay,
}

/// Spec §4.3 step 1: a stored record under the same key with a matching
/// `reference` replays; a different `reference` is a client error.
pub fn check(existing: Option<&IdempotencyRecord>, reference: &str) -> Result<IdempotencyOutcome, SummaError> {
    match existing {
        None => Ok(IdempotencyOutcome::Fresh),
        Some(record) if record.reference == reference => Ok(IdempotencyOutcome::Replay),
        Some(_) => Err(SummaError::Conflict(
            "idempotency key reused with a different reference".into(),
        )),
    }
}

pub fn new_record(
    ledger_id: Uuid,
    key: &str,
    reference: &str,
    response_body: Json,
    ttl: std::time::Duration,
) -> IdempotencyRecord {
    let now = Utc::now();
    IdempotencyRecord {
        ledger_id,
        key: key.to_string(),
        reference: reference.to_string(),
        response_body,
        created_at: now,
        expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24)),
    }
}

pub fn is_expired(record: &IdempotencyRecord, now: DateTime<Utc>) -> bool {
    record.expires_at <= now
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn fresh_key_proceeds() {
        assert_eq!(check(None, "ref-1").unwrap(), IdempotencyOutcome::Fresh);
    }

    #[test]
    fn same_key_same_reference_replays() {
        let record = new_record(Uuid::now_v7(), "k1", "ref-1", json!({"ok": true}), Duration::from_secs(3600));
        assert_eq!(check(Some(&record), "ref-1").unwrap(), IdempotencyOutcome::Replay);
    }

    #[test]
    fn same_key_different_reference_conflicts() {
        let record = new_record(Uuid::now_v7(), "k1", "ref-1", json!({"ok": true}), Duration::from_secs(3600));
        assert!(matches!(check(Some(&record), "ref-2"), Err(SummaError::Conflict(_))));
    }

    #[test]
    fn expiry_is_ttl_bounded() {
        let record = new_record(Uuid::now_v7(), "k1", "ref-1", json!({}), Duration::from_secs(1));
        assert!(!is_expired(&record, record.created_at));
        assert!(is_expired(&record, record.created_at + chrono::Duration::seconds(2)));
    }
}
