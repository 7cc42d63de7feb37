// src/bus.rs
//
// New module — spec §4.10/§6 names secondary storage and a message bus as
// integration points but marks concrete backends (Redis, Kafka, etc.) a
// Non-goal. Grounded in `ledger/src/lib.rs`'s trait-per-capability shape
// (the teacher keeps storage and higher-level policy as separate traits
// composed by a blanket impl); contract-only here, same as the teacher
// leaves `ousia_derive`'s macro layer out of the `ledger` crate itself.

use async_trait::async_trait;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::SummaError;
use crate::event::EventRow;

/// A denormalized, query-optimized projection store an embedder can keep in
/// sync by subscribing to posted events (spec §4.10). The core engine never
/// reads from this trait — it's an outbound integration point only.
#[async_trait]
pub trait SecondaryStorage: Send + Sync {
    async fn upsert_projection(&self, ledger_id: Uuid, key: &str, value: Json) -> Result<(), SummaError>;
    async fn get_projection(&self, ledger_id: Uuid, key: &str) -> Result<Option<Json>, SummaError>;
}

/// Publishes posted events to an external bus for downstream consumers
/// (spec §6). Delivery semantics (at-least-once, ordering) are the
/// embedder's responsibility; this crate only guarantees it calls `publish`
/// after the corresponding DB transaction has committed.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, event: &EventRow) -> Result<(), SummaError>;
}

/// The default no-op bus: posting still works with nothing wired up.
pub struct NullMessageBus;

#[async_trait]
impl MessageBus for NullMessageBus {
    async fn publish(&self, _event: &EventRow) -> Result<(), SummaError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AggregateType;

    #[tokio::test]
    async fn null_bus_accepts_every_event() {
        let bus = NullMessageBus;
        let event = EventRow {
            id: Uuid::now_v7(),
            ledger_id: Uuid::now_v7(),
            aggregate_type: AggregateType::Account,
            aggregate_id: Uuid::now_v7(),
            version: 1,
            event_type: "account.created".into(),
            event_data: serde_json::json!({}),
            prev_hash: None,
            hash: "abc".into(),
            created_at: chrono::Utc::now(),
        };
        assert!(bus.publish(&event).await.is_ok());
    }
}
