// src/hooks.rs
//
// New module — spec §4.9's plugin/hook system. Grounded in
// `ledger/src/lib.rs`'s blanket-impl dispatch style (generic trait bound
// composition resolved once at construction, not per-call), adapted here to
// a data-driven dispatch table: each plugin declares the hook kinds it cares
// about, and `HookRegistry::new` builds a `kind -> plugins` map once instead
// of every dispatch scanning the full plugin list.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SummaError;
use crate::telemetry::redact;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HookEvent {
    AccountCreated,
    AccountFrozen,
    AccountClosed,
    TransactionPosting,
    TransactionPosted,
    HoldCreated,
    HoldCommitted,
    HoldVoided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Before,
    After,
}

#[derive(Debug, Clone)]
pub struct HookContext {
    pub event: HookEvent,
    pub phase: HookPhase,
    pub payload: Json,
}

/// Context passed to the generic `beforeOperation`/`afterOperation` hooks
/// (spec §4.9), which match by `operation.type` string rather than a fixed
/// `HookEvent` variant.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub phase: HookPhase,
    pub payload: Json,
}

/// Matches an `operation.type` matcher pattern against an actual operation
/// type (spec §4.9 `operationHooks`). A trailing `*` matches any suffix, so
/// `"transaction.*"` covers `"transaction.credit"`, `"transaction.transfer"`,
/// etc; anything else is an exact match.
pub fn matches_operation(pattern: &str, operation_type: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => operation_type.starts_with(prefix),
        None => pattern == operation_type,
    }
}

/// A ledger extension point. `before` hooks can reject an operation by
/// returning `Err`; `after` hooks are fire-and-forget notifications and
/// their errors are logged, not propagated (spec §4.9: a misbehaving
/// notification plugin must never roll back a transaction already posted).
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Hook kinds this plugin wants dispatched to it. Declared once so
    /// `HookRegistry::new` can build its dispatch table without invoking the
    /// plugin.
    fn interests(&self) -> &[HookEvent];

    async fn before(&self, _ctx: &HookContext) -> Result<(), SummaError> {
        Ok(())
    }

    async fn after(&self, _ctx: &HookContext) {}

    /// `operation.type` matcher patterns this plugin's generic
    /// `before_operation`/`after_operation` hooks should fire for. Empty by
    /// default — most plugins use the named lifecycle hooks above instead.
    fn operation_patterns(&self) -> &[&str] {
        &[]
    }

    async fn before_operation(&self, _operation_type: &str, _ctx: &OperationContext) -> Result<(), SummaError> {
        Ok(())
    }

    async fn after_operation(&self, _operation_type: &str, _ctx: &OperationContext) {}

    /// Table/column definitions this plugin owns (spec §4.9 `schema`), e.g.
    /// DDL fragments the embedder applies alongside `init_schema`.
    fn schema(&self) -> Option<Json> {
        None
    }

    /// Background jobs this plugin wants registered alongside the engine's
    /// built-ins (spec §4.8/§4.9 `workers`).
    fn workers(&self) -> Vec<crate::worker::RegisteredWorker> {
        Vec::new()
    }
}

pub struct HookRegistry {
    before_table: HashMap<HookEvent, Vec<Arc<dyn Plugin>>>,
    after_table: HashMap<HookEvent, Vec<Arc<dyn Plugin>>>,
    operation_plugins: Vec<Arc<dyn Plugin>>,
}

impl HookRegistry {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut before_table: HashMap<HookEvent, Vec<Arc<dyn Plugin>>> = HashMap::new();
        let mut after_table: HashMap<HookEvent, Vec<Arc<dyn Plugin>>> = HashMap::new();
        let mut operation_plugins = Vec::new();
        for plugin in &plugins {
            for kind in plugin.interests() {
                before_table.entry(*kind).or_default().push(plugin.clone());
                after_table.entry(*kind).or_default().push(plugin.clone());
            }
            if !plugin.operation_patterns().is_empty() {
                operation_plugins.push(plugin.clone());
            }
        }
        Self {
            before_table,
            after_table,
            operation_plugins,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub async fn dispatch_before(&self, event: HookEvent, payload: &impl Serialize) -> Result<(), SummaError> {
        let Some(plugins) = self.before_table.get(&event) else {
            return Ok(());
        };
        let payload = redact(&serde_json::to_value(payload).map_err(|e| SummaError::Internal(e.into()))?);
        let ctx = HookContext {
            event,
            phase: HookPhase::Before,
            payload,
        };
        for plugin in plugins {
            plugin.before(&ctx).await.map_err(|e| {
                SummaError::Conflict(format!("rejected by plugin '{}': {e}", plugin.name()))
            })?;
        }
        Ok(())
    }

    pub async fn dispatch_after(&self, event: HookEvent, payload: &impl Serialize) -> Result<(), SummaError> {
        let Some(plugins) = self.after_table.get(&event) else {
            return Ok(());
        };
        let payload = redact(&serde_json::to_value(payload).map_err(|e| SummaError::Internal(e.into()))?);
        let ctx = HookContext {
            event,
            phase: HookPhase::After,
            payload,
        };
        for plugin in plugins {
            plugin.after(&ctx).await;
        }
        Ok(())
    }

    /// Generic `beforeOperation` dispatch (spec §4.9): runs every registered
    /// plugin whose `operation_patterns()` matches `operation_type`, in
    /// registration order. The first rejection aborts the operation.
    pub async fn dispatch_before_operation(
        &self,
        operation_type: &str,
        payload: &impl Serialize,
    ) -> Result<(), SummaError> {
        if self.operation_plugins.is_empty() {
            return Ok(());
        }
        let payload = redact(&serde_json::to_value(payload).map_err(|e| SummaError::Internal(e.into()))?);
        let ctx = OperationContext {
            phase: HookPhase::Before,
            payload,
        };
        for plugin in &self.operation_plugins {
            if plugin.operation_patterns().iter().any(|p| matches_operation(p, operation_type)) {
                plugin.before_operation(operation_type, &ctx).await.map_err(|e| {
                    SummaError::Conflict(format!("rejected by plugin '{}': {e}", plugin.name()))
                })?;
            }
        }
        Ok(())
    }

    /// Generic `afterOperation` dispatch (spec §4.9): fire-and-forget,
    /// errors are logged and never propagated.
    pub async fn dispatch_after_operation(
        &self,
        operation_type: &str,
        payload: &impl Serialize,
    ) -> Result<(), SummaError> {
        if self.operation_plugins.is_empty() {
            return Ok(());
        }
        let payload = redact(&serde_json::to_value(payload).map_err(|e| SummaError::Internal(e.into()))?);
        let ctx = OperationContext {
            phase: HookPhase::After,
            payload,
        };
        for plugin in &self.operation_plugins {
            if plugin.operation_patterns().iter().any(|p| matches_operation(p, operation_type)) {
                plugin.after_operation(operation_type, &ctx).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPlugin {
        interests: Vec<HookEvent>,
        before_calls: AtomicUsize,
        after_calls: AtomicUsize,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            "counting"
        }

        fn interests(&self) -> &[HookEvent] {
            &self.interests
        }

        async fn before(&self, _ctx: &HookContext) -> Result<(), SummaError> {
            self.before_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn after(&self, _ctx: &HookContext) {
            self.after_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dispatches_only_to_interested_plugins() {
        let plugin = Arc::new(CountingPlugin {
            interests: vec![HookEvent::TransactionPosting],
            before_calls: AtomicUsize::new(0),
            after_calls: AtomicUsize::new(0),
        });
        let registry = HookRegistry::new(vec![plugin.clone()]);

        registry
            .dispatch_before(HookEvent::TransactionPosting, &serde_json::json!({}))
            .await
            .unwrap();
        registry
            .dispatch_before(HookEvent::HoldCreated, &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(plugin.before_calls.load(Ordering::SeqCst), 1);
    }

    struct RejectingPlugin;

    #[async_trait]
    impl Plugin for RejectingPlugin {
        fn name(&self) -> &str {
            "rejecting"
        }
        fn interests(&self) -> &[HookEvent] {
            &[HookEvent::TransactionPosting]
        }
        async fn before(&self, _ctx: &HookContext) -> Result<(), SummaError> {
            Err(SummaError::Conflict("no".into()))
        }
    }

    #[tokio::test]
    async fn before_hook_can_reject() {
        let registry = HookRegistry::new(vec![Arc::new(RejectingPlugin)]);
        let result = registry
            .dispatch_before(HookEvent::TransactionPosting, &serde_json::json!({}))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_registry_is_a_no_op() {
        let registry = HookRegistry::empty();
        assert!(registry
            .dispatch_before(HookEvent::TransactionPosting, &serde_json::json!({}))
            .await
            .is_ok());
    }

    #[test]
    fn wildcard_pattern_matches_any_suffix() {
        assert!(matches_operation("transaction.*", "transaction.credit"));
        assert!(matches_operation("transaction.*", "transaction.transfer"));
        assert!(!matches_operation("transaction.*", "hold.create"));
        assert!(matches_operation("hold.create", "hold.create"));
        assert!(!matches_operation("hold.create", "hold.commit"));
    }

    struct OperationPlugin {
        patterns: Vec<&'static str>,
        before_calls: AtomicUsize,
    }

    #[async_trait]
    impl Plugin for OperationPlugin {
        fn name(&self) -> &str {
            "operation-matcher"
        }
        fn interests(&self) -> &[HookEvent] {
            &[]
        }
        fn operation_patterns(&self) -> &[&str] {
            &self.patterns
        }
        async fn before_operation(&self, _operation_type: &str, _ctx: &OperationContext) -> Result<(), SummaError> {
            self.before_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn operation_hooks_dispatch_only_on_matching_type() {
        let plugin = Arc::new(OperationPlugin {
            patterns: vec!["transaction.*"],
            before_calls: AtomicUsize::new(0),
        });
        let registry = HookRegistry::new(vec![plugin.clone()]);

        registry
            .dispatch_before_operation("transaction.credit", &serde_json::json!({}))
            .await
            .unwrap();
        registry
            .dispatch_before_operation("hold.create", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(plugin.before_calls.load(Ordering::SeqCst), 1);
    }
}
