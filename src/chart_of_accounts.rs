// src/chart_of_accounts.rs
//
// New module — spec §4.5/§8 invariant 1 ("the books always balance") plus
// §4.8's periodic-job registration point. Grounded in the auditing role the
// teacher's integration tests play (`ledger/tests/integration_tests.rs`
// checks post-conditions after every operation) but promoted to a
// standalone, schedulable job rather than test-only assertions.

use uuid::Uuid;

use crate::error::SummaError;
use crate::LedgerAdapter;

/// Spec §8 invariant 1: across every account (including system accounts),
/// signed balances must sum to zero — double-entry posting guarantees this
/// incrementally, this job verifies it holds globally as a defense against
/// a bug (or a direct DB write) breaking the invariant silently.
pub struct ZeroSumAuditor<'a> {
    adapter: &'a dyn LedgerAdapter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditResult {
    pub balanced: bool,
    pub drift: i64,
}

impl<'a> ZeroSumAuditor<'a> {
    pub fn new(adapter: &'a dyn LedgerAdapter) -> Self {
        Self { adapter }
    }

    #[tracing::instrument(skip(self))]
    pub async fn validate(&self, ledger_id: Uuid) -> Result<AuditResult, SummaError> {
        let drift = self.adapter.sum_all_balances(ledger_id).await?;
        if drift != 0 {
            tracing::error!(ledger_id = %ledger_id, drift, "accounting equation violated");
        }
        Ok(AuditResult {
            balanced: drift == 0,
            drift,
        })
    }
}

#[async_trait::async_trait]
impl crate::worker::Job for ZeroSumAuditorJob {
    fn name(&self) -> &str {
        "zero_sum_auditor"
    }

    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError> {
        let result = ZeroSumAuditor::new(self.adapter.as_ref()).validate(ledger_id).await?;
        if !result.balanced {
            return Err(SummaError::IntegrityViolation(format!(
                "ledger {ledger_id} drifted by {}",
                result.drift
            )));
        }
        Ok(())
    }
}

/// Owning wrapper so `ZeroSumAuditor` (which borrows) can also be registered
/// as a long-lived background worker via `worker::RegisteredWorker`.
pub struct ZeroSumAuditorJob {
    pub adapter: std::sync::Arc<dyn LedgerAdapter>,
}
