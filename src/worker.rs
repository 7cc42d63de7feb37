// src/worker.rs
//
// Grounded in `backend::scheduler`'s lease-gated, non-overlapping tick loop
// (read in full from the secondary teacher example); spec §4.8 asks for the
// same cluster-safe "only one node runs this tick" guarantee plus a
// human-readable interval grammar (`config::parse_interval`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::SummaError;
use crate::event::verify_chain;
use crate::telemetry::log_error;
use crate::LedgerAdapter;

#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError>;
}

/// A job plus the interval it should run at, spec §4.8's registration unit.
pub struct RegisteredWorker {
    pub job: Arc<dyn Job>,
    pub interval: Duration,
    /// Whether this worker must hold the cluster-wide lease before ticking.
    /// Hold expiry is safe to run redundantly on every node (releasing an
    /// already-released hold is a no-op), so it opts out (spec §4.8).
    pub lease_required: bool,
}

impl RegisteredWorker {
    pub fn new(job: Arc<dyn Job>, interval: &str) -> Result<Self, SummaError> {
        Ok(Self {
            job,
            interval: crate::config::parse_interval(interval)?,
            lease_required: true,
        })
    }

    pub fn without_lease(mut self) -> Self {
        self.lease_required = false;
        self
    }

    /// For built-in workers whose interval already comes typed out of
    /// `EngineConfig` rather than the `\d+(\.\d+)?\s?(s|m|h|d)` string form.
    pub fn with_duration(job: Arc<dyn Job>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            lease_required: true,
        }
    }
}

/// Drives every registered worker on its own interval, holding a
/// cluster-wide lease per tick so only one process runs a given worker at a
/// time (spec §4.8 step 2). `holder_id` identifies this process instance.
pub struct WorkerRunner {
    adapter: Arc<dyn LedgerAdapter>,
    ledger_id: Uuid,
    holder_id: String,
    workers: Vec<RegisteredWorker>,
    lease_ttl_multiplier: u32,
    stop: Arc<Notify>,
}

impl WorkerRunner {
    pub fn new(adapter: Arc<dyn LedgerAdapter>, ledger_id: Uuid, cfg: &EngineConfig) -> Self {
        Self {
            adapter,
            ledger_id,
            holder_id: Uuid::now_v7().to_string(),
            workers: Vec::new(),
            lease_ttl_multiplier: cfg.worker_lease_ttl_multiplier,
            stop: Arc::new(Notify::new()),
        }
    }

    pub fn register(&mut self, worker: RegisteredWorker) {
        self.workers.push(worker);
    }

    /// Spawns one task per registered worker. Each task ticks on its own
    /// interval, never overlapping its own previous tick (spec §4.8 step 4):
    /// the next tick is scheduled only after the current one (including the
    /// lease release) completes.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.workers
            .iter()
            .map(|worker| self.spawn_one(worker))
            .collect()
    }

    fn spawn_one(&self, worker: &RegisteredWorker) -> JoinHandle<()> {
        let adapter = self.adapter.clone();
        let ledger_id = self.ledger_id;
        let holder_id = self.holder_id.clone();
        let job = worker.job.clone();
        let interval = worker.interval;
        let ttl = interval * self.lease_ttl_multiplier.max(1);
        let lease_required = worker.lease_required;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.notified() => return,
                    _ = ticker.tick() => {}
                }

                if !lease_required {
                    if let Err(e) = job.run(ledger_id).await {
                        log_error(e);
                    }
                    continue;
                }

                match adapter.acquire_worker_lease(job.name(), &holder_id, ttl).await {
                    Ok(true) => {
                        if let Err(e) = job.run(ledger_id).await {
                            log_error(e);
                        }
                        if let Err(e) = adapter.release_worker_lease(job.name(), &holder_id).await {
                            log_error(e);
                        }
                    }
                    Ok(false) => {
                        tracing::debug!(worker = job.name(), "lease held by another node, skipping tick");
                    }
                    Err(e) => log_error(e),
                }
            }
        })
    }

    /// Signals every spawned task to exit after completing (or skipping) its
    /// current tick; does not abort a tick in flight.
    pub fn stop(&self) {
        self.stop.notify_waiters();
    }
}

/// Spec §4.6: releases every hold past `expires_at` still pending. Does not
/// require the exclusive lease — each void re-checks `status` under lock, so
/// concurrent runners expire disjoint holds safely.
pub struct HoldExpiryJob {
    pub adapter: Arc<dyn LedgerAdapter>,
}

#[async_trait::async_trait]
impl Job for HoldExpiryJob {
    fn name(&self) -> &str {
        "hold_expiry"
    }

    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError> {
        let expired = self.adapter.expire_holds(ledger_id, Utc::now()).await?;
        if !expired.is_empty() {
            tracing::info!(ledger_id = %ledger_id, count = expired.len(), "expired stale holds");
        }
        Ok(())
    }
}

/// Spec §4.3: purges idempotency keys past their TTL so the table doesn't
/// grow unbounded.
pub struct IdempotencyCleanupJob {
    pub adapter: Arc<dyn LedgerAdapter>,
}

#[async_trait::async_trait]
impl Job for IdempotencyCleanupJob {
    fn name(&self) -> &str {
        "idempotency_cleanup"
    }

    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError> {
        let _ = ledger_id;
        let removed = self.adapter.cleanup_idempotency_keys(Utc::now()).await?;
        if removed > 0 {
            tracing::debug!(removed, "purged expired idempotency keys");
        }
        Ok(())
    }
}

/// Spec §4.7: claims a batch of pending hot-account entries and applies
/// their aggregated net delta to each system account.
pub struct HotAccountFlushJob {
    pub adapter: Arc<dyn LedgerAdapter>,
    pub batch_size: u32,
}

#[async_trait::async_trait]
impl Job for HotAccountFlushJob {
    fn name(&self) -> &str {
        "hot_account_flush"
    }

    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError> {
        let outcome = self.adapter.process_hot_account_batch(ledger_id, self.batch_size).await?;
        if !outcome.consumed_ids.is_empty() {
            tracing::debug!(
                ledger_id = %ledger_id,
                consumed = outcome.consumed_ids.len(),
                accounts = outcome.net_deltas.len(),
                "flushed hot-account batch"
            );
        }
        Ok(())
    }
}

/// Spec §4.7 step 5: physically deletes processed hot-account entries older
/// than the retention window, keeping the audit trail bounded.
pub struct HotAccountCleanupJob {
    pub adapter: Arc<dyn LedgerAdapter>,
    pub retention_hours: u64,
}

#[async_trait::async_trait]
impl Job for HotAccountCleanupJob {
    fn name(&self) -> &str {
        "hot_account_cleanup"
    }

    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError> {
        let removed = self
            .adapter
            .cleanup_hot_entries(ledger_id, Utc::now(), self.retention_hours)
            .await?;
        if removed > 0 {
            tracing::debug!(removed, "purged retained hot-account entries");
        }
        Ok(())
    }
}

/// Spec §4.2/§8 invariant 3: recomputes every aggregate's hash chain from
/// its latest snapshot (or genesis) and compares against stored hashes,
/// advancing the snapshot on success so the next sweep only replays the tail.
pub struct ChainVerificationJob {
    pub adapter: Arc<dyn LedgerAdapter>,
    pub hmac_secret: Option<String>,
}

#[async_trait::async_trait]
impl Job for ChainVerificationJob {
    fn name(&self) -> &str {
        "chain_verification"
    }

    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError> {
        let heads = self.adapter.list_chain_heads(ledger_id).await?;
        let mut broken = Vec::new();
        for (aggregate_type, aggregate_id) in heads {
            let snapshot = self.adapter.get_latest_snapshot(ledger_id, aggregate_type, aggregate_id).await?;
            let events = self.adapter.get_events(ledger_id, aggregate_type, aggregate_id).await?;
            let replay: Vec<_> = match &snapshot {
                Some(s) => events.iter().filter(|e| e.version > s.version).cloned().collect(),
                None => events.clone(),
            };
            let verification = verify_chain(&replay, snapshot.as_ref(), self.hmac_secret.as_deref());
            if !verification.ok {
                tracing::error!(
                    ledger_id = %ledger_id,
                    aggregate_id = %aggregate_id,
                    broken_at = ?verification.broken_at_version,
                    "hash chain verification failed"
                );
                broken.push(aggregate_id);
                continue;
            }
            if let Some(last) = events.last() {
                self.adapter
                    .write_snapshot(crate::event::HashSnapshot {
                        ledger_id,
                        aggregate_type,
                        aggregate_id,
                        version: last.version,
                        hash: last.hash.clone(),
                        created_at: Utc::now(),
                    })
                    .await?;
            }
        }
        if !broken.is_empty() {
            return Err(SummaError::IntegrityViolation(format!(
                "hash chain verification failed for {} aggregate(s)",
                broken.len()
            )));
        }
        Ok(())
    }
}

/// Spec §4.8 step 6: removes leases whose `lease_until` is more than an hour
/// stale, cleaning up after holders that crashed without releasing.
pub struct LeaseCleanupJob {
    pub adapter: Arc<dyn LedgerAdapter>,
}

#[async_trait::async_trait]
impl Job for LeaseCleanupJob {
    fn name(&self) -> &str {
        "lease_cleanup"
    }

    async fn run(&self, ledger_id: Uuid) -> Result<(), SummaError> {
        let _ = ledger_id;
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let removed = self.adapter.cleanup_stale_leases(cutoff).await?;
        if removed > 0 {
            tracing::debug!(removed, "purged stale worker leases");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopJob;

    #[async_trait::async_trait]
    impl Job for NoopJob {
        fn name(&self) -> &str {
            "noop"
        }
        async fn run(&self, _ledger_id: Uuid) -> Result<(), SummaError> {
            Ok(())
        }
    }

    #[test]
    fn registered_worker_parses_interval() {
        let worker = RegisteredWorker::new(Arc::new(NoopJob), "30s").unwrap();
        assert_eq!(worker.interval, Duration::from_secs(30));
    }

    #[test]
    fn registered_worker_rejects_bad_interval() {
        assert!(RegisteredWorker::new(Arc::new(NoopJob), "soon").is_err());
    }

    #[test]
    fn lease_required_defaults_true_and_without_lease_flips_it() {
        let worker = RegisteredWorker::new(Arc::new(NoopJob), "30s").unwrap();
        assert!(worker.lease_required);
        let worker = RegisteredWorker::new(Arc::new(NoopJob), "30s").unwrap().without_lease();
        assert!(!worker.lease_required);
    }

    #[test]
    fn with_duration_skips_the_string_grammar() {
        let worker = RegisteredWorker::with_duration(Arc::new(NoopJob), Duration::from_millis(250));
        assert_eq!(worker.interval, Duration::from_millis(250));
        assert!(worker.lease_required);
    }
}
