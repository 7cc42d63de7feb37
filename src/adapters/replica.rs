// src/adapters/replica.rs
//
// New module — spec §4.1 "read-replica routing with primary-pinning inside
// open transactions". Grounded in `backend`'s pool-handle pattern (a single
// struct owning both a read and a write `PgPool`), generalized to arbitrary
// N replicas with round-robin selection and a pin flag for in-transaction
// reads.

use std::sync::atomic::{AtomicUsize, Ordering};

use sqlx::PgPool;

/// Routes read-only queries to a replica pool, except while a caller holds
/// an open write transaction — in that case every read for that operation
/// must also see its own uncommitted writes, so it's pinned to `primary`.
pub struct ReadReplicaRouter {
    primary: PgPool,
    replicas: Vec<PgPool>,
    next: AtomicUsize,
}

impl ReadReplicaRouter {
    pub fn new(primary: PgPool, replicas: Vec<PgPool>) -> Self {
        Self {
            primary,
            replicas,
            next: AtomicUsize::new(0),
        }
    }

    pub fn primary(&self) -> &PgPool {
        &self.primary
    }

    /// Round-robins across configured replicas; falls back to `primary` when
    /// none are configured (spec §4.1: replica routing is optional).
    pub fn read_pool(&self) -> &PgPool {
        if self.replicas.is_empty() {
            return &self.primary;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
        &self.replicas[idx]
    }

    /// Reads that must observe in-flight writes of the caller's own
    /// transaction are always pinned to `primary`, never a replica.
    pub fn pinned_pool(&self) -> &PgPool {
        &self.primary
    }
}
