// src/adapters/dialect.rs
//
// New module — spec §4.1 notes the schema is configurable per deployment
// (`EngineConfig::schema`). Grounded in the table-qualification helper
// pattern used throughout `ledger/src/adapters/postgres.rs` (every query
// there is hand-written against a fixed `ledger.` prefix); `TableResolver`
// generalizes that to an arbitrary configured schema instead of a
// hardcoded one, and `Dialect` is the seam a future non-Postgres backend
// would implement (spec §14 Non-goals: only Postgres ships today).

pub trait Dialect: Send + Sync {
    /// `FOR UPDATE`/`FOR UPDATE NOWAIT`/`FOR UPDATE SKIP LOCKED` row lock
    /// clause, keyed by `config::LockMode`.
    fn lock_clause(&self, mode: crate::config::LockMode) -> &'static str;
    fn advisory_lock_fn(&self) -> &'static str;
}

pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn lock_clause(&self, mode: crate::config::LockMode) -> &'static str {
        match mode {
            crate::config::LockMode::Wait => "FOR UPDATE",
            crate::config::LockMode::NoWait => "FOR UPDATE NOWAIT",
            crate::config::LockMode::Optimistic => "",
        }
    }

    fn advisory_lock_fn(&self) -> &'static str {
        "pg_advisory_xact_lock"
    }
}

/// Schema-qualifies table names once at adapter construction instead of
/// interpolating `config.schema` into every query string by hand.
#[derive(Debug, Clone)]
pub struct TableResolver {
    schema: String,
}

impl TableResolver {
    pub fn new(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
        }
    }

    pub fn table(&self, name: &str) -> String {
        if self.schema == "public" {
            name.to_string()
        } else {
            format!("{}.{}", self.schema, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifies_non_public_schema() {
        let resolver = TableResolver::new("summa");
        assert_eq!(resolver.table("accounts"), "summa.accounts");
    }

    #[test]
    fn skips_qualification_for_public() {
        let resolver = TableResolver::new("public");
        assert_eq!(resolver.table("accounts"), "accounts");
    }
}
