// src/fx.rs
//
// New module — spec §4.5 `transfer`/`multiTransfer` allow a cross-currency
// leg but leave rate sourcing out of scope (§14 Non-goals: "FX rate
// provisioning"). Grounded in `ledger/src/adapters/memory.rs`'s pattern of a
// trait with a trivial in-memory/test implementation alongside the real one,
// applied here to keep the engine runnable with no external rate feed wired
// up at all.

use async_trait::async_trait;

use crate::error::SummaError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FxQuote {
    pub rate: f64,
    pub converted_amount: i64,
}

#[async_trait]
pub trait FxResolver: Send + Sync {
    async fn convert(&self, from: &str, to: &str, amount: i64) -> Result<FxQuote, SummaError>;
}

/// The default resolver: any cross-currency request is rejected. A
/// deployment that needs FX plugs in its own `FxResolver` (rate feed,
/// central-bank table, whatever the embedder already has).
pub struct NullFxResolver;

#[async_trait]
impl FxResolver for NullFxResolver {
    async fn convert(&self, from: &str, to: &str, _amount: i64) -> Result<FxQuote, SummaError> {
        Err(SummaError::InvalidArgument(format!(
            "no FxResolver configured: cannot convert {from} to {to}"
        )))
    }
}

/// A fixed-table resolver for tests and deployments with a small, rarely
/// changing set of currency pairs.
pub struct FixedRateResolver {
    rates: std::collections::HashMap<(String, String), f64>,
}

impl FixedRateResolver {
    pub fn new() -> Self {
        Self {
            rates: std::collections::HashMap::new(),
        }
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: f64) -> Self {
        self.rates.insert((from.to_string(), to.to_string()), rate);
        self
    }
}

impl Default for FixedRateResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FxResolver for FixedRateResolver {
    async fn convert(&self, from: &str, to: &str, amount: i64) -> Result<FxQuote, SummaError> {
        if from == to {
            return Ok(FxQuote {
                rate: 1.0,
                converted_amount: amount,
            });
        }
        let rate = self
            .rates
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .ok_or_else(|| SummaError::InvalidArgument(format!("no rate configured for {from}->{to}")))?;
        Ok(FxQuote {
            rate,
            converted_amount: (amount as f64 * rate).round() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_resolver_rejects_cross_currency() {
        let resolver = NullFxResolver;
        assert!(resolver.convert("USD", "EUR", 100).await.is_err());
    }

    #[tokio::test]
    async fn fixed_rate_resolver_converts() {
        let resolver = FixedRateResolver::new().with_rate("USD", "EUR", 0.92);
        let quote = resolver.convert("USD", "EUR", 10_000).await.unwrap();
        assert_eq!(quote.converted_amount, 9_200);
    }

    #[tokio::test]
    async fn same_currency_is_identity() {
        let resolver = FixedRateResolver::new();
        let quote = resolver.convert("USD", "USD", 500).await.unwrap();
        assert_eq!(quote.converted_amount, 500);
        assert_eq!(quote.rate, 1.0);
    }
}
