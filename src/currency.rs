// src/currency.rs
//
// Grounded in `ledger/src/asset.rs`'s `Asset` — same role (code + minor-unit
// scale), renamed to the domain vocabulary the spec actually uses (`currency`,
// not a generic tradeable "asset"). `unit`/`decimals` become `minor_unit`,
// the number of minor units per major unit, matching spec §3's "currency
// precision table".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Currency {
    /// ISO-4217-shaped code, e.g. "USD", "JPY", or a synthetic code for a
    /// crypto-style unit the deployment wants to ledger.
    pub code: String,
    /// Minor units per major unit (100 for USD, 1 for JPY, 1_000_000 for a
    /// six-decimal stablecoin).
    pub minor_unit: i64,
    pub decimals: u8,
}

impl Currency {
    pub fn new(code: impl Into<String>, decimals: u8) -> Self {
        let minor_unit = 10_i64.pow(decimals as u32);
        Self {
            code: code.into(),
            minor_unit,
            decimals,
        }
    }

    pub fn to_minor_units(&self, display_amount: f64) -> i64 {
        (display_amount * self.minor_unit as f64).round() as i64
    }

    pub fn to_display(&self, minor_units: i64) -> f64 {
        minor_units as f64 / self.minor_unit as f64
    }
}

/// A small built-in table of common currency precisions; deployments may
/// register additional currencies through `LedgerAdapter::create_currency`.
/// This mirrors `Asset::fiat`/`Asset::crypto` convenience constructors from
/// the teacher but as data rather than constructor methods, since the engine
/// needs to validate a currency code is recognized (spec §4.5 step 1) without
/// constructing a value first.
pub fn well_known(code: &str) -> Option<Currency> {
    let decimals = match code {
        "USD" | "EUR" | "GBP" | "CAD" | "AUD" | "NZD" | "CHF" | "CNY" | "SGD" | "HKD" => 2,
        "JPY" | "KRW" | "VND" | "CLP" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" => 3,
        _ => return None,
    };
    Some(Currency::new(code, decimals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_round_trip() {
        let usd = Currency::new("USD", 2);
        assert_eq!(usd.to_minor_units(100.50), 10_050);
        assert_eq!(usd.to_display(10_050), 100.50);
    }

    #[test]
    fn zero_decimal_currency_is_identity() {
        let jpy = well_known("JPY").unwrap();
        assert_eq!(jpy.to_minor_units(500.0), 500);
        assert_eq!(jpy.minor_unit, 1);
    }

    #[test]
    fn unknown_code_is_not_well_known() {
        assert!(well_known("XXX").is_none());
    }
}
