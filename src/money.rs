//! Decimal & money kernel (C1).
//!
//! Every amount in the accounting path is a [`rust_decimal::Decimal`] — never a
//! float. `Currency` tags a normalized ticker and knows whether it's fiat, which
//! is what the cost-basis matcher (`lots`) uses to skip fiat legs entirely.

use std::collections::HashSet;
use std::fmt;

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::IngestError;

/// Fixed fiat set. Anything not in here is treated as a crypto asset.
static FIAT_TICKERS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "USD", "EUR", "CAD", "GBP", "JPY", "CHF", "AUD", "NZD", "SEK", "NOK", "DKK",
    ]
    .into_iter()
    .collect()
});

/// A normalized ticker string. Two currencies are equal iff their normalized
/// tickers are equal (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
pub struct Currency {
    ticker: String,
}

impl Currency {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self {
            ticker: raw.as_ref().trim().to_ascii_uppercase(),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn is_fiat(&self) -> bool {
        FIAT_TICKERS.contains(self.ticker.as_str())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ticker)
    }
}

impl PartialEq for Currency {
    fn eq(&self, other: &Self) -> bool {
        self.ticker == other.ticker
    }
}

impl std::hash::Hash for Currency {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ticker.hash(state);
    }
}

/// An immutable amount tagged with a currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn is_fiat(&self) -> bool {
        self.currency.is_fiat()
    }

    /// Checked addition — same currency only. Mixing currencies is a caller bug,
    /// not a recoverable accounting case, so this panics like `Decimal`'s own ops.
    pub fn checked_add(&self, other: &Money) -> Option<Money> {
        if self.currency != other.currency {
            return None;
        }
        Some(Money::new(self.amount + other.amount, self.currency.clone()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_canonical(&self.amount), self.currency)
    }
}

/// Canonical fixed-notation formatting for persisted decimal strings. Scientific
/// notation must never appear in anything written to the database (spec §3/§8).
pub fn format_canonical(d: &Decimal) -> String {
    d.normalize().to_string()
}

/// Parses a canonical decimal string, erroring (never falling back to float) on
/// malformed input. This is the single point every persistence read path funnels
/// through, per SPEC_FULL §C.4.
pub fn parse_canonical(s: &str) -> Result<Decimal, IngestError> {
    s.parse::<Decimal>()
        .map_err(|e| IngestError::PrecisionLoss {
            operation: "parse_canonical".to_string(),
            detail: format!("{e} (input: {s})"),
        })
}

/// Converts a smallest-unit integer amount (satoshi, wei, planck, ...) into a
/// decimal main-unit amount using the chain's known decimal places. This is the
/// one true unit-conversion function normalizers call into (spec §4.8).
pub fn from_smallest_unit(raw: i128, decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(raw, decimals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn currency_equality_is_ticker_normalized() {
        assert_eq!(Currency::new("usd"), Currency::new(" USD "));
        assert_ne!(Currency::new("USD"), Currency::new("USDC"));
    }

    #[test]
    fn fiat_detection_matches_fixed_set() {
        assert!(Currency::new("usd").is_fiat());
        assert!(Currency::new("EUR").is_fiat());
        assert!(!Currency::new("BTC").is_fiat());
        assert!(!Currency::new("DOT").is_fiat());
    }

    #[test]
    fn decimal_round_trip_never_uses_scientific_notation() {
        let d = Decimal::from_str("0.015625").unwrap();
        let formatted = format_canonical(&d);
        assert!(!formatted.to_lowercase().contains('e'));
        let parsed = parse_canonical(&formatted).unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn satoshi_to_btc_conversion() {
        // 1 BTC in satoshi
        let btc = from_smallest_unit(100_000_000, 8);
        assert_eq!(btc, Decimal::from_str("1").unwrap());
    }

    #[test]
    fn planck_to_dot_conversion() {
        // spec.md scenario 2: 10000000000 planck == 1 DOT at 10 decimals
        let dot = from_smallest_unit(10_000_000_000, 10);
        assert_eq!(dot, Decimal::from_str("1").unwrap());

        let fee = from_smallest_unit(156_250_000, 10);
        assert_eq!(fee, Decimal::from_str("0.015625").unwrap());
    }

    #[test]
    fn parse_canonical_rejects_garbage() {
        assert!(parse_canonical("not-a-number").is_err());
    }
}
