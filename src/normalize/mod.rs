//! Normalizers (C9): one pure mapper per `(provider, chain_or_exchange)`,
//! converting a provider's raw JSON into a [`CanonicalTransaction`].
//!
//! Grounded on the teacher's per-source modules under `src/` (each owning its
//! own parsing of a single upstream shape) generalized into a small trait plus
//! one module per chain family, rather than one function per provider — chains
//! in the same family (all SS58, all EVM) share almost all normalization logic
//! and differ only in constants (decimals, address format).

pub mod bitcoin;
pub mod coinbase;
pub mod ethereum;
pub mod substrate;

use crate::model::CanonicalTransaction;

/// Unsupported record types are [`NormalizationError::Skip`] (logged and
/// dropped by the manager); malformed payloads are [`NormalizationError::Invalid`]
/// (surfaced to the caller). Spec §4.8: normalizers must never silently drop.
#[derive(Debug, Clone)]
pub enum NormalizationError {
    Skip { reason: String },
    Invalid { reason: String },
}

impl std::fmt::Display for NormalizationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizationError::Skip { reason } => write!(f, "skipped: {reason}"),
            NormalizationError::Invalid { reason } => write!(f, "invalid: {reason}"),
        }
    }
}

pub trait Normalizer {
    /// The chain or exchange identifier this normalizer handles, e.g. "bitcoin".
    fn chain_or_exchange(&self) -> &'static str;

    fn normalize(&self, raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError>;

    /// True when `address` is an extended public key (xpub/ypub/zpub, Cardano
    /// stake key, …) rather than a single-address identifier (spec §4.11 step 2).
    fn is_extended_public_key(&self, _address: &str) -> bool {
        false
    }
}

const SUBSTRATE_CHAINS: &[&str] = &["polkadot", "kusama"];

/// Resolves the normalizer for a `(chain_or_exchange, source_address)` pair
/// (CLI `process`, spec §6): each raw record carries its own source address,
/// so a fresh normalizer is built per record rather than cached per session.
pub fn build_normalizer(chain_or_exchange: &str, source_address: Option<&str>) -> Option<Box<dyn Normalizer>> {
    match chain_or_exchange {
        "bitcoin" => Some(Box::new(bitcoin::BitcoinNormalizer {
            user_address: source_address.unwrap_or_default().to_string(),
        })),
        "ethereum" => Some(Box::new(ethereum::EthereumNormalizer {
            user_address: source_address.unwrap_or_default().to_string(),
        })),
        chain if SUBSTRATE_CHAINS.contains(&chain) => Some(Box::new(substrate::SubstrateNormalizer {
            user_address: source_address.unwrap_or_default().to_string(),
            chain: chain.to_string(),
        })),
        "coinbase" => Some(Box::new(coinbase::CoinbaseNormalizer)),
        _ => None,
    }
}

fn require_field<'a>(
    raw: &'a serde_json::Value,
    field: &str,
) -> Result<&'a serde_json::Value, NormalizationError> {
    raw.get(field).ok_or_else(|| NormalizationError::Invalid {
        reason: format!("missing required field `{field}`"),
    })
}

fn require_str<'a>(raw: &'a serde_json::Value, field: &str) -> Result<&'a str, NormalizationError> {
    require_field(raw, field)?
        .as_str()
        .ok_or_else(|| NormalizationError::Invalid {
            reason: format!("field `{field}` is not a string"),
        })
}

fn require_i128_str(raw: &serde_json::Value, field: &str) -> Result<i128, NormalizationError> {
    let v = require_field(raw, field)?;
    let as_str = v.as_str().map(|s| s.to_string()).or_else(|| v.as_i64().map(|n| n.to_string()));
    as_str
        .and_then(|s| s.parse::<i128>().ok())
        .ok_or_else(|| NormalizationError::Invalid {
            reason: format!("field `{field}` is not a parseable integer amount"),
        })
}

pub(crate) use require_field as field;
pub(crate) use require_i128_str as i128_str;
pub(crate) use require_str as str_field;
