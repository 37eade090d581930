//! Declarative provider registry (C5).
//!
//! Grounded on the teacher's `apis/manager.rs` (per-API enablement driven by a
//! config lookup, `unwrap_or_else` disabled-client fallback) but reshaped into a
//! static declarative table, since the spec treats capability data as pure
//! metadata rather than live client state — the manager (C8) is what turns a
//! registry entry into an actual request.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::cursor::CursorTypeTag;

/// A handful of obviously-placeholder API key values vendors ship in sample
/// `.env` files; never accepted as a real credential.
const PLACEHOLDER_API_KEYS: &[&str] = &[
    "YourApiKeyToken",
    "YOUR_API_KEY",
    "your-api-key-here",
    "changeme",
    "replace_me",
    "",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Normal,
    Internal,
    Token,
    BeaconWithdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetAddressTransactions,
    GetAccountTransactions,
    GetXpubActivity,
}

#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub chain: &'static str,
    pub provider_name: &'static str,
    pub supported_operations: &'static [Operation],
    /// `None` means "stream types are not distinguished for this provider" —
    /// capability check then only admits `StreamType::Normal` (spec §4.4).
    pub supported_stream_types: Option<&'static [StreamType]>,
    pub supported_cursor_types: &'static [CursorTypeTag],
    pub default_requests_per_second: f64,
    pub default_burst_limit: f64,
    pub api_key_env_var: Option<&'static str>,
}

impl ProviderEntry {
    pub fn supports(&self, operation: Operation, stream_type: StreamType) -> bool {
        if !self.supported_operations.contains(&operation) {
            return false;
        }
        match self.supported_stream_types {
            Some(types) => types.contains(&stream_type),
            None => matches!(stream_type, StreamType::Normal),
        }
    }

    pub fn requires_api_key(&self) -> bool {
        self.api_key_env_var.is_some()
    }
}

pub static REGISTRY: Lazy<Vec<ProviderEntry>> = Lazy::new(|| {
    vec![
        ProviderEntry {
            chain: "bitcoin",
            provider_name: "blockstream",
            supported_operations: &[Operation::GetAddressTransactions, Operation::GetXpubActivity],
            supported_stream_types: None,
            supported_cursor_types: &[CursorTypeTag::BlockNumber, CursorTypeTag::PageToken],
            default_requests_per_second: 5.0,
            default_burst_limit: 1.0,
            api_key_env_var: None,
        },
        ProviderEntry {
            chain: "bitcoin",
            provider_name: "mempool_space",
            supported_operations: &[Operation::GetAddressTransactions, Operation::GetXpubActivity],
            supported_stream_types: None,
            supported_cursor_types: &[CursorTypeTag::BlockNumber],
            default_requests_per_second: 4.0,
            default_burst_limit: 1.0,
            api_key_env_var: None,
        },
        ProviderEntry {
            chain: "ethereum",
            provider_name: "alchemy",
            supported_operations: &[Operation::GetAddressTransactions],
            supported_stream_types: Some(&[StreamType::Normal, StreamType::Internal, StreamType::Token]),
            supported_cursor_types: &[CursorTypeTag::PageToken, CursorTypeTag::BlockNumber],
            default_requests_per_second: 10.0,
            default_burst_limit: 5.0,
            api_key_env_var: Some("ALCHEMY_API_KEY"),
        },
        ProviderEntry {
            chain: "ethereum",
            provider_name: "etherscan",
            supported_operations: &[Operation::GetAddressTransactions],
            supported_stream_types: Some(&[StreamType::Normal, StreamType::Internal, StreamType::Token]),
            supported_cursor_types: &[CursorTypeTag::BlockNumber],
            default_requests_per_second: 5.0,
            default_burst_limit: 1.0,
            api_key_env_var: Some("ETHERSCAN_API_KEY"),
        },
        ProviderEntry {
            chain: "polkadot",
            provider_name: "subscan",
            supported_operations: &[Operation::GetAddressTransactions],
            supported_stream_types: Some(&[StreamType::Normal]),
            supported_cursor_types: &[CursorTypeTag::PageToken, CursorTypeTag::BlockNumber],
            default_requests_per_second: 3.0,
            default_burst_limit: 1.0,
            api_key_env_var: Some("SUBSCAN_API_KEY"),
        },
        ProviderEntry {
            chain: "near",
            provider_name: "nearblocks",
            supported_operations: &[Operation::GetAddressTransactions],
            supported_stream_types: Some(&[StreamType::Normal, StreamType::Token]),
            supported_cursor_types: &[CursorTypeTag::Timestamp, CursorTypeTag::PageToken],
            default_requests_per_second: 5.0,
            default_burst_limit: 1.0,
            api_key_env_var: Some("NEARBLOCKS_API_KEY"),
        },
        ProviderEntry {
            chain: "coinbase",
            provider_name: "coinbase_advanced_trade",
            supported_operations: &[Operation::GetAccountTransactions],
            supported_stream_types: None,
            supported_cursor_types: &[CursorTypeTag::PageToken],
            default_requests_per_second: 8.0,
            default_burst_limit: 2.0,
            api_key_env_var: Some("COINBASE_API_KEY"),
        },
    ]
});

pub fn providers_for_chain(chain: &str) -> Vec<&'static ProviderEntry> {
    REGISTRY.iter().filter(|p| p.chain == chain).collect()
}

pub fn find_provider(chain: &str, provider_name: &str) -> Option<&'static ProviderEntry> {
    REGISTRY
        .iter()
        .find(|p| p.chain == chain && p.provider_name == provider_name)
}

/// One internally-inconsistent registry entry, surfaced at boot.
#[derive(Debug, Clone)]
pub struct RegistryProblem {
    pub chain: &'static str,
    pub provider_name: &'static str,
    pub reason: String,
}

/// Checks every [`REGISTRY`] entry for internal consistency: an entry that
/// advertises stream types or operations it has no rate limit or credential
/// config to back is a configuration error, not a runtime one. Mirrors the
/// teacher's pattern of falling back to a disabled client for a misconfigured
/// API rather than crashing the process — the caller logs each problem and
/// the offending provider is simply never a failover candidate (the manager
/// only knows about providers a real `ProviderClient` registers for).
pub fn validate_registry() -> Vec<RegistryProblem> {
    let mut problems = Vec::new();
    for entry in REGISTRY.iter() {
        if entry.supported_operations.is_empty() {
            problems.push(RegistryProblem {
                chain: entry.chain,
                provider_name: entry.provider_name,
                reason: "no supported_operations declared".to_string(),
            });
        }
        if let Some(types) = entry.supported_stream_types {
            if types.is_empty() {
                problems.push(RegistryProblem {
                    chain: entry.chain,
                    provider_name: entry.provider_name,
                    reason: "supported_stream_types is Some(&[]) instead of None".to_string(),
                });
            }
        }
        if entry.default_requests_per_second <= 0.0 {
            problems.push(RegistryProblem {
                chain: entry.chain,
                provider_name: entry.provider_name,
                reason: "default_requests_per_second must be > 0".to_string(),
            });
        }
        if entry.default_burst_limit <= 0.0 {
            problems.push(RegistryProblem {
                chain: entry.chain,
                provider_name: entry.provider_name,
                reason: "default_burst_limit must be > 0".to_string(),
            });
        }
        if let Some(var) = entry.api_key_env_var {
            if var.trim().is_empty() {
                problems.push(RegistryProblem {
                    chain: entry.chain,
                    provider_name: entry.provider_name,
                    reason: "api_key_env_var is Some(\"\") instead of None".to_string(),
                });
            }
        }
        if entry.supported_cursor_types.is_empty() {
            problems.push(RegistryProblem {
                chain: entry.chain,
                provider_name: entry.provider_name,
                reason: "no supported_cursor_types declared".to_string(),
            });
        }
    }
    problems
}

/// Rejects obviously-placeholder credential values (spec §4.4 / §6).
pub fn is_placeholder_api_key(value: &str) -> bool {
    static PLACEHOLDERS: Lazy<HashSet<&'static str>> =
        Lazy::new(|| PLACEHOLDER_API_KEYS.iter().copied().collect());
    PLACEHOLDERS.contains(value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_check_requires_both_operation_and_stream_type() {
        let alchemy = find_provider("ethereum", "alchemy").unwrap();
        assert!(alchemy.supports(Operation::GetAddressTransactions, StreamType::Token));
        assert!(!alchemy.supports(Operation::GetXpubActivity, StreamType::Normal));
    }

    #[test]
    fn no_stream_type_list_only_admits_normal() {
        let blockstream = find_provider("bitcoin", "blockstream").unwrap();
        assert!(blockstream.supports(Operation::GetAddressTransactions, StreamType::Normal));
        assert!(!blockstream.supports(Operation::GetAddressTransactions, StreamType::Token));
    }

    #[test]
    fn placeholder_keys_are_rejected() {
        assert!(is_placeholder_api_key("YourApiKeyToken"));
        assert!(is_placeholder_api_key(""));
        assert!(is_placeholder_api_key("  changeme  "));
        assert!(!is_placeholder_api_key("sk_live_abcdef1234567890"));
    }

    #[test]
    fn providers_for_chain_filters_correctly() {
        let btc = providers_for_chain("bitcoin");
        assert_eq!(btc.len(), 2);
        assert!(btc.iter().all(|p| p.chain == "bitcoin"));
    }

    #[test]
    fn shipped_registry_has_no_problems() {
        assert!(validate_registry().is_empty());
    }

    #[test]
    fn rate_limit_fields_are_positive_for_every_entry() {
        assert!(REGISTRY
            .iter()
            .all(|e| e.default_requests_per_second > 0.0 && e.default_burst_limit > 0.0));
    }
}
