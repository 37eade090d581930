//! Substrate-family (Polkadot/Kusama) normalizer.
//!
//! Expected raw shape (Subscan-style extrinsic/event record):
//! `{ "hash", "block_num", "module", "call", "from", "to", "amount" (planck,
//!   string), "fee" (planck, string), "success", "event_count" }`. Amount/fee
//! are decimal strings since planck values can exceed i64 range for some
//! parachains.

use chrono::Utc;

use crate::fundflow::{analyze_fund_flow, classify, AddressContext, ChainConfig, RawFundFlowInput};
use crate::model::{BlockchainMetadata, CanonicalTransaction, SourceType, TransactionStatus};
use crate::normalize::{NormalizationError, Normalizer};

pub const PLANCK_PER_DOT: u32 = 10;

pub struct SubstrateNormalizer {
    pub user_address: String,
    pub chain: String,
}

impl Normalizer for SubstrateNormalizer {
    fn chain_or_exchange(&self) -> &'static str {
        "polkadot"
    }

    fn normalize(&self, raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
        normalize_substrate_tx(raw, &self.user_address, &self.chain)
    }
}

fn normalize_substrate_tx(
    raw: &serde_json::Value,
    user_address: &str,
    chain: &str,
) -> Result<CanonicalTransaction, NormalizationError> {
    let hash = super::str_field(raw, "hash")?.to_string();
    let module = super::str_field(raw, "module")?.to_string();
    let call = super::str_field(raw, "call")?.to_string();
    let from = super::str_field(raw, "from")?.to_string();
    let to = raw.get("to").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let amount_planck = super::i128_str(raw, "amount").unwrap_or(0);
    let fee_planck = raw
        .get("fee")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i128>().ok())
        .unwrap_or(0);
    let success = raw.get("success").and_then(|v| v.as_bool()).unwrap_or(true);
    let event_count = raw.get("event_count").and_then(|v| v.as_u64()).unwrap_or(1);
    let block_num = raw.get("block_num").and_then(|v| v.as_u64());

    if from != user_address && to != user_address {
        return Err(NormalizationError::Skip {
            reason: "transaction does not involve the tracked address".to_string(),
        });
    }

    let fund_flow = analyze_fund_flow(
        &RawFundFlowInput {
            module,
            call,
            from: from.clone(),
            to: to.clone(),
            amount_planck,
            fee_planck,
            event_count,
            decimals: PLANCK_PER_DOT,
            asset: "DOT".to_string(),
        },
        &AddressContext {
            user_address: user_address.to_string(),
        },
        &ChainConfig::default(),
    );

    let (operation, notes) = classify(&fund_flow);

    Ok(CanonicalTransaction {
        id: String::new(),
        external_id: hash.clone(),
        source_name: chain.to_string(),
        source_type: SourceType::Blockchain,
        datetime: Utc::now(),
        status: if success {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        },
        operation,
        movements: fund_flow.movements,
        fees: fund_flow.fees,
        blockchain_metadata: Some(BlockchainMetadata {
            chain: chain.to_string(),
            block_height: block_num,
            tx_hash: hash,
            confirmed: success,
        }),
        notes,
        excluded_from_accounting: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, OperationCategory};

    #[test]
    fn outgoing_transfer_matches_spec_scenario() {
        // spec.md scenario 2
        let tx = serde_json::json!({
            "hash": "0xabc",
            "module": "balances",
            "call": "transfer",
            "from": "13user",
            "to": "14someone",
            "amount": "10000000000",
            "fee": "156250000",
            "success": true,
            "event_count": 2,
            "block_num": 12345
        });
        let canonical = normalize_substrate_tx(&tx, "13user", "polkadot").unwrap();
        assert_eq!(canonical.operation.category, OperationCategory::Transfer);
        assert_eq!(canonical.operation.kind, "withdrawal");
        let outflow = &canonical.movements.outflows[0];
        assert_eq!(outflow.direction, Direction::Out);
        assert_eq!(outflow.amount, crate::money::from_smallest_unit(10_000_000_000, PLANCK_PER_DOT));
        let fee = canonical.fees.network.as_ref().unwrap();
        assert_eq!(fee.amount, crate::money::from_smallest_unit(156_250_000, PLANCK_PER_DOT));
    }

    #[test]
    fn staking_reward_has_no_fee_entry() {
        // spec.md scenario 3
        let tx = serde_json::json!({
            "hash": "0xdef",
            "module": "staking",
            "call": "bond",
            "from": "14someone",
            "to": "13user",
            "amount": "5000000000",
            "fee": "0",
            "success": true,
            "event_count": 1
        });
        let canonical = normalize_substrate_tx(&tx, "13user", "polkadot").unwrap();
        assert_eq!(canonical.operation.category, OperationCategory::Staking);
        assert_eq!(canonical.operation.kind, "reward");
        assert!(canonical.fees.network.is_none());
    }

    #[test]
    fn utility_batch_emits_warning_note() {
        // spec.md scenario 4
        let tx = serde_json::json!({
            "hash": "0x111",
            "module": "utility",
            "call": "batch_all",
            "from": "13user",
            "to": "13user",
            "amount": "0",
            "fee": "100000000",
            "success": true,
            "event_count": 6
        });
        let canonical = normalize_substrate_tx(&tx, "13user", "polkadot").unwrap();
        assert_eq!(canonical.operation.category, OperationCategory::Transfer);
        assert_eq!(canonical.operation.kind, "transfer");
        assert_eq!(canonical.notes[0].kind, "batch_operation");
        assert_eq!(canonical.notes[0].severity, crate::model::NoteSeverity::Warning);
    }
}
