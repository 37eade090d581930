//! EVM-family normalizer (Ethereum and forks), grounded on Alchemy/Etherscan
//! `asset transfer`-style raw shapes:
//! `{ "hash", "from", "to", "value" (wei, string), "asset" ("ETH"/ERC-20
//!   symbol), "category" ("external"|"internal"|"erc20"), "blockNum" (hex or
//!   decimal string), "gasUsed", "gasPrice" (wei, string) }`.

use chrono::Utc;

use crate::model::{
    AssetMovement, BlockchainMetadata, CanonicalTransaction, Direction, Fees, Movements, Operation,
    OperationCategory, PrimaryRef, SourceType, TransactionStatus,
};
use crate::money::from_smallest_unit;
use crate::normalize::{NormalizationError, Normalizer};

pub const WEI_PER_ETH: u32 = 18;

pub struct EthereumNormalizer {
    pub user_address: String,
}

impl Normalizer for EthereumNormalizer {
    fn chain_or_exchange(&self) -> &'static str {
        "ethereum"
    }

    fn normalize(&self, raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
        normalize_evm_tx(raw, &self.user_address)
    }
}

fn parse_block_num(raw: &serde_json::Value) -> Option<u64> {
    let v = raw.get("blockNum")?;
    if let Some(s) = v.as_str() {
        if let Some(hex) = s.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16).ok();
        }
        return s.parse().ok();
    }
    v.as_u64()
}

fn normalize_evm_tx(
    raw: &serde_json::Value,
    user_address: &str,
) -> Result<CanonicalTransaction, NormalizationError> {
    let hash = super::str_field(raw, "hash")?.to_string();
    let from = super::str_field(raw, "from")?.to_lowercase();
    let to = raw
        .get("to")
        .and_then(|v| v.as_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let value_wei = super::i128_str(raw, "value").unwrap_or(0);
    let asset = raw.get("asset").and_then(|v| v.as_str()).unwrap_or("ETH").to_string();
    let category = raw.get("category").and_then(|v| v.as_str()).unwrap_or("external");

    let user = user_address.to_lowercase();
    if from != user && to != user {
        return Err(NormalizationError::Skip {
            reason: "transaction does not involve the tracked address".to_string(),
        });
    }

    if category == "internal" && value_wei == 0 {
        return Err(NormalizationError::Skip {
            reason: "zero-value internal call, not an economic movement".to_string(),
        });
    }

    let mut movements = Movements::default();
    if value_wei > 0 {
        let amount = from_smallest_unit(value_wei, WEI_PER_ETH);
        if to == user && from != user {
            movements.inflows.push(AssetMovement::new(asset.clone(), amount, Direction::In));
            movements.primary = Some(PrimaryRef::Inflow(0));
        } else if from == user && to != user {
            movements.outflows.push(AssetMovement::new(asset.clone(), amount, Direction::Out));
            movements.primary = Some(PrimaryRef::Outflow(0));
        }
    }

    let mut fees = Fees::default();
    let self_initiated = from == user;
    if self_initiated && category == "external" {
        let gas_used = raw.get("gasUsed").and_then(|v| v.as_str()).and_then(|s| s.parse::<i128>().ok());
        let gas_price = raw.get("gasPrice").and_then(|v| v.as_str()).and_then(|s| s.parse::<i128>().ok());
        if let (Some(gas_used), Some(gas_price)) = (gas_used, gas_price) {
            let fee_wei = gas_used * gas_price;
            if fee_wei > 0 {
                fees.network = Some(AssetMovement::new(
                    "ETH",
                    from_smallest_unit(fee_wei, WEI_PER_ETH),
                    Direction::Out,
                ));
            }
        }
    }

    let operation = if !movements.outflows.is_empty() {
        Operation::new(OperationCategory::Transfer, "withdrawal")
    } else if !movements.inflows.is_empty() {
        Operation::new(OperationCategory::Transfer, "deposit")
    } else {
        Operation::new(OperationCategory::Fee, "fee")
    };

    Ok(CanonicalTransaction {
        id: String::new(),
        external_id: hash.clone(),
        source_name: "ethereum".to_string(),
        source_type: SourceType::Blockchain,
        datetime: Utc::now(),
        status: TransactionStatus::Success,
        operation,
        movements,
        fees,
        blockchain_metadata: Some(BlockchainMetadata {
            chain: "ethereum".to_string(),
            block_height: parse_block_num(raw),
            tx_hash: hash,
            confirmed: true,
        }),
        notes: Vec::new(),
        excluded_from_accounting: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_eth_transfer_is_deposit() {
        let raw = serde_json::json!({
            "hash": "0xabc",
            "from": "0xSender",
            "to": "0xUser",
            "value": "1000000000000000000",
            "asset": "ETH",
            "category": "external",
            "blockNum": "0x112a880"
        });
        let canonical = normalize_evm_tx(&raw, "0xUser").unwrap();
        assert_eq!(canonical.operation.kind, "deposit");
        assert_eq!(
            canonical.movements.inflows[0].amount,
            from_smallest_unit(1_000_000_000_000_000_000, WEI_PER_ETH)
        );
        assert_eq!(canonical.blockchain_metadata.unwrap().block_height, Some(0x112a880));
    }

    #[test]
    fn zero_value_internal_call_is_skipped() {
        let raw = serde_json::json!({
            "hash": "0xdef",
            "from": "0xUser",
            "to": "0xContract",
            "value": "0",
            "category": "internal"
        });
        let result = normalize_evm_tx(&raw, "0xUser");
        assert!(matches!(result, Err(NormalizationError::Skip { .. })));
    }
}
