//! Coinbase Advanced Trade normalizer: converts a `fill` record into a trade
//! (one inflow, one outflow) or, for `deposit`/`withdrawal` ledger entries,
//! a single-sided transfer. Grounded loosely on the teacher's JSON-ingestion
//! style (flat struct-of-fields raw records, no nested schema validation
//! library — field presence checked by hand).

use chrono::{DateTime, Utc};

use crate::model::{
    AssetMovement, CanonicalTransaction, Direction, Fees, Movements, Operation, OperationCategory,
    PrimaryRef, SourceType, TransactionStatus,
};
use crate::normalize::{NormalizationError, Normalizer};

pub struct CoinbaseNormalizer;

impl Normalizer for CoinbaseNormalizer {
    fn chain_or_exchange(&self) -> &'static str {
        "coinbase"
    }

    fn normalize(&self, raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
        normalize_coinbase_record(raw)
    }
}

fn normalize_coinbase_record(raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
    let entry_type = super::str_field(raw, "entry_type")?;
    match entry_type {
        "advanced_trade_fill" => normalize_fill(raw),
        "deposit" | "withdrawal" => normalize_transfer(raw, entry_type),
        other => Err(NormalizationError::Skip {
            reason: format!("unsupported entry_type `{other}`"),
        }),
    }
}

fn parse_decimal(raw: &serde_json::Value, field: &str) -> Result<rust_decimal::Decimal, NormalizationError> {
    let s = super::str_field(raw, field)?;
    crate::money::parse_canonical(s).map_err(|_| NormalizationError::Invalid {
        reason: format!("field `{field}` is not a valid decimal string"),
    })
}

fn parse_timestamp(raw: &serde_json::Value) -> DateTime<Utc> {
    raw.get("trade_time")
        .or_else(|| raw.get("timestamp"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn normalize_fill(raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
    let trade_id = super::str_field(raw, "trade_id")?.to_string();
    let base_asset = super::str_field(raw, "base_asset")?.to_string();
    let quote_asset = super::str_field(raw, "quote_asset")?.to_string();
    let size = parse_decimal(raw, "size")?;
    let price = parse_decimal(raw, "price")?;
    let commission = raw
        .get("commission")
        .and_then(|v| v.as_str())
        .and_then(|s| crate::money::parse_canonical(s).ok())
        .unwrap_or_default();
    let side = super::str_field(raw, "side")?;

    let quote_value = size * price;

    let mut movements = Movements::default();
    let mut fees = Fees::default();

    if side == "BUY" {
        movements.inflows.push(AssetMovement::new(base_asset, size, Direction::In));
        movements.outflows.push(AssetMovement::new(quote_asset.clone(), quote_value, Direction::Out));
        movements.primary = Some(PrimaryRef::Inflow(0));
    } else if side == "SELL" {
        movements.outflows.push(AssetMovement::new(base_asset, size, Direction::Out));
        movements.inflows.push(AssetMovement::new(quote_asset.clone(), quote_value, Direction::In));
        movements.primary = Some(PrimaryRef::Outflow(0));
    } else {
        return Err(NormalizationError::Invalid {
            reason: format!("unknown trade side `{side}`"),
        });
    }

    if commission > rust_decimal::Decimal::ZERO {
        fees.platform = Some(AssetMovement::new(quote_asset, commission, Direction::Out));
    }

    Ok(CanonicalTransaction {
        id: String::new(),
        external_id: trade_id.clone(),
        source_name: "coinbase".to_string(),
        source_type: SourceType::Exchange,
        datetime: parse_timestamp(raw),
        status: TransactionStatus::Success,
        operation: Operation::new(OperationCategory::Trade, "swap"),
        movements,
        fees,
        blockchain_metadata: None,
        notes: Vec::new(),
        excluded_from_accounting: false,
    })
}

fn normalize_transfer(
    raw: &serde_json::Value,
    entry_type: &str,
) -> Result<CanonicalTransaction, NormalizationError> {
    let id = super::str_field(raw, "id")?.to_string();
    let asset = super::str_field(raw, "asset")?.to_string();
    let amount = parse_decimal(raw, "amount")?;

    let mut movements = Movements::default();
    let kind = if entry_type == "deposit" {
        movements.inflows.push(AssetMovement::new(asset, amount, Direction::In));
        movements.primary = Some(PrimaryRef::Inflow(0));
        "deposit"
    } else {
        movements.outflows.push(AssetMovement::new(asset, amount, Direction::Out));
        movements.primary = Some(PrimaryRef::Outflow(0));
        "withdrawal"
    };

    Ok(CanonicalTransaction {
        id: String::new(),
        external_id: id.clone(),
        source_name: "coinbase".to_string(),
        source_type: SourceType::Exchange,
        datetime: parse_timestamp(raw),
        status: TransactionStatus::Success,
        operation: Operation::new(OperationCategory::Transfer, kind),
        movements,
        fees: Fees::default(),
        blockchain_metadata: None,
        notes: Vec::new(),
        excluded_from_accounting: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_fill_produces_trade_with_two_movements() {
        let raw = serde_json::json!({
            "entry_type": "advanced_trade_fill",
            "trade_id": "t1",
            "base_asset": "BTC",
            "quote_asset": "USD",
            "size": "0.1",
            "price": "60000",
            "commission": "6",
            "side": "BUY",
            "trade_time": "2026-01-01T00:00:00Z"
        });
        let canonical = normalize_coinbase_record(&raw).unwrap();
        assert_eq!(canonical.operation.category, OperationCategory::Trade);
        assert_eq!(canonical.movements.inflows[0].asset, "BTC");
        assert_eq!(canonical.movements.outflows[0].asset, "USD");
        assert_eq!(canonical.fees.platform.as_ref().unwrap().amount, rust_decimal::Decimal::new(6, 0));
    }

    #[test]
    fn unsupported_entry_type_is_skipped() {
        let raw = serde_json::json!({"entry_type": "staking_reward"});
        let result = normalize_coinbase_record(&raw);
        assert!(matches!(result, Err(NormalizationError::Skip { .. })));
    }
}
