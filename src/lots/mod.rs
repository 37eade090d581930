//! Lot matcher (C14): cost-basis lot creation, disposal matching, and fee
//! apportionment across an asset's acquisitions and disposals.
//!
//! Strategies ([`fifo`], [`lifo`]) are pure given their open-lot view, per
//! spec §4.13 — all the history-dependent bookkeeping (remaining quantity,
//! status transitions) lives here in the shared walk, not in the strategy.

pub mod fifo;
pub mod lifo;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::{IngestError, IngestResult};
use crate::model::{AssetMovement, CanonicalTransaction, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotStatus {
    Open,
    PartiallyDisposed,
    FullyDisposed,
}

#[derive(Debug, Clone)]
pub struct AcquisitionLot {
    pub id: String,
    pub transaction_id: String,
    pub asset: String,
    pub quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub cost_basis_per_unit: Decimal,
    pub acquired_at: DateTime<Utc>,
    pub status: LotStatus,
}

#[derive(Debug, Clone)]
pub struct LotDisposal {
    pub lot_id: String,
    pub transaction_id: String,
    pub quantity_disposed: Decimal,
    pub proceeds_per_unit: Decimal,
    pub cost_basis_per_unit: Decimal,
    pub gain_loss: Decimal,
    pub disposed_at: DateTime<Utc>,
    /// Days held between the consumed lot's `acquired_at` and this disposal
    /// (spec §3 `LotDisposal.holdingPeriodDays`) — the short/long-term signal
    /// a cost-basis engine exists to produce.
    pub holding_period_days: i64,
    pub remaining_after: Decimal,
    pub status_after: LotStatus,
}

#[derive(Debug, Clone)]
pub struct LotTransfer {
    pub from_lot_id: String,
    pub to_account_id: String,
    pub transaction_id: String,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Fifo,
    Lifo,
}

pub struct LotMatchOptions {
    pub calculation_id: String,
    pub strategy: MatchStrategy,
}

pub struct LotMatchResult {
    pub lots: Vec<AcquisitionLot>,
    pub disposals: Vec<LotDisposal>,
}

/// A single chronological event against one asset: an acquisition (inflow) or
/// a disposal (outflow), with its fee-adjusted per-unit price already resolved.
struct AssetEvent<'a> {
    tx: &'a CanonicalTransaction,
    movement: &'a AssetMovement,
    allocated_fee: Decimal,
}

/// Matches lots across a set of canonical transactions (spec §4.13). Rejects
/// up front if any non-fiat movement is missing `priceAtTxTime` — the matcher
/// never silently estimates a basis.
pub fn match_lots(
    transactions: &[CanonicalTransaction],
    options: &LotMatchOptions,
) -> IngestResult<LotMatchResult> {
    for tx in transactions {
        for movement in tx.movements.all() {
            if !movement.is_fiat() && movement.price_at_tx_time.is_none() {
                return Err(IngestError::Validation {
                    field: "priceAtTxTime".to_string(),
                    reason: format!(
                        "non-fiat movement of {} in transaction {} is missing a price",
                        movement.asset, tx.external_id
                    ),
                });
            }
        }
    }

    let mut by_asset: HashMap<String, Vec<AssetEvent>> = HashMap::new();
    for tx in transactions {
        let total_fee_fiat = total_fee_in_fiat(tx)?;
        let allocations = allocate_fees(tx, total_fee_fiat)?;
        for (idx, movement) in tx.movements.all().enumerate() {
            if movement.is_fiat() {
                continue;
            }
            by_asset.entry(movement.asset.clone()).or_default().push(AssetEvent {
                tx,
                movement,
                allocated_fee: allocations.get(&idx).copied().unwrap_or(Decimal::ZERO),
            });
        }
    }

    let mut lots = Vec::new();
    let mut disposals = Vec::new();

    for (_asset, mut events) in by_asset {
        events.sort_by_key(|e| e.tx.datetime);
        let mut open_lots: Vec<AcquisitionLot> = Vec::new();

        for event in events {
            match event.movement.direction {
                Direction::In => {
                    let price = event
                        .movement
                        .price_at_tx_time
                        .as_ref()
                        .map(|p| p.price.amount)
                        .unwrap_or(Decimal::ZERO);
                    let cost_basis_per_unit = if event.movement.amount.is_zero() {
                        Decimal::ZERO
                    } else {
                        (event.movement.amount * price + event.allocated_fee) / event.movement.amount
                    };
                    let lot = AcquisitionLot {
                        id: format!("{}-{}", event.tx.external_id, event.movement.asset),
                        transaction_id: event.tx.id.clone(),
                        asset: event.movement.asset.clone(),
                        quantity: event.movement.amount,
                        remaining_quantity: event.movement.amount,
                        cost_basis_per_unit,
                        acquired_at: event.tx.datetime,
                        status: LotStatus::Open,
                    };
                    open_lots.push(lot.clone());
                    lots.push(lot);
                }
                Direction::Out => {
                    let price = event
                        .movement
                        .price_at_tx_time
                        .as_ref()
                        .map(|p| p.price.amount)
                        .unwrap_or(Decimal::ZERO);
                    let net_proceeds = event.movement.amount * price - event.allocated_fee;
                    let proceeds_per_unit = if event.movement.amount.is_zero() {
                        Decimal::ZERO
                    } else {
                        net_proceeds / event.movement.amount
                    };

                    let new_disposals = match options.strategy {
                        MatchStrategy::Fifo => fifo::match_disposal(
                            event.movement.amount,
                            proceeds_per_unit,
                            &mut open_lots,
                            &event.tx.id,
                            event.tx.datetime,
                        )?,
                        MatchStrategy::Lifo => lifo::match_disposal(
                            event.movement.amount,
                            proceeds_per_unit,
                            &mut open_lots,
                            &event.tx.id,
                            event.tx.datetime,
                        )?,
                    };

                    for disposal in &new_disposals {
                        if let Some(lot) = lots.iter_mut().find(|l| l.id == disposal.lot_id) {
                            lot.remaining_quantity = disposal.remaining_after;
                            lot.status = disposal.status_after;
                        }
                    }
                    disposals.extend(new_disposals);
                }
            }
        }
    }

    Ok(LotMatchResult { lots, disposals })
}

fn total_fee_in_fiat(tx: &CanonicalTransaction) -> IngestResult<Decimal> {
    let mut total = Decimal::ZERO;
    for fee in tx.fees.all() {
        if fee.is_fiat() {
            total += fee.amount;
        } else {
            let price = fee.price_at_tx_time.as_ref().ok_or_else(|| IngestError::Validation {
                field: "fees.priceAtTxTime".to_string(),
                reason: format!("non-fiat fee on {} is missing a price", fee.asset),
            })?;
            total += fee.amount * price.price.amount;
        }
    }
    Ok(total)
}

/// Allocates `total_fee_fiat` proportionally across each non-fiat movement's
/// fiat value; falls back to an even split when no movement has positive
/// value. Returns a map keyed by the movement's position in `tx.movements.all()`.
fn allocate_fees(
    tx: &CanonicalTransaction,
    total_fee_fiat: Decimal,
) -> IngestResult<HashMap<usize, Decimal>> {
    if total_fee_fiat.is_zero() {
        return Ok(HashMap::new());
    }

    let mut fiat_values: HashMap<usize, Decimal> = HashMap::new();
    let mut total_value = Decimal::ZERO;
    for (idx, movement) in tx.movements.all().enumerate() {
        if movement.is_fiat() {
            continue;
        }
        let price = movement.price_at_tx_time.as_ref().ok_or_else(|| IngestError::Validation {
            field: "priceAtTxTime".to_string(),
            reason: format!("non-fiat movement of {} is missing a price", movement.asset),
        })?;
        let value = movement.amount * price.price.amount;
        fiat_values.insert(idx, value);
        total_value += value;
    }

    let non_fiat_count = fiat_values.len();
    if non_fiat_count == 0 {
        return Ok(HashMap::new());
    }

    let mut allocations = HashMap::new();
    if total_value > Decimal::ZERO {
        for (idx, value) in &fiat_values {
            let share = (*value / total_value) * total_fee_fiat;
            allocations.insert(*idx, share);
        }
    } else {
        let even_share = total_fee_fiat / Decimal::from(non_fiat_count as u64);
        for idx in fiat_values.keys() {
            allocations.insert(*idx, even_share);
        }
    }
    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CanonicalTransaction, Fees, Movements, Operation, OperationCategory, PriceAtTxTime, SourceType,
        TransactionStatus,
    };
    use crate::money::Money;

    fn tx_with_movement(
        id: &str,
        asset: &str,
        amount: Decimal,
        direction: Direction,
        price: Decimal,
        fee: Option<Decimal>,
        datetime: DateTime<Utc>,
    ) -> CanonicalTransaction {
        let mut movement = AssetMovement::new(asset, amount, direction);
        movement.price_at_tx_time = Some(PriceAtTxTime {
            price: Money::new(price, crate::money::Currency::new("USD")),
            source: "test".to_string(),
            fetched_at: datetime,
        });

        let mut movements = Movements::default();
        match direction {
            Direction::In => movements.inflows.push(movement),
            Direction::Out => movements.outflows.push(movement),
        }

        let mut fees = Fees::default();
        if let Some(fee_amount) = fee {
            fees.network = Some(AssetMovement {
                asset: "USD".to_string(),
                amount: fee_amount,
                direction: Direction::Out,
                price_at_tx_time: None,
                metadata: None,
            });
        }

        CanonicalTransaction {
            id: id.to_string(),
            external_id: id.to_string(),
            source_name: "test".to_string(),
            source_type: SourceType::Exchange,
            datetime,
            status: TransactionStatus::Success,
            operation: Operation::new(OperationCategory::Trade, "swap"),
            movements,
            fees,
            blockchain_metadata: None,
            notes: Vec::new(),
            excluded_from_accounting: false,
        }
    }

    #[test]
    fn fifo_matching_reproduces_spec_scenario() {
        // spec.md scenario 6
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::days(1);
        let acquire = tx_with_movement(
            "acq1",
            "BTC",
            Decimal::new(1, 0),
            Direction::In,
            Decimal::new(50_000, 0),
            Some(Decimal::new(10, 0)),
            t0,
        );
        let dispose = tx_with_movement(
            "disp1",
            "BTC",
            Decimal::new(6, 1),
            Direction::Out,
            Decimal::new(60_000, 0),
            Some(Decimal::new(6, 0)),
            t1,
        );

        let result = match_lots(
            &[acquire, dispose],
            &LotMatchOptions {
                calculation_id: "calc1".to_string(),
                strategy: MatchStrategy::Fifo,
            },
        )
        .unwrap();

        assert_eq!(result.lots[0].cost_basis_per_unit, Decimal::new(50010, 0));
        let disposal = &result.disposals[0];
        assert_eq!(disposal.proceeds_per_unit, Decimal::new(59990, 0));
        assert_eq!(disposal.cost_basis_per_unit, Decimal::new(50010, 0));
        assert_eq!(disposal.gain_loss, Decimal::new(5988, 0));
        assert_eq!(disposal.holding_period_days, 1);
        assert_eq!(disposal.remaining_after, Decimal::new(4, 1));
        assert_eq!(disposal.status_after, LotStatus::PartiallyDisposed);
    }

    #[test]
    fn missing_price_on_non_fiat_movement_is_rejected() {
        let mut tx = tx_with_movement(
            "acq1",
            "BTC",
            Decimal::new(1, 0),
            Direction::In,
            Decimal::new(50_000, 0),
            None,
            Utc::now(),
        );
        tx.movements.inflows[0].price_at_tx_time = None;

        let result = match_lots(
            &[tx],
            &LotMatchOptions {
                calculation_id: "calc1".to_string(),
                strategy: MatchStrategy::Fifo,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn fiat_assets_are_skipped_entirely() {
        let tx = tx_with_movement(
            "acq1",
            "USD",
            Decimal::new(100, 0),
            Direction::In,
            Decimal::new(1, 0),
            None,
            Utc::now(),
        );
        let result = match_lots(
            &[tx],
            &LotMatchOptions {
                calculation_id: "calc1".to_string(),
                strategy: MatchStrategy::Fifo,
            },
        )
        .unwrap();
        assert!(result.lots.is_empty());
    }
}
