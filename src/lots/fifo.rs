//! FIFO disposal strategy: the oldest open lot with remaining quantity is
//! consumed first (spec §4.13 default strategy).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{AcquisitionLot, LotDisposal, LotStatus};
use crate::errors::{IngestError, IngestResult};

pub fn match_disposal(
    quantity: Decimal,
    proceeds_per_unit: Decimal,
    open_lots: &mut Vec<AcquisitionLot>,
    transaction_id: &str,
    disposed_at: DateTime<Utc>,
) -> IngestResult<Vec<LotDisposal>> {
    let mut remaining = quantity;
    let mut disposals = Vec::new();

    for lot in open_lots.iter_mut() {
        if remaining.is_zero() {
            break;
        }
        if lot.remaining_quantity.is_zero() {
            continue;
        }
        let take = remaining.min(lot.remaining_quantity);
        let gain_loss = (proceeds_per_unit - lot.cost_basis_per_unit) * take;
        let holding_period_days = (disposed_at - lot.acquired_at).num_days();
        lot.remaining_quantity -= take;
        lot.status = if lot.remaining_quantity.is_zero() {
            LotStatus::FullyDisposed
        } else {
            LotStatus::PartiallyDisposed
        };

        disposals.push(LotDisposal {
            lot_id: lot.id.clone(),
            transaction_id: transaction_id.to_string(),
            quantity_disposed: take,
            proceeds_per_unit,
            cost_basis_per_unit: lot.cost_basis_per_unit,
            gain_loss,
            disposed_at,
            holding_period_days,
            remaining_after: lot.remaining_quantity,
            status_after: lot.status,
        });

        remaining -= take;
    }

    if !remaining.is_zero() {
        return Err(IngestError::Validation {
            field: "quantity".to_string(),
            reason: format!("disposal of {quantity} exceeds available open lot quantity by {remaining}"),
        });
    }

    Ok(disposals)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(id: &str, qty: i64, cost: i64) -> AcquisitionLot {
        AcquisitionLot {
            id: id.to_string(),
            transaction_id: format!("acq-{id}"),
            asset: "BTC".to_string(),
            quantity: Decimal::new(qty, 0),
            remaining_quantity: Decimal::new(qty, 0),
            cost_basis_per_unit: Decimal::new(cost, 0),
            acquired_at: Utc::now(),
            status: LotStatus::Open,
        }
    }

    #[test]
    fn consumes_oldest_lot_first() {
        let mut lots = vec![lot("l1", 1, 100), lot("l2", 1, 200)];
        let disposals = match_disposal(Decimal::new(1, 0), Decimal::new(150, 0), &mut lots, "tx1", Utc::now()).unwrap();
        assert_eq!(disposals.len(), 1);
        assert_eq!(disposals[0].lot_id, "l1");
        assert_eq!(lots[0].status, LotStatus::FullyDisposed);
        assert_eq!(lots[1].status, LotStatus::Open);
    }

    #[test]
    fn spills_into_second_lot_when_first_is_insufficient() {
        let mut lots = vec![lot("l1", 1, 100), lot("l2", 1, 200)];
        let disposals = match_disposal(
            Decimal::new(15, 1),
            Decimal::new(150, 0),
            &mut lots,
            "tx1",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(disposals.len(), 2);
        assert_eq!(disposals[0].lot_id, "l1");
        assert_eq!(disposals[1].lot_id, "l2");
        assert_eq!(disposals[1].quantity_disposed, Decimal::new(5, 1));
    }

    #[test]
    fn disposal_exceeding_open_quantity_errors() {
        let mut lots = vec![lot("l1", 1, 100)];
        let result = match_disposal(Decimal::new(2, 0), Decimal::new(150, 0), &mut lots, "tx1", Utc::now());
        assert!(result.is_err());
    }
}
