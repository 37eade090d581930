//! `LotRepo` & `LotTransferRepo` (spec §4.12): acquisition lots, disposals,
//! and cross-account lot transfers.

use rusqlite::params;
use uuid::Uuid;

use crate::errors::IngestResult;
use crate::lots::{AcquisitionLot, LotDisposal, LotStatus, LotTransfer};
use crate::persistence::connection::Database;

fn status_to_str(s: LotStatus) -> &'static str {
    match s {
        LotStatus::Open => "open",
        LotStatus::PartiallyDisposed => "partially_disposed",
        LotStatus::FullyDisposed => "fully_disposed",
    }
}

fn status_from_str(s: &str) -> LotStatus {
    match s {
        "fully_disposed" => LotStatus::FullyDisposed,
        "partially_disposed" => LotStatus::PartiallyDisposed,
        _ => LotStatus::Open,
    }
}

impl Database {
    /// Records a cost-basis run (CLI `cost-basis`, spec §6) before its lots
    /// and disposals are written, so they always have a parent row to hang off.
    pub fn create_cost_basis_calculation(
        &self,
        id: &str,
        account_id: &str,
        strategy: &str,
        jurisdiction: Option<&str>,
        tax_year: Option<i32>,
    ) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "INSERT INTO cost_basis_calculations (id, account_id, strategy, jurisdiction, tax_year)
             VALUES (?1,?2,?3,?4,?5)",
            params![id, account_id, strategy, jurisdiction, tax_year],
        )?;
        Ok(())
    }

    pub fn create_lot(&self, calculation_id: &str, lot: &AcquisitionLot) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "INSERT INTO acquisition_lots
                (id, calculation_id, transaction_id, asset, quantity, remaining_quantity, cost_basis_per_unit, acquired_at, status)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                lot.id,
                calculation_id,
                lot.transaction_id,
                lot.asset,
                crate::money::format_canonical(&lot.quantity),
                crate::money::format_canonical(&lot.remaining_quantity),
                crate::money::format_canonical(&lot.cost_basis_per_unit),
                lot.acquired_at.to_rfc3339(),
                status_to_str(lot.status),
            ],
        )?;
        Ok(())
    }

    pub fn create_lots_bulk(&self, calculation_id: &str, lots: &[AcquisitionLot]) -> IngestResult<()> {
        for lot in lots {
            self.create_lot(calculation_id, lot)?;
        }
        Ok(())
    }

    pub fn create_disposal(&self, disposal: &LotDisposal) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "INSERT INTO lot_disposals (id, lot_id, transaction_id, quantity_disposed, proceeds_per_unit, cost_basis_per_unit, gain_loss, disposed_at, holding_period_days)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                Uuid::new_v4().to_string(),
                disposal.lot_id,
                disposal.transaction_id,
                crate::money::format_canonical(&disposal.quantity_disposed),
                crate::money::format_canonical(&disposal.proceeds_per_unit),
                crate::money::format_canonical(&disposal.cost_basis_per_unit),
                crate::money::format_canonical(&disposal.gain_loss),
                disposal.disposed_at.to_rfc3339(),
                disposal.holding_period_days,
            ],
        )?;
        conn.execute(
            "UPDATE acquisition_lots SET remaining_quantity=?2, status=?3 WHERE id=?1",
            params![
                disposal.lot_id,
                crate::money::format_canonical(&disposal.remaining_after),
                status_to_str(disposal.status_after),
            ],
        )?;
        Ok(())
    }

    pub fn get_lots_by_calculation_id(&self, calculation_id: &str) -> IngestResult<Vec<AcquisitionLot>> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, transaction_id, asset, quantity, remaining_quantity, cost_basis_per_unit, acquired_at, status
             FROM acquisition_lots WHERE calculation_id = ?1 ORDER BY acquired_at ASC",
        )?;
        let rows = stmt.query_map(params![calculation_id], row_to_lot)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_lots_by_calculation_id(&self, calculation_id: &str) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "DELETE FROM lot_disposals WHERE lot_id IN (SELECT id FROM acquisition_lots WHERE calculation_id = ?1)",
            params![calculation_id],
        )?;
        conn.execute(
            "DELETE FROM acquisition_lots WHERE calculation_id = ?1",
            params![calculation_id],
        )?;
        Ok(())
    }

    pub fn delete_all_lots(&self) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute_batch("DELETE FROM lot_disposals; DELETE FROM acquisition_lots;")?;
        Ok(())
    }

    pub fn create_lot_transfer(&self, transfer: &LotTransfer) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "INSERT INTO lot_transfers (id, from_lot_id, to_account_id, transaction_id, quantity)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                Uuid::new_v4().to_string(),
                transfer.from_lot_id,
                transfer.to_account_id,
                transfer.transaction_id,
                crate::money::format_canonical(&transfer.quantity),
            ],
        )?;
        Ok(())
    }
}

fn row_to_lot(row: &rusqlite::Row) -> rusqlite::Result<AcquisitionLot> {
    let quantity_str: String = row.get(3)?;
    let remaining_str: String = row.get(4)?;
    let cost_basis_str: String = row.get(5)?;
    let acquired_at_str: String = row.get(6)?;
    let status_str: String = row.get(7)?;

    Ok(AcquisitionLot {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        asset: row.get(2)?,
        quantity: crate::money::parse_canonical(&quantity_str).unwrap_or_default(),
        remaining_quantity: crate::money::parse_canonical(&remaining_str).unwrap_or_default(),
        cost_basis_per_unit: crate::money::parse_canonical(&cost_basis_str).unwrap_or_default(),
        acquired_at: chrono::DateTime::parse_from_rfc3339(&acquired_at_str)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        status: status_from_str(&status_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AssetMovement, CanonicalTransaction, Direction, Fees, Movements, Operation, OperationCategory,
        SourceType, TransactionStatus,
    };
    use rust_decimal::Decimal;

    fn sample_tx(external_id: &str) -> CanonicalTransaction {
        let mut movements = Movements::default();
        movements.inflows.push(AssetMovement::new("BTC", Decimal::new(1, 0), Direction::In));
        CanonicalTransaction {
            id: external_id.to_string(),
            external_id: external_id.to_string(),
            source_name: "bitcoin".to_string(),
            source_type: SourceType::Blockchain,
            datetime: chrono::Utc::now(),
            status: TransactionStatus::Success,
            operation: Operation::new(OperationCategory::Transfer, "deposit"),
            movements,
            fees: Fees::default(),
            blockchain_metadata: None,
            notes: Vec::new(),
            excluded_from_accounting: false,
        }
    }

    #[test]
    fn lot_round_trips_through_persistence() {
        let db = Database::open_in_memory().unwrap();
        let session = crate::model::IngestionSession::start("acct1", "ds1", chrono::Utc::now());
        db.create_data_source(&session).unwrap();
        db.insert_transaction_batch("ds1", &[sample_tx("tx1")]).unwrap();

        let lot = AcquisitionLot {
            id: "lot1".to_string(),
            transaction_id: "tx1".to_string(),
            asset: "BTC".to_string(),
            quantity: Decimal::new(1, 0),
            remaining_quantity: Decimal::new(1, 0),
            cost_basis_per_unit: Decimal::new(50010, 0),
            acquired_at: chrono::Utc::now(),
            status: LotStatus::Open,
        };
        db.create_lot("calc1", &lot).unwrap();

        let found = db.get_lots_by_calculation_id("calc1").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cost_basis_per_unit, Decimal::new(50010, 0));
    }
}
