//! `TransactionLinkRepo` (spec §4.12): cross-account transaction links used by
//! the lot-transfer re-derivation stage (C15 stage 4).

use rusqlite::params;
use uuid::Uuid;

use crate::errors::{IngestError, IngestResult};
use crate::persistence::connection::Database;

#[derive(Debug, Clone)]
pub struct TransactionLink {
    pub id: String,
    pub from_transaction_id: String,
    pub to_transaction_id: String,
    pub link_type: String,
    pub confidence: Option<String>,
    pub status: String,
}

impl Database {
    pub fn create_link(
        &self,
        from_transaction_id: &str,
        to_transaction_id: &str,
        link_type: &str,
        confidence: Option<&str>,
    ) -> IngestResult<String> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "INSERT INTO transaction_links (id, from_transaction_id, to_transaction_id, link_type, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, from_transaction_id, to_transaction_id, link_type, confidence],
        )?;
        Ok(id)
    }

    pub fn find_links_by_transaction_ids(&self, transaction_ids: &[String]) -> IngestResult<Vec<TransactionLink>> {
        if transaction_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let placeholders = transaction_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT id, from_transaction_id, to_transaction_id, link_type, confidence, status
             FROM transaction_links
             WHERE from_transaction_id IN ({placeholders}) OR to_transaction_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let bound: Vec<&dyn rusqlite::ToSql> = transaction_ids
            .iter()
            .chain(transaction_ids.iter())
            .map(|s| s as &dyn rusqlite::ToSql)
            .collect();
        let rows = stmt.query_map(bound.as_slice(), |row| {
            Ok(TransactionLink {
                id: row.get(0)?,
                from_transaction_id: row.get(1)?,
                to_transaction_id: row.get(2)?,
                link_type: row.get(3)?,
                confidence: row.get(4)?,
                status: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn find_all_links(&self) -> IngestResult<Vec<TransactionLink>> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, from_transaction_id, to_transaction_id, link_type, confidence, status
             FROM transaction_links",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(TransactionLink {
                id: row.get(0)?,
                from_transaction_id: row.get(1)?,
                to_transaction_id: row.get(2)?,
                link_type: row.get(3)?,
                confidence: row.get(4)?,
                status: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Transitions a link's review status (CLI `links confirm`/`links reject`,
    /// spec §6). Confirmed links are what C15 stage 4 treats as authoritative
    /// when re-deriving a price across a lot transfer.
    pub fn update_link_status(&self, link_id: &str, status: &str) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let changed = conn.execute(
            "UPDATE transaction_links SET status = ?1 WHERE id = ?2",
            rusqlite::params![status, link_id],
        )?;
        if changed == 0 {
            return Err(IngestError::NotFound {
                what: format!("transaction_link {link_id}"),
            });
        }
        Ok(())
    }

    pub fn count_links(&self, account_ids: Option<&[String]>) -> IngestResult<i64> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        if let Some(ids) = account_ids {
            if ids.is_empty() {
                return Ok(0);
            }
            // account scoping joins through transactions -> data_sources; kept as
            // a simple EXISTS subquery rather than a repository-wide join helper.
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT count(*) FROM transaction_links l
                 WHERE EXISTS (
                    SELECT 1 FROM transactions t JOIN data_sources d ON t.data_source_id = d.id
                    WHERE (t.id = l.from_transaction_id OR t.id = l.to_transaction_id)
                    AND d.account_id IN ({placeholders})
                 )"
            );
            let bound: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let count: i64 = conn.query_row(&sql, bound.as_slice(), |row| row.get(0))?;
            Ok(count)
        } else {
            let count: i64 = conn.query_row("SELECT count(*) FROM transaction_links", [], |row| row.get(0))?;
            Ok(count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AssetMovement, CanonicalTransaction, Direction, Fees, Movements, Operation, OperationCategory,
        SourceType, TransactionStatus,
    };

    fn sample_tx(external_id: &str) -> CanonicalTransaction {
        let mut movements = Movements::default();
        movements.inflows.push(AssetMovement::new(
            "BTC",
            rust_decimal::Decimal::new(1, 1),
            Direction::In,
        ));
        CanonicalTransaction {
            id: String::new(),
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
    fn create_and_find_link_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let session = crate::model::IngestionSession::start("acct1", "ds1", chrono::Utc::now());
        db.create_data_source(&session).unwrap();
        db.insert_transaction_batch("ds1", &[sample_tx("tx1")]).unwrap();
        db.insert_transaction_batch("ds1", &[sample_tx("tx2")]).unwrap();

        let txs = db.get_transactions(&Default::default()).unwrap();
        let id1 = txs.iter().find(|t| t.external_id == "tx1").unwrap().id.clone();
        let id2 = txs.iter().find(|t| t.external_id == "tx2").unwrap().id.clone();

        db.create_link(&id1, &id2, "lot_transfer", Some("high")).unwrap();
        let links = db.find_links_by_transaction_ids(&[id1.clone()]).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_type, "lot_transfer");
    }
}
