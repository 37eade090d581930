//! `RawDataRepo` (spec §4.12): upserts raw provider payloads, respecting
//! `(data_source_id, external_id)` uniqueness so a re-run never duplicates a
//! page already persisted.

use rusqlite::params;
use uuid::Uuid;

use crate::errors::IngestResult;
use crate::model::{ProcessingStatus, RawRecord};
use crate::persistence::connection::Database;

fn processing_status_to_str(status: ProcessingStatus) -> &'static str {
    match status {
        ProcessingStatus::Pending => "pending",
        ProcessingStatus::Processed => "processed",
        ProcessingStatus::Failed => "failed",
    }
}

impl Database {
    pub fn upsert_raw_records(&self, data_source_id: &str, records: &[RawRecord]) -> IngestResult<()> {
        let mut conn = self.conn.lock().expect("connection mutex poisoned");
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                "INSERT INTO external_transaction_data
                    (id, data_source_id, provider_id, external_id, cursor, source_address, raw_data, normalized_data, processing_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(data_source_id, external_id) DO UPDATE SET
                    cursor=excluded.cursor,
                    raw_data=excluded.raw_data,
                    normalized_data=excluded.normalized_data,
                    processing_status=excluded.processing_status",
                params![
                    Uuid::new_v4().to_string(),
                    data_source_id,
                    record.provider_name,
                    record.external_id,
                    record.cursor.as_ref().map(|v| v.to_string()),
                    record.source_address,
                    record.raw_payload.to_string(),
                    record.normalized_payload.as_ref().map(|v| v.to_string()),
                    processing_status_to_str(record.processing_status),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn mark_raw_record_processed(&self, data_source_id: &str, external_id: &str) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "UPDATE external_transaction_data SET processing_status='processed', processed_at=strftime('%Y-%m-%dT%H:%M:%fZ','now')
             WHERE data_source_id=?1 AND external_id=?2",
            params![data_source_id, external_id],
        )?;
        Ok(())
    }

    pub fn mark_raw_record_failed(
        &self,
        data_source_id: &str,
        external_id: &str,
    ) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "UPDATE external_transaction_data SET processing_status='failed'
             WHERE data_source_id=?1 AND external_id=?2",
            params![data_source_id, external_id],
        )?;
        Ok(())
    }

    /// Raw records still awaiting normalization for a session (CLI `process`,
    /// spec §6), in the order they were persisted.
    pub fn find_pending_raw_records(&self, data_source_id: &str) -> IngestResult<Vec<RawRecord>> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT data_source_id, provider_id, external_id, cursor, source_address, raw_data, normalized_data
             FROM external_transaction_data
             WHERE data_source_id = ?1 AND processing_status = 'pending'
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![data_source_id], |row| {
            let cursor_text: Option<String> = row.get(3)?;
            let raw_text: String = row.get(5)?;
            let normalized_text: Option<String> = row.get(6)?;
            Ok(RawRecord {
                data_source_id: row.get(0)?,
                provider_name: row.get(1)?,
                external_id: row.get(2)?,
                cursor: cursor_text.and_then(|s| serde_json::from_str(&s).ok()),
                source_address: row.get(4)?,
                raw_payload: serde_json::from_str(&raw_text).unwrap_or(serde_json::Value::Null),
                normalized_payload: normalized_text.and_then(|s| serde_json::from_str(&s).ok()),
                processing_status: ProcessingStatus::Pending,
                processing_error: None,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(external_id: &str) -> RawRecord {
        RawRecord {
            data_source_id: "ds1".to_string(),
            provider_name: "blockstream".to_string(),
            external_id: external_id.to_string(),
            cursor: None,
            source_address: Some("bc1qA".to_string()),
            raw_payload: serde_json::json!({"txid": external_id}),
            normalized_payload: None,
            processing_status: ProcessingStatus::Pending,
            processing_error: None,
        }
    }

    #[test]
    fn upsert_is_idempotent_on_duplicate_external_id() {
        let db = Database::open_in_memory().unwrap();
        let session = crate::model::IngestionSession::start("acct1", "ds1", chrono::Utc::now());
        db.create_data_source(&session).unwrap();

        db.upsert_raw_records("ds1", &[sample_record("tx1")]).unwrap();
        db.upsert_raw_records("ds1", &[sample_record("tx1")]).unwrap();

        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM external_transaction_data WHERE external_id='tx1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn mark_processed_updates_status() {
        let db = Database::open_in_memory().unwrap();
        let session = crate::model::IngestionSession::start("acct1", "ds1", chrono::Utc::now());
        db.create_data_source(&session).unwrap();
        db.upsert_raw_records("ds1", &[sample_record("tx1")]).unwrap();
        db.mark_raw_record_processed("ds1", "tx1").unwrap();

        let conn = db.conn.lock().unwrap();
        let status: String = conn
            .query_row(
                "SELECT processing_status FROM external_transaction_data WHERE external_id='tx1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "processed");
    }
}
