//! `DataSourceRepo` (spec §4.12): session lifecycle persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::errors::IngestResult;
use crate::model::{IngestionSession, SessionStatus};
use crate::persistence::connection::Database;

#[derive(Debug, Default, Clone)]
pub struct DataSourceFilter {
    pub account_id: Option<String>,
    pub status: Option<SessionStatus>,
}

fn status_to_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Started => "started",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> SessionStatus {
    match s {
        "completed" => SessionStatus::Completed,
        "failed" => SessionStatus::Failed,
        "cancelled" => SessionStatus::Cancelled,
        _ => SessionStatus::Started,
    }
}

impl Database {
    pub fn create_data_source(&self, session: &IngestionSession) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "INSERT INTO data_sources (id, account_id, status, started_at, transactions_imported, transactions_failed, import_result_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.account_id,
                status_to_str(session.status),
                session.started_at.to_rfc3339(),
                session.transactions_imported,
                session.transactions_failed,
                session.import_result_metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn finalize_data_source(&self, session: &IngestionSession) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "UPDATE data_sources SET status=?2, completed_at=?3, duration_ms=?4, transactions_imported=?5,
             transactions_failed=?6, error_message=?7, error_details=?8, import_result_metadata=?9 WHERE id=?1",
            params![
                session.id,
                status_to_str(session.status),
                session.completed_at.map(|d| d.to_rfc3339()),
                session.duration_ms,
                session.transactions_imported,
                session.transactions_failed,
                session.error_message,
                session.error_details.as_ref().map(|v| v.to_string()),
                session.import_result_metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn find_all_data_sources(&self, filter: &DataSourceFilter) -> IngestResult<Vec<IngestionSession>> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let mut sql = "SELECT id, account_id, status, started_at, completed_at, duration_ms,
            transactions_imported, transactions_failed, error_message, error_details, import_result_metadata
            FROM data_sources WHERE 1=1"
            .to_string();
        let mut bind_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(account_id) = &filter.account_id {
            sql.push_str(" AND account_id = ?");
            bind_params.push(Box::new(account_id.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            bind_params.push(Box::new(status_to_str(status).to_string()));
        }
        sql.push_str(" ORDER BY started_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = bind_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_session)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// `findLatestIncomplete` (spec §4.12 / §9 resumption): the most recent
    /// session for `account_id` still in `started` status, if any.
    pub fn find_latest_incomplete(&self, account_id: &str) -> IngestResult<Option<IngestionSession>> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, account_id, status, started_at, completed_at, duration_ms,
             transactions_imported, transactions_failed, error_message, error_details, import_result_metadata
             FROM data_sources WHERE account_id = ?1 AND status = 'started'
             ORDER BY started_at DESC LIMIT 1",
        )?;
        let session = stmt
            .query_row(params![account_id], row_to_session)
            .optional()?;
        Ok(session)
    }
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<IngestionSession> {
    let status_str: String = row.get(2)?;
    let started_at_str: String = row.get(3)?;
    let completed_at_str: Option<String> = row.get(4)?;
    let error_details_str: Option<String> = row.get(9)?;
    let metadata_str: String = row.get(10)?;

    Ok(IngestionSession {
        id: row.get(0)?,
        account_id: row.get(1)?,
        status: status_from_str(&status_str),
        started_at: parse_datetime(&started_at_str),
        completed_at: completed_at_str.map(|s| parse_datetime(&s)),
        duration_ms: row.get(5)?,
        transactions_imported: row.get(6)?,
        transactions_failed: row.get(7)?,
        error_message: row.get(8)?,
        error_details: error_details_str.and_then(|s| serde_json::from_str(&s).ok()),
        import_result_metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
