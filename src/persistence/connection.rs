//! SQLite connection wrapper and schema bootstrap.
//!
//! Grounded on the teacher's `database::connection::Database` (a `Mutex<Connection>`
//! behind `unsafe impl Send + Sync`, `initialize_tables()` calling one
//! `create_*_table` per table, `CREATE TABLE IF NOT EXISTS`). Field names in
//! the schema are preserved verbatim from spec §6 for drop-in compatibility.

use std::path::Path;

use rusqlite::Connection;

use crate::errors::IngestResult;

pub struct Database {
    pub(crate) conn: std::sync::Mutex<Connection>,
}

// Safe: all access goes through the `Mutex`, matching the teacher's
// connection wrapper — rusqlite's `Connection` is `!Sync` only because SQLite
// itself isn't thread-safe without serialized access, which the mutex provides.
unsafe impl Send for Database {}
unsafe impl Sync for Database {}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> IngestResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: std::sync::Mutex::new(conn),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> IngestResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: std::sync::Mutex::new(conn),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        create_data_sources_table(&conn)?;
        create_external_transaction_data_table(&conn)?;
        create_transactions_table(&conn)?;
        create_transaction_links_table(&conn)?;
        create_lot_tables(&conn)?;
        create_token_metadata_tables(&conn)?;
        create_indexes(&conn)?;
        Ok(())
    }
}

fn create_data_sources_table(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS data_sources (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT,
            duration_ms INTEGER,
            transactions_imported INTEGER NOT NULL DEFAULT 0,
            transactions_failed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            error_details TEXT,
            import_result_metadata TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    Ok(())
}

fn create_external_transaction_data_table(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS external_transaction_data (
            id TEXT PRIMARY KEY,
            data_source_id TEXT NOT NULL REFERENCES data_sources(id),
            provider_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            cursor TEXT,
            source_address TEXT,
            raw_data TEXT NOT NULL,
            normalized_data TEXT,
            processing_status TEXT NOT NULL,
            processed_at TEXT,
            UNIQUE(data_source_id, external_id)
        );",
    )?;
    Ok(())
}

fn create_transactions_table(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            data_source_id TEXT NOT NULL REFERENCES data_sources(id),
            source_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            external_id TEXT NOT NULL,
            transaction_status TEXT NOT NULL,
            transaction_datetime TEXT NOT NULL,
            from_address TEXT,
            to_address TEXT,
            operation_category TEXT NOT NULL,
            operation_type TEXT NOT NULL,
            movements_inflows TEXT NOT NULL,
            movements_outflows TEXT NOT NULL,
            fees_network TEXT,
            fees_platform TEXT,
            fees_total TEXT,
            note_types TEXT,
            note_severities TEXT,
            note_messages TEXT,
            blockchain_name TEXT,
            blockchain_block_height INTEGER,
            blockchain_transaction_hash TEXT,
            blockchain_is_confirmed INTEGER,
            excluded_from_accounting INTEGER NOT NULL DEFAULT 0,
            raw_normalized_data TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(data_source_id, external_id)
        );",
    )?;
    Ok(())
}

fn create_transaction_links_table(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transaction_links (
            id TEXT PRIMARY KEY,
            from_transaction_id TEXT NOT NULL REFERENCES transactions(id),
            to_transaction_id TEXT NOT NULL REFERENCES transactions(id),
            link_type TEXT NOT NULL,
            confidence TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    Ok(())
}

fn create_lot_tables(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cost_basis_calculations (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL,
            strategy TEXT NOT NULL,
            jurisdiction TEXT,
            tax_year INTEGER,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS acquisition_lots (
            id TEXT PRIMARY KEY,
            calculation_id TEXT NOT NULL REFERENCES cost_basis_calculations(id),
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            asset TEXT NOT NULL,
            quantity TEXT NOT NULL,
            remaining_quantity TEXT NOT NULL,
            cost_basis_per_unit TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            status TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lot_disposals (
            id TEXT PRIMARY KEY,
            lot_id TEXT NOT NULL REFERENCES acquisition_lots(id),
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            quantity_disposed TEXT NOT NULL,
            proceeds_per_unit TEXT NOT NULL,
            cost_basis_per_unit TEXT NOT NULL,
            gain_loss TEXT NOT NULL,
            disposed_at TEXT NOT NULL,
            holding_period_days INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lot_transfers (
            id TEXT PRIMARY KEY,
            from_lot_id TEXT NOT NULL REFERENCES acquisition_lots(id),
            to_account_id TEXT NOT NULL,
            transaction_id TEXT NOT NULL REFERENCES transactions(id),
            quantity TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    Ok(())
}

fn create_token_metadata_tables(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS token_metadata (
            asset TEXT PRIMARY KEY,
            name TEXT,
            decimals INTEGER,
            is_fiat INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS symbol_index (
            symbol TEXT NOT NULL,
            chain TEXT NOT NULL,
            asset TEXT NOT NULL,
            PRIMARY KEY (symbol, chain)
        );",
    )?;
    Ok(())
}

fn create_indexes(conn: &Connection) -> IngestResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_data_sources_account ON data_sources(account_id);
        CREATE INDEX IF NOT EXISTS idx_etd_data_source ON external_transaction_data(data_source_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_data_source ON transactions(data_source_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_datetime ON transactions(transaction_datetime);
        CREATE INDEX IF NOT EXISTS idx_lots_calculation ON acquisition_lots(calculation_id);
        CREATE INDEX IF NOT EXISTS idx_lots_asset ON acquisition_lots(asset);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_creates_tables() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='transactions'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
