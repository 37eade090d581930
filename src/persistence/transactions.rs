//! `TransactionRepo` (spec §4.12): canonical transaction storage. All decimal
//! fields persist through `Money`/`Decimal`'s canonical string form (spec §6
//! "All decimal columns are TEXT storing canonical fixed-notation decimals").

use rusqlite::params;
use uuid::Uuid;

use crate::errors::IngestResult;
use crate::model::{
    AssetMovement, BlockchainMetadata, CanonicalTransaction, Fees, Movements, Note, Operation,
    OperationCategory, SourceType, TransactionStatus,
};
use crate::persistence::connection::Database;

#[derive(Debug, Default, Clone)]
pub struct TransactionFilter {
    pub data_source_id: Option<String>,
    pub asset: Option<String>,
    pub limit: Option<u32>,
}

fn status_to_str(s: TransactionStatus) -> &'static str {
    match s {
        TransactionStatus::Pending => "pending",
        TransactionStatus::Success => "success",
        TransactionStatus::Failed => "failed",
        TransactionStatus::Canceled => "canceled",
    }
}

fn status_from_str(s: &str) -> TransactionStatus {
    match s {
        "success" => TransactionStatus::Success,
        "failed" => TransactionStatus::Failed,
        "canceled" => TransactionStatus::Canceled,
        _ => TransactionStatus::Pending,
    }
}

fn source_type_to_str(s: SourceType) -> &'static str {
    match s {
        SourceType::Exchange => "exchange",
        SourceType::Blockchain => "blockchain",
    }
}

fn source_type_from_str(s: &str) -> SourceType {
    if s == "blockchain" {
        SourceType::Blockchain
    } else {
        SourceType::Exchange
    }
}

fn category_to_str(c: &OperationCategory) -> &'static str {
    match c {
        OperationCategory::Transfer => "transfer",
        OperationCategory::Staking => "staking",
        OperationCategory::Governance => "governance",
        OperationCategory::Trade => "trade",
        OperationCategory::Fee => "fee",
    }
}

fn category_from_str(s: &str) -> OperationCategory {
    match s {
        "staking" => OperationCategory::Staking,
        "governance" => OperationCategory::Governance,
        "trade" => OperationCategory::Trade,
        "fee" => OperationCategory::Fee,
        _ => OperationCategory::Transfer,
    }
}

impl Database {
    /// Inserts a batch of canonical transactions atomically (spec §5:
    /// "batch inserts of canonical records ... are atomic per batch").
    pub fn insert_transaction_batch(
        &self,
        data_source_id: &str,
        txs: &[CanonicalTransaction],
    ) -> IngestResult<()> {
        let mut conn = self.conn.lock().expect("connection mutex poisoned");
        let tx = conn.transaction()?;
        for canonical in txs {
            let id = if canonical.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                canonical.id.clone()
            };
            let fees_total = canonical
                .fees
                .all()
                .map(|m| m.amount)
                .fold(rust_decimal::Decimal::ZERO, |acc, v| acc + v);

            tx.execute(
                "INSERT INTO transactions (
                    id, data_source_id, source_id, source_type, external_id, transaction_status,
                    transaction_datetime, operation_category, operation_type,
                    movements_inflows, movements_outflows, fees_network, fees_platform, fees_total,
                    note_types, note_severities, note_messages,
                    blockchain_name, blockchain_block_height, blockchain_transaction_hash, blockchain_is_confirmed,
                    excluded_from_accounting
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22)
                 ON CONFLICT(data_source_id, external_id) DO NOTHING",
                params![
                    id,
                    data_source_id,
                    canonical.source_name,
                    source_type_to_str(canonical.source_type),
                    canonical.external_id,
                    status_to_str(canonical.status),
                    canonical.datetime.to_rfc3339(),
                    category_to_str(&canonical.operation.category),
                    canonical.operation.kind,
                    serde_json::to_string(&canonical.movements.inflows)?,
                    serde_json::to_string(&canonical.movements.outflows)?,
                    canonical.fees.network.as_ref().map(serde_json::to_string).transpose()?,
                    canonical.fees.platform.as_ref().map(serde_json::to_string).transpose()?,
                    crate::money::format_canonical(&fees_total),
                    serde_json::to_string(&canonical.notes.iter().map(|n| n.kind.clone()).collect::<Vec<_>>())?,
                    serde_json::to_string(&canonical.notes.iter().map(|n| n.severity).collect::<Vec<_>>())?,
                    serde_json::to_string(&canonical.notes.iter().map(|n| n.message.clone()).collect::<Vec<_>>())?,
                    canonical.blockchain_metadata.as_ref().map(|m| m.chain.clone()),
                    canonical.blockchain_metadata.as_ref().and_then(|m| m.block_height),
                    canonical.blockchain_metadata.as_ref().map(|m| m.tx_hash.clone()),
                    canonical.blockchain_metadata.as_ref().map(|m| m.confirmed),
                    canonical.excluded_from_accounting,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_transactions(&self, filter: &TransactionFilter) -> IngestResult<Vec<CanonicalTransaction>> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        let mut sql = "SELECT id, source_id, source_type, external_id, transaction_status, transaction_datetime,
            operation_category, operation_type, movements_inflows, movements_outflows,
            fees_network, fees_platform, note_types, note_severities, note_messages,
            blockchain_name, blockchain_block_height, blockchain_transaction_hash, blockchain_is_confirmed,
            excluded_from_accounting
            FROM transactions WHERE 1=1"
            .to_string();
        let mut bind_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(ds) = &filter.data_source_id {
            sql.push_str(" AND data_source_id = ?");
            bind_params.push(Box::new(ds.clone()));
        }
        if let Some(asset) = &filter.asset {
            sql.push_str(" AND (movements_inflows LIKE ? OR movements_outflows LIKE ?)");
            let pattern = format!("%\"{asset}\"%");
            bind_params.push(Box::new(pattern.clone()));
            bind_params.push(Box::new(pattern));
        }
        sql.push_str(" ORDER BY transaction_datetime DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = bind_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_transaction)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Transactions with any non-fiat movement lacking a price (spec §4.14 pipeline residue).
    pub fn get_transactions_needing_prices(&self) -> IngestResult<Vec<CanonicalTransaction>> {
        let all = self.get_transactions(&TransactionFilter::default())?;
        Ok(all
            .into_iter()
            .filter(|tx| {
                tx.movements.all().any(|m| !m.is_fiat() && m.price_at_tx_time.is_none())
            })
            .collect())
    }

    /// Writes back the (possibly enriched) movements for one transaction. Each
    /// price enrichment stage (C15) is idempotent and re-derives from what's
    /// already persisted, so this only ever fills in `price_at_tx_time`, never
    /// touches amounts/direction.
    pub fn update_transaction_movements(&self, transaction_id: &str, movements: &Movements) -> IngestResult<()> {
        let conn = self.conn.lock().expect("connection mutex poisoned");
        conn.execute(
            "UPDATE transactions SET movements_inflows = ?2, movements_outflows = ?3 WHERE id = ?1",
            params![
                transaction_id,
                serde_json::to_string(&movements.inflows)?,
                serde_json::to_string(&movements.outflows)?,
            ],
        )?;
        Ok(())
    }
}

fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<CanonicalTransaction> {
    let inflows_json: String = row.get(8)?;
    let outflows_json: String = row.get(9)?;
    let fees_network_json: Option<String> = row.get(10)?;
    let fees_platform_json: Option<String> = row.get(11)?;
    let note_types_json: String = row.get(12)?;
    let note_severities_json: String = row.get(13)?;
    let note_messages_json: String = row.get(14)?;

    let inflows: Vec<AssetMovement> = serde_json::from_str(&inflows_json).unwrap_or_default();
    let outflows: Vec<AssetMovement> = serde_json::from_str(&outflows_json).unwrap_or_default();
    let network: Option<AssetMovement> = fees_network_json.and_then(|s| serde_json::from_str(&s).ok());
    let platform: Option<AssetMovement> = fees_platform_json.and_then(|s| serde_json::from_str(&s).ok());

    let note_types: Vec<String> = serde_json::from_str(&note_types_json).unwrap_or_default();
    let note_severities: Vec<crate::model::NoteSeverity> =
        serde_json::from_str(&note_severities_json).unwrap_or_default();
    let note_messages: Vec<String> = serde_json::from_str(&note_messages_json).unwrap_or_default();
    let notes = note_types
        .into_iter()
        .zip(note_severities)
        .zip(note_messages)
        .map(|((kind, severity), message)| Note {
            kind,
            severity,
            message,
            metadata: None,
        })
        .collect();

    let status_str: String = row.get(4)?;
    let datetime_str: String = row.get(5)?;
    let category_str: String = row.get(6)?;
    let source_type_str: String = row.get(2)?;

    let blockchain_name: Option<String> = row.get(15)?;
    let blockchain_metadata = blockchain_name.map(|chain| BlockchainMetadata {
        chain,
        block_height: row.get::<_, Option<i64>>(16).unwrap_or(None).map(|v| v as u64),
        tx_hash: row.get::<_, Option<String>>(17).unwrap_or(None).unwrap_or_default(),
        confirmed: row.get::<_, Option<bool>>(18).unwrap_or(None).unwrap_or(false),
    });

    Ok(CanonicalTransaction {
        id: row.get(0)?,
        external_id: row.get(3)?,
        source_name: row.get(1)?,
        source_type: source_type_from_str(&source_type_str),
        datetime: chrono::DateTime::parse_from_rfc3339(&datetime_str)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        status: status_from_str(&status_str),
        operation: Operation::new(category_from_str(&category_str), row.get::<_, String>(7)?),
        movements: Movements {
            inflows,
            outflows,
            primary: None,
        },
        fees: Fees { network, platform },
        blockchain_metadata,
        notes,
        excluded_from_accounting: row.get(19)?,
    })
}
