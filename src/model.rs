//! Core data model (spec §3): the canonical transaction shape every provider
//! normalizer converges on, plus the surrounding session/account/raw-record
//! types. Kept as plain data + small invariant-checking constructors — no
//! bidirectional in-memory pointers (account hierarchy and lot/disposal links
//! are by id, resolved through the persistence layer, per SPEC_FULL design
//! note in spec §9).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAtTxTime {
    pub price: Money,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

/// A single directed change of a single asset (spec §3 `AssetMovement`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMovement {
    pub asset: String,
    pub amount: Decimal,
    pub direction: Direction,
    pub price_at_tx_time: Option<PriceAtTxTime>,
    pub metadata: Option<serde_json::Value>,
}

impl AssetMovement {
    pub fn new(asset: impl Into<String>, amount: Decimal, direction: Direction) -> Self {
        Self {
            asset: asset.into(),
            amount,
            direction,
            price_at_tx_time: None,
            metadata: None,
        }
    }

    pub fn is_fiat(&self) -> bool {
        crate::money::Currency::new(&self.asset).is_fiat()
    }

    /// Signed amount: positive for inflows, negative for outflows. Used by the
    /// zero-sum invariant check (spec §3 invariant 1 / §8).
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            Direction::In => self.amount,
            Direction::Out => -self.amount,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Exchange,
    Blockchain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Transfer,
    Staking,
    Governance,
    Trade,
    Fee,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub category: OperationCategory,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Operation {
    pub fn new(category: OperationCategory, kind: impl Into<String>) -> Self {
        Self {
            category,
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: NoteSeverity,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

impl Note {
    pub fn new(kind: impl Into<String>, severity: NoteSeverity, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            severity,
            message: message.into(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainMetadata {
    pub chain: String,
    pub block_height: Option<u64>,
    pub tx_hash: String,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Movements {
    pub inflows: Vec<AssetMovement>,
    pub outflows: Vec<AssetMovement>,
    /// Index into whichever of `inflows`/`outflows` holds the headline movement;
    /// `None` primary means the classifier couldn't pick one (caller must handle).
    pub primary: Option<PrimaryRef>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum PrimaryRef {
    Inflow(usize),
    Outflow(usize),
}

impl Movements {
    pub fn primary_movement(&self) -> Option<&AssetMovement> {
        match self.primary {
            Some(PrimaryRef::Inflow(i)) => self.inflows.get(i),
            Some(PrimaryRef::Outflow(i)) => self.outflows.get(i),
            None => None,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &AssetMovement> {
        self.inflows.iter().chain(self.outflows.iter())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fees {
    pub network: Option<AssetMovement>,
    pub platform: Option<AssetMovement>,
}

impl Fees {
    pub fn all(&self) -> impl Iterator<Item = &AssetMovement> {
        self.network.iter().chain(self.platform.iter())
    }

    pub fn total_for_asset(&self, asset: &str) -> Decimal {
        self.all()
            .filter(|m| m.asset == asset)
            .map(|m| m.amount)
            .sum()
    }
}

/// One external economic event, normalized from a provider's raw record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub id: String,
    pub external_id: String,
    pub source_name: String,
    pub source_type: SourceType,
    pub datetime: DateTime<Utc>,
    pub status: TransactionStatus,
    pub operation: Operation,
    pub movements: Movements,
    pub fees: Fees,
    pub blockchain_metadata: Option<BlockchainMetadata>,
    pub notes: Vec<Note>,
    pub excluded_from_accounting: bool,
}

impl CanonicalTransaction {
    /// Net signed change for a given asset across inflows, outflows and fees —
    /// the left-hand side of spec §3 invariant 1.
    pub fn net_movement_for_asset(&self, asset: &str) -> Decimal {
        let movement_net: Decimal = self
            .movements
            .all()
            .filter(|m| m.asset == asset)
            .map(|m| m.signed_amount())
            .sum();
        let fee_total = self.fees.total_for_asset(asset);
        movement_net - fee_total
    }

    pub fn assets(&self) -> Vec<String> {
        let mut set: Vec<String> = self
            .movements
            .all()
            .map(|m| m.asset.clone())
            .collect();
        set.sort();
        set.dedup();
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Failed,
}

/// Raw provider payload, persisted before normalization so failed normalization
/// never loses data (spec §4.8 "never silently drop").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub data_source_id: String,
    pub provider_name: String,
    pub external_id: String,
    pub cursor: Option<serde_json::Value>,
    pub source_address: Option<String>,
    pub raw_payload: serde_json::Value,
    pub normalized_payload: Option<serde_json::Value>,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Started,
    Completed,
    Failed,
    Cancelled,
}

/// One ingestion attempt (spec's "DataSource"). Bounded `started -> (completed |
/// failed | cancelled)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSession {
    pub id: String,
    pub account_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub transactions_imported: u64,
    pub transactions_failed: u64,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub import_result_metadata: serde_json::Value,
}

impl IngestionSession {
    pub fn start(account_id: impl Into<String>, id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            status: SessionStatus::Started,
            started_at: now,
            completed_at: None,
            duration_ms: None,
            transactions_imported: 0,
            transactions_failed: 0,
            error_message: None,
            error_details: None,
            import_result_metadata: serde_json::json!({}),
        }
    }

    pub fn finalize(
        &mut self,
        status: SessionStatus,
        now: DateTime<Utc>,
        error_message: Option<String>,
        error_details: Option<serde_json::Value>,
    ) {
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.error_message = error_message;
        self.error_details = error_details;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    ExchangeApi,
    ExchangeCsv,
    BlockchainAddress,
    BlockchainXpub,
}

/// One user-owned account. `parent_account_id` is set for addresses derived
/// from an xpub/ypub/zpub parent (spec §3 account hierarchy); stored as a flat
/// id reference, never a live pointer back to the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub kind: AccountKind,
    pub identifier: String,
    pub chain_or_exchange: String,
    pub parent_account_id: Option<String>,
    pub derivation_path: Option<String>,
}
