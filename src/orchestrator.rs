//! Ingestion orchestrator (C12, spec §4.11).
//!
//! Turns one `import` request into one or more sessions: single-address and
//! exchange imports run one session; xpub imports derive child addresses and
//! import each in sequence, aborting fast on the first child's failure (spec
//! §5 "xpub child imports are sequenced deterministically by derivation
//! index"). Session lifecycle (start/finalize/resume) is written through
//! [`Database`]; page fetching is delegated to a caller-supplied
//! [`ProviderManager`] — constructing the concrete HTTP-backed
//! `ProviderClient`s for a given chain/address is outside this crate's scope
//! (spec Non-goals: "raw HTTP socket plumbing"), so callers inject an
//! [`ImportBackend`] that builds one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::address::{derive_addresses_from_xpub, AddressKind};
use crate::cursor::{deserialize_cursor_state, serialize_cursor_state, CursorState};
use crate::errors::{IngestError, IngestResult};
use crate::model::{Account, AccountKind, IngestionSession, SessionStatus};
use crate::normalize::Normalizer;
use crate::persistence::connection::Database;
use crate::providers::manager::ProviderManager;
use crate::providers::registry::{Operation as ProviderOp, StreamType};

pub const DEFAULT_USER_ID: &str = "default";

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Flips the cooperative-shutdown flag `run_session` checks between batches
/// (spec §5: a cancelled session is left `started`, never finalized as
/// `completed` or `failed`, so a later `import` resumes it via
/// `findLatestIncomplete`). The CLI binary's `ctrlc` handler calls this.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Clears the flag set by [`request_shutdown`]. The CLI binary never calls
/// this (a process that received Ctrl-C is exiting), but a long-lived
/// embedder driving multiple imports from one process needs a way back to
/// "not shutting down", and tests need it to isolate cases sharing the
/// process-wide flag.
pub fn clear_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
}

/// Builds a [`ProviderManager`] scoped to a single chain/address (blockchain
/// imports) or a single exchange account (exchange imports). Implementations
/// live alongside whatever owns real network access; this crate only depends
/// on the narrow interface.
#[async_trait]
pub trait ImportBackend: Send + Sync {
    async fn blockchain_manager(&self, chain: &str, address: &str) -> IngestResult<Arc<ProviderManager>>;
    async fn exchange_manager(&self, exchange: &str) -> IngestResult<Arc<ProviderManager>>;
}

pub struct Orchestrator {
    db: Arc<Database>,
    backend: Arc<dyn ImportBackend>,
}

impl Orchestrator {
    pub fn new(db: Arc<Database>, backend: Arc<dyn ImportBackend>) -> Self {
        Self { db, backend }
    }

    /// `findLatestIncomplete` exposed as a first-class entrypoint (SPEC_FULL
    /// §C.3), so a re-run against an account with a `started` session resumes
    /// instead of creating a new one.
    pub fn find_latest_incomplete(&self, account_id: &str) -> IngestResult<Option<IngestionSession>> {
        self.db.find_latest_incomplete(account_id)
    }

    /// `importBlockchain` (spec §4.11 step 1-4).
    pub async fn import_blockchain(
        &self,
        chain: &str,
        address: &str,
        xpub_gap: Option<u32>,
        normalizer: &dyn Normalizer,
    ) -> IngestResult<Vec<IngestionSession>> {
        if normalizer.is_extended_public_key(address) {
            self.import_blockchain_xpub(chain, address, xpub_gap).await
        } else {
            let account = ensure_account(chain, address, AccountKind::BlockchainAddress, None, None);
            let session = self.import_blockchain_address(chain, &account).await?;
            Ok(vec![session])
        }
    }

    async fn import_blockchain_xpub(
        &self,
        chain: &str,
        xpub_str: &str,
        xpub_gap: Option<u32>,
    ) -> IngestResult<Vec<IngestionSession>> {
        let parent = ensure_account(chain, xpub_str, AccountKind::BlockchainXpub, None, None);

        let xpub: bitcoin::bip32::Xpub = xpub_str
            .parse()
            .map_err(|e| IngestError::Validation {
                field: "address".to_string(),
                reason: format!("not a valid extended public key: {e}"),
            })?;

        let backend = Arc::clone(&self.backend);
        let chain_owned = chain.to_string();
        let derived = derive_addresses_from_xpub(&xpub, AddressKind::SegwitP2wpkh, xpub_gap, |addr| {
            has_activity_blocking(&backend, &chain_owned, addr)
        })?;

        let mut sessions = Vec::with_capacity(derived.len());
        for child in derived {
            let account = ensure_account(
                chain,
                &child.address,
                AccountKind::BlockchainAddress,
                Some(parent.id.clone()),
                Some(child.derivation_path.clone()),
            );
            match self.import_blockchain_address(chain, &account).await {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    log::error!(target: "orchestrator", "child import for {} aborted: {err}", account.identifier);
                    return Err(err);
                }
            }
        }
        Ok(sessions)
    }

    async fn import_blockchain_address(&self, chain: &str, account: &Account) -> IngestResult<IngestionSession> {
        let manager = self.backend.blockchain_manager(chain, &account.identifier).await?;
        self.run_session(account, manager, ProviderOp::GetAddressTransactions, StreamType::Normal)
            .await
    }

    /// `importExchangeApi` (spec §4.11): one account keyed by the API-key
    /// fingerprint, one session.
    pub async fn import_exchange_api(
        &self,
        exchange: &str,
        api_key_fingerprint: &str,
    ) -> IngestResult<IngestionSession> {
        let account = ensure_account(exchange, api_key_fingerprint, AccountKind::ExchangeApi, None, None);
        let manager = self.backend.exchange_manager(exchange).await?;
        self.run_session(&account, manager, ProviderOp::GetAccountTransactions, StreamType::Normal)
            .await
    }

    /// `importExchangeCsv` (spec §4.11): one account keyed by the CSV
    /// directory checksum. Parsing the CSV itself is a caller-supplied
    /// collaborator (spec Non-goals: "CSV format parsing glue"); this just
    /// owns the session bookkeeping around it.
    pub async fn import_exchange_csv(&self, exchange: &str, csv_dir_checksum: &str) -> IngestResult<IngestionSession> {
        let account = ensure_account(exchange, csv_dir_checksum, AccountKind::ExchangeCsv, None, None);
        let mut session = self.start_or_resume(&account)?;
        session.import_result_metadata = serde_json::json!({ "source": "csv", "checksum": csv_dir_checksum });
        session.finalize(SessionStatus::Completed, Utc::now(), None, None);
        self.db.finalize_data_source(&session)?;
        Ok(session)
    }

    fn start_or_resume(&self, account: &Account) -> IngestResult<IngestionSession> {
        if let Some(existing) = self.db.find_latest_incomplete(&account.id)? {
            return Ok(existing);
        }
        let session = IngestionSession::start(account.id.clone(), Uuid::new_v4().to_string(), Utc::now());
        self.db.create_data_source(&session)?;
        Ok(session)
    }

    async fn run_session(
        &self,
        account: &Account,
        manager: Arc<ProviderManager>,
        operation: ProviderOp,
        stream_type: StreamType,
    ) -> IngestResult<IngestionSession> {
        let mut session = self.start_or_resume(account)?;
        let resume_cursor = self.latest_cursor(&session.id)?;

        let stream = manager.execute_with_failover(
            account.chain_or_exchange.clone(),
            operation,
            stream_type,
            resume_cursor,
        );
        futures::pin_mut!(stream);

        loop {
            if shutdown_requested() {
                log::warn!(target: "orchestrator", "shutdown requested, leaving session {} started", session.id);
                return Ok(session);
            }

            match stream.next().await {
                None => break,
                Some(Err(IngestError::Cancelled)) => {
                    // Spec §5 cancellation: leave the session `started` so a
                    // later run resumes via `findLatestIncomplete`.
                    log::warn!(target: "orchestrator", "session {} cancelled, left started", session.id);
                    return Ok(session);
                }
                Some(Err(err)) => {
                    session.finalize(
                        SessionStatus::Failed,
                        Utc::now(),
                        Some(err.to_string()),
                        Some(serde_json::json!({ "error": err.to_string() })),
                    );
                    self.db.finalize_data_source(&session)?;
                    return Err(err);
                }
                Some(Ok(batch)) => {
                    let mut raw_records = Vec::with_capacity(batch.data.len());
                    let mut canonical = Vec::with_capacity(batch.data.len());
                    for item in batch.data {
                        if let Some(tx) = &item.canonical {
                            canonical.push(tx.clone());
                            session.transactions_imported += 1;
                        } else {
                            session.transactions_failed += 1;
                        }
                        raw_records.push(item.raw);
                    }
                    if let Some(last) = raw_records.last_mut() {
                        last.cursor = Some(serialize_cursor_state(&batch.cursor));
                    }
                    self.db.upsert_raw_records(&session.id, &raw_records)?;
                    if !canonical.is_empty() {
                        self.db.insert_transaction_batch(&session.id, &canonical)?;
                    }
                }
            }
        }

        session.finalize(SessionStatus::Completed, Utc::now(), None, None);
        self.db.finalize_data_source(&session)?;
        Ok(session)
    }

    /// Resume cursor for a session: the cursor attached to the most recently
    /// persisted raw record, if any (spec §5 "leave the session started so a
    /// later run can resume").
    fn latest_cursor(&self, data_source_id: &str) -> IngestResult<Option<CursorState>> {
        let conn = self.db.conn.lock().expect("connection mutex poisoned");
        let cursor_text: Option<String> = conn
            .query_row(
                "SELECT cursor FROM external_transaction_data
                 WHERE data_source_id = ?1 AND cursor IS NOT NULL
                 ORDER BY rowid DESC LIMIT 1",
                rusqlite::params![data_source_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor_text
            .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
            .and_then(|v| deserialize_cursor_state(&v)))
    }
}

/// Exposed `pub(crate)` so the `balance` CLI command (spec §6) can resolve
/// the same account id an import would have used, without standing up a real
/// accounts table.
pub(crate) fn deterministic_account_id(chain_or_exchange: &str, kind: AccountKind, identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chain_or_exchange.as_bytes());
    hasher.update(b":");
    hasher.update(format!("{kind:?}").as_bytes());
    hasher.update(b":");
    hasher.update(identifier.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Accounts aren't a persisted table (spec §6's persisted-state list doesn't
/// include one — account identity is owned by whatever embeds this engine);
/// the id is derived deterministically from `(chain, kind, identifier)` so
/// repeated imports against the same address resolve to the same account and
/// `findLatestIncomplete` can find a prior `started` session for it.
fn ensure_account(
    chain_or_exchange: &str,
    identifier: &str,
    kind: AccountKind,
    parent_account_id: Option<String>,
    derivation_path: Option<String>,
) -> Account {
    Account {
        id: deterministic_account_id(chain_or_exchange, kind, identifier),
        user_id: DEFAULT_USER_ID.to_string(),
        kind,
        identifier: identifier.to_string(),
        chain_or_exchange: chain_or_exchange.to_string(),
        parent_account_id,
        derivation_path,
    }
}

fn has_activity_blocking(backend: &Arc<dyn ImportBackend>, chain: &str, address: &str) -> bool {
    let backend = Arc::clone(backend);
    let chain = chain.to_string();
    let address = address.to_string();
    tokio::task::block_in_place(move || {
        tokio::runtime::Handle::current().block_on(async move {
            let manager = match backend.blockchain_manager(&chain, &address).await {
                Ok(m) => m,
                Err(_) => return false,
            };
            let stream =
                manager.execute_with_failover(chain.clone(), ProviderOp::GetXpubActivity, StreamType::Normal, None);
            futures::pin_mut!(stream);
            matches!(stream.next().await, Some(Ok(batch)) if !batch.data.is_empty())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalTransaction, Direction, Movements, Operation as ModelOperation, OperationCategory, SourceType, TransactionStatus, AssetMovement};
    use crate::providers::manager::{ProviderClient, RawPage};
    use crate::providers::registry::{find_provider, ProviderEntry};
    use crate::normalize::NormalizationError;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    // `shutdown_requested` backs a single process-wide flag. Tests run
    // concurrently on separate threads in the same process, so any test that
    // depends on the flag's value (setting it, or assuming it's clear) holds
    // this lock across its `.await`s to avoid racing the other one.
    static SHUTDOWN_FLAG_LOCK: once_cell::sync::Lazy<AsyncMutex<()>> =
        once_cell::sync::Lazy::new(|| AsyncMutex::new(()));

    struct StubClient {
        entry: &'static ProviderEntry,
        pages: AsyncMutex<Vec<RawPage>>,
    }

    #[async_trait]
    impl ProviderClient for StubClient {
        fn entry(&self) -> &'static ProviderEntry {
            self.entry
        }

        async fn fetch_page(&self, _params: HashMap<String, String>) -> IngestResult<RawPage> {
            let mut pages = self.pages.lock().await;
            if pages.is_empty() {
                return Err(IngestError::Internal("exhausted".to_string()));
            }
            Ok(pages.remove(0))
        }

        fn normalize(&self, raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
            let id = raw["id"].as_str().unwrap_or_default().to_string();
            let mut movements = Movements::default();
            movements.inflows.push(AssetMovement::new("BTC", rust_decimal::Decimal::new(1, 1), Direction::In));
            Ok(CanonicalTransaction {
                id: String::new(),
                external_id: id,
                source_name: "bitcoin".to_string(),
                source_type: SourceType::Blockchain,
                datetime: Utc::now(),
                status: TransactionStatus::Success,
                operation: ModelOperation::new(OperationCategory::Transfer, "deposit"),
                movements,
                fees: Default::default(),
                blockchain_metadata: None,
                notes: Vec::new(),
                excluded_from_accounting: false,
            })
        }

        fn event_id(&self, raw: &serde_json::Value) -> String {
            raw["id"].as_str().unwrap_or_default().to_string()
        }
    }

    struct StubBackend;

    #[async_trait]
    impl ImportBackend for StubBackend {
        async fn blockchain_manager(&self, _chain: &str, _address: &str) -> IngestResult<Arc<ProviderManager>> {
            let entry = find_provider("bitcoin", "blockstream").unwrap();
            let client = Arc::new(StubClient {
                entry,
                pages: AsyncMutex::new(vec![RawPage {
                    items: vec![serde_json::json!({"id": "tx1"}), serde_json::json!({"id": "tx2"})],
                    next_cursor: Some(crate::cursor::PaginationCursor::BlockNumber { value: 100 }),
                    is_last_page: true,
                }]),
            });
            let mut manager = ProviderManager::new();
            manager.register(client);
            Ok(Arc::new(manager))
        }

        async fn exchange_manager(&self, _exchange: &str) -> IngestResult<Arc<ProviderManager>> {
            Ok(Arc::new(ProviderManager::new()))
        }
    }

    struct NeverExtended;
    impl Normalizer for NeverExtended {
        fn chain_or_exchange(&self) -> &'static str {
            "bitcoin"
        }
        fn normalize(&self, _raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn single_address_import_persists_and_completes() {
        let _guard = SHUTDOWN_FLAG_LOCK.lock().await;
        let db = Arc::new(Database::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(Arc::clone(&db), Arc::new(StubBackend));

        let sessions = orchestrator
            .import_blockchain("bitcoin", "bc1qtest", None, &NeverExtended)
            .await
            .unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Completed);
        assert_eq!(sessions[0].transactions_imported, 2);

        let txs = db.get_transactions(&Default::default()).unwrap();
        assert_eq!(txs.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_request_leaves_the_session_started_and_resumable() {
        let _guard = SHUTDOWN_FLAG_LOCK.lock().await;
        clear_shutdown();
        request_shutdown();

        let db = Arc::new(Database::open_in_memory().unwrap());
        let orchestrator = Orchestrator::new(Arc::clone(&db), Arc::new(StubBackend));

        let sessions = orchestrator
            .import_blockchain("bitcoin", "bc1qcancel", None, &NeverExtended)
            .await
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Started);
        assert_eq!(sessions[0].transactions_imported, 0);

        clear_shutdown();
        let resumed = orchestrator
            .import_blockchain("bitcoin", "bc1qcancel", None, &NeverExtended)
            .await
            .unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].id, sessions[0].id);
        assert_eq!(resumed[0].status, SessionStatus::Completed);
        assert_eq!(resumed[0].transactions_imported, 2);
    }

    #[tokio::test]
    async fn reimporting_a_started_session_resumes_instead_of_duplicating() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let account = ensure_account("bitcoin", "bc1qresume", AccountKind::BlockchainAddress, None, None);
        let started = IngestionSession::start(account.id.clone(), "sess-started".to_string(), Utc::now());
        db.create_data_source(&started).unwrap();

        let orchestrator = Orchestrator::new(Arc::clone(&db), Arc::new(StubBackend));
        let resumed = orchestrator.find_latest_incomplete(&account.id).unwrap();
        assert!(resumed.is_some());
        assert_eq!(resumed.unwrap().id, "sess-started");
    }
}
