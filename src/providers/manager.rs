//! Provider manager — the failover scheduler (C8).
//!
//! Grounded on the teacher's `apis::manager::ApiManager` (per-API client map,
//! `get_all_stats()` aggregation, `LazyLock<Arc<ApiManager>>` singleton shape)
//! generalized from "one client per API" to "one client per (chain, provider)
//! registry entry", and on `connectivity::state` for the health/circuit pairing
//! that drives ordering. The actual HTTP fetch + normalization per provider is
//! behind the [`ProviderClient`] trait so this module stays testable without a
//! network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::circuit::CircuitState;
use crate::cursor::{
    resolve_resume_cursor, CursorState, CursorStateMetadata, CursorTypeTag, PaginationCursor,
    ReplayWindow, ResumeRequest, resume_request_to_params,
};
use crate::dedup::DedupWindow;
use crate::errors::{IngestError, IngestResult};
use crate::health::{score, ProviderHealth};
use crate::model::{CanonicalTransaction, RawRecord};
use crate::normalize::NormalizationError;
use crate::providers::registry::{Operation, ProviderEntry, StreamType};
use crate::ratelimit::{RateLimitHints, RateLimiter, RateLimiterConfig};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_DEDUP_WINDOW_SIZE: usize = 4096;

pub struct RawPage {
    pub items: Vec<serde_json::Value>,
    pub next_cursor: Option<PaginationCursor>,
    pub is_last_page: bool,
}

/// One ingested item paired with the raw payload it was derived from, so the
/// orchestrator can persist both (spec §4.8 "never silently drop").
pub struct TxWithRaw {
    pub canonical: Option<CanonicalTransaction>,
    pub raw: RawRecord,
}

/// Implemented once per `(chain, providerName)`. `fetch_page` performs the
/// actual native HTTP call; `normalize`/`event_id` wrap the matching C9 mapper.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn entry(&self) -> &'static ProviderEntry;

    async fn fetch_page(&self, params: HashMap<String, String>) -> IngestResult<RawPage>;

    fn normalize(&self, raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError>;

    fn event_id(&self, raw: &serde_json::Value) -> String;
}

struct ProviderRuntime {
    health: Mutex<ProviderHealth>,
    circuit: Mutex<CircuitState>,
    rate_limiter: RateLimiter,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
}

impl ProviderRuntime {
    fn new(entry: &ProviderEntry) -> Self {
        Self {
            health: Mutex::new(ProviderHealth::initial(Utc::now())),
            circuit: Mutex::new(CircuitState::default()),
            rate_limiter: RateLimiter::new(RateLimiterConfig {
                requests_per_second: entry.default_requests_per_second,
                burst_limit: entry.default_burst_limit,
                requests_per_minute: None,
                requests_per_hour: None,
            }),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchStats {
    pub fetched: usize,
    pub deduplicated: usize,
    pub yielded: usize,
}

pub struct Batch {
    pub data: Vec<TxWithRaw>,
    pub provider_name: String,
    pub cursor: CursorState,
    pub is_complete: bool,
    pub stats: BatchStats,
}

pub struct ProviderManagerStats {
    pub provider_name: String,
    pub is_healthy: bool,
    pub circuit_open: bool,
    pub average_response_time_ms: f64,
    pub error_rate: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    /// `None` when `total_requests == 0` (nothing attempted yet).
    pub success_rate: Option<f64>,
}

/// Owns per-provider runtime state (health/circuit/rate-limiter) and the
/// registered clients. One instance per process, mirroring the teacher's
/// `get_api_manager()` singleton.
pub struct ProviderManager {
    runtimes: HashMap<String, Arc<ProviderRuntime>>,
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self {
            runtimes: HashMap::new(),
            clients: HashMap::new(),
        }
    }

    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        let entry = client.entry();
        self.runtimes
            .entry(entry.provider_name.to_string())
            .or_insert_with(|| Arc::new(ProviderRuntime::new(entry)));
        self.clients.insert(entry.provider_name.to_string(), client);
    }

    /// Aggregate per-provider request counts and health, for the CLI's
    /// session/envelope metadata. Counts are tracked separately from
    /// `ProviderHealth` because health averages decay (EMA / exponential
    /// error-rate) while operators also want raw lifetime totals.
    pub async fn stats(&self) -> Vec<ProviderManagerStats> {
        let mut out = Vec::new();
        for (name, runtime) in &self.runtimes {
            let health = runtime.health.lock().await;
            let circuit = runtime.circuit.lock().await;
            let total = runtime.total_requests.load(Ordering::Relaxed);
            let successful = runtime.successful_requests.load(Ordering::Relaxed);
            out.push(ProviderManagerStats {
                provider_name: name.clone(),
                is_healthy: health.is_healthy,
                circuit_open: !circuit.is_available(Utc::now()),
                average_response_time_ms: health.average_response_time_ms,
                error_rate: health.error_rate,
                total_requests: total,
                successful_requests: successful,
                success_rate: if total == 0 {
                    None
                } else {
                    Some(successful as f64 / total as f64)
                },
            });
        }
        out.sort_by(|a, b| a.provider_name.cmp(&b.provider_name));
        out
    }

    /// Orders registered providers for `chain`/`operation`/`stream_type` by
    /// descending health score, filtering out unsupported, unhealthy-missing,
    /// or API-key-less candidates (spec §4.7 step 1). Ties break lexicographically
    /// by provider name.
    async fn candidates(
        &self,
        chain: &str,
        operation: Operation,
        stream_type: StreamType,
    ) -> Vec<Arc<dyn ProviderClient>> {
        let mut scored: Vec<(i32, String, Arc<dyn ProviderClient>)> = Vec::new();
        let now = Utc::now();
        for (name, client) in &self.clients {
            let entry = client.entry();
            if entry.chain != chain || !entry.supports(operation, stream_type) {
                continue;
            }
            let Some(runtime) = self.runtimes.get(name) else {
                continue;
            };
            let health = runtime.health.lock().await;
            let circuit = runtime.circuit.lock().await;
            let s = score(&health, &circuit, entry.default_requests_per_second, now);
            scored.push((s, name.clone(), client.clone()));
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.into_iter().map(|(_, _, c)| c).collect()
    }

    /// Implements `executeWithFailover` (spec §4.7) as an owned stream of
    /// batches. Dropping the returned stream cancels the in-flight task at its
    /// next suspension point (cooperative cancellation, spec §5).
    pub fn execute_with_failover(
        self: &Arc<Self>,
        chain: String,
        operation: Operation,
        stream_type: StreamType,
        resume_cursor: Option<CursorState>,
    ) -> impl Stream<Item = IngestResult<Batch>> {
        let (tx, rx) = mpsc::channel::<IngestResult<Batch>>(1);
        let manager = Arc::clone(self);

        tokio::spawn(async move {
            manager
                .run_failover_loop(chain, operation, stream_type, resume_cursor, tx)
                .await;
        });

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
    }

    async fn run_failover_loop(
        &self,
        chain: String,
        operation: Operation,
        stream_type: StreamType,
        resume_cursor: Option<CursorState>,
        tx: mpsc::Sender<IngestResult<Batch>>,
    ) {
        let candidates = self.candidates(&chain, operation, stream_type).await;
        if candidates.is_empty() {
            let _ = tx
                .send(Err(IngestError::NotFound {
                    what: format!("no available provider for chain {chain}"),
                }))
                .await;
            return;
        }

        let mut current_cursor = resume_cursor;
        let mut dedup_window = DedupWindow::new(DEFAULT_DEDUP_WINDOW_SIZE);

        for (idx, client) in candidates.iter().enumerate() {
            let is_failover = idx > 0;
            let entry = client.entry();
            let Some(runtime) = self.runtimes.get(entry.provider_name) else {
                continue;
            };

            let resume_request = resolve_resume_cursor(
                current_cursor.as_ref(),
                entry.provider_name,
                entry.supported_cursor_types,
                is_failover,
                ReplayWindow { blocks: 2, seconds: 300 },
            );

            match self
                .drive_provider(
                    client.as_ref(),
                    runtime,
                    entry,
                    resume_request,
                    &mut dedup_window,
                    &tx,
                )
                .await
            {
                ProviderOutcome::Completed(final_cursor) => {
                    current_cursor = final_cursor.or(current_cursor);
                    return;
                }
                ProviderOutcome::Cancelled => return,
                ProviderOutcome::Failed(last_cursor) => {
                    current_cursor = last_cursor.or(current_cursor);
                    continue;
                }
            }
        }

        let _ = tx
            .send(Err(IngestError::Internal(format!(
                "all providers exhausted for chain {chain}"
            ))))
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_provider(
        &self,
        client: &dyn ProviderClient,
        runtime: &Arc<ProviderRuntime>,
        entry: &'static ProviderEntry,
        mut resume_request: ResumeRequest,
        dedup_window: &mut DedupWindow,
        tx: &mpsc::Sender<IngestResult<Batch>>,
    ) -> ProviderOutcome {
        let mut last_cursor: Option<CursorState> = None;
        let mut total_fetched: u64 = 0;

        loop {
            let params = resume_request_to_params(&resume_request);
            runtime.rate_limiter.acquire().await;

            let mut attempt = 0u32;
            let page = loop {
                runtime.total_requests.fetch_add(1, Ordering::Relaxed);
                match client.fetch_page(params.clone()).await {
                    Ok(page) => {
                        runtime.successful_requests.fetch_add(1, Ordering::Relaxed);
                        let mut health = runtime.health.lock().await;
                        health.record_success(0.0, Utc::now());
                        let mut circuit = runtime.circuit.lock().await;
                        circuit.record_success(Utc::now());
                        break Ok(page);
                    }
                    Err(err) => {
                        runtime
                            .rate_limiter
                            .on_response(retry_hints_for(&err))
                            .await;
                        if err.is_retryable() && attempt < DEFAULT_MAX_RETRIES {
                            attempt += 1;
                            let backoff = Duration::from_millis(200u64 * 2u64.pow(attempt));
                            tokio::time::sleep(backoff).await;
                            continue;
                        }
                        let mut health = runtime.health.lock().await;
                        health.record_failure(err.to_string(), Utc::now());
                        let mut circuit = runtime.circuit.lock().await;
                        circuit.record_failure(Utc::now());
                        break Err(err);
                    }
                }
            };

            let page = match page {
                Ok(page) => page,
                Err(_) => return ProviderOutcome::Failed(last_cursor),
            };

            let fetched = page.items.len();
            total_fetched += fetched as u64;

            let survivors = crate::dedup::deduplicate(page.items, dedup_window, |raw| {
                client.event_id(raw)
            });
            let deduplicated = fetched - survivors.len();

            let mut records = Vec::with_capacity(survivors.len());
            for raw in survivors {
                match client.normalize(&raw) {
                    Ok(canonical) => {
                        records.push(TxWithRaw {
                            canonical: Some(canonical),
                            raw: raw_record(entry, &raw, client.event_id(&raw), None),
                        });
                    }
                    Err(NormalizationError::Skip { reason }) => {
                        records.push(TxWithRaw {
                            canonical: None,
                            raw: raw_record(entry, &raw, client.event_id(&raw), Some(reason)),
                        });
                    }
                    Err(NormalizationError::Invalid { reason }) => {
                        records.push(TxWithRaw {
                            canonical: None,
                            raw: raw_record(entry, &raw, client.event_id(&raw), Some(reason)),
                        });
                    }
                }
            }

            let yielded = records.len();
            let cursor_state = CursorState {
                primary: page
                    .next_cursor
                    .clone()
                    .unwrap_or(PaginationCursor::Timestamp {
                        value: Utc::now().timestamp_millis() as u64,
                    }),
                alternatives: Vec::new(),
                last_transaction_id: records
                    .last()
                    .map(|r| r.raw.external_id.clone()),
                total_fetched,
                metadata: CursorStateMetadata {
                    provider_name: entry.provider_name.to_string(),
                    updated_at: Utc::now(),
                    is_complete: Some(page.is_last_page),
                    fetch_status: Some("ok".to_string()),
                },
            };
            last_cursor = Some(cursor_state.clone());

            let batch = Batch {
                data: records,
                provider_name: entry.provider_name.to_string(),
                cursor: cursor_state,
                is_complete: page.is_last_page,
                stats: BatchStats {
                    fetched,
                    deduplicated,
                    yielded,
                },
            };

            if tx.send(Ok(batch)).await.is_err() {
                return ProviderOutcome::Cancelled;
            }

            if page.is_last_page {
                return ProviderOutcome::Completed(last_cursor);
            }

            resume_request = match page.next_cursor {
                Some(PaginationCursor::PageToken { value, .. }) => ResumeRequest::PageToken(value),
                Some(PaginationCursor::BlockNumber { value }) => ResumeRequest::BlockNumber(value),
                Some(PaginationCursor::Timestamp { value }) => ResumeRequest::Timestamp(value),
                None => ResumeRequest::FromBeginning,
            };
        }
    }
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

enum ProviderOutcome {
    Completed(Option<CursorState>),
    Failed(Option<CursorState>),
    Cancelled,
}

fn raw_record(
    entry: &ProviderEntry,
    raw: &serde_json::Value,
    external_id: String,
    processing_error: Option<String>,
) -> RawRecord {
    use crate::model::ProcessingStatus;
    RawRecord {
        data_source_id: String::new(),
        provider_name: entry.provider_name.to_string(),
        external_id,
        cursor: None,
        source_address: None,
        raw_payload: raw.clone(),
        normalized_payload: None,
        processing_status: if processing_error.is_some() {
            ProcessingStatus::Failed
        } else {
            ProcessingStatus::Processed
        },
        processing_error,
    }
}

fn retry_hints_for(err: &IngestError) -> RateLimitHints {
    match err {
        IngestError::RateLimited { retry_after_ms, .. } => RateLimitHints {
            retry_after_secs: retry_after_ms.map(|ms| ms / 1000),
            reset_at_epoch_secs: None,
        },
        _ => RateLimitHints::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::registry::find_provider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use futures::StreamExt;

    struct MockClient {
        entry: &'static ProviderEntry,
        pages: Mutex<Vec<RawPage>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderClient for MockClient {
        fn entry(&self) -> &'static ProviderEntry {
            self.entry
        }

        async fn fetch_page(&self, _params: HashMap<String, String>) -> IngestResult<RawPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().await;
            if pages.is_empty() {
                return Err(IngestError::Internal("no more pages".to_string()));
            }
            Ok(pages.remove(0))
        }

        fn normalize(&self, raw: &serde_json::Value) -> Result<CanonicalTransaction, NormalizationError> {
            Err(NormalizationError::Skip {
                reason: format!("mock skip for {raw}"),
            })
        }

        fn event_id(&self, raw: &serde_json::Value) -> String {
            raw["id"].as_str().unwrap_or_default().to_string()
        }
    }

    #[tokio::test]
    async fn single_provider_streams_until_complete() {
        let entry = find_provider("bitcoin", "blockstream").unwrap();
        let client = Arc::new(MockClient {
            entry,
            pages: Mutex::new(vec![
                RawPage {
                    items: vec![serde_json::json!({"id": "a"}), serde_json::json!({"id": "b"})],
                    next_cursor: Some(PaginationCursor::BlockNumber { value: 100 }),
                    is_last_page: false,
                },
                RawPage {
                    items: vec![serde_json::json!({"id": "c"})],
                    next_cursor: Some(PaginationCursor::BlockNumber { value: 101 }),
                    is_last_page: true,
                },
            ]),
            calls: AtomicUsize::new(0),
        });

        let mut manager = ProviderManager::new();
        manager.register(client);
        let manager = Arc::new(manager);

        let stream = manager.execute_with_failover(
            "bitcoin".to_string(),
            Operation::GetAddressTransactions,
            StreamType::Normal,
            None,
        );
        tokio::pin!(stream);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.stats.fetched, 2);
        assert!(!first.is_complete);

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.stats.fetched, 1);
        assert!(second.is_complete);

        assert!(stream.next().await.is_none());
    }
}
