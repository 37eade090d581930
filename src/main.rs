//! Binary entrypoint: loads config, wires logging, registers a graceful
//! shutdown handler, and dispatches into the CLI (SPEC_FULL §B).
//!
//! Grounded on the teacher's `main.rs` shape (config load -> logger init ->
//! `ctrlc::set_handler` -> hand off to the actual work), generalized from a
//! trading bot's event loop to a one-shot CLI dispatch.

use std::sync::Arc;

use async_trait::async_trait;
use chainledger::cli::{run, Cli};
use chainledger::config::Config;
use chainledger::errors::{IngestError, IngestResult};
use chainledger::orchestrator::{request_shutdown, ImportBackend};
use chainledger::providers::manager::ProviderManager;
use clap::Parser;

const CONFIG_PATH: &str = "chainledger.config.json";

/// No real HTTP-backed provider clients are wired up here: constructing one
/// per `(chain, providerName)` registry entry is the concrete-network
/// integration that spec §1 Non-goals put outside this crate's scope ("raw
/// HTTP socket plumbing"). A production deployment registers real
/// [`chainledger::providers::manager::ProviderClient`] implementations
/// against this same [`ImportBackend`] seam; until then, `import`/`balance`
/// report `NotFound` rather than silently doing nothing.
struct UnconfiguredBackend;

#[async_trait]
impl ImportBackend for UnconfiguredBackend {
    async fn blockchain_manager(&self, chain: &str, _address: &str) -> IngestResult<Arc<ProviderManager>> {
        Err(IngestError::NotFound {
            what: format!("no provider client registered for chain `{chain}` (see UnconfiguredBackend)"),
        })
    }

    async fn exchange_manager(&self, exchange: &str) -> IngestResult<Arc<ProviderManager>> {
        Err(IngestError::NotFound {
            what: format!("no provider client registered for exchange `{exchange}` (see UnconfiguredBackend)"),
        })
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::load(CONFIG_PATH) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("failed to load config: {err:#}");
            std::process::exit(1);
        }
    };

    if let Err(err) = chainledger::logger::init(&config.general.log_level, config.general.log_file.as_deref()) {
        eprintln!("failed to initialize logger: {err:#}");
        std::process::exit(1);
    }

    for problem in chainledger::providers::registry::validate_registry() {
        log::error!(
            target: "provider",
            "registry entry {}/{} is misconfigured: {} (excluded as a failover candidate)",
            problem.chain,
            problem.provider_name,
            problem.reason
        );
    }

    if let Err(err) = ctrlc::set_handler(move || {
        log::warn!(target: "cli", "ctrl-c received, requesting graceful shutdown");
        request_shutdown();
    }) {
        log::warn!(target: "cli", "failed to install ctrl-c handler: {err}");
    }

    let cli = Cli::parse();
    let backend: Arc<dyn ImportBackend> = Arc::new(UnconfiguredBackend);
    let code = run(cli, backend).await;
    std::process::exit(code);
}
