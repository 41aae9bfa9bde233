use std::env;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use cas_core::anchor::batch::BatchOrchestrator;
use cas_core::config::CasConfig;
use cas_core::error::{CasError, Result};
use cas_core::events::{EventEmitter, WebhookEventSink};
use cas_core::gc::GarbageCollector;
use cas_core::ledger::ethereum::{EthereumConfig, EthereumLedger};
use cas_core::metrics::BatchMetrics;
use cas_core::state::postgres::{
    PostgresAnchorRepository, PostgresMetadataRepository, PostgresRequestRepository,
};
use cas_core::state::Database;
use cas_core::store::ipfs::{IpfsConfig, IpfsStore};

/// Seconds to let connections settle before the first adapter call.
const STARTUP_DELAY_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "cas")]
#[command(about = "Certification anchor service batch worker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one anchor batch over READY requests
    AnchorReadyRequests,
    /// Emit an anchor event if READY requests are waiting
    EmitAnchorEventIfReady,
    /// Unpin streams whose requests reached a terminal status
    GarbageCollectPinnedStreams,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        error!(error = %e, "Fatal");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    let config = CasConfig::from_env()?;

    if env::var("CAS_ENV").as_deref() != Ok("test") {
        tokio::time::sleep(Duration::from_secs(STARTUP_DELAY_SECS)).await;
    }

    let database_url = require_var("DATABASE_URL")?;
    let db = Database::connect(&database_url).await?;
    db.migrate().await?;

    let requests = Arc::new(PostgresRequestRepository::new(
        db.pool().clone(),
        config.ready_retry_interval_secs,
        config.gc_retention_secs,
    ));
    let metrics = Arc::new(BatchMetrics::new());

    let store = Arc::new(IpfsStore::new(IpfsConfig {
        api_url: env::var("CAS_IPFS_API_URL")
            .unwrap_or_else(|_| "http://localhost:5001".to_string()),
        stream_api_url: env::var("CAS_STREAM_API_URL").ok(),
    }));

    match command {
        Commands::AnchorReadyRequests => {
            let ledger = Arc::new(EthereumLedger::new(EthereumConfig {
                rpc_url: require_var("CAS_ETH_RPC_URL")?,
                private_key_hex: require_var("CAS_ETH_PRIVATE_KEY")?,
                chain_id: require_var("CAS_ETH_CHAIN_ID")?
                    .parse()
                    .map_err(|e| CasError::Config(format!("CAS_ETH_CHAIN_ID: {e}")))?,
                contract_address: env::var("CAS_ETH_CONTRACT_ADDRESS").ok(),
            }));
            let anchors = Arc::new(PostgresAnchorRepository::new(db.pool().clone()));
            let metadata = Arc::new(PostgresMetadataRepository::new(db.pool().clone()));

            let orchestrator = BatchOrchestrator::new(
                store,
                ledger,
                requests,
                anchors,
                metadata,
                None,
                metrics.clone(),
                config,
            );
            let outcome = orchestrator.run_batch().await?;
            info!(?outcome, "anchorReadyRequests finished");
        }
        Commands::EmitAnchorEventIfReady => {
            let sink = Arc::new(WebhookEventSink::new(require_var("CAS_EVENT_WEBHOOK_URL")?));
            let emitter = EventEmitter::new(
                requests,
                sink,
                metrics,
                config.max_stream_limit,
                config.min_stream_count,
            );
            let emitted = emitter.emit_if_ready().await?;
            info!(emitted, "emitAnchorEventIfReady finished");
        }
        Commands::GarbageCollectPinnedStreams => {
            let collector = GarbageCollector::new(requests, store);
            let outcome = collector.run().await?;
            info!(?outcome, "garbageCollectPinnedStreams finished");
        }
    }

    Ok(())
}

fn require_var(name: &str) -> Result<String> {
    env::var(name).map_err(|_| CasError::Config(format!("{name} is not set")))
}
