use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use federation_aggregator::blob_client::BlobClient;
use federation_aggregator::config::AggregatorConfig;
use federation_aggregator::coordinator::RoundCoordinator;
use federation_aggregator::domain::ThresholdState;
use federation_aggregator::ledger_client::LedgerClient;
use federation_aggregator::reputation::ReputationStore;
use federation_aggregator::{listener, snapshot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = AggregatorConfig::from_env()?;
    info!("\u{1f680} [AGGREGATOR] starting federation aggregator");

    let ledger = LedgerClient::new(config.gateway_url.clone());
    let blob = BlobClient::new(config.blob_handler_url.clone(), config.model_dir.clone());

    // The only hard exit in this service: we must be able to reach the
    // ledger before we can do anything useful (spec.md §7).
    if let Err(e) = ledger.probe().await {
        error!(error = %e, "\u{274c} [AGGREGATOR] cannot reach ledger at bootstrap, exiting");
        std::process::exit(1);
    }

    let model_dir = std::path::PathBuf::from(&config.model_dir);
    tokio::fs::create_dir_all(&model_dir).await?;

    let state = Arc::new(Mutex::new(ThresholdState::new(
        config.initial_threshold,
        config.threshold_history_size,
    )));
    snapshot::load(&model_dir, &state).await;

    let reputation = ReputationStore::new(state.clone(), &config);
    let coordinator = RoundCoordinator::new(state.clone(), reputation, ledger, blob, config.clone());

    let listener_handle = tokio::spawn(listener::run(config.ws_url.clone(), coordinator));
    let snapshot_handle = tokio::spawn(snapshot::run(model_dir.clone(), state.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("\u{1f6d1} [AGGREGATOR] shutdown signal received, writing final snapshot");
        }
        result = listener_handle => {
            if let Err(e) = result {
                error!(error = %e, "\u{274c} [AGGREGATOR] event listener task panicked");
            }
        }
        result = snapshot_handle => {
            if let Err(e) = result {
                error!(error = %e, "\u{274c} [AGGREGATOR] snapshotter task panicked");
            }
        }
    }

    snapshot::write_once(&model_dir, &state).await;
    Ok(())
}
