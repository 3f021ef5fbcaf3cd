//! Contract sync gateway: entry point.
//!
//! Serves the read façade over HTTP for the browser client, watches the
//! contract's event log to keep the shared cache current, and reconciles the
//! transactions the browser reports once they confirm.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use contract_sync::api::{self, AppState};
use contract_sync::review::HttpReviewService;
use contract_sync::storage::IpfsStore;
use contract_sync::{ChainClient, Config, EntityCache, EventWatcher, HttpTransport, ReadFacade, Tracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        "Syncing contract {} on chain {} via {}",
        config.contract_address, config.chain_id, config.rpc_url
    );

    // The gateway never signs: writes are reported by the browser wallet.
    let transport = HttpTransport::new(
        &config.rpc_url,
        config.contract_address.clone(),
        config.sync.rpc_timeout,
    )?;
    let client = ChainClient::new(Arc::new(transport), config.contract_address.clone(), &config.sync);
    let cache = EntityCache::new(client.clone(), &config.sync);
    let tracker = Tracker::new(client.clone(), cache.clone(), &config.sync);
    let facade = ReadFacade::new(cache.clone(), tracker.clone());

    // ─── Background event watcher ─────────────────────────
    let shutdown = CancellationToken::new();
    let watcher = EventWatcher::new(client, cache, config.start_block, &config.sync);
    let watcher_task = tokio::spawn(watcher.run(shutdown.clone()));

    // ─── Off-chain collaborators ──────────────────────────
    let review = HttpReviewService::new(
        &config.review_api_url,
        config.review_api_key.clone(),
        config.sync.rpc_timeout,
    )?;
    let credentials = config
        .ipfs_project_id
        .as_deref()
        .zip(config.ipfs_project_secret.as_deref());
    let storage = IpfsStore::new(
        &config.ipfs_api_url,
        &config.ipfs_gateway_url,
        credentials,
        config.sync.rpc_timeout,
    )?;

    // ─── REST API ─────────────────────────────────────────
    let app = api::router(Arc::new(AppState {
        facade,
        tracker: tracker.clone(),
        review: Arc::new(review),
        storage: Arc::new(storage),
        min_review_score: config.sync.min_review_score,
    }));

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
                shutdown.cancel();
            }
        })
        .await?;

    tracker.shutdown();
    watcher_task.await?;
    Ok(())
}
