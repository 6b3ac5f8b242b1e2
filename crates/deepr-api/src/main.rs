// Deepr API server
// Decision: ships with in-memory provider fakes; real provider adapters
// register through the ProviderRegistry without touching the engine

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deepr_api::{auth::AuthConfig, router, AppState};
use deepr_contracts::ProviderKind;
use deepr_core::memory::{FakeDocumentStore, FakeProvider};
use deepr_core::provider::ProviderRegistry;
use deepr_core::{DeeprConfig, SystemClock, TruncationSummarizer};
use deepr_engine::Deepr;
use deepr_storage::{ArtifactStore, Database};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deepr_api=debug,deepr_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("deepr-api starting...");

    let database_url =
        std::env::var("DEEPR_DATABASE_URL").unwrap_or_else(|_| "sqlite://deepr.db".to_string());
    let db = Database::connect(&database_url)
        .await
        .context("Failed to open database")?;
    tracing::info!(url = %database_url, "Database ready");

    let blob_dir = std::env::var("DEEPR_BLOB_DIR").unwrap_or_else(|_| "./blobs".to_string());
    let artifacts = ArtifactStore::new(blob_dir);

    let mut providers = ProviderRegistry::new();
    for kind in ProviderKind::all() {
        providers.register(Arc::new(FakeProvider::new(*kind)));
    }
    tracing::warn!("Running with in-memory provider fakes; configure real adapters for production");

    let config = DeeprConfig::from_env();
    let engine = Deepr::init(
        config,
        db,
        artifacts,
        providers,
        Arc::new(FakeDocumentStore::new()),
        Arc::new(TruncationSummarizer::new()),
        Arc::new(SystemClock),
    )
    .await
    .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let state = AppState {
        engine: engine.clone(),
        auth: AuthConfig::from_env(),
    };
    let app = router(state);

    let addr = std::env::var("DEEPR_LISTEN").unwrap_or_else(|_| "0.0.0.0:9000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    engine.shutdown();
    Ok(())
}
