use anyhow::Context;
use resonance::api::{self, app_state::AppState};
use resonance::cache::create_intent_store;
use resonance::cognition::{ActivePersonas, BioSignalMonitor, TurnAuction};
use resonance::config::loader::ConfigLoader;
use resonance::consolidation::ConsolidationScheduler;
use resonance::index::{EmbeddingModel, create_embedding_model};
use resonance::inference::{
    HttpTextInference, InferenceDreamGenerator, ModelWaterfall, WebSocketLiveConnector,
};
use resonance::migration::{load_legacy_events, migrate_legacy_events};
use resonance::observability::{
    AppMetrics, ObservabilityState, create_observability_router, init_tracing, run_health_check,
};
use resonance::session::SessionDeps;
use resonance::storage::{DreamGenerator, GraphSettings, StorageFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging).context("failed to initialise tracing")?;
    ConfigLoader::validate(&config).context("invalid configuration")?;
    info!(
        app = %config.app_name,
        environment = %config.environment,
        "Configuration loaded"
    );
    let config = Arc::new(config);

    let embedder: Arc<dyn EmbeddingModel> =
        Arc::from(create_embedding_model(&config.embedding).context("failed to build embedding model")?);
    let settings = GraphSettings {
        ema_alpha: config.consolidation.ema_alpha,
    };
    let repo = StorageFactory::create(&config.database, embedder, settings)
        .await
        .context("failed to open graph store")?;
    info!(backend = ?config.database.backend, "Graph store initialized");

    // 迁移模式：导入旧格式事件后退出
    if let Ok(path) = std::env::var("RESONANCE_MIGRATE_FROM") {
        let events = load_legacy_events(&PathBuf::from(&path))
            .with_context(|| format!("failed to read legacy events from {}", path))?;
        let progress = migrate_legacy_events(repo.as_ref(), events).await?;
        info!(
            migrated = progress.events_migrated,
            skipped = progress.events_skipped,
            edges = progress.edges_created,
            errors = progress.errors.len(),
            "Legacy events migrated"
        );
        return Ok(());
    }

    let metrics = Arc::new(AppMetrics::default());
    let intents = create_intent_store(&config.cache)
        .await
        .context("failed to connect intent store")?;

    let text = Arc::new(HttpTextInference::new(&config.inference)?);
    let waterfall = Arc::new(ModelWaterfall::new(
        text,
        config.inference.text_models.clone(),
        Duration::from_secs(config.inference.request_timeout_secs),
    ));
    let dreams: Arc<dyn DreamGenerator> = Arc::new(InferenceDreamGenerator::new(waterfall.clone()));

    let scheduler = Arc::new(ConsolidationScheduler::new(
        repo.clone(),
        intents.clone(),
        Some(dreams),
        metrics.clone(),
        config.consolidation.clone(),
    ));
    match scheduler.recover().await {
        Ok(n) => info!(recovered = n, "Consolidation scheduler ready"),
        Err(e) => warn!(error = %e, "Could not scan persisted consolidation intents"),
    }

    let deps = SessionDeps {
        repo: repo.clone(),
        live: Arc::new(WebSocketLiveConnector::new(config.inference.clone())),
        waterfall,
        auction: Arc::new(TurnAuction::new(config.auction.clone())),
        scheduler: scheduler.clone(),
        presence: Arc::new(ActivePersonas::new()),
        biosignal: Arc::new(BioSignalMonitor::new(config.cognition.biosignal.clone())),
        metrics: metrics.clone(),
        config: config.clone(),
    };

    let observability_state = Arc::new(ObservabilityState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        metrics,
    ));
    observability_state
        .add_health_check(run_health_check("graph_store", StorageFactory::health_check(repo.as_ref())).await)
        .await;
    observability_state
        .add_health_check(run_health_check("intent_store", intents.scan()).await)
        .await;

    let router =
        create_observability_router(observability_state).merge(api::create_router(AppState::new(deps)));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error");
    }

    info!("Server stopped, rescuing pending consolidations");
    scheduler.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
