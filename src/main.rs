//! Trendcast runtime
//!
//! Wires the Jupiter feed, the OpenRouter-backed gateway, the state store and
//! the publish hub into the analysis loop, and serves subscribers over
//! WebSocket until Ctrl-C.
//!
//! Usage:
//!   cargo run --release
//!
//! See `AppConfig` for the environment variables (a `.env` file is honoured).

use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use trendcast::config::AppConfig;
use trendcast::feed::jupiter::JupiterFeed;
use trendcast::gateway::backend::OpenRouterBackend;
use trendcast::hub::ws;
use trendcast::{AnalysisPipeline, InferenceGateway, PublishHub, StateStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Trendcast starting");

    let config = AppConfig::from_env()?;
    info!("   ├─ Model: {}", config.endpoints.inference_model);
    info!("   ├─ Scan limit: {}", config.pipeline.scan_limit);
    info!(
        "   ├─ Lookback: {}d / {}h / {}m",
        config.gateway.windows.daily.points, config.gateway.windows.hourly.points, config.gateway.windows.minutely.points
    );
    info!("   └─ Listening on: {}", config.endpoints.http_bind);

    // Warm start: rehydrate before the hub takes subscribers
    let store = Arc::new(StateStore::from_config(&config.store)?);
    if let Err(e) = store.initialize(config.store.clear_on_start).await {
        warn!("⚠️  State store initialization failed, continuing without warm start: {}", e);
    }

    let backend = OpenRouterBackend::new(
        &config.endpoints.openrouter_base_url,
        &config.endpoints.openrouter_api_key,
        &config.endpoints.inference_model,
    )?;
    let gateway = Arc::new(InferenceGateway::new(Arc::new(backend), config.gateway.clone()));
    let feed = Arc::new(JupiterFeed::new(&config.endpoints.jupiter_api_endpoint, config.gateway.windows)?);
    let hub = Arc::new(PublishHub::new(store.clone(), config.hub.clone()));
    let pipeline = Arc::new(AnalysisPipeline::new(
        feed,
        gateway,
        store,
        hub.clone(),
        config.pipeline.clone(),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);

    let heartbeat_task = tokio::spawn(hub.clone().run_heartbeat(stop_rx.clone()));

    let pipeline_stop = stop_rx.clone();
    let pipeline_task = tokio::spawn(async move { pipeline.run(pipeline_stop).await });

    let listener = tokio::net::TcpListener::bind(&config.endpoints.http_bind).await?;
    let mut server_stop = stop_rx.clone();
    let server_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = server_stop.wait_for(|stopped| *stopped).await;
        };
        if let Err(e) = axum::serve(listener, ws::router(hub)).with_graceful_shutdown(shutdown).await {
            error!("❌ HTTP server failed: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received, finishing the current cycle...");
    stop_tx.send(true)?;

    for (name, task) in [("pipeline", pipeline_task), ("heartbeat", heartbeat_task), ("http", server_task)] {
        if let Err(e) = task.await {
            error!("❌ {} task panicked: {}", name, e);
        }
    }

    info!("👋 Trendcast stopped");
    Ok(())
}
