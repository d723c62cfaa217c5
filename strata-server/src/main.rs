use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use strata::{EngineConfig, Strata};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod models;
mod state;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "strata-server")]
#[command(about = "HTTP front end for the Strata consolidation engine")]
struct Args {
    /// Path to data directory
    #[arg(short, long, env = "STRATA_DATA_DIR", default_value = "./strata_data")]
    data_dir: PathBuf,

    /// JSON engine configuration
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, env = "STRATA_ADDR", default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Also run consolidation on the configured interval
    #[arg(long)]
    schedule: bool,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/v1/activity", post(api::record_activity))
        .route("/v1/consolidate/all", post(api::consolidate_all))
        .route("/v1/consolidate/:stage", post(api::consolidate_stage))
        .route("/v1/statistics", get(api::statistics))
        .route("/v1/search", post(api::search))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,strata=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    tracing::info!("Opening Strata engine in {}", args.data_dir.display());
    let engine = Strata::open(&args.data_dir, config)
        .await
        .context("failed to initialize engine")?;

    let mut scheduler = if args.schedule {
        Some(engine.schedule()?)
    } else {
        None
    };

    let app = router(Arc::new(AppState { engine }));

    let listener = tokio::net::TcpListener::bind(args.addr).await?;
    tracing::info!("Strata server listening on {}", args.addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await;
    }
    tracing::info!("Strata server stopped");
    Ok(())
}
