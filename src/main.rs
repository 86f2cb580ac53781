//! Planilla ledger API server

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planilla_backend::{api, config::PlanillaConfig, Ledger, Store};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = PlanillaConfig::parse();
    info!(
        db_path = %config.db_path,
        require_close_before_post = config.require_close_before_post,
        "starting planilla ledger"
    );

    let store = Store::open(&config.db_path)
        .with_context(|| format!("Failed to open store at {}", config.db_path))?;
    let ledger = Arc::new(Ledger::new(store, &config));

    let app = api::create_router(ledger)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("API server listening on {}", config.bind);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planilla_backend=debug,planilla=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate's own .env
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
