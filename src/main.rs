#[cfg(feature = "http-server")]
mod api; // REST API (axum)
mod config;
mod handlers;
mod inference;
mod models;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use config::{AppConfig, EnvCredentials};
use handlers::AnalysisHandler;
use inference::{backends, CapabilityCatalog, FallbackOrchestrator, NutritionEngine, RunOptions};
use services::{Database, FoodLogStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    // Load environment variables
    dotenv().ok();

    log::info!("🚀 Starting NutriSnap backend...");

    let config = AppConfig::from_env()?;

    // Credentials are re-read from the environment and env file on every run
    let credentials = Arc::new(EnvCredentials::new(config.env_file.clone()));

    let mut orchestrator = FallbackOrchestrator::new(CapabilityCatalog::new(config.max_candidates), credentials);
    for backend in backends::default_backends(&config) {
        orchestrator = orchestrator.with_backend(backend);
    }
    log::info!(
        "✅ Inference engine initialized (provider: {}, max candidates: {})",
        config.provider,
        config.max_candidates
    );

    let options = RunOptions {
        deadline: config.chain_deadline,
        cancel: None,
    };
    let engine = NutritionEngine::new(Arc::new(orchestrator), config.provider, options);

    // PostgreSQL is optional: analysis keeps working without it
    let store: Option<Arc<dyn FoodLogStore>> = match &config.database_url {
        Some(url) => match Database::new(url).await {
            Ok(db) => {
                log::info!("✅ PostgreSQL database initialized");
                Some(Arc::new(db))
            }
            Err(e) => {
                log::warn!("⚠️ Database connection failed, running without persistence: {}", e);
                None
            }
        },
        None => {
            log::warn!("⚠️ DATABASE_URL not set, running without persistence");
            None
        }
    };

    let handler = Arc::new(AnalysisHandler::new(engine, store));
    log::info!("✅ Analysis handler initialized");

    #[cfg(feature = "http-server")]
    {
        let app = api::create_router(handler.clone());
        let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
        log::info!("🌐 API server listening on {}", config.bind_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    #[cfg(not(feature = "http-server"))]
    {
        log::info!("🎉 Engine ready (HTTP server disabled)");
        let _ = handler;
        shutdown_signal().await;
    }

    log::info!("🛑 Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
}
