mod config;
mod db;
mod error;
mod event;
mod hub;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::services::payment::{PaymentGateway, StripeGateway};
use crate::store::PgStore;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agrochat=info,tower_http=info")),
        )
        .init();

    let config = config::AppConfig::from_env().expect("invalid configuration");
    let port = config.port;

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");

    // Payments are optional: order completion is refused until configured.
    let payments: Option<Arc<dyn PaymentGateway>> = match &config.stripe {
        Some(stripe) => match StripeGateway::new(stripe) {
            Ok(gateway) => {
                tracing::info!(api_base = %stripe.api_base, "payment gateway initialized");
                Some(Arc::new(gateway))
            }
            Err(e) => {
                tracing::warn!(error = %e, "payment gateway unavailable; order completion disabled");
                None
            }
        },
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set; order completion disabled");
            None
        }
    };

    let state = state::AppState::new(config, Arc::new(PgStore::new(pool)), payments);
    let hub = state.hub.clone();

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "agrochat listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested; closing live connections");
            hub.shutdown();
        })
        .await
        .expect("server failed");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
