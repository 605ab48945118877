mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::HubConfig;
use quire_core::auth::StaticAuthenticator;
use quire_core::crypto::{AesGcmCipher, Cipher};
use quire_core::sync::SyncHub;
use quire_core::DualStore;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quire_hub=info".parse()?)
                .add_directive("quire_core=info".parse()?),
        )
        .init();

    let config = HubConfig::from_env()?;
    tracing::info!("Starting quire-hub with config: {:?}", config);

    let cipher = match config.encryption_key.as_deref() {
        Some(key) => Some(Arc::new(AesGcmCipher::from_base64_key(key)?) as Arc<dyn Cipher>),
        None => {
            tracing::warn!("QUIRE_ENCRYPTION_KEY is not set; private notes will be rejected");
            None
        }
    };
    if let Some(parent) = config.db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = DualStore::open(&config.db_path, config.author.clone(), cipher)?;

    let state = AppState::new(
        SyncHub::new(store.into_shared()),
        Arc::new(StaticAuthenticator::new(config.credentials.clone())),
    );
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("quire-hub listening on {}", config.bind_addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {error}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down quire-hub");
}
