mod auth;
mod configuration;
mod error;
mod relay;
mod routes;
mod state;
mod store;

use auth::StaticKeyAuthorizer;
use medgemma::bootstrap::HubLoader;
use medgemma::slot::ModelSlot;
use std::sync::Arc;
use store::JsonlStore;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Variables from .env, such as HUGGINGFACE_TOKEN, are visible to the loader
    dotenv::dotenv().ok();

    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let settings = configuration::Settings::new()?;

    let slot = Arc::new(ModelSlot::new(Arc::new(HubLoader::new(
        settings.model.clone(),
    ))));
    if settings.model.preload {
        // A failed preload is retried on first use
        if let Err(e) = slot.get().await {
            tracing::error!("Failed to preload model: {}", e);
        }
    }

    let state = state::AppState {
        slot,
        store: Arc::new(JsonlStore::new(&settings.storage.conversation_dir)),
        authorizer: Arc::new(StaticKeyAuthorizer::new(settings.auth.keys())),
        generation: settings.generation.clone(),
        storage: settings.storage.clone(),
    };

    // Create app with all routes
    let app = routes::configure(state);

    // Run server
    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("MedGemma server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
