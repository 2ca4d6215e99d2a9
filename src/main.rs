mod chat;
mod config;
mod engine;
mod providers;
mod retrieval;
mod server;
mod sessions;
mod state;
mod tools;
mod traits;
mod types;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::providers::OpenAiCompatibleProvider;
use crate::retrieval::RetrievalClient;
use crate::server::{build_router, AppState};
use crate::sessions::SessionRegistry;
use crate::state::{ChatStore, SqliteChatStore};
use crate::traits::{ModelProvider, Retriever};

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = AppConfig::load(&config_path)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::new(&config.state.db_path).await?);

    let provider: Arc<dyn ModelProvider> = Arc::new(
        OpenAiCompatibleProvider::new(&config.provider.base_url, &config.provider.api_key)
            .map_err(|e| anyhow::anyhow!(e))?,
    );
    let retriever: Arc<dyn Retriever> = Arc::new(RetrievalClient::new(&config.retrieval)?);
    let registry = Arc::new(Mutex::new(SessionRegistry::new(&config.sessions)));

    let state = AppState {
        store,
        provider,
        retriever,
        model: config.provider.model.clone(),
        system_prompt: config.chat.system_prompt.clone(),
        registry,
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, model = %config.provider.model, "ragsmith listening");
    axum::serve(listener, app).await?;
    Ok(())
}
