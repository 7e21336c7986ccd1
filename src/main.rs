use anyhow::Context;
use std::sync::Arc;

use chatrelay::client::ModelStream;
use chatrelay::config::ServerConfig;
use chatrelay::providers::GroqClient;
use chatrelay::relay::Relay;
use chatrelay::server::{router, AppState};
use chatrelay::session::{LogNotifier, MemorySessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatrelay=debug".into()),
        )
        .with_target(false)
        .with_line_number(true)
        .init();

    let config = ServerConfig::from_env()?;
    let upstream = GroqClient::new(config.model_options(), config.transport_options())
        .context("Failed to build the Groq client")?;
    tracing::info!("Relaying to model {}", upstream.model_name());

    let relay = Relay::new(
        Arc::new(upstream),
        Arc::new(MemorySessionStore::new()),
        Arc::new(LogNotifier),
        config.relay_config(),
    );
    let app = router(AppState::new(relay));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    tracing::info!("Chat relay listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;
    Ok(())
}
