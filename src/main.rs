//! prompt-relay server binary.
//!
//! Wires the configured OpenAI-compatible backend into the relay endpoint
//! and serves it. The provider API key is resolved once at startup and
//! injected into the backend; request handling never touches the
//! environment.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use prompt_relay::config::{Cli, Config};
use prompt_relay::pipeline::openai::OpenAiBackend;
use prompt_relay::pipeline::template::PromptTemplate;
use prompt_relay::server::api::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Pick up a local .env before reading any configuration.
    let _ = dotenvy::dotenv();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "prompt_relay=debug,tower_http=debug"
    } else {
        "prompt_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("prompt-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        base_url = config.provider.base_url,
        model = config.provider.model,
        "Configuration loaded"
    );

    // Resolve credentials once, at the edge.
    let api_key = config.provider.resolve_api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "no provider API key: set {} or provider.api_key in {}",
            config.provider.api_key_env,
            cli.config.display()
        )
    })?;

    // Build the completion backend.
    let backend = OpenAiBackend::new(&config.provider, api_key)?;

    // Build application state.
    let state = Arc::new(AppState {
        backend: Arc::new(backend),
        template: PromptTemplate::new(config.relay.system_prompt.as_str()),
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen.unwrap_or(config.server.listen);
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
