//! Main Entrypoint for the Voice Ops API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Opening the durable session history store.
//! 3. Initializing shared services (the chat model client and the AWS CLI executor).
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the WebSocket server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use voiceops_api::{
    config::{Config, Provider},
    router::create_router,
    state::AppState,
    ws::lifecycle::LifecycleSettings,
};
use voiceops_core::{
    agent::ModelConfig,
    chat_agent::ChatAgentFactory,
    history::FileHistoryStore,
    llm_client::OpenAICompatibleClient,
    prompt::system_prompt,
    tools::AwsCli,
};

/// Voice-driven AWS operations assistant: WebSocket bridge.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// AWS profile used for CLI calls.
    #[arg(long)]
    profile: Option<String>,
    /// AWS region used for CLI calls.
    #[arg(long)]
    region: Option<String>,
    /// Default voice (matthew, tiffany or amy).
    #[arg(long)]
    voice: Option<String>,
    /// Host to listen on.
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,
}

impl Args {
    fn apply(self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(profile) = self.profile {
            config.aws_profile = Some(profile);
        }
        if let Some(region) = self.region {
            config.aws_region = region;
        }
        if let Some(voice) = self.voice {
            config.set_voice(&voice)?;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(())
    }
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    args.apply(&mut config)
        .context("Invalid command line arguments")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Open Session History ---
    let history = Arc::new(
        FileHistoryStore::open(&config.history_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open history store at {}",
                    config.history_path.display()
                )
            })?,
    );
    info!(path = %config.history_path.display(), "Session history store ready.");

    // --- 4. Initialize Shared Services ---
    let openai_config = match &config.provider {
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is required for the openai provider")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/")
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .as_ref()
                .context("GEMINI_API_KEY is required for the gemini provider")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai")
        }
    };
    let llm_client = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.chat_model.clone(),
    ));
    let aws_cli = Arc::new(AwsCli::new(
        config.aws_region.clone(),
        config.aws_profile.clone(),
    ));

    let mut defaults = ModelConfig::new(config.chat_model.clone(), config.aws_region.clone())
        .with_voice(config.voice_id.clone());
    defaults.profile = config.aws_profile.clone();

    let app_state = Arc::new(AppState {
        agents: Arc::new(ChatAgentFactory::new(llm_client, aws_cli)),
        history,
        system_prompt: Arc::new(system_prompt(&config.aws_region)),
        defaults,
        lifecycle: LifecycleSettings::default(),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        region = %config.aws_region,
        profile = ?config.aws_profile,
        voice = %config.voice_id,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!(address = %listener.local_addr()?, "WebSocket server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
