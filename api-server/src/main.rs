//! HTTP server for crop and fertilizer recommendations

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use agri_ml_binding::config::CONFIG_ENV_VAR;
use agri_ml_binding::{Domain, ModelContext, RecommendationService, RecommenderConfig};

mod chat;
mod http;
mod logging;

use crate::chat::{ChatClient, ChatConfig};
use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host for the HTTP service
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number for the HTTP service
    #[arg(short, long, default_value = "5000")]
    port: u16,

    /// YAML config file; built-in defaults are used when absent
    #[arg(long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    /// Base URL of the OpenAI-compatible API used by /chat
    #[arg(long, default_value = chat::DEFAULT_API_BASE)]
    chat_api_base: String,

    /// Model requested from the chat endpoint
    #[arg(long, default_value = chat::DEFAULT_MODEL)]
    chat_model: String,

    /// Timeout for a single chat request, in seconds
    #[arg(long, default_value = "30")]
    chat_timeout_secs: u64,
}

fn load_config(path: Option<&Path>) -> Result<RecommenderConfig> {
    match path {
        Some(path) => {
            tracing::info!("Loading recommender config from: {}", path.display());
            RecommenderConfig::from_file(path)
                .with_context(|| format!("invalid recommender config {}", path.display()))
        }
        None => {
            tracing::info!("No config file given, using default model layout");
            Ok(RecommenderConfig::default())
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!("failed to listen for shutdown signal: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.log_format);

    let config = load_config(args.config.as_deref())?;
    let context = ModelContext::load(&config).context("failed to load recommendation models")?;
    let service = RecommendationService::new(context);
    for domain in Domain::ALL {
        if !service.is_available(domain) {
            tracing::warn!(%domain, "domain not loaded");
        }
    }

    let api_key = std::env::var(chat::API_KEY_ENV_VAR).ok();
    if api_key.is_none() {
        tracing::warn!("{} not set, /chat will fail", chat::API_KEY_ENV_VAR);
    }
    let chat = ChatClient::new(ChatConfig {
        api_base: args.chat_api_base,
        model: args.chat_model,
        timeout: Duration::from_secs(args.chat_timeout_secs),
        api_key,
    })
    .context("failed to build chat client")?;
    tracing::debug!(model = chat.model(), "chat passthrough configured");

    let app = http::router(http::AppState { service, chat });

    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;
    tracing::info!("HTTP server listening on: {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
