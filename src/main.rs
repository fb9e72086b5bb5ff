// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Context, Result};
use fabstir_embed_server::{
    api::{shutdown_signal, start_server, AppState},
    config::{LogFormat, ServiceConfig},
    embeddings::EmbeddingModelManager,
    media::{MediaPreprocessor, Transcriber, WhisperApiTranscriber},
    service::EmbeddingService,
};
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "fabstir_embed_server=info,tower_http=info");
    }
    let filter = EnvFilter::from_default_env();
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::load();
    init_tracing(config.log_format);

    println!("🚀 Starting Fabstir Embed Server...\n");
    println!("📦 BUILD VERSION: {}", fabstir_embed_server::version::VERSION);
    println!("📅 Build Date: {}", fabstir_embed_server::version::BUILD_DATE);
    println!();

    config.validate().map_err(|e| anyhow!(e))?;
    let addr = config.bind_addr().map_err(|e| anyhow!(e))?;

    let provider = config.provider();
    let backend = provider.backend_name();
    let models = Arc::new(EmbeddingModelManager::new(provider, config.model_id.clone()));
    let model_ids = config.model_ids();
    for id in &model_ids {
        models.register(id);
    }

    let transcriber: Option<Arc<dyn Transcriber>> = match config.transcriber() {
        Some(transcriber_config) => Some(Arc::new(
            WhisperApiTranscriber::new(transcriber_config).context("transcription client")?,
        )),
        None => {
            info!("TRANSCRIBE_API_KEY not set; audio and subtitle-less video are unsupported");
            None
        }
    };
    let media = Arc::new(MediaPreprocessor::new(config.media(), transcriber));
    if !media.ffmpeg().is_available().await {
        warn!(
            "ffmpeg not found at '{}'; audio and video requests will fail",
            media.ffmpeg().path().display()
        );
    }

    let service = Arc::new(EmbeddingService::new(
        models.clone(),
        media,
        config.scheduler(),
        config.limits(),
        config.cache_size,
    ));

    // Bind before loading so /health and /ready answer during the load
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    println!("🧠 Loading embedding models ({} backend)...", backend);
    let loader = service.clone();
    tokio::spawn(async move {
        for id in model_ids {
            match loader.activate(&id).await {
                Ok(handle) => info!(
                    model = handle.id(),
                    dimensions = handle.dimension(),
                    normalized = handle.normalize(),
                    "Model ready"
                ),
                Err(e) if id == loader.models().default_model_name() => {
                    error!("Default model failed to load, /ready will report 503: {}", e)
                }
                Err(e) => warn!("Optional model {} failed to load: {}", id, e),
            }
        }
    });

    let state = Arc::new(AppState::new(service, config.max_batch_texts, backend));
    println!("🌐 API server on http://{}", addr);
    start_server(listener, state, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}
