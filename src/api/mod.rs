// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod embed;
pub mod errors;
pub mod health;
pub mod http_server;

pub use embed::{
    embed_batch_handler, embed_handler, embed_media_handler, BatchEmbedRequest,
    BatchEmbedResponse, EmbedRequest, EmbedResponse, EmbeddingResult,
};
pub use errors::{ApiError, ErrorResponse};
pub use health::{HealthResponse, ModelsResponse, ReadinessResponse};
pub use http_server::{create_app, shutdown_signal, start_server, AppState};
