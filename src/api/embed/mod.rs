// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding API: single text or media reference, batches of texts, and raw
//! media uploads

pub mod handler;
pub mod request;
pub mod response;

pub use handler::{embed_batch_handler, embed_handler, embed_media_handler};
pub use request::{BatchEmbedRequest, EmbedRequest, MediaQuery};
pub use response::{BatchEmbedResponse, EmbedResponse, EmbeddingResult};
