// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX backend tests
//!
//! Tests marked `#[ignore]` need the all-MiniLM-L6-v2 export under
//! `./models/all-MiniLM-L6-v2/`.

use fabstir_embed_server::embeddings::{
    EmbeddingModelManager, LoadError, ModelProvider, OnnxModelProvider, OnnxProviderConfig,
};
use fabstir_embed_server::inference::{InferenceEngine, InferenceRequest};
use std::path::PathBuf;
use std::sync::Arc;

const MODEL_ID: &str = "all-MiniLM-L6-v2";

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[tokio::test]
async fn test_missing_model_is_not_found_without_download() {
    let dir = tempfile::tempdir().unwrap();
    let provider = OnnxModelProvider::new(OnnxProviderConfig {
        models_dir: dir.path().to_path_buf(),
        allow_download: false,
        ..Default::default()
    });

    let err = provider.load(MODEL_ID).await.unwrap_err();
    assert!(matches!(err, LoadError::NotFound { .. }));
    assert!(err.to_string().contains("ALLOW_MODEL_DOWNLOAD"));
}

#[tokio::test]
async fn test_checksum_mismatch_rejects_weights() {
    let dir = tempfile::tempdir().unwrap();
    let model_dir = dir.path().join(MODEL_ID);
    std::fs::create_dir_all(&model_dir).unwrap();
    std::fs::write(model_dir.join("model.onnx"), b"not really a model").unwrap();
    std::fs::write(model_dir.join("tokenizer.json"), b"{}").unwrap();

    let provider = OnnxModelProvider::new(OnnxProviderConfig {
        models_dir: dir.path().to_path_buf(),
        expected_sha256: Some("00".repeat(32)),
        pinned_model: Some(MODEL_ID.to_string()),
        ..Default::default()
    });

    match provider.load(MODEL_ID).await {
        Err(LoadError::Checksum { expected, actual, .. }) => {
            assert_eq!(expected, "00".repeat(32));
            assert_eq!(actual.len(), 64);
        }
        other => panic!("expected checksum failure, got {:?}", other.map(|h| h.id().to_string())),
    }
}

#[tokio::test]
async fn test_failed_load_leaves_manager_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(OnnxModelProvider::new(OnnxProviderConfig {
        models_dir: dir.path().to_path_buf(),
        ..Default::default()
    }));
    let manager = EmbeddingModelManager::new(provider, MODEL_ID);

    assert!(manager.load(MODEL_ID).await.is_err());
    assert!(!manager.is_ready(None));
    assert!(manager.list_models()[0].error.is_some());
}

#[tokio::test]
#[ignore] // Only run if model files are downloaded
async fn test_real_model_embeddings() {
    let provider = OnnxModelProvider::new(OnnxProviderConfig {
        models_dir: PathBuf::from("./models"),
        ..Default::default()
    });
    let handle = Arc::new(provider.load(MODEL_ID).await.expect("model files present"));
    assert_eq!(handle.dimension(), 384);

    let requests = vec![
        InferenceRequest::new("cat", "A cat sits on the mat"),
        InferenceRequest::new("kitten", "A kitten is sitting on a rug"),
        InferenceRequest::new("stocks", "Quarterly earnings beat analyst expectations"),
    ];
    let (outcomes, retried) = InferenceEngine::infer_blocking(&requests, &handle);
    assert!(!retried);

    let vectors: Vec<Vec<f32>> = outcomes
        .into_iter()
        .map(|o| o.unwrap().embedding)
        .collect();
    for v in &vectors {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {}", norm);
    }
    assert!(cosine(&vectors[0], &vectors[1]) > cosine(&vectors[0], &vectors[2]));

    // Batch composition must not change a vector
    let (alone, _) = InferenceEngine::infer_blocking(&requests[..1], &handle);
    let alone = alone.into_iter().next().unwrap().unwrap().embedding;
    for (a, b) in alone.iter().zip(&vectors[0]) {
        assert!((a - b).abs() < 1e-5);
    }
}
