// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Model Manager tests
//!
//! Verifies that the EmbeddingModelManager:
//! - Shares one load between concurrent callers
//! - Never reloads a Ready model
//! - Isolates a failed model from the others
//! - Shares a failed attempt with callers that were waiting on it
//! - Allows a failed model to be retried

use async_trait::async_trait;
use fabstir_embed_server::embeddings::{
    EmbeddingModelManager, HashEmbeddingModel, LoadError, LoadState, ModelHandle, ModelProvider,
    ModelStatus,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counts loads and fails ids listed in `broken` until they are repaired
struct ScriptedProvider {
    loads: AtomicUsize,
    broken: Mutex<HashSet<String>>,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(broken: &[&str]) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            broken: Mutex::new(broken.iter().map(|s| s.to_string()).collect()),
            delay: Duration::from_millis(20),
        }
    }

    fn repair(&self, model_id: &str) {
        self.broken.lock().unwrap().remove(model_id);
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn load(&self, model_id: &str) -> Result<ModelHandle, LoadError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if self.broken.lock().unwrap().contains(model_id) {
            return Err(LoadError::NotFound {
                model_id: model_id.to_string(),
                reason: "no weights on disk".to_string(),
            });
        }
        Ok(ModelHandle::new(
            model_id,
            64,
            128,
            true,
            Arc::new(HashEmbeddingModel::new(64)),
        ))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_one_attempt() {
    let provider = Arc::new(ScriptedProvider::new(&[]));
    let manager = Arc::new(EmbeddingModelManager::new(provider.clone(), "all-MiniLM-L6-v2"));

    let loads = (0..8).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.load("all-MiniLM-L6-v2").await })
    });
    let handles: Vec<_> = futures::future::join_all(loads)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(provider.loads(), 1, "model must be loaded exactly once");
    for handle in &handles[1..] {
        assert!(Arc::ptr_eq(&handles[0], handle), "all callers share one handle");
    }
    assert!(manager.is_ready(None));
}

#[tokio::test]
async fn test_ready_model_is_not_reloaded() {
    let provider = Arc::new(ScriptedProvider::new(&[]));
    let manager = EmbeddingModelManager::new(provider.clone(), "default");

    let first = manager.load("default").await.unwrap();
    let second = manager.load("default").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(provider.loads(), 1);
}

#[tokio::test]
async fn test_failure_is_isolated_to_its_model() {
    let provider = Arc::new(ScriptedProvider::new(&["broken-model"]));
    let manager = EmbeddingModelManager::new(provider.clone(), "good-model");
    manager.register("broken-model");

    let (good, broken) = tokio::join!(manager.load("good-model"), manager.load("broken-model"));

    assert!(good.is_ok());
    let err = broken.unwrap_err();
    assert_eq!(err.model_id(), "broken-model");
    assert!(err.to_string().contains("no weights on disk"));

    assert!(matches!(manager.state("good-model"), LoadState::Ready(_)));
    assert!(matches!(manager.state("broken-model"), LoadState::Failed(_)));
    assert!(manager.is_ready(None));
    assert!(!manager.is_ready(Some("broken-model")));

    let models = manager.list_models();
    let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["broken-model", "good-model"]);
    assert_eq!(models[0].status, ModelStatus::Failed);
    assert!(models[0].error.is_some());
    assert!(!models[0].is_default);
    assert_eq!(models[1].status, ModelStatus::Ready);
    assert_eq!(models[1].dimensions, Some(64));
}

#[tokio::test]
async fn test_failed_model_can_be_retried() {
    let provider = Arc::new(ScriptedProvider::new(&["flaky"]));
    let manager = EmbeddingModelManager::new(provider.clone(), "flaky");

    assert!(manager.load("flaky").await.is_err());
    assert!(matches!(manager.state("flaky"), LoadState::Failed(_)));

    provider.repair("flaky");
    let handle = manager.load("flaky").await.unwrap();
    assert_eq!(handle.id(), "flaky");
    assert!(manager.is_ready(None));
    assert_eq!(provider.loads(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_a_failed_load() {
    let provider = Arc::new(ScriptedProvider::new(&["broken"]));
    let manager = Arc::new(EmbeddingModelManager::new(provider.clone(), "broken"));

    let loads = (0..6).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.load("broken").await })
    });
    for result in futures::future::join_all(loads).await {
        assert!(matches!(result.unwrap(), Err(LoadError::NotFound { .. })));
    }
    assert_eq!(provider.loads(), 1);

    // A later call is a fresh attempt
    assert!(manager.load("broken").await.is_err());
    assert_eq!(provider.loads(), 2);
}

#[tokio::test]
async fn test_unknown_model_is_not_known_until_registered() {
    let manager = EmbeddingModelManager::new(Arc::new(ScriptedProvider::new(&[])), "default");

    assert!(!manager.is_known("extra"));
    assert!(matches!(manager.state("extra"), LoadState::Unloaded));

    manager.register("extra");
    assert!(manager.is_known("extra"));
    assert_eq!(manager.list_models().len(), 2);
    assert!(manager.get_model(Some("extra")).is_none());
}
