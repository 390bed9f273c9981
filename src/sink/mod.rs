//! # Bulk Write Sink
//!
//! Interface to the external search/index store that message processors push
//! their results through. The store itself is an external collaborator behind
//! [`SinkBackend`]; this module owns only the batching contract: actions
//! accumulate per call, auto-flush once a pending threshold is reached, and
//! an explicit commit drains the buffer and reports accumulated ids and
//! errors.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Default pending-action threshold triggering an automatic flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 200;

/// Sink error taxonomy
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink backend error: {message}")]
    Backend { message: String },

    #[error("Sink refresh error: {message}")]
    Refresh { message: String },
}

impl SinkError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn refresh(message: impl Into<String>) -> Self {
        Self::Refresh {
            message: message.into(),
        }
    }
}

/// What a buffered action does to its document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

/// One pending write against the external store
#[derive(Debug, Clone)]
pub struct SinkAction {
    pub kind: ActionKind,
    pub entity_type: String,
    pub document: Value,
}

/// Result of executing a batch of actions
#[derive(Debug, Clone, Default)]
pub struct BulkResponse {
    /// Identifiers of documents the store accepted
    pub ids: Vec<String>,
    /// Per-document errors the store reported
    pub errors: Vec<String>,
}

/// The external store client; implementations live outside this crate
#[async_trait]
pub trait SinkBackend: Send + Sync {
    /// Execute a batch of actions against the store
    async fn execute(&self, actions: &[SinkAction]) -> Result<BulkResponse, SinkError>;

    /// Block until previously executed writes are visible to searches
    async fn refresh(&self) -> Result<(), SinkError>;
}

/// Buffers actions and flushes them in bounded batches
pub struct BulkWriter<B: SinkBackend> {
    backend: B,
    flush_threshold: usize,
    pending: Vec<SinkAction>,
    ids: Vec<String>,
    errors: Vec<String>,
}

impl<B: SinkBackend> BulkWriter<B> {
    pub fn new(backend: B) -> Self {
        Self::with_threshold(backend, DEFAULT_FLUSH_THRESHOLD)
    }

    pub fn with_threshold(backend: B, flush_threshold: usize) -> Self {
        Self {
            backend,
            flush_threshold: flush_threshold.max(1),
            pending: Vec::new(),
            ids: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Queue create actions for a batch of documents
    pub async fn add_create_actions(
        &mut self,
        entity_type: &str,
        documents: Vec<Value>,
    ) -> Result<(), SinkError> {
        self.add_actions(ActionKind::Create, entity_type, documents)
            .await
    }

    /// Queue update actions for a batch of documents
    pub async fn add_update_actions(
        &mut self,
        entity_type: &str,
        documents: Vec<Value>,
    ) -> Result<(), SinkError> {
        self.add_actions(ActionKind::Update, entity_type, documents)
            .await
    }

    /// Queue delete actions for a batch of documents
    pub async fn add_delete_actions(
        &mut self,
        entity_type: &str,
        documents: Vec<Value>,
    ) -> Result<(), SinkError> {
        self.add_actions(ActionKind::Delete, entity_type, documents)
            .await
    }

    async fn add_actions(
        &mut self,
        kind: ActionKind,
        entity_type: &str,
        documents: Vec<Value>,
    ) -> Result<(), SinkError> {
        for document in documents {
            self.pending.push(SinkAction {
                kind,
                entity_type: entity_type.to_string(),
                document,
            });
            if self.pending.len() >= self.flush_threshold {
                self.flush().await?;
            }
        }
        Ok(())
    }

    /// Flush all buffered actions and optionally wait for visibility
    ///
    /// Returns every id and error accumulated since the previous commit.
    pub async fn commit(
        &mut self,
        wait_for_visibility: bool,
    ) -> Result<(Vec<String>, Vec<String>), SinkError> {
        self.flush().await?;
        if wait_for_visibility {
            self.backend.refresh().await?;
        }
        Ok((
            std::mem::take(&mut self.ids),
            std::mem::take(&mut self.errors),
        ))
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        debug!(actions = batch.len(), "flushing sink batch");
        let response = self.backend.execute(&batch).await?;

        if !response.errors.is_empty() {
            warn!(
                errors = response.errors.len(),
                "sink batch reported per-document errors"
            );
        }

        self.ids.extend(response.ids);
        self.errors.extend(response.errors);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default, Clone)]
    struct RecordingBackend {
        batches: Arc<Mutex<Vec<usize>>>,
        refreshes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SinkBackend for RecordingBackend {
        async fn execute(&self, actions: &[SinkAction]) -> Result<BulkResponse, SinkError> {
            self.batches.lock().await.push(actions.len());
            Ok(BulkResponse {
                ids: actions.iter().map(|a| a.entity_type.clone()).collect(),
                errors: actions
                    .iter()
                    .filter(|a| a.document.get("broken").is_some())
                    .map(|_| "mapping failure".to_string())
                    .collect(),
            })
        }

        async fn refresh(&self) -> Result<(), SinkError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn documents(n: usize) -> Vec<Value> {
        (0..n).map(|i| serde_json::json!({ "id": i })).collect()
    }

    #[tokio::test]
    async fn auto_flush_fires_at_threshold() {
        let backend = RecordingBackend::default();
        let batches = backend.batches.clone();
        let mut writer = BulkWriter::with_threshold(backend, 3);

        writer
            .add_create_actions("product", documents(7))
            .await
            .unwrap();

        // Two automatic flushes of 3; one action still pending
        assert_eq!(*batches.lock().await, vec![3, 3]);
        assert_eq!(writer.pending_len(), 1);
    }

    #[tokio::test]
    async fn commit_flushes_remainder_and_reports() {
        let backend = RecordingBackend::default();
        let refreshes = backend.refreshes.clone();
        let mut writer = BulkWriter::with_threshold(backend, 10);

        writer
            .add_create_actions("product", documents(2))
            .await
            .unwrap();
        writer
            .add_delete_actions("product", vec![serde_json::json!({"broken": true})])
            .await
            .unwrap();

        let (ids, errors) = writer.commit(true).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        // A second commit with nothing pending reports nothing
        let (ids, errors) = writer.commit(false).await.unwrap();
        assert!(ids.is_empty());
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn commit_without_visibility_skips_refresh() {
        let backend = RecordingBackend::default();
        let refreshes = backend.refreshes.clone();
        let mut writer = BulkWriter::new(backend);

        writer
            .add_update_actions("category", documents(1))
            .await
            .unwrap();
        writer.commit(false).await.unwrap();
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }
}
