//! Encoder handle and backend seam
//!
//! The encoder is a process-wide singleton with an explicit lifecycle:
//! it starts in `Loading`, transitions to `Ready` exactly once when the
//! model finishes loading (or to `Failed` if it cannot), and never goes
//! back within a process lifetime. Requests are only served in `Ready`.
//!
//! Inference backends sit behind the [`InferenceBackend`] trait so the
//! pipeline and HTTP layer can be exercised with a stub backend in tests;
//! the real ONNX backend lives in [`engine`] behind the `onnx` feature.

pub mod pooling;

#[cfg(feature = "onnx")]
pub mod engine;

use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "onnx")]
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
#[cfg(feature = "onnx")]
use tracing::{error, info};

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Result type for encode operations
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Errors from an encode invocation
///
/// `ResourceExhausted` is a distinct variant so the pipeline can
/// pattern-match on memory pressure and degrade to per-item processing
/// instead of treating it like any other failure.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encoder is not ready")]
    NotReady,

    #[error("device memory exhausted: {detail}")]
    ResourceExhausted { detail: String },

    #[error("encoding failed: {detail}")]
    Failed { detail: String },
}

/// Synchronous inference backend
///
/// One implementation per runtime; currently ONNX Runtime. `encode_batch`
/// must return exactly one vector per input text, in input order, each
/// L2-normalized.
pub trait InferenceBackend: Send {
    /// Encode a batch of already-prefixed texts
    fn encode_batch(&mut self, texts: &[String]) -> EncodeResult<Vec<Embedding>>;

    /// Embedding dimension of the loaded model
    fn dimension(&self) -> usize;

    /// Best-effort release of transient staging buffers
    fn release_transient(&mut self);
}

/// Async encoder interface consumed by the pipeline
#[async_trait]
pub trait TextEncoder: Send + Sync {
    /// Encode one batch of texts, one normalized vector per text
    async fn encode(&self, texts: &[String]) -> EncodeResult<Vec<Embedding>>;

    /// Whether the encoder has finished loading
    async fn is_ready(&self) -> bool;

    /// Best-effort release of transient compute resources
    async fn release_transient(&self);
}

/// Encoder lifecycle state
enum EncoderState {
    Loading,
    Ready(Box<dyn InferenceBackend>),
    Failed(String),
}

/// Process-wide handle to the loaded embedding model
///
/// All encode invocations are serialized behind the state mutex: there is
/// one memory-bounded compute resource, and serializing keeps
/// resource-exhaustion handling deterministic. Readiness is tracked in a
/// separate atomic so health checks never wait behind a running inference.
pub struct EncoderHandle {
    state: Mutex<EncoderState>,
    ready: AtomicBool,
    model_name: String,
    device: String,
}

impl EncoderHandle {
    /// Create a handle in the `Loading` state
    pub fn new(model_name: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(EncoderState::Loading),
            ready: AtomicBool::new(false),
            model_name: model_name.into(),
            device: device.into(),
        }
    }

    /// Create a handle that is immediately `Ready` with the given backend
    ///
    /// Used by tests and by callers that load the model before serving.
    pub fn ready_with(
        model_name: impl Into<String>,
        device: impl Into<String>,
        backend: Box<dyn InferenceBackend>,
    ) -> Self {
        Self {
            state: Mutex::new(EncoderState::Ready(backend)),
            ready: AtomicBool::new(true),
            model_name: model_name.into(),
            device: device.into(),
        }
    }

    /// Model identifier reported in responses
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Device the encoder runs on
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Non-blocking readiness check for health reporting
    pub fn model_loaded(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Load the ONNX model on a blocking task and transition to `Ready`
    ///
    /// Returns immediately; the HTTP server starts serving while the model
    /// loads and reports `loading` from the health endpoint until the
    /// transition completes. A load failure parks the handle in `Failed`.
    #[cfg(feature = "onnx")]
    pub fn spawn_load(self: Arc<Self>, config: crate::server::EncoderConfig) {
        let handle = self;
        tokio::spawn(async move {
            let device = handle.device.clone();
            let result = tokio::task::spawn_blocking(move || {
                engine::OnnxEncoder::load(&config, &device)
            })
            .await;

            let mut state = handle.state.lock().await;
            match result {
                Ok(Ok(backend)) => {
                    info!(
                        "encoder ready: model={} dimension={}",
                        handle.model_name,
                        backend.dimension()
                    );
                    *state = EncoderState::Ready(Box::new(backend));
                    handle.ready.store(true, Ordering::Release);
                }
                Ok(Err(e)) => {
                    error!("encoder load failed: {e}");
                    *state = EncoderState::Failed(e.to_string());
                }
                Err(e) => {
                    error!("encoder load task panicked: {e}");
                    *state = EncoderState::Failed(e.to_string());
                }
            }
        });
    }
}

#[async_trait]
impl TextEncoder for EncoderHandle {
    async fn encode(&self, texts: &[String]) -> EncodeResult<Vec<Embedding>> {
        let mut state = self.state.lock().await;
        match &mut *state {
            EncoderState::Ready(backend) => backend.encode_batch(texts),
            EncoderState::Loading => Err(EncodeError::NotReady),
            EncoderState::Failed(detail) => Err(EncodeError::Failed {
                detail: detail.clone(),
            }),
        }
    }

    async fn is_ready(&self) -> bool {
        self.model_loaded()
    }

    async fn release_transient(&self) {
        if let EncoderState::Ready(backend) = &mut *self.state.lock().await {
            backend.release_transient();
        }
    }
}
