//! Batched embedding pipeline
//!
//! Turns a validated list of texts plus a task prefix into one normalized
//! vector per text, in input order. Inputs are processed in contiguous
//! batches to bound peak memory; a batch that fails with resource
//! exhaustion is retried one text at a time before the request is given
//! up on. Output order always equals input order, on every path.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::encoder::{Embedding, EncodeError, TextEncoder};

/// Errors surfaced to the request handler
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("encoder is not ready")]
    NotReady,

    #[error("encoding failed: {message}")]
    Encoding { message: String },
}

/// Batched embedding pipeline over a shared encoder
pub struct EmbeddingPipeline<E: TextEncoder> {
    encoder: Arc<E>,
    batch_size: usize,
    max_texts_per_request: usize,
}

impl<E: TextEncoder> EmbeddingPipeline<E> {
    pub fn new(encoder: Arc<E>, batch_size: usize, max_texts_per_request: usize) -> Self {
        Self {
            encoder,
            batch_size: batch_size.max(1),
            max_texts_per_request,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed every text, prefixed with `"{task}: "`, preserving order
    ///
    /// Fails fast on invalid input before any encoder invocation. Batches
    /// run strictly in sequence; they share one memory-bounded compute
    /// resource and out-of-order completion would break the ordering
    /// invariant.
    pub async fn embed(&self, texts: &[String], task: &str) -> Result<Vec<Embedding>, EmbedError> {
        self.validate(texts, task)?;

        if !self.encoder.is_ready().await {
            return Err(EmbedError::NotReady);
        }

        let total = texts.len();
        let batch_count = total.div_ceil(self.batch_size);
        let mut all_embeddings: Vec<Embedding> = Vec::with_capacity(total);

        for (batch_idx, chunk) in texts.chunks(self.batch_size).enumerate() {
            let prefixed: Vec<String> =
                chunk.iter().map(|text| format!("{task}: {text}")).collect();

            match self.encoder.encode(&prefixed).await {
                Ok(vectors) => {
                    if vectors.len() != chunk.len() {
                        return Err(self.length_mismatch(vectors.len(), chunk.len()));
                    }
                    all_embeddings.extend(vectors);
                }
                Err(EncodeError::ResourceExhausted { detail }) => {
                    warn!(
                        "batch {}/{} hit resource exhaustion ({detail}), \
                         falling back to per-item encoding",
                        batch_idx + 1,
                        batch_count
                    );
                    self.encoder.release_transient().await;

                    let batch_start = batch_idx * self.batch_size;
                    let vectors = self.embed_one_by_one(&prefixed, batch_start).await?;
                    all_embeddings.extend(vectors);
                }
                Err(EncodeError::NotReady) => return Err(EmbedError::NotReady),
                Err(EncodeError::Failed { detail }) => {
                    error!(
                        "batch {}/{} failed: {detail}",
                        batch_idx + 1,
                        batch_count
                    );
                    return Err(EmbedError::Encoding { message: detail });
                }
            }

            info!(
                "processed batch {}/{} ({}/{} texts)",
                batch_idx + 1,
                batch_count,
                all_embeddings.len(),
                total
            );
        }

        if all_embeddings.len() != total {
            return Err(self.length_mismatch(all_embeddings.len(), total));
        }

        Ok(all_embeddings)
    }

    /// Re-encode a batch as singletons after resource exhaustion
    ///
    /// Each item gets exactly one attempt; any failure, including a second
    /// exhaustion, aborts the whole request naming the absolute input
    /// index. No placeholder vectors, ever.
    async fn embed_one_by_one(
        &self,
        prefixed: &[String],
        batch_start: usize,
    ) -> Result<Vec<Embedding>, EmbedError> {
        let mut vectors = Vec::with_capacity(prefixed.len());

        for (offset, text) in prefixed.iter().enumerate() {
            let index = batch_start + offset;
            let single = std::slice::from_ref(text);

            match self.encoder.encode(single).await {
                Ok(batch) if batch.len() == 1 => vectors.extend(batch),
                Ok(batch) => return Err(self.length_mismatch(batch.len(), 1)),
                Err(EncodeError::NotReady) => return Err(EmbedError::NotReady),
                Err(e) => {
                    error!("per-item fallback failed at input index {index}: {e}");
                    return Err(EmbedError::Encoding {
                        message: format!("encoding failed at input index {index}"),
                    });
                }
            }
        }

        Ok(vectors)
    }

    fn length_mismatch(&self, got: usize, expected: usize) -> EmbedError {
        error!("encoder returned {got} embeddings for {expected} texts");
        EmbedError::Encoding {
            message: format!("embedding count mismatch: got {got}, expected {expected}"),
        }
    }

    /// Fail-fast input validation, before any encoder work
    fn validate(&self, texts: &[String], task: &str) -> Result<(), EmbedError> {
        if texts.is_empty() {
            return Err(EmbedError::InvalidInput {
                message: "texts must not be empty".to_string(),
            });
        }

        if texts.len() > self.max_texts_per_request {
            return Err(EmbedError::InvalidInput {
                message: format!(
                    "texts exceeds the maximum of {} items per request (got {})",
                    self.max_texts_per_request,
                    texts.len()
                ),
            });
        }

        for (index, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(EmbedError::InvalidInput {
                    message: format!("text at index {index} is empty or whitespace-only"),
                });
            }
        }

        let task = task.trim();
        if task.is_empty() || task.len() > 64 {
            return Err(EmbedError::InvalidInput {
                message: "task must be a non-empty label of at most 64 characters".to_string(),
            });
        }
        if !task
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(EmbedError::InvalidInput {
                message: format!("task '{task}' contains unsupported characters"),
            });
        }

        Ok(())
    }
}
