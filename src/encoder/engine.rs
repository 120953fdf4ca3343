//! ONNX Runtime inference backend
//!
//! Loads the model and tokenizer once and serves batched forward passes:
//! one padded 2D tensor per batch, mean pooling over the attention mask,
//! L2 normalization per row. Resource-exhaustion failures from the runtime
//! are classified into their own error variant so the pipeline can degrade
//! instead of aborting.

use ndarray::Axis;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tracing::{debug, info};

use crate::encoder::pooling::{l2_normalize, mean_pool};
use crate::encoder::{Embedding, EncodeError, EncodeResult, InferenceBackend};
use crate::server::EncoderConfig;

/// Substrings that mark a runtime error as device memory exhaustion
const EXHAUSTION_MARKERS: &[&str] = &[
    "out of memory",
    "outofmemory",
    "bad_alloc",
    "failed to allocate",
    "cudamalloc",
    "cublas_status_alloc_failed",
];

/// ONNX-backed text encoder
pub struct OnnxEncoder {
    session: Session,
    tokenizer: Tokenizer,
    /// Name of the hidden-state output tensor, taken from the model
    output_name: String,
    /// Whether the model expects a token_type_ids input
    needs_token_type_ids: bool,
    dimension: usize,
    /// Staging buffers reused across batches, freed by release_transient
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
}

impl OnnxEncoder {
    /// Load the model and tokenizer and run a warmup pass
    ///
    /// The warmup both verifies the model end to end and discovers the
    /// embedding dimension before the handle transitions to ready.
    pub fn load(config: &EncoderConfig, device: &str) -> EncodeResult<Self> {
        info!(
            "loading ONNX model from {} (device: {})",
            config.model_path, device
        );

        let builder = Session::builder()
            .map_err(to_load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(to_load_error)?;

        // CUDA does not benefit from intra-op threads
        let threads = if device == "cuda" { 1 } else { config.num_threads };
        let session = builder
            .with_intra_threads(threads)
            .map_err(to_load_error)?
            .commit_from_file(&config.model_path)
            .map_err(|e| EncodeError::Failed {
                detail: format!("failed to load ONNX model: {e}"),
            })?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| EncodeError::Failed {
                detail: "model has no output tensors".to_string(),
            })?;
        let needs_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        let mut tokenizer =
            Tokenizer::from_file(&config.tokenizer_path).map_err(|e| EncodeError::Failed {
                detail: format!("failed to load tokenizer: {e}"),
            })?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_length,
                ..Default::default()
            }))
            .map_err(|e| EncodeError::Failed {
                detail: format!("failed to configure truncation: {e}"),
            })?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        let mut encoder = Self {
            session,
            tokenizer,
            output_name,
            needs_token_type_ids,
            dimension: 0,
            input_ids: Vec::new(),
            attention_mask: Vec::new(),
            token_type_ids: Vec::new(),
        };

        let warmup = encoder.encode_batch(&["warmup".to_string()])?;
        encoder.dimension = warmup.first().map(Vec::len).unwrap_or(0);
        info!(
            "ONNX model loaded, embedding dimension {}",
            encoder.dimension
        );

        Ok(encoder)
    }

    fn stage_inputs(&mut self, encodings: &[tokenizers::Encoding]) -> (usize, usize) {
        let batch = encodings.len();
        // Padding makes every row the same length
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        self.input_ids.clear();
        self.attention_mask.clear();
        self.token_type_ids.clear();

        for encoding in encodings {
            self.input_ids
                .extend(encoding.get_ids().iter().map(|&id| id as i64));
            self.attention_mask
                .extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
            self.token_type_ids
                .extend(encoding.get_type_ids().iter().map(|&t| t as i64));
        }

        (batch, seq_len)
    }
}

impl InferenceBackend for OnnxEncoder {
    fn encode_batch(&mut self, texts: &[String]) -> EncodeResult<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EncodeError::Failed {
                detail: format!("tokenization failed: {e}"),
            })?;

        let masks: Vec<Vec<u32>> = encodings
            .iter()
            .map(|e| e.get_attention_mask().to_vec())
            .collect();
        let (batch, seq_len) = self.stage_inputs(&encodings);
        let shape = [batch as i64, seq_len as i64];

        let input_ids = Tensor::from_array((shape, self.input_ids.clone()))
            .map_err(classify_runtime_error)?;
        let attention_mask = Tensor::from_array((shape, self.attention_mask.clone()))
            .map_err(classify_runtime_error)?;

        let mut inputs = vec![
            ("input_ids", input_ids),
            ("attention_mask", attention_mask),
        ];
        if self.needs_token_type_ids {
            let token_type_ids = Tensor::from_array((shape, self.token_type_ids.clone()))
                .map_err(classify_runtime_error)?;
            inputs.push(("token_type_ids", token_type_ids));
        }

        let outputs = self.session.run(inputs).map_err(classify_runtime_error)?;

        let (out_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(classify_runtime_error)?;

        let dims: Vec<usize> = out_shape.iter().map(|&x| x as usize).collect();
        let hidden = ndarray::ArrayView::from_shape(dims.as_slice(), data)
            .map_err(|e| EncodeError::Failed {
                detail: format!("unexpected output shape: {e:?}"),
            })?
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| EncodeError::Failed {
                detail: format!("expected [batch, seq, hidden] output: {e:?}"),
            })?;

        if hidden.shape()[0] != batch {
            return Err(EncodeError::Failed {
                detail: format!(
                    "model returned {} rows for a batch of {}",
                    hidden.shape()[0],
                    batch
                ),
            });
        }

        let mut embeddings = Vec::with_capacity(batch);
        for (row_idx, mask) in masks.iter().enumerate() {
            let row = hidden.index_axis(Axis(0), row_idx);
            let mut pooled = mean_pool(row, mask);
            l2_normalize(&mut pooled);
            embeddings.push(pooled);
        }

        debug!("encoded {} texts (seq_len {})", batch, seq_len);
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn release_transient(&mut self) {
        self.input_ids = Vec::new();
        self.attention_mask = Vec::new();
        self.token_type_ids = Vec::new();
    }
}

fn to_load_error(e: ort::Error) -> EncodeError {
    EncodeError::Failed {
        detail: format!("failed to initialize ONNX session: {e}"),
    }
}

/// Split runtime failures into resource exhaustion versus everything else
fn classify_runtime_error(e: ort::Error) -> EncodeError {
    let detail = e.to_string();
    if is_resource_exhaustion(&detail) {
        EncodeError::ResourceExhausted { detail }
    } else {
        EncodeError::Failed { detail }
    }
}

fn is_resource_exhaustion(message: &str) -> bool {
    let lowered = message.to_lowercase();
    EXHAUSTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
