//! Embedding Gateway Library
//!
//! HTTP service that wraps a pretrained text/code embedding model behind a
//! batched, memory-bounded inference pipeline

pub mod encoder;
pub mod pipeline;
pub mod protocol;
pub mod server;

// Re-exports
pub use encoder::{Embedding, EncodeError, EncoderHandle, TextEncoder};
pub use pipeline::{EmbedError, EmbeddingPipeline};
pub use protocol::{EmbedRequest, EmbedResponse};
pub use server::{start_http_server, ServerConfig};
