//! HTTP REST API request/response shapes
//!
//! - POST /embed: {"texts": [...], "task": "search_document"}
//!   -> {"embeddings": [[...], ...], "count": N, "model": "..."}
//! - GET /health: {"status": "...", "model_loaded": bool, "device": "...", "batch_size": N}
//! - GET /: service info payload

use serde::{Deserialize, Serialize};

fn default_task() -> String {
    "search_document".to_string()
}

/// Embedding request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    /// Texts to embed, in order
    pub texts: Vec<String>,

    /// Task prefix prepended to every text as "{task}: "
    #[serde(default = "default_task")]
    pub task: String,
}

/// Embedding response body
///
/// `count` always equals `embeddings.len()`, which always equals the
/// request's text count; embedding i corresponds to text i.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub count: usize,
    pub model: String,
}

impl EmbedResponse {
    pub fn new(embeddings: Vec<Vec<f32>>, model: impl Into<String>) -> Self {
        Self {
            count: embeddings.len(),
            embeddings,
            model: model.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub device: String,
    pub batch_size: usize,
}

impl HealthResponse {
    pub fn new(model_loaded: bool, device: impl Into<String>, batch_size: usize) -> Self {
        Self {
            status: if model_loaded { "healthy" } else { "loading" }.to_string(),
            model_loaded,
            device: device.into(),
            batch_size,
        }
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(message).with_code("INVALID_INPUT")
    }

    pub fn missing_api_key() -> Self {
        Self::new("Missing X-Api-Key header").with_code("MISSING_API_KEY")
    }

    pub fn invalid_api_key() -> Self {
        Self::new("Invalid API key").with_code("INVALID_API_KEY")
    }

    pub fn model_not_ready() -> Self {
        Self::new("Embedding model is still loading, please try again later")
            .with_code("MODEL_NOT_READY")
    }

    /// Generic 500 body; the real cause is logged server-side only
    pub fn internal_error() -> Self {
        Self::new("Internal server error during embedding generation")
            .with_code("INTERNAL_ERROR")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_request_task_defaults() {
        let req: EmbedRequest = serde_json::from_str(r#"{"texts": ["hello"]}"#).unwrap();
        assert_eq!(req.task, "search_document");

        let req: EmbedRequest =
            serde_json::from_str(r#"{"texts": ["hello"], "task": "search_query"}"#).unwrap();
        assert_eq!(req.task, "search_query");
    }

    #[test]
    fn test_embed_response_count_matches() {
        let response = EmbedResponse::new(vec![vec![0.1, 0.2], vec![0.3, 0.4]], "test-model");
        assert_eq!(response.count, 2);
        assert_eq!(response.embeddings.len(), response.count);
        assert_eq!(response.model, "test-model");
    }

    #[test]
    fn test_health_response_status_tracks_loading() {
        let loading = HealthResponse::new(false, "cpu", 16);
        assert_eq!(loading.status, "loading");
        assert!(!loading.model_loaded);

        let healthy = HealthResponse::new(true, "cuda", 16);
        assert_eq!(healthy.status, "healthy");
        assert!(healthy.model_loaded);
    }

    #[test]
    fn test_internal_error_is_generic() {
        let err = ErrorResponse::internal_error();
        assert!(!err.error.to_lowercase().contains("stack"));
        assert_eq!(err.code, Some("INTERNAL_ERROR".to_string()));
    }
}
