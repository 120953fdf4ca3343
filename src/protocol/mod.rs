//! Wire types for the HTTP API

pub mod http;

pub use http::{EmbedRequest, EmbedResponse, ErrorResponse, HealthResponse};
