//! Server module

pub mod auth;
pub mod config;
pub mod http;

pub use auth::ApiKeyAuth;
pub use config::{EncoderConfig, ServerConfig};
pub use http::start_http_server;
