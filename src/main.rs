//! Embedding Gateway Main
//!
//! Entry point: loads configuration, starts the model load in the
//! background, and serves HTTP immediately. /health reports "loading"
//! until the encoder is ready.

use std::sync::Arc;

use embedding_gateway::encoder::EncoderHandle;
use embedding_gateway::server::{start_http_server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        match config.monitoring.log_level.to_lowercase().as_str() {
            "trace" => "embedding_gateway=trace,trace".to_string(),
            "debug" => "embedding_gateway=debug,debug".to_string(),
            "warn" => "embedding_gateway=warn,warn".to_string(),
            "error" => "embedding_gateway=error,error".to_string(),
            _ => "embedding_gateway=info,info".to_string(),
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .init();

    println!("🚀 Embedding Gateway");
    println!("📦 Model: {}", config.encoder.model_name);
    println!("📡 Listening on {}", config.listen_address());

    let encoder = Arc::new(EncoderHandle::new(
        config.encoder.model_name.clone(),
        config.encoder.device.clone(),
    ));

    // Model loading happens off the accept path; requests get 503 until
    // the handle transitions to ready
    #[cfg(feature = "onnx")]
    Arc::clone(&encoder).spawn_load(config.encoder.clone());
    #[cfg(not(feature = "onnx"))]
    tracing::warn!("built without the onnx feature, encoder will never become ready");

    start_http_server(Arc::new(config), encoder).await?;

    Ok(())
}
