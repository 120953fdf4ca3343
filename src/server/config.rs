//! Service configuration
//!
//! Defaults, then an optional `config.toml`, then environment overrides.
//! Recognized environment variables: MODEL_NAME, MODEL_PATH,
//! TOKENIZER_PATH, DEVICE, BATCH_SIZE, MAX_LENGTH, MAX_TEXTS_PER_REQUEST,
//! EMBEDDING_API_SECRET, PORT, LOG_LEVEL.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub encoder: EncoderConfig,
    pub limits: LimitsConfig,
    pub auth: AuthConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Model identifier reported in responses
    pub model_name: String,
    /// Path to the ONNX model file
    pub model_path: String,
    /// Path to the tokenizer.json file
    pub tokenizer_path: String,
    /// "cpu" or "cuda"
    pub device: String,
    /// Tokenization truncation length
    pub max_length: usize,
    /// Texts per inference batch
    pub batch_size: usize,
    /// Intra-op thread count for CPU inference
    pub num_threads: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_texts_per_request: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret for the X-Api-Key header; unset means open mode
    pub api_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            encoder: EncoderConfig::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 18000,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model_name: "nomic-ai/nomic-embed-code".to_string(),
            model_path: "models/model.onnx".to_string(),
            tokenizer_path: "models/tokenizer.json".to_string(),
            device: "cpu".to_string(),
            max_length: 2048,
            batch_size: 16,
            num_threads: 4,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_texts_per_request: 1000,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the effective configuration: defaults, optional config.toml,
    /// then environment overrides
    pub fn load() -> Self {
        let mut config = if Path::new("config.toml").exists() {
            match Self::from_file("config.toml") {
                Ok(config) => config,
                Err(e) => {
                    warn!("failed to load config.toml, using defaults: {e}");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("MODEL_NAME") {
            self.encoder.model_name = value;
        }
        if let Ok(value) = std::env::var("MODEL_PATH") {
            self.encoder.model_path = value;
        }
        if let Ok(value) = std::env::var("TOKENIZER_PATH") {
            self.encoder.tokenizer_path = value;
        }
        if let Ok(value) = std::env::var("DEVICE") {
            self.encoder.device = value;
        }
        if let Ok(value) = std::env::var("EMBEDDING_API_SECRET") {
            if !value.is_empty() {
                self.auth.api_secret = Some(value);
            }
        }
        if let Ok(value) = std::env::var("LOG_LEVEL") {
            self.monitoring.log_level = value;
        }

        parse_env("BATCH_SIZE", &mut self.encoder.batch_size);
        parse_env("MAX_LENGTH", &mut self.encoder.max_length);
        parse_env("MAX_TEXTS_PER_REQUEST", &mut self.limits.max_texts_per_request);
        parse_env("PORT", &mut self.network.port);
    }

    /// Socket address string for the HTTP listener
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.port)
    }
}

/// Override `target` from an environment variable; a malformed value logs
/// a warning and keeps the previous value
fn parse_env<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!("ignoring invalid value for {name}: {raw:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.encoder.model_name, "nomic-ai/nomic-embed-code");
        assert_eq!(config.network.port, 18000);
        assert_eq!(config.encoder.batch_size, 16);
        assert_eq!(config.encoder.max_length, 2048);
        assert_eq!(config.limits.max_texts_per_request, 1000);
        assert!(config.auth.api_secret.is_none());
        assert_eq!(config.listen_address(), "0.0.0.0:18000");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [network]
            port = 9000

            [encoder]
            batch_size = 8

            [auth]
            api_secret = "s3cret"
        "#,
        )
        .unwrap();

        assert_eq!(config.network.port, 9000);
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.encoder.batch_size, 8);
        assert_eq!(config.encoder.max_length, 2048);
        assert_eq!(config.auth.api_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_parse_env_keeps_value_on_garbage() {
        // uniquely named key so parallel tests cannot collide
        let key = "EMBEDDING_GATEWAY_TEST_GARBAGE_BATCH_SIZE";
        std::env::set_var(key, "not-a-number");

        let mut value = 16usize;
        parse_env(key, &mut value);
        assert_eq!(value, 16);

        std::env::set_var(key, "32");
        parse_env(key, &mut value);
        assert_eq!(value, 32);

        std::env::remove_var(key);
    }

    #[test]
    fn test_parse_env_ignores_unset_key() {
        let mut value = 16usize;
        parse_env("EMBEDDING_GATEWAY_TEST_UNSET_KEY", &mut value);
        assert_eq!(value, 16);
    }

    #[test]
    fn test_malformed_config_file_is_an_error() {
        let path = std::env::temp_dir().join("embedding_gateway_bad_config.toml");
        std::fs::write(&path, "network = \"oops").unwrap();
        assert!(ServerConfig::from_file(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
