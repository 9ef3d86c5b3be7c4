//! Configuration module for the gateway
//!
//! Configuration comes from .env files, YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use callscribe_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::core::queue::DEFAULT_QUEUE_CAPACITY;
use crate::core::upstream::{DeepgramClientConfig, UpstreamConfig};

mod env;
mod yaml;

/// Largest accepted pre-ready audio queue, about twenty minutes of 20 ms frames.
pub const MAX_AUDIO_QUEUE_CAPACITY: usize = 60_000;

/// Largest accepted keepalive interval.
pub const MAX_KEEPALIVE_INTERVAL_SECONDS: u64 = 3600;

pub use yaml::YamlConfig;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    ReadFile { path: String, message: String },

    #[error("Failed to parse YAML config: {0}")]
    ParseYaml(String),

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("DEEPGRAM_API_KEY is missing or blank")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
///
/// Contains everything needed to run the gateway:
/// - Listener settings (host, port, media stream path)
/// - Deepgram credentials, endpoint and recognition options
/// - Per-session tuning (audio queue capacity, keepalive interval)
#[derive(Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// WebSocket path the telephony provider streams media to
    pub stream_path: String,

    // Deepgram settings
    pub deepgram_api_key: String,
    pub deepgram_url: String,
    pub deepgram_model: String,
    pub deepgram_language: String,
    /// `None` disables endpointing
    pub deepgram_endpointing_ms: Option<u32>,
    /// `None` disables utterance end events
    pub deepgram_utterance_end_ms: Option<u32>,
    pub deepgram_vad_events: bool,
    /// Probe the API key in the background at startup
    pub deepgram_verify_on_startup: bool,

    // Session settings
    pub audio_queue_capacity: usize,
    pub keepalive_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let upstream = UpstreamConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            stream_path: "/twilio/stream".to_string(),
            deepgram_api_key: String::new(),
            deepgram_url: crate::core::upstream::deepgram::DEEPGRAM_LISTEN_URL.to_string(),
            deepgram_model: upstream.model.clone(),
            deepgram_language: upstream.language.clone(),
            deepgram_endpointing_ms: upstream.endpointing_ms,
            deepgram_utterance_end_ms: upstream.utterance_end_ms,
            deepgram_vad_events: upstream.vad_events,
            deepgram_verify_on_startup: false,
            audio_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keepalive_interval_seconds: 10,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("stream_path", &self.stream_path)
            .field(
                "deepgram_api_key",
                &format_args!("<{} chars>", self.deepgram_api_key.len()),
            )
            .field("deepgram_url", &self.deepgram_url)
            .field("deepgram_model", &self.deepgram_model)
            .field("deepgram_language", &self.deepgram_language)
            .field("deepgram_endpointing_ms", &self.deepgram_endpointing_ms)
            .field("deepgram_utterance_end_ms", &self.deepgram_utterance_end_ms)
            .field("deepgram_vad_events", &self.deepgram_vad_events)
            .field("deepgram_verify_on_startup", &self.deepgram_verify_on_startup)
            .field("audio_queue_capacity", &self.audio_queue_capacity)
            .field("keepalive_interval_seconds", &self.keepalive_interval_seconds)
            .finish()
    }
}

/// Zeroize the API key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.deepgram_api_key.zeroize();
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or the resulting
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file layered over the environment.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        let mut config = env::load_from_env()?;
        yaml_config.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deepgram_api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if !(1..=MAX_AUDIO_QUEUE_CAPACITY).contains(&self.audio_queue_capacity) {
            return Err(ConfigError::Invalid(format!(
                "audio queue capacity must be between 1 and {MAX_AUDIO_QUEUE_CAPACITY}, got {}",
                self.audio_queue_capacity
            )));
        }
        if !(1..=MAX_KEEPALIVE_INTERVAL_SECONDS).contains(&self.keepalive_interval_seconds) {
            return Err(ConfigError::Invalid(format!(
                "keepalive interval must be between 1 and {MAX_KEEPALIVE_INTERVAL_SECONDS} seconds, got {}",
                self.keepalive_interval_seconds
            )));
        }
        if !self.stream_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "stream path '{}' must start with '/'",
                self.stream_path
            )));
        }

        let url = Url::parse(&self.deepgram_url).map_err(|e| {
            ConfigError::Invalid(format!("Deepgram URL '{}': {e}", self.deepgram_url))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "Deepgram URL must use ws or wss, got '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Get the server address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds)
    }

    /// Stream parameters negotiated for every call.
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            model: self.deepgram_model.clone(),
            language: self.deepgram_language.clone(),
            endpointing_ms: self.deepgram_endpointing_ms,
            utterance_end_ms: self.deepgram_utterance_end_ms,
            vad_events: self.deepgram_vad_events,
            send_buffer_frames: self.audio_queue_capacity,
            ..UpstreamConfig::default()
        }
    }

    pub fn deepgram_client_config(&self) -> DeepgramClientConfig {
        DeepgramClientConfig::new(self.deepgram_api_key.clone())
            .with_listen_url(self.deepgram_url.clone())
    }
}
