use serde::Deserialize;
use std::path::Path;

use super::{ConfigError, ServerConfig};

/// Complete YAML configuration structure
///
/// All fields are optional so a file can override only what it needs;
/// anything left out keeps its environment or default value.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3000
///   stream_path: "/twilio/stream"
///
/// deepgram:
///   api_key: "your-deepgram-key"
///   url: "wss://api.deepgram.com/v1/listen"
///   model: "nova-2"
///   language: "en"
///   endpointing_ms: 300
///   utterance_end_ms: 1000
///   vad_events: true
///   verify_on_startup: false
///
/// session:
///   queue_capacity: 400
///   keepalive_interval_seconds: 10
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub deepgram: Option<DeepgramYaml>,
    pub session: Option<SessionYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub stream_path: Option<String>,
}

/// Speech recognition settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DeepgramYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    /// Set to 0 to disable endpointing
    pub endpointing_ms: Option<u32>,
    /// Set to 0 to disable utterance end events
    pub utterance_end_ms: Option<u32>,
    pub vad_events: Option<bool>,
    pub verify_on_startup: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub queue_capacity: Option<usize>,
    pub keepalive_interval_seconds: Option<u64>,
}

impl YamlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseYaml(e.to_string()))
    }

    /// Overlay every value present in the file onto `config`.
    pub fn apply_to(self, config: &mut ServerConfig) {
        if let Some(server) = self.server {
            if let Some(host) = server.host {
                config.host = host;
            }
            if let Some(port) = server.port {
                config.port = port;
            }
            if let Some(path) = server.stream_path {
                config.stream_path = path;
            }
        }

        if let Some(deepgram) = self.deepgram {
            if let Some(key) = deepgram.api_key {
                config.deepgram_api_key = key.trim().to_string();
            }
            if let Some(url) = deepgram.url {
                config.deepgram_url = url;
            }
            if let Some(model) = deepgram.model {
                config.deepgram_model = model;
            }
            if let Some(language) = deepgram.language {
                config.deepgram_language = language;
            }
            if let Some(ms) = deepgram.endpointing_ms {
                config.deepgram_endpointing_ms = (ms > 0).then_some(ms);
            }
            if let Some(ms) = deepgram.utterance_end_ms {
                config.deepgram_utterance_end_ms = (ms > 0).then_some(ms);
            }
            if let Some(enabled) = deepgram.vad_events {
                config.deepgram_vad_events = enabled;
            }
            if let Some(enabled) = deepgram.verify_on_startup {
                config.deepgram_verify_on_startup = enabled;
            }
        }

        if let Some(session) = self.session {
            if let Some(capacity) = session.queue_capacity {
                config.audio_queue_capacity = capacity;
            }
            if let Some(seconds) = session.keepalive_interval_seconds {
                config.keepalive_interval_seconds = seconds;
            }
        }
    }
}
