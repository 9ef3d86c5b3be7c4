use std::env;
use std::str::FromStr;

use super::{ConfigError, ServerConfig};

/// Read a variable, treating blank values as unset.
fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(key: &'static str) -> Result<Option<bool>, ConfigError> {
    var(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: "expected true or false".to_string(),
            }),
        })
        .transpose()
}

/// Millisecond options accept `off`, `false` or `0` to disable the feature.
fn parse_optional_ms(key: &'static str) -> Result<Option<Option<u32>>, ConfigError> {
    match var(key) {
        None => Ok(None),
        Some(raw) if matches!(raw.to_ascii_lowercase().as_str(), "off" | "false") => {
            Ok(Some(None))
        }
        Some(raw) => raw
            .parse::<u32>()
            .map(|ms| Some((ms > 0).then_some(ms)))
            .map_err(|e| ConfigError::InvalidValue {
                key,
                value: raw,
                reason: e.to_string(),
            }),
    }
}

/// Build a configuration from environment variables on top of the defaults.
///
/// `.env` values are already present in the environment at this point; they
/// are loaded by `main` before any configuration is read.
pub(super) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse("PORT")? {
        config.port = port;
    }
    if let Some(path) = var("STREAM_PATH") {
        config.stream_path = path;
    }

    if let Some(key) = var("DEEPGRAM_API_KEY").or_else(|| var("DEEPGRAM_KEY")) {
        config.deepgram_api_key = key;
    }
    if let Some(url) = var("DEEPGRAM_URL") {
        config.deepgram_url = url;
    }
    if let Some(model) = var("DEEPGRAM_MODEL") {
        config.deepgram_model = model;
    }
    if let Some(language) = var("DEEPGRAM_LANGUAGE") {
        config.deepgram_language = language;
    }
    if let Some(ms) = parse_optional_ms("DEEPGRAM_ENDPOINTING_MS")? {
        config.deepgram_endpointing_ms = ms;
    }
    if let Some(ms) = parse_optional_ms("DEEPGRAM_UTTERANCE_END_MS")? {
        config.deepgram_utterance_end_ms = ms;
    }
    if let Some(enabled) = parse_bool("DEEPGRAM_VAD_EVENTS")? {
        config.deepgram_vad_events = enabled;
    }
    if let Some(enabled) = parse_bool("DEEPGRAM_VERIFY_ON_STARTUP")? {
        config.deepgram_verify_on_startup = enabled;
    }

    if let Some(capacity) = parse("AUDIO_QUEUE_CAPACITY")? {
        config.audio_queue_capacity = capacity;
    }
    if let Some(seconds) = parse("KEEPALIVE_INTERVAL_SECONDS")? {
        config.keepalive_interval_seconds = seconds;
    }

    Ok(config)
}
