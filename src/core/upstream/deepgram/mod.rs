//! Deepgram live transcription provider.
//!
//! Streams raw telephony audio over `wss://api.deepgram.com/v1/listen` and
//! reports results as [`UpstreamEvent`](crate::core::upstream::UpstreamEvent)s.

mod client;
mod config;
mod messages;

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

pub use client::{DeepgramClient, DeepgramConnection};
pub use config::{DEEPGRAM_AUTH_TOKEN_PATH, DEEPGRAM_LISTEN_URL, DeepgramClientConfig};
pub use messages::{
    Alternative, Channel, ControlMessage, DeepgramMessage, ErrorMessage, MetadataMessage,
    ResultsMessage, SpeechStartedMessage, UtteranceEndMessage,
};

use super::base::UpstreamError;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Response bodies are truncated to this many characters in diagnostics.
const BODY_PREVIEW_CHARS: usize = 200;

/// Outcome of an API key probe.
#[derive(Debug, Clone, Serialize)]
pub struct KeyCheck {
    pub status: u16,
    pub body_preview: String,
}

/// Probe the key-introspection endpoint with the configured key.
///
/// Succeeds on any 2xx. 401 and 403 map to `AuthenticationFailed`; other
/// statuses and transport failures map to `ConnectionFailed`.
pub async fn verify_api_key(config: &DeepgramClientConfig) -> Result<KeyCheck, UpstreamError> {
    config.validate()?;
    let url = config.auth_token_url()?;
    debug!(url = %url, "Verifying Deepgram API key");

    let response = reqwest::Client::new()
        .get(url)
        .timeout(VERIFY_TIMEOUT)
        .header("Authorization", config.authorization())
        .send()
        .await
        .map_err(|e| UpstreamError::ConnectionFailed(format!("Key check request failed: {e}")))?;

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            debug!(status = %status, error = %e, "Failed to read key check response body");
            String::new()
        }
    };
    let check = KeyCheck {
        status: status.as_u16(),
        body_preview: preview(&body),
    };

    if status.is_success() {
        return Ok(check);
    }

    warn!(status = %status, body = %check.body_preview, "Deepgram key check failed");
    match status.as_u16() {
        401 | 403 => Err(UpstreamError::AuthenticationFailed(format!(
            "HTTP {}: {}",
            check.status, check.body_preview
        ))),
        _ => Err(UpstreamError::ConnectionFailed(format!(
            "HTTP {}: {}",
            check.status, check.body_preview
        ))),
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}
