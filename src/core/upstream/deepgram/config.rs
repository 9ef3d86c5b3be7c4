//! Configuration for the Deepgram live transcription client.

use std::fmt;
use url::Url;
use zeroize::Zeroize;

use crate::core::upstream::base::{UpstreamConfig, UpstreamError};

/// Default live transcription endpoint.
pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Path of the key introspection endpoint used by [`super::verify_api_key`].
pub const DEEPGRAM_AUTH_TOKEN_PATH: &str = "/v1/auth/token";

/// Process-wide client settings: who we are and where to connect.
///
/// Per-call stream parameters live in [`UpstreamConfig`].
#[derive(Clone)]
pub struct DeepgramClientConfig {
    pub api_key: String,
    pub listen_url: String,
}

impl fmt::Debug for DeepgramClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepgramClientConfig")
            .field("api_key", &format_args!("<{} chars>", self.api_key.len()))
            .field("listen_url", &self.listen_url)
            .finish()
    }
}

impl Drop for DeepgramClientConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl DeepgramClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            listen_url: DEEPGRAM_LISTEN_URL.to_string(),
        }
    }

    pub fn with_listen_url(mut self, url: impl Into<String>) -> Self {
        self.listen_url = url.into();
        self
    }

    /// Check the settings without touching the network.
    pub fn validate(&self) -> Result<(), UpstreamError> {
        if self.api_key.trim().is_empty() {
            return Err(UpstreamError::AuthenticationFailed(
                "API key is required for Deepgram".to_string(),
            ));
        }
        let url = Url::parse(&self.listen_url).map_err(|e| {
            UpstreamError::ConfigurationError(format!(
                "Invalid Deepgram URL '{}': {e}",
                self.listen_url
            ))
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(UpstreamError::ConfigurationError(format!(
                "Deepgram URL must use ws or wss, got '{other}'"
            ))),
        }
    }

    /// Build the listen URL with the stream parameters as query arguments.
    pub fn build_websocket_url(&self, stream: &UpstreamConfig) -> Result<Url, UpstreamError> {
        self.validate()?;
        if stream.sample_rate == 0 || stream.channels == 0 {
            return Err(UpstreamError::ConfigurationError(
                "Sample rate and channel count must be non-zero".to_string(),
            ));
        }

        let mut url = Url::parse(&self.listen_url)
            .map_err(|e| UpstreamError::ConfigurationError(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("model", &stream.model)
                .append_pair("language", &stream.language)
                .append_pair("encoding", &stream.encoding)
                .append_pair("sample_rate", &stream.sample_rate.to_string())
                .append_pair("channels", &stream.channels.to_string())
                .append_pair("interim_results", bool_param(stream.interim_results))
                .append_pair("punctuate", bool_param(stream.punctuate))
                .append_pair("smart_format", bool_param(stream.smart_format))
                .append_pair("vad_events", bool_param(stream.vad_events));
            if let Some(ms) = stream.endpointing_ms {
                query.append_pair("endpointing", &ms.to_string());
            }
            if let Some(ms) = stream.utterance_end_ms {
                query.append_pair("utterance_end_ms", &ms.to_string());
            }
        }
        Ok(url)
    }

    /// Derive the REST key-introspection URL from the listen URL's host.
    pub fn auth_token_url(&self) -> Result<Url, UpstreamError> {
        let mut url = Url::parse(&self.listen_url)
            .map_err(|e| UpstreamError::ConfigurationError(e.to_string()))?;
        let scheme = match url.scheme() {
            "ws" => "http",
            _ => "https",
        };
        url.set_scheme(scheme).map_err(|_| {
            UpstreamError::ConfigurationError(format!("Cannot derive {scheme} URL"))
        })?;
        url.set_path(DEEPGRAM_AUTH_TOKEN_PATH);
        url.set_query(None);
        Ok(url)
    }

    /// Value for the `Authorization` header.
    pub(crate) fn authorization(&self) -> String {
        format!("Token {}", self.api_key)
    }
}

#[inline]
fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
