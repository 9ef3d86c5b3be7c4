//! Base traits and types for upstream transcription connections.
//!
//! An upstream connection is created synchronously and negotiates with the
//! speech service in the background. Everything it observes is reported as an
//! [`UpstreamEvent`] on a per-connection channel, and `Closed` is always the
//! last event delivered.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::queue::DEFAULT_QUEUE_CAPACITY;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to the transcription service.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UpstreamError {
    /// Connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Credentials were rejected or missing
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid connection parameters
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    /// A frame or control message could not be queued for sending
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The connection has already closed
    #[error("Connection closed")]
    Closed,

    /// Error reported by the service itself
    #[error("Provider error: {0}")]
    ProviderError(String),
}

// =============================================================================
// Configuration
// =============================================================================

/// Negotiated stream parameters, shared by every call.
///
/// Audio arrives from the telephony side as 8kHz mono mu-law and is forwarded
/// untouched, so the codec fields are fixed and only the recognition options
/// vary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Recognition model (e.g. "nova-2")
    pub model: String,
    /// Language code (e.g. "en")
    pub language: String,
    /// Audio encoding of forwarded frames
    pub encoding: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of audio channels
    pub channels: u16,
    /// Emit interim (non-final) results
    pub interim_results: bool,
    /// Add punctuation to transcripts
    pub punctuate: bool,
    /// Apply smart formatting (numbers, dates, ...)
    pub smart_format: bool,
    /// Silence in milliseconds before the service finalizes a segment
    pub endpointing_ms: Option<u32>,
    /// Silence gap in milliseconds before an UtteranceEnd message
    pub utterance_end_ms: Option<u32>,
    /// Emit SpeechStarted voice activity events
    pub vad_events: bool,
    /// Audio frames `send` must accept back to back without a full buffer.
    /// At least the session queue capacity, which is flushed in one pass.
    pub send_buffer_frames: usize,
}

/// Telephony media streams are always 8kHz mono mu-law.
pub const TELEPHONY_ENCODING: &str = "mulaw";
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;
pub const TELEPHONY_CHANNELS: u16 = 1;

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "en".to_string(),
            encoding: TELEPHONY_ENCODING.to_string(),
            sample_rate: TELEPHONY_SAMPLE_RATE,
            channels: TELEPHONY_CHANNELS,
            interim_results: true,
            punctuate: true,
            smart_format: true,
            endpointing_ms: Some(300),
            utterance_end_ms: Some(1000),
            vad_events: true,
            send_buffer_frames: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// A transcription result reduced to its best candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    /// Text of the highest-ranked alternative
    pub transcript: String,
    /// Whether the service considers this segment final
    pub is_final: bool,
    /// Whether this segment ends an utterance (endpoint detected)
    pub speech_final: bool,
    /// Confidence of the best alternative (0.0 to 1.0)
    pub confidence: f32,
    /// Segment start offset in seconds
    pub start: f64,
    /// Segment duration in seconds
    pub duration: f64,
}

/// Diagnostic payload attached to an upstream error event.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UpstreamErrorPayload {
    pub message: String,
    pub code: Option<String>,
    pub kind: Option<String>,
    /// The raw message as received, when there was one
    pub raw: Option<serde_json::Value>,
}

impl UpstreamErrorPayload {
    pub fn from_error(error: &UpstreamError) -> Self {
        Self {
            message: error.to_string(),
            ..Default::default()
        }
    }
}

impl fmt::Display for UpstreamErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Why the upstream connection ended.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CloseInfo {
    /// WebSocket close code, when the peer sent one
    pub code: Option<u16>,
    pub reason: String,
}

/// Everything an upstream connection reports back to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The connection is open and accepts audio
    Ready,
    /// A transcription result
    Transcript(TranscriptResult),
    /// A non-fatal error; the connection may still be usable
    Error(UpstreamErrorPayload),
    /// The connection is gone; always the last event
    Closed(CloseInfo),
}

// =============================================================================
// Connection Traits
// =============================================================================

/// Handle to one live upstream connection.
///
/// All methods are non-blocking: frames and control messages are handed to
/// the connection task and written to the socket there.
pub trait UpstreamConnection: Send {
    /// Forward one audio frame. Must not be called once the connection has
    /// closed; callers check [`UpstreamConnection::is_closed`] first.
    fn send(&self, frame: Bytes) -> Result<(), UpstreamError>;

    /// Send a no-op unit that keeps an idle stream from timing out.
    fn keep_alive(&self) -> Result<(), UpstreamError>;

    /// Ask the service to flush pending results and close. Idempotent.
    fn finish(&self);

    fn is_closed(&self) -> bool;
}

/// A freshly created connection together with its event stream.
pub struct UpstreamHandle {
    pub connection: Box<dyn UpstreamConnection>,
    pub events: mpsc::Receiver<UpstreamEvent>,
}

impl fmt::Debug for UpstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamHandle")
            .field("closed", &self.connection.is_closed())
            .finish()
    }
}

/// Process-wide client that opens one connection per call.
pub trait UpstreamFactory: Send + Sync {
    /// Create a connection with the given stream parameters.
    ///
    /// Returns immediately; the handshake runs in the background and is
    /// reported through [`UpstreamEvent::Ready`] or [`UpstreamEvent::Closed`].
    fn create(&self, config: &UpstreamConfig) -> Result<UpstreamHandle, UpstreamError>;

    fn provider_name(&self) -> &'static str;
}
