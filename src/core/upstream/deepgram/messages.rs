//! WebSocket message types for the Deepgram live transcription API.
//!
//! - **Incoming**: `Results`, `Metadata`, `UtteranceEnd`, `SpeechStarted`,
//!   `Error`; anything else is kept as [`DeepgramMessage::Unknown`].
//! - **Outgoing**: binary audio frames plus the `KeepAlive` and `CloseStream`
//!   control messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::upstream::base::{TranscriptResult, UpstreamErrorPayload};

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// A single recognition hypothesis.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Channel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

/// Transcription results for one audio segment.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultsMessage {
    #[serde(default)]
    pub channel: Channel,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub duration: f64,
}

impl ResultsMessage {
    /// The highest-ranked alternative, if the service sent any.
    pub fn best_alternative(&self) -> Option<&Alternative> {
        self.channel.alternatives.first()
    }

    /// Reduce to the best candidate. Results without alternatives yield an
    /// empty transcript.
    pub fn into_transcript(self) -> TranscriptResult {
        let (transcript, confidence) = self
            .best_alternative()
            .map(|alt| (alt.transcript.clone(), alt.confidence as f32))
            .unwrap_or_default();
        TranscriptResult {
            transcript,
            is_final: self.is_final,
            speech_final: self.speech_final,
            confidence: confidence.clamp(0.0, 1.0),
            start: self.start,
            duration: self.duration,
        }
    }
}

/// Stream metadata, sent once per connection and again on close.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataMessage {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub channels: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UtteranceEndMessage {
    #[serde(default)]
    pub last_word_end: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechStartedMessage {
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Error reported in-band by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default, alias = "err_code")]
    pub code: Option<String>,
}

/// Parsed incoming message.
#[derive(Debug, Clone)]
pub enum DeepgramMessage {
    Results(ResultsMessage),
    Metadata(MetadataMessage),
    UtteranceEnd(UtteranceEndMessage),
    SpeechStarted(SpeechStartedMessage),
    Error {
        message: ErrorMessage,
        raw: Value,
    },
    Unknown(String),
}

impl DeepgramMessage {
    /// Parse a text frame by its `type` discriminant.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        let message_type = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(match message_type.as_str() {
            "Results" => Self::Results(serde_json::from_value(value)?),
            "Metadata" => Self::Metadata(serde_json::from_value(value)?),
            "UtteranceEnd" => Self::UtteranceEnd(serde_json::from_value(value)?),
            "SpeechStarted" => Self::SpeechStarted(serde_json::from_value(value)?),
            "Error" => Self::Error {
                message: serde_json::from_value(value.clone())?,
                raw: value,
            },
            _ => Self::Unknown(text.to_string()),
        })
    }
}

impl ErrorMessage {
    pub fn into_payload(self, raw: Value) -> UpstreamErrorPayload {
        let message = self
            .description
            .or(self.message)
            .unwrap_or_else(|| "Unknown Deepgram error".to_string());
        UpstreamErrorPayload {
            message,
            code: self.code,
            kind: self.variant,
            raw: Some(raw),
        }
    }
}

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Control message sent as a text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Keeps an idle stream open
    KeepAlive,
    /// Flush remaining results and close the stream
    CloseStream,
}

impl ControlMessage {
    pub fn to_json(self) -> String {
        match self {
            Self::KeepAlive => r#"{"type":"KeepAlive"}"#.to_string(),
            Self::CloseStream => r#"{"type":"CloseStream"}"#.to_string(),
        }
    }
}
