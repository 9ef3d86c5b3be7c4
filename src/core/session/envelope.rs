//! Inbound media stream envelopes.
//!
//! The telephony side sends one JSON object per text frame, discriminated by
//! its `event` field:
//!
//! ```json
//! {"event":"connected","protocol":"Call","version":"1.0.0"}
//! {"event":"start","streamSid":"MZ..","start":{"callSid":"CA..","streamSid":"MZ.."}}
//! {"event":"media","sequenceNumber":"3","media":{"payload":"//8A..."}}
//! {"event":"stop","streamSid":"MZ.."}
//! ```
//!
//! Audio payloads are kept base64-encoded until the session decodes them, so
//! frame counters can be updated before any decoding work.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Reasons an inbound frame is discarded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Envelope has no event field")]
    MissingEvent,

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Malformed {event} envelope: {reason}")]
    Malformed { event: &'static str, reason: String },

    #[error("Media envelope has no payload")]
    MissingPayload,

    #[error("Invalid base64 audio payload: {0}")]
    InvalidPayload(String),

    #[error("Binary frames are not part of the media stream protocol")]
    UnexpectedBinary,
}

impl EnvelopeError {
    /// Whether the frame was a `media` envelope, so it still counts as audio.
    pub fn is_media(&self) -> bool {
        match self {
            Self::MissingPayload | Self::InvalidPayload(_) => true,
            Self::Malformed { event, .. } => *event == "media",
            _ => false,
        }
    }
}

/// Stream identifiers announced by the `start` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStart {
    pub stream_sid: Option<String>,
    pub call_sid: Option<String>,
}

/// One audio chunk, still base64-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaChunk {
    pub payload: String,
    pub sequence_number: Option<u64>,
}

impl MediaChunk {
    /// Decode the payload into raw mu-law bytes.
    pub fn decode(&self) -> Result<Bytes, EnvelopeError> {
        STANDARD
            .decode(self.payload.as_bytes())
            .map(Bytes::from)
            .map_err(|e| EnvelopeError::InvalidPayload(e.to_string()))
    }
}

/// A parsed inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    Start(StreamStart),
    Media(MediaChunk),
    Stop,
    Mark { name: Option<String> },
    Dtmf { digit: Option<String> },
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Start(_) => "start",
            Self::Media(_) => "media",
            Self::Stop => "stop",
            Self::Mark { .. } => "mark",
            Self::Dtmf { .. } => "dtmf",
        }
    }

    /// Parse one text frame.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingEvent)?;

        match event {
            "connected" => Ok(Self::Connected),
            "start" => {
                let raw: RawStart = from_value("start", value)?;
                let start = raw.start.unwrap_or_default();
                Ok(Self::Start(StreamStart {
                    stream_sid: raw.stream_sid.or(start.stream_sid),
                    call_sid: start.call_sid,
                }))
            }
            "media" => {
                let raw: RawMedia = from_value("media", value)?;
                let payload = raw
                    .media
                    .and_then(|media| media.payload)
                    .ok_or(EnvelopeError::MissingPayload)?;
                Ok(Self::Media(MediaChunk {
                    payload,
                    sequence_number: raw.sequence_number.as_ref().and_then(parse_sequence),
                }))
            }
            "stop" => Ok(Self::Stop),
            "mark" => {
                let raw: RawMark = from_value("mark", value)?;
                Ok(Self::Mark {
                    name: raw.mark.and_then(|m| m.name),
                })
            }
            "dtmf" => {
                let raw: RawDtmf = from_value("dtmf", value)?;
                Ok(Self::Dtmf {
                    digit: raw.dtmf.and_then(|d| d.digit),
                })
            }
            other => Err(EnvelopeError::UnknownEvent(other.to_string())),
        }
    }
}

fn from_value<T: for<'de> Deserialize<'de>>(
    event: &'static str,
    value: Value,
) -> Result<T, EnvelopeError> {
    serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed {
        event,
        reason: e.to_string(),
    })
}

// The sequence number is sent as a string, but accept a bare number too.
fn parse_sequence(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStart {
    stream_sid: Option<String>,
    start: Option<RawStartBody>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawStartBody {
    stream_sid: Option<String>,
    call_sid: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMedia {
    sequence_number: Option<Value>,
    media: Option<RawMediaBody>,
}

#[derive(Deserialize)]
struct RawMediaBody {
    payload: Option<String>,
}

#[derive(Deserialize)]
struct RawMark {
    mark: Option<RawMarkBody>,
}

#[derive(Deserialize)]
struct RawMarkBody {
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawDtmf {
    dtmf: Option<RawDtmfBody>,
}

#[derive(Deserialize)]
struct RawDtmfBody {
    digit: Option<String>,
}
