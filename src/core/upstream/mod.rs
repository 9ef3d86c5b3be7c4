//! Upstream speech recognition connections.

pub mod base;
pub mod deepgram;

pub use base::{
    CloseInfo, TELEPHONY_CHANNELS, TELEPHONY_ENCODING, TELEPHONY_SAMPLE_RATE, TranscriptResult,
    UpstreamConfig, UpstreamConnection, UpstreamError, UpstreamErrorPayload, UpstreamEvent,
    UpstreamFactory, UpstreamHandle,
};
pub use deepgram::{DeepgramClient, DeepgramClientConfig, KeyCheck, verify_api_key};
