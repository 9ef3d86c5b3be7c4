//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `stream` - Telephony media stream WebSocket, one session per call

pub mod api;
pub mod stream;

pub use stream::stream_handler;
