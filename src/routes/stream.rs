//! Media stream WebSocket route configuration
//!
//! # Endpoint
//!
//! `GET {stream_path}` - WebSocket upgrade for one telephony media stream
//! (`/twilio/stream` by default)
//!
//! # Protocol
//!
//! The telephony provider sends JSON text frames discriminated by `event`:
//! `connected`, `start`, `media` (base64 8kHz mu-law in `media.payload`),
//! `mark`, `dtmf` and finally `stop`. Nothing is sent back; the server closes
//! the socket once the transcription stream has ended.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::stream::stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media stream router on the given path
pub fn create_stream_router(path: &str) -> Router<Arc<AppState>> {
    Router::new()
        .route(path, get(stream_handler))
        .layer(TraceLayer::new_for_http())
}
