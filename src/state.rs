//! Shared application state.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::core::sink::{TracingSink, TranscriptSink};
use crate::core::upstream::{DeepgramClient, UpstreamConfig, UpstreamError, UpstreamFactory};

/// State shared by every request and session.
///
/// Everything here is immutable after startup except the session counter.
pub struct AppState {
    pub config: ServerConfig,
    pub upstream: Arc<dyn UpstreamFactory>,
    pub sink: Arc<dyn TranscriptSink>,
    upstream_config: UpstreamConfig,
    active_sessions: AtomicUsize,
}

impl AppState {
    /// Build state with the Deepgram client and the logging transcript sink.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, UpstreamError> {
        let client = DeepgramClient::new(config.deepgram_client_config())?;
        Ok(Self::with_components(
            config,
            Arc::new(client),
            Arc::new(TracingSink),
        ))
    }

    pub fn with_components(
        config: ServerConfig,
        upstream: Arc<dyn UpstreamFactory>,
        sink: Arc<dyn TranscriptSink>,
    ) -> Arc<Self> {
        let upstream_config = config.upstream_config();
        Arc::new(Self {
            config,
            upstream,
            sink,
            upstream_config,
            active_sessions: AtomicUsize::new(0),
        })
    }

    pub fn upstream_config(&self) -> &UpstreamConfig {
        &self.upstream_config
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Count a session as active until the returned guard is dropped.
    pub fn track_session(self: &Arc<Self>) -> SessionGuard {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            state: Arc::clone(self),
        }
    }
}

/// Decrements the active session count on drop, including during unwinding.
pub struct SessionGuard {
    state: Arc<AppState>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}
