//! Media stream WebSocket handler
//!
//! One task per inbound call. The task owns the caller-side socket, the
//! upstream connection and the [`CallSession`], and runs a single `select!`
//! loop over the socket, the upstream event channel and the keepalive
//! ticker. Every session event is therefore handled to completion before the
//! next one is looked at.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::core::session::{
    CallSession, Effect, EnvelopeError, InboundEvent, SessionDiagnostic, SessionEvent,
};
use crate::core::upstream::{CloseInfo, UpstreamConnection, UpstreamEvent, UpstreamHandle};
use crate::state::AppState;

/// Media envelopes are small; anything near this size is not a media stream.
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Media stream WebSocket handler
///
/// Upgrades the connection and hands the socket to a dedicated session task.
pub async fn stream_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_failed_upgrade(|e| warn!("Media stream upgrade failed: {}", e))
        .on_upgrade(move |socket| {
            let session_id = Uuid::new_v4().to_string();
            let span = info_span!("session", session_id = %session_id);
            run_session(socket, state, session_id).instrument(span)
        })
}

/// Drive one call from accept to teardown.
pub async fn run_session(mut socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let _guard = state.track_session();
    info!(active_sessions = state.active_sessions(), "Media stream connected");

    let UpstreamHandle {
        connection,
        mut events,
    } = match state.upstream.create(state.upstream_config()) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to create upstream connection");
            state.sink.on_diagnostic(
                &session_id,
                &SessionDiagnostic::SetupFailed {
                    message: e.to_string(),
                },
            );
            if let Err(e) = socket.send(Message::Close(None)).await {
                debug!("Failed to close media stream: {}", e);
            }
            return;
        }
    };
    debug!(provider = state.upstream.provider_name(), "Upstream connection created");

    let mut session = CallSession::new(session_id, state.config.audio_queue_capacity);
    let (sender, mut receiver) = socket.split();
    let mut io = SessionIo {
        connection,
        sender,
        keepalive: None,
        keepalive_period: state.config.keepalive_interval(),
        state: &state,
    };

    while !session.is_closed() {
        let event = tokio::select! {
            message = receiver.next(), if session.accepts_inbound() => {
                match inbound_event(message) {
                    Some(event) => event,
                    None => continue,
                }
            }
            event = events.recv() => {
                SessionEvent::Upstream(event.unwrap_or_else(|| {
                    UpstreamEvent::Closed(CloseInfo {
                        code: None,
                        reason: "upstream event channel closed".to_string(),
                    })
                }))
            }
            _ = next_tick(&mut io.keepalive) => SessionEvent::KeepAliveTick,
        };

        for effect in session.handle(event) {
            io.apply(session.id(), effect).await;
        }
    }

    info!(
        stream_sid = ?session.stream_sid(),
        call_sid = ?session.call_sid(),
        frames = session.frame_count(),
        bytes = session.byte_count(),
        "Session finished"
    );
}

/// Map one socket read to a session event. `None` means nothing to do.
fn inbound_event(message: Option<Result<Message, axum::Error>>) -> Option<SessionEvent> {
    match message {
        Some(Ok(Message::Text(text))) => Some(match InboundEvent::parse(text.as_str()) {
            Ok(event) => SessionEvent::Inbound(event),
            Err(e) => SessionEvent::Malformed(e),
        }),
        Some(Ok(Message::Binary(_))) => {
            Some(SessionEvent::Malformed(EnvelopeError::UnexpectedBinary))
        }
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => None,
        Some(Ok(Message::Close(_))) | None => Some(SessionEvent::InboundClosed),
        Some(Err(e)) => Some(SessionEvent::InboundError(e.to_string())),
    }
}

async fn next_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The I/O half of a session: everything effects are applied to.
struct SessionIo<'a> {
    connection: Box<dyn UpstreamConnection>,
    sender: SplitSink<WebSocket, Message>,
    keepalive: Option<Interval>,
    keepalive_period: Duration,
    state: &'a AppState,
}

impl SessionIo<'_> {
    async fn apply(&mut self, session_id: &str, effect: Effect) {
        match effect {
            Effect::Forward(frame) => {
                if self.connection.is_closed() {
                    debug!("Upstream closed, dropping audio frame");
                } else if let Err(e) = self.connection.send(frame) {
                    warn!(error = %e, "Failed to forward audio frame");
                }
            }
            Effect::StartKeepAlive => {
                let start = Instant::now()
                    .checked_add(self.keepalive_period)
                    .unwrap_or_else(Instant::now);
                let mut interval = interval_at(start, self.keepalive_period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.keepalive = Some(interval);
            }
            Effect::StopKeepAlive => {
                self.keepalive = None;
            }
            Effect::SendKeepAlive => {
                if let Err(e) = self.connection.keep_alive() {
                    warn!(error = %e, "Failed to send keepalive");
                }
            }
            Effect::FinishUpstream => self.connection.finish(),
            Effect::CloseInbound => {
                if let Err(e) = self.sender.send(Message::Close(None)).await {
                    debug!("Media stream already closed: {}", e);
                }
                let _ = self.sender.close().await;
            }
            Effect::EmitTranscript(text) => {
                self.state
                    .sink
                    .on_final_transcript(session_id, &text, OffsetDateTime::now_utc());
            }
            Effect::Diagnostic(diagnostic) => {
                self.state.sink.on_diagnostic(session_id, &diagnostic);
            }
        }
    }
}
