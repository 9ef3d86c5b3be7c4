//! Per-call session state machine.
//!
//! [`CallSession::handle`] consumes one [`SessionEvent`] at a time and returns
//! the [`Effect`]s the driver must perform. The session never touches a socket
//! itself, which keeps every transition testable without I/O.
//!
//! ```text
//!  Connecting ──ready──▶ Open ──stop / inbound close──▶ Draining
//!      │                  │                               │
//!      └──────────────────┴──────── upstream closed ──────┴──▶ Closed
//! ```

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::envelope::{EnvelopeError, InboundEvent};
use crate::core::queue::AudioFrameQueue;
use crate::core::upstream::{CloseInfo, TranscriptResult, UpstreamErrorPayload, UpstreamEvent};

/// Media frames between progress log lines.
const FRAME_LOG_INTERVAL: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Open,
    Draining,
    Closed,
}

/// Everything a session reacts to, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A parsed inbound envelope
    Inbound(InboundEvent),
    /// An inbound frame that could not be parsed
    Malformed(EnvelopeError),
    /// The caller-side socket closed
    InboundClosed,
    /// The caller-side socket failed
    InboundError(String),
    Upstream(UpstreamEvent),
    KeepAliveTick,
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send one audio frame upstream
    Forward(Bytes),
    StartKeepAlive,
    StopKeepAlive,
    SendKeepAlive,
    /// Ask upstream to flush and close
    FinishUpstream,
    CloseInbound,
    /// A finalized utterance for the transcript sink
    EmitTranscript(String),
    Diagnostic(SessionDiagnostic),
}

/// Structured events reported to the transcript sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionDiagnostic {
    UpstreamError(UpstreamErrorPayload),
    UpstreamClosed(CloseInfo),
    SetupFailed { message: String },
}

/// State of one inbound call.
#[derive(Debug)]
pub struct CallSession {
    id: String,
    state: SessionState,
    queue: AudioFrameQueue,
    stream_sid: Option<String>,
    call_sid: Option<String>,
    frame_count: u64,
    byte_count: u64,
    keepalive_active: bool,
    finish_requested: bool,
    upstream_closed: bool,
    inbound_closed: bool,
}

impl CallSession {
    pub fn new(id: impl Into<String>, queue_capacity: usize) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Connecting,
            queue: AudioFrameQueue::with_capacity(queue_capacity),
            stream_sid: None,
            call_sid: None,
            frame_count: 0,
            byte_count: 0,
            keepalive_active: false,
            finish_requested: false,
            upstream_closed: false,
            inbound_closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    pub fn call_sid(&self) -> Option<&str> {
        self.call_sid.as_deref()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Whether the driver should keep reading the caller-side socket.
    pub fn accepts_inbound(&self) -> bool {
        !self.inbound_closed && self.state != SessionState::Closed
    }

    /// Apply one event and return the effects to perform, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        if self.state == SessionState::Closed {
            debug!(session_id = %self.id, "Ignoring event on closed session");
            return Vec::new();
        }

        match event {
            SessionEvent::Inbound(inbound) => self.on_inbound(inbound),
            SessionEvent::Malformed(e) => {
                if e.is_media() {
                    self.count_frame();
                }
                warn!(session_id = %self.id, error = %e, "Discarding malformed inbound frame");
                Vec::new()
            }
            SessionEvent::InboundClosed => {
                info!(session_id = %self.id, "Inbound stream closed");
                self.inbound_closed = true;
                self.begin_draining("inbound_closed")
            }
            SessionEvent::InboundError(e) => {
                warn!(session_id = %self.id, error = %e, "Inbound stream error");
                self.inbound_closed = true;
                self.begin_draining("inbound_error")
            }
            SessionEvent::Upstream(upstream) => self.on_upstream(upstream),
            SessionEvent::KeepAliveTick => {
                if self.state == SessionState::Open && !self.upstream_closed {
                    vec![Effect::SendKeepAlive]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) -> Vec<Effect> {
        match event {
            InboundEvent::Connected => {
                info!(session_id = %self.id, "Media stream connected");
                Vec::new()
            }
            InboundEvent::Start(start) => {
                self.stream_sid = start.stream_sid;
                self.call_sid = start.call_sid;
                info!(
                    session_id = %self.id,
                    stream_sid = ?self.stream_sid,
                    call_sid = ?self.call_sid,
                    "Media stream started"
                );
                Vec::new()
            }
            InboundEvent::Media(chunk) => {
                self.count_frame();
                let frame = match chunk.decode() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session_id = %self.id, error = %e, "Discarding media frame");
                        return Vec::new();
                    }
                };
                self.byte_count += frame.len() as u64;
                self.on_audio(frame)
            }
            InboundEvent::Stop => {
                info!(session_id = %self.id, stream_sid = ?self.stream_sid, "Media stream stopped");
                self.begin_draining("stop")
            }
            InboundEvent::Mark { name } => {
                debug!(session_id = %self.id, mark = ?name, "Mark event");
                Vec::new()
            }
            InboundEvent::Dtmf { digit } => {
                debug!(session_id = %self.id, digit = ?digit, "DTMF event");
                Vec::new()
            }
        }
    }

    fn count_frame(&mut self) {
        self.frame_count += 1;
        if self.frame_count % FRAME_LOG_INTERVAL == 0 {
            debug!(
                session_id = %self.id,
                frames = self.frame_count,
                bytes = self.byte_count,
                state = ?self.state,
                "Media progress"
            );
        }
    }

    fn on_audio(&mut self, frame: Bytes) -> Vec<Effect> {
        match self.state {
            SessionState::Connecting => {
                if self.queue.enqueue(frame).is_some() && self.queue.dropped() == 1 {
                    warn!(
                        session_id = %self.id,
                        capacity = self.queue.capacity(),
                        "Audio queue full, dropping oldest frames"
                    );
                }
                Vec::new()
            }
            SessionState::Open if !self.upstream_closed => vec![Effect::Forward(frame)],
            _ => Vec::new(),
        }
    }

    fn on_upstream(&mut self, event: UpstreamEvent) -> Vec<Effect> {
        match event {
            UpstreamEvent::Ready => self.open(),
            UpstreamEvent::Transcript(result) => self.on_transcript(result),
            UpstreamEvent::Error(payload) => {
                error!(
                    session_id = %self.id,
                    message = %payload.message,
                    code = ?payload.code,
                    kind = ?payload.kind,
                    raw = ?payload.raw,
                    "Upstream error"
                );
                vec![Effect::Diagnostic(SessionDiagnostic::UpstreamError(payload))]
            }
            UpstreamEvent::Closed(info) => {
                self.upstream_closed = true;
                info!(
                    session_id = %self.id,
                    code = ?info.code,
                    reason = %info.reason,
                    "Upstream closed"
                );
                let mut effects = vec![Effect::Diagnostic(SessionDiagnostic::UpstreamClosed(info))];
                effects.extend(self.teardown("upstream_closed"));
                effects
            }
        }
    }

    fn open(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Connecting {
            debug!(session_id = %self.id, state = ?self.state, "Ignoring late upstream ready");
            return Vec::new();
        }

        self.state = SessionState::Open;
        let buffered = self.queue.drain_in_order();
        info!(
            session_id = %self.id,
            buffered = buffered.len(),
            dropped = self.queue.dropped(),
            "Upstream ready"
        );

        let mut effects: Vec<Effect> = buffered.into_iter().map(Effect::Forward).collect();
        self.keepalive_active = true;
        effects.push(Effect::StartKeepAlive);
        effects
    }

    fn on_transcript(&mut self, result: TranscriptResult) -> Vec<Effect> {
        let text = result.transcript.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if !result.is_final {
            debug!(session_id = %self.id, transcript = %text, "Interim transcript");
            return Vec::new();
        }
        info!(
            session_id = %self.id,
            confidence = result.confidence,
            speech_final = result.speech_final,
            "Sentence: {}",
            text
        );
        vec![Effect::EmitTranscript(text.to_string())]
    }

    fn begin_draining(&mut self, why: &'static str) -> Vec<Effect> {
        match self.state {
            SessionState::Connecting | SessionState::Open => {}
            _ => return Vec::new(),
        }

        if self.state == SessionState::Connecting && !self.queue.is_empty() {
            let discarded = self.queue.drain_in_order().len();
            debug!(session_id = %self.id, discarded, "Discarding audio buffered before ready");
        }
        self.state = SessionState::Draining;
        info!(session_id = %self.id, why, "Draining session");

        let mut effects = self.stop_keepalive();
        if !self.upstream_closed && !self.finish_requested {
            self.finish_requested = true;
            effects.push(Effect::FinishUpstream);
        }
        effects
    }

    fn teardown(&mut self, why: &'static str) -> Vec<Effect> {
        self.state = SessionState::Closed;
        if !self.queue.is_empty() {
            self.queue.drain_in_order();
        }

        let mut effects = self.stop_keepalive();
        if !self.inbound_closed {
            self.inbound_closed = true;
            effects.push(Effect::CloseInbound);
        }
        info!(
            session_id = %self.id,
            why,
            frames = self.frame_count,
            bytes = self.byte_count,
            dropped = self.queue.dropped(),
            "Stopped stream"
        );
        effects
    }

    fn stop_keepalive(&mut self) -> Vec<Effect> {
        if std::mem::take(&mut self.keepalive_active) {
            vec![Effect::StopKeepAlive]
        } else {
            Vec::new()
        }
    }
}
