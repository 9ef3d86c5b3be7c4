//! Deepgram live transcription WebSocket client.
//!
//! [`DeepgramClient`] is the process-wide client: it holds the API key and
//! endpoint and opens one [`DeepgramConnection`] per call.
//!
//! ```text
//! ┌─────────────────┐  command_tx (mpsc)  ┌──────────────────┐
//! │ DeepgramConnection ├───────────────────▶│  connection task │◀──▶ Deepgram
//! └─────────────────┘                     └────────┬─────────┘
//!                                                  │ event_tx (mpsc)
//!                                                  ▼
//!                                           UpstreamEvent stream
//! ```
//!
//! The connection task owns the socket. Audio and keepalives are queued on
//! a bounded channel so `send` never blocks the caller; `finish` is signalled
//! out of band so it cannot be lost to a full buffer.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, Request, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::config::DeepgramClientConfig;
use super::messages::{ControlMessage, DeepgramMessage};
use crate::core::upstream::base::{
    CloseInfo, UpstreamConfig, UpstreamConnection, UpstreamError, UpstreamErrorPayload,
    UpstreamEvent, UpstreamFactory, UpstreamHandle,
};

// =============================================================================
// Constants
// =============================================================================

/// Minimum outgoing audio buffer. 512 telephony frames is about ten seconds
/// of audio.
const COMMAND_BUFFER_SIZE: usize = 512;

/// Room for keepalives on top of a fully flushed session queue.
const COMMAND_HEADROOM: usize = 16;

/// Buffer for events travelling back to the session.
const EVENT_BUFFER_SIZE: usize = 256;

/// Maximum time allowed for the WebSocket handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for final results after CloseStream before closing the
/// socket ourselves.
const FINISH_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum Command {
    Audio(Bytes),
    KeepAlive,
}

// =============================================================================
// DeepgramClient
// =============================================================================

/// Process-wide Deepgram client, shared by every session.
#[derive(Debug, Clone)]
pub struct DeepgramClient {
    config: Arc<DeepgramClientConfig>,
}

impl DeepgramClient {
    pub fn new(config: DeepgramClientConfig) -> Result<Self, UpstreamError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &DeepgramClientConfig {
        &self.config
    }

    fn build_request(&self, stream: &UpstreamConfig) -> Result<Request<()>, UpstreamError> {
        let url = self.config.build_websocket_url(stream)?;
        let mut request = url.as_str().into_client_request().map_err(|e| {
            UpstreamError::ConfigurationError(format!("Failed to create WebSocket request: {e}"))
        })?;
        let authorization = HeaderValue::from_str(&self.config.authorization()).map_err(|_| {
            UpstreamError::AuthenticationFailed("API key contains invalid characters".to_string())
        })?;
        request.headers_mut().insert(AUTHORIZATION, authorization);
        Ok(request)
    }
}

impl UpstreamFactory for DeepgramClient {
    fn create(&self, config: &UpstreamConfig) -> Result<UpstreamHandle, UpstreamError> {
        let request = self.build_request(config)?;

        let (command_tx, command_rx) = mpsc::channel::<Command>(command_buffer_size(config));
        let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(EVENT_BUFFER_SIZE);
        let closed = Arc::new(AtomicBool::new(false));
        let finish = Arc::new(Notify::new());

        tokio::spawn(run_connection(
            request,
            command_rx,
            event_tx,
            finish.clone(),
            closed.clone(),
        ));

        Ok(UpstreamHandle {
            connection: Box::new(DeepgramConnection {
                command_tx,
                finish,
                finish_requested: AtomicBool::new(false),
                closed,
            }),
            events: event_rx,
        })
    }

    fn provider_name(&self) -> &'static str {
        "deepgram"
    }
}

fn command_buffer_size(config: &UpstreamConfig) -> usize {
    COMMAND_BUFFER_SIZE.max(config.send_buffer_frames.saturating_add(COMMAND_HEADROOM))
}

// =============================================================================
// DeepgramConnection
// =============================================================================

/// Handle to one live Deepgram stream.
pub struct DeepgramConnection {
    command_tx: mpsc::Sender<Command>,
    finish: Arc<Notify>,
    finish_requested: AtomicBool,
    closed: Arc<AtomicBool>,
}

impl DeepgramConnection {
    fn enqueue(&self, command: Command) -> Result<(), UpstreamError> {
        if self.is_closed() {
            return Err(UpstreamError::Closed);
        }
        if self.finish_requested.load(Ordering::Acquire) {
            return Err(UpstreamError::SendFailed("stream is finishing".to_string()));
        }
        self.command_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                UpstreamError::SendFailed("outgoing audio buffer is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => UpstreamError::Closed,
        })
    }
}

impl UpstreamConnection for DeepgramConnection {
    fn send(&self, frame: Bytes) -> Result<(), UpstreamError> {
        // An empty binary frame is read by Deepgram as end-of-stream.
        if frame.is_empty() {
            return Ok(());
        }
        self.enqueue(Command::Audio(frame))
    }

    fn keep_alive(&self) -> Result<(), UpstreamError> {
        self.enqueue(Command::KeepAlive)
    }

    fn finish(&self) {
        if self.is_closed() || self.finish_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        self.finish.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for DeepgramConnection {
    fn drop(&mut self) {
        self.finish();
    }
}

// =============================================================================
// Connection Task
// =============================================================================

async fn run_connection(
    request: Request<()>,
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<UpstreamEvent>,
    finish: Arc<Notify>,
    closed: Arc<AtomicBool>,
) {
    let close_info = drive_connection(request, command_rx, &event_tx, &finish).await;
    closed.store(true, Ordering::Release);
    info!(
        code = ?close_info.code,
        reason = %close_info.reason,
        "Deepgram connection closed"
    );
    let _ = event_tx.send(UpstreamEvent::Closed(close_info)).await;
}

async fn drive_connection(
    request: Request<()>,
    mut command_rx: mpsc::Receiver<Command>,
    event_tx: &mpsc::Sender<UpstreamEvent>,
    finish: &Notify,
) -> CloseInfo {
    let ws_stream = match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            let stt_error = classify_connect_error(&e);
            error!("Failed to connect to Deepgram: {}", stt_error);
            emit_error(event_tx, UpstreamErrorPayload::from_error(&stt_error)).await;
            return CloseInfo {
                code: None,
                reason: stt_error.to_string(),
            };
        }
        Err(_elapsed) => {
            let stt_error = UpstreamError::ConnectionFailed(format!(
                "handshake did not complete within {}s",
                CONNECT_TIMEOUT.as_secs()
            ));
            error!("Deepgram connection timeout: {}", stt_error);
            emit_error(event_tx, UpstreamErrorPayload::from_error(&stt_error)).await;
            return CloseInfo {
                code: None,
                reason: stt_error.to_string(),
            };
        }
    };

    info!("Connected to Deepgram live transcription");
    if event_tx.send(UpstreamEvent::Ready).await.is_err() {
        return CloseInfo {
            code: None,
            reason: "session dropped before ready".to_string(),
        };
    }

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut finish_deadline: Option<Instant> = None;
    let mut accepting_commands = true;

    let close_info = loop {
        tokio::select! {
            command = command_rx.recv(), if accepting_commands => {
                match command {
                    Some(command) => {
                        if let Err(e) = write_command(&mut ws_sink, command).await {
                            emit_error(event_tx, UpstreamErrorPayload::from_error(&e)).await;
                            break CloseInfo { code: None, reason: e.to_string() };
                        }
                    }
                    None => {
                        // Handle dropped without finish; flush and close.
                        accepting_commands = false;
                        if finish_deadline.is_none() {
                            finish_deadline = Some(send_close_stream(&mut ws_sink).await);
                        }
                    }
                }
            }

            _ = finish.notified(), if finish_deadline.is_none() => {
                // Audio queued before finish goes out ahead of CloseStream.
                while let Ok(command) = command_rx.try_recv() {
                    if let Err(e) = write_command(&mut ws_sink, command).await {
                        warn!("Failed to flush queued audio before finish: {}", e);
                        break;
                    }
                }
                accepting_commands = false;
                finish_deadline = Some(send_close_stream(&mut ws_sink).await);
            }

            message = ws_stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = translate_message(&text)
                            && event_tx.send(event).await.is_err()
                        {
                            break CloseInfo { code: None, reason: "session dropped".to_string() };
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => CloseInfo {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => CloseInfo { code: None, reason: "closed by server".to_string() },
                        };
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring {} byte binary message from Deepgram", data.len());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let stt_error = UpstreamError::ConnectionFailed(format!("WebSocket error: {e}"));
                        error!("{}", stt_error);
                        emit_error(event_tx, UpstreamErrorPayload::from_error(&stt_error)).await;
                        break CloseInfo { code: None, reason: stt_error.to_string() };
                    }
                    None => {
                        break CloseInfo { code: None, reason: "stream ended".to_string() };
                    }
                }
            }

            _ = wait_for(finish_deadline) => {
                warn!(
                    "Deepgram did not close within {}s of CloseStream",
                    FINISH_GRACE_PERIOD.as_secs()
                );
                break CloseInfo { code: None, reason: "finish grace period elapsed".to_string() };
            }
        }
    };

    let _ = ws_sink.send(Message::Close(None)).await;
    let _ = ws_sink.close().await;
    close_info
}

type WsSink = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;

async fn write_command(ws_sink: &mut WsSink, command: Command) -> Result<(), UpstreamError> {
    let message = match command {
        Command::Audio(frame) => Message::Binary(frame),
        Command::KeepAlive => {
            debug!("Sending KeepAlive to Deepgram");
            Message::Text(ControlMessage::KeepAlive.to_json().into())
        }
    };
    ws_sink
        .send(message)
        .await
        .map_err(|e| UpstreamError::SendFailed(format!("Failed to write to Deepgram: {e}")))
}

async fn send_close_stream(ws_sink: &mut WsSink) -> Instant {
    debug!("Sending CloseStream to Deepgram");
    if let Err(e) = ws_sink
        .send(Message::Text(ControlMessage::CloseStream.to_json().into()))
        .await
    {
        warn!("Failed to send CloseStream: {}", e);
    }
    Instant::now() + FINISH_GRACE_PERIOD
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn emit_error(event_tx: &mpsc::Sender<UpstreamEvent>, payload: UpstreamErrorPayload) {
    let _ = event_tx.send(UpstreamEvent::Error(payload)).await;
}

fn classify_connect_error(e: &tokio_tungstenite::tungstenite::Error) -> UpstreamError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::Http(response) => match response.status().as_u16() {
            401 | 403 => UpstreamError::AuthenticationFailed(format!(
                "Deepgram rejected credentials (HTTP {})",
                response.status()
            )),
            status => UpstreamError::ConnectionFailed(format!(
                "Deepgram handshake failed (HTTP {status})"
            )),
        },
        other => UpstreamError::ConnectionFailed(format!("Failed to connect to Deepgram: {other}")),
    }
}

/// Translate one text frame into the event the session should see, if any.
pub(crate) fn translate_message(text: &str) -> Option<UpstreamEvent> {
    match DeepgramMessage::parse(text) {
        Ok(DeepgramMessage::Results(results)) => {
            Some(UpstreamEvent::Transcript(results.into_transcript()))
        }
        Ok(DeepgramMessage::Error { message, raw }) => {
            Some(UpstreamEvent::Error(message.into_payload(raw)))
        }
        Ok(DeepgramMessage::Metadata(metadata)) => {
            debug!(request_id = ?metadata.request_id, "Deepgram metadata");
            None
        }
        Ok(DeepgramMessage::SpeechStarted(started)) => {
            debug!(timestamp = ?started.timestamp, "Deepgram speech started");
            None
        }
        Ok(DeepgramMessage::UtteranceEnd(end)) => {
            debug!(last_word_end = ?end.last_word_end, "Deepgram utterance end");
            None
        }
        Ok(DeepgramMessage::Unknown(raw)) => {
            debug!("Received unknown Deepgram message: {}", raw);
            None
        }
        Err(e) => {
            warn!("Failed to parse Deepgram message: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_with_empty_api_key() {
        let result = DeepgramClient::new(DeepgramClientConfig::new(""));
        match result {
            Err(UpstreamError::AuthenticationFailed(msg)) => {
                assert!(msg.contains("API key is required"))
            }
            other => panic!("Expected AuthenticationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_build_request_sets_token_authorization() {
        let client = DeepgramClient::new(DeepgramClientConfig::new("abc123")).unwrap();
        let request = client.build_request(&UpstreamConfig::default()).unwrap();

        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Token abc123"
        );
        assert_eq!(request.uri().host(), Some("api.deepgram.com"));
        assert!(request.uri().query().unwrap().contains("encoding=mulaw"));
    }

    #[test]
    fn test_create_rejects_zero_sample_rate() {
        let client = DeepgramClient::new(DeepgramClientConfig::new("abc123")).unwrap();
        let config = UpstreamConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(
            client.create(&config),
            Err(UpstreamError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_translate_final_results() {
        let text = r#"{"type":"Results","is_final":true,"speech_final":false,"channel":{"alternatives":[{"transcript":"hi","confidence":0.9}]}}"#;
        match translate_message(text) {
            Some(UpstreamEvent::Transcript(result)) => {
                assert_eq!(result.transcript, "hi");
                assert!(result.is_final);
                assert!(!result.speech_final);
            }
            other => panic!("Expected transcript, got {other:?}"),
        }
    }

    #[test]
    fn test_translate_error_message() {
        let text = r#"{"type":"Error","message":"x"}"#;
        match translate_message(text) {
            Some(UpstreamEvent::Error(payload)) => assert_eq!(payload.message, "x"),
            other => panic!("Expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_translate_informational_messages() {
        assert!(translate_message(r#"{"type":"Metadata","request_id":"r"}"#).is_none());
        assert!(translate_message(r#"{"type":"UtteranceEnd","last_word_end":1.0}"#).is_none());
        assert!(translate_message(r#"{"type":"SpeechStarted","timestamp":0.5}"#).is_none());
        assert!(translate_message("garbage").is_none());
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_and_blocks_further_sends() {
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let finish = Arc::new(Notify::new());
        let connection = DeepgramConnection {
            command_tx,
            finish: finish.clone(),
            finish_requested: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
        };

        connection.send(Bytes::from_static(b"\xff\xff")).unwrap();
        connection.finish();
        connection.finish();

        assert!(matches!(
            connection.send(Bytes::from_static(b"\x7f")),
            Err(UpstreamError::SendFailed(_))
        ));
        assert!(matches!(command_rx.try_recv(), Ok(Command::Audio(_))));
        assert!(command_rx.try_recv().is_err());

        // A single stored permit, no matter how many finish calls.
        timeout(Duration::from_millis(50), finish.notified())
            .await
            .expect("finish should be signalled");
    }

    #[test]
    fn test_send_after_close_fails() {
        let (command_tx, _command_rx) = mpsc::channel(4);
        let connection = DeepgramConnection {
            command_tx,
            finish: Arc::new(Notify::new()),
            finish_requested: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(true)),
        };
        assert_eq!(
            connection.send(Bytes::from_static(b"\x00")),
            Err(UpstreamError::Closed)
        );
        assert_eq!(connection.keep_alive(), Err(UpstreamError::Closed));
    }

    #[test]
    fn test_empty_frame_is_not_forwarded() {
        let (command_tx, mut command_rx) = mpsc::channel(4);
        let connection = DeepgramConnection {
            command_tx,
            finish: Arc::new(Notify::new()),
            finish_requested: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
        };
        connection.send(Bytes::new()).unwrap();
        assert!(command_rx.try_recv().is_err());
    }
}
