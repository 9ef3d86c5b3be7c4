//! Mock Deepgram live transcription server
//!
//! Accepts WebSocket connections on a random local port and records what each
//! client sends. On `CloseStream` it answers with one final `Results` message
//! and closes the socket, the same way the real service flushes a stream.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

/// How the mock answers a new connection.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Accept, then reply to CloseStream with this final transcript
    Transcribe { final_text: String },
    /// Accept, and push an in-band error after the first audio frame
    ErrorAfterFirstFrame,
    /// Refuse the handshake with this HTTP status
    Reject(u16),
}

/// Everything one client connection sent.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRecord {
    pub authorization: Option<String>,
    pub query: Option<String>,
    pub audio: Vec<Vec<u8>>,
    pub keepalives: usize,
    pub close_streams: usize,
}

#[derive(Clone)]
pub struct MockDeepgram {
    pub addr: SocketAddr,
    connections: Arc<Mutex<Vec<ConnectionRecord>>>,
}

impl MockDeepgram {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(Mutex::new(Vec::new()));

        let records = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, behavior.clone(), records.clone()));
            }
        });

        Self { addr, connections }
    }

    pub fn listen_url(&self) -> String {
        format!("ws://{}/v1/listen", self.addr)
    }

    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.connections.lock().unwrap().clone()
    }

    pub fn connection(&self, index: usize) -> Option<ConnectionRecord> {
        self.connections.lock().unwrap().get(index).cloned()
    }

    /// Poll until `check` holds for the recorded connections.
    pub async fn wait_for(&self, check: impl Fn(&[ConnectionRecord]) -> bool) -> bool {
        for _ in 0..200 {
            if check(&self.connections()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }
}

async fn handle_connection(
    stream: TcpStream,
    behavior: MockBehavior,
    connections: Arc<Mutex<Vec<ConnectionRecord>>>,
) {
    let mut record = ConnectionRecord::default();
    let reject = match behavior {
        MockBehavior::Reject(status) => Some(status),
        _ => None,
    };

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        record.authorization = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        record.query = request.uri().query().map(str::to_string);
        match reject {
            Some(status) => {
                let mut error = ErrorResponse::new(Some("rejected".to_string()));
                *error.status_mut() = StatusCode::from_u16(status).unwrap();
                Err(error)
            }
            None => Ok(response),
        }
    };

    let accepted = accept_hdr_async(stream, callback).await;
    let index = {
        let mut connections = connections.lock().unwrap();
        connections.push(record);
        connections.len() - 1
    };
    let Ok(ws_stream) = accepted else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    let metadata = json!({"type": "Metadata", "request_id": format!("req-{index}"), "channels": 1});
    if write.send(Message::Text(metadata.to_string().into())).await.is_err() {
        return;
    }

    while let Some(Ok(message)) = read.next().await {
        match message {
            Message::Binary(data) => {
                let first = {
                    let mut connections = connections.lock().unwrap();
                    let audio = &mut connections[index].audio;
                    audio.push(data.to_vec());
                    audio.len() == 1
                };
                if first && matches!(behavior, MockBehavior::ErrorAfterFirstFrame) {
                    let error = json!({"type": "Error", "description": "x", "variant": "DATA-0000"});
                    let _ = write.send(Message::Text(error.to_string().into())).await;
                }
            }
            Message::Text(text) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap_or_default();
                match value["type"].as_str() {
                    Some("KeepAlive") => connections.lock().unwrap()[index].keepalives += 1,
                    Some("CloseStream") => {
                        connections.lock().unwrap()[index].close_streams += 1;
                        let final_text = match &behavior {
                            MockBehavior::Transcribe { final_text } => final_text.clone(),
                            _ => String::new(),
                        };
                        let results = json!({
                            "type": "Results",
                            "is_final": true,
                            "speech_final": true,
                            "start": 0.0,
                            "duration": 1.0,
                            "channel": {"alternatives": [{"transcript": final_text, "confidence": 0.97}]}
                        });
                        let _ = write.send(Message::Text(results.to_string().into())).await;
                        let _ = write
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: "stream finished".into(),
                            })))
                            .await;
                        break;
                    }
                    _ => {}
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}
