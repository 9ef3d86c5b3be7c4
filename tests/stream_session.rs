//! End-to-end media stream tests
//!
//! A real gateway on a random port, a mock Deepgram behind it and a
//! WebSocket client playing the telephony provider.

mod mock_deepgram;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use callscribe_gateway::core::session::SessionDiagnostic;
use callscribe_gateway::core::sink::TranscriptSink;
use callscribe_gateway::core::upstream::{
    DeepgramClient, UpstreamConfig, UpstreamError, UpstreamFactory, UpstreamHandle,
};
use callscribe_gateway::{AppState, ServerConfig, routes};
use mock_deepgram::{MockBehavior, MockDeepgram};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Default)]
struct RecordingSink {
    transcripts: Mutex<Vec<(String, String)>>,
    diagnostics: Mutex<Vec<SessionDiagnostic>>,
}

impl TranscriptSink for RecordingSink {
    fn on_final_transcript(&self, session_id: &str, text: &str, _timestamp: OffsetDateTime) {
        self.transcripts
            .lock()
            .unwrap()
            .push((session_id.to_string(), text.to_string()));
    }

    fn on_diagnostic(&self, _session_id: &str, diagnostic: &SessionDiagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic.clone());
    }
}

struct FailingFactory;

impl UpstreamFactory for FailingFactory {
    fn create(&self, _config: &UpstreamConfig) -> Result<UpstreamHandle, UpstreamError> {
        Err(UpstreamError::ConnectionFailed("service unavailable".to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "failing"
    }
}

fn test_config(listen_url: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.deepgram_api_key = "test-key".to_string();
    config.deepgram_url = listen_url.to_string();
    config.keepalive_interval_seconds = 1;
    config
}

async fn start_gateway(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn gateway_with_mock(
    behavior: MockBehavior,
) -> (MockDeepgram, Arc<AppState>, Arc<RecordingSink>, SocketAddr) {
    let mock = MockDeepgram::start(behavior).await;
    let config = test_config(&mock.listen_url());
    let client = DeepgramClient::new(config.deepgram_client_config()).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let state = AppState::with_components(config, Arc::new(client), sink.clone());
    let addr = start_gateway(state.clone()).await;
    (mock, state, sink, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/twilio/stream"))
        .await
        .unwrap();
    client
}

async fn send_json(client: &mut Client, value: serde_json::Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

fn media(payload: &str) -> serde_json::Value {
    json!({"event": "media", "streamSid": "MZ1", "media": {"track": "inbound", "payload": payload}})
}

/// Read until the gateway closes the socket.
async fn wait_for_close(client: &mut Client) -> bool {
    timeout(Duration::from_secs(10), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => {}
            }
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_call_forwards_audio_and_emits_final_transcript() {
    let (mock, state, sink, addr) = gateway_with_mock(MockBehavior::Transcribe {
        final_text: "thanks for calling".to_string(),
    })
    .await;
    let mut client = connect(addr).await;

    send_json(&mut client, json!({"event": "connected", "protocol": "Call"})).await;
    send_json(
        &mut client,
        json!({"event": "start", "streamSid": "MZ1", "start": {"callSid": "CA1", "streamSid": "MZ1"}}),
    )
    .await;
    // [1,2], [3,4], [5,6]
    for payload in ["AQI=", "AwQ=", "BQY="] {
        send_json(&mut client, media(payload)).await;
    }
    send_json(&mut client, json!({"event": "dtmf", "dtmf": {"digit": "1"}})).await;
    client
        .send(Message::Text("{not json".to_string().into()))
        .await
        .unwrap();

    assert!(
        mock.wait_for(|c| c.first().is_some_and(|r| r.audio.len() == 3))
            .await
    );
    assert_eq!(state.active_sessions(), 1);

    send_json(&mut client, json!({"event": "stop", "streamSid": "MZ1"})).await;
    assert!(wait_for_close(&mut client).await, "gateway did not close the stream");

    let record = mock.connection(0).unwrap();
    assert_eq!(record.audio, vec![vec![1, 2], vec![3, 4], vec![5, 6]]);
    assert_eq!(record.close_streams, 1);

    let transcripts = sink.transcripts.lock().unwrap().clone();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].1, "thanks for calling");

    let diagnostics = sink.diagnostics.lock().unwrap().clone();
    assert!(matches!(
        diagnostics.last(),
        Some(SessionDiagnostic::UpstreamClosed(_))
    ));
}

#[tokio::test]
async fn test_caller_hangup_finishes_upstream() {
    let (mock, state, _sink, addr) = gateway_with_mock(MockBehavior::Transcribe {
        final_text: String::new(),
    })
    .await;
    let mut client = connect(addr).await;

    send_json(&mut client, media("AQI=")).await;
    assert!(
        mock.wait_for(|c| c.first().is_some_and(|r| r.audio.len() == 1))
            .await
    );

    client.close(None).await.unwrap();
    assert!(
        mock.wait_for(|c| c.first().is_some_and(|r| r.close_streams == 1))
            .await
    );

    for _ in 0..200 {
        if state.active_sessions() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(state.active_sessions(), 0);
}

#[tokio::test]
async fn test_keepalive_sent_while_open() {
    let (mock, _state, _sink, addr) = gateway_with_mock(MockBehavior::Transcribe {
        final_text: String::new(),
    })
    .await;
    let mut client = connect(addr).await;
    send_json(&mut client, json!({"event": "start", "streamSid": "MZ1"})).await;

    assert!(
        mock.wait_for(|c| c.first().is_some_and(|r| r.keepalives >= 1))
            .await
    );

    send_json(&mut client, json!({"event": "stop"})).await;
    assert!(wait_for_close(&mut client).await);
}

#[tokio::test]
async fn test_upstream_error_keeps_call_running() {
    let (mock, _state, sink, addr) = gateway_with_mock(MockBehavior::ErrorAfterFirstFrame).await;
    let mut client = connect(addr).await;

    send_json(&mut client, media("AQI=")).await;
    for _ in 0..200 {
        if !sink.diagnostics.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(matches!(
        sink.diagnostics.lock().unwrap().first(),
        Some(SessionDiagnostic::UpstreamError(payload)) if payload.message == "x"
    ));

    send_json(&mut client, media("AwQ=")).await;
    assert!(
        mock.wait_for(|c| c.first().is_some_and(|r| r.audio == vec![vec![1, 2], vec![3, 4]]))
            .await
    );

    send_json(&mut client, json!({"event": "stop"})).await;
    assert!(wait_for_close(&mut client).await);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let (mock, _state, _sink, addr) = gateway_with_mock(MockBehavior::Transcribe {
        final_text: String::new(),
    })
    .await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    send_json(&mut first, media("AQI=")).await;
    assert!(
        mock.wait_for(|c| c.iter().any(|r| r.audio.len() == 1))
            .await
    );
    send_json(&mut second, media("AwQ=")).await;
    send_json(&mut second, media("BQY=")).await;
    assert!(
        mock.wait_for(|c| c.len() == 2
            && c.iter().any(|r| r.audio == vec![vec![1, 2]])
            && c.iter().any(|r| r.audio == vec![vec![3, 4], vec![5, 6]]))
            .await
    );

    send_json(&mut first, json!({"event": "stop"})).await;
    assert!(wait_for_close(&mut first).await);

    // The second call still streams after the first one ended
    send_json(&mut second, media("Bwg=")).await;
    assert!(
        mock.wait_for(|c| c.iter().any(|r| r.audio.len() == 3))
            .await
    );
    send_json(&mut second, json!({"event": "stop"})).await;
    assert!(wait_for_close(&mut second).await);
}

#[tokio::test]
async fn test_upstream_setup_failure_closes_call() {
    let sink = Arc::new(RecordingSink::default());
    let state = AppState::with_components(
        test_config("ws://127.0.0.1:1/v1/listen"),
        Arc::new(FailingFactory),
        sink.clone(),
    );
    let addr = start_gateway(state.clone()).await;

    let mut client = connect(addr).await;
    assert!(wait_for_close(&mut client).await);
    assert!(matches!(
        sink.diagnostics.lock().unwrap().first(),
        Some(SessionDiagnostic::SetupFailed { message }) if message.contains("service unavailable")
    ));
}
