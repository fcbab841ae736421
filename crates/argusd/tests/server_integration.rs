//! Integration tests for the Unix socket command server.
//!
//! A real `IpcServer` listens on a socket in a temp directory; the
//! maintenance backend is a recording fake and the control tokens land in
//! a plain queue.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use argus_core::{ArmType, MonitoringState, PowerSource};
use argus_protocol::{ClockSettings, PushEvent, Request, Response};
use argusd::broadcast::{Broadcaster, ControlToken, QueueSink};
use argusd::config::SocketConfig;
use argusd::events::EventPublisher;
use argusd::maintenance::{Maintenance, MaintenanceError, MaintenanceResult};
use argusd::server::{IpcServer, ServerContext};
use argusd::state::SharedStateStore;
use argusd::IpcClient;
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single reply in these tests.
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

/// Records calls; `set_clock` fails for any timezone named "Nowhere".
#[derive(Default)]
struct FakeMaintenance {
    calls: Mutex<Vec<String>>,
}

impl FakeMaintenance {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl Maintenance for FakeMaintenance {
    async fn update_secure_connection(&self) -> MaintenanceResult<()> {
        self.record("secure_connection");
        Ok(())
    }

    async fn update_ssh(&self) -> MaintenanceResult<()> {
        self.record("ssh");
        Err(MaintenanceError::NotConfigured("ssh update"))
    }

    async fn sync_clock(&self) -> MaintenanceResult<()> {
        self.record("sync_clock");
        Ok(())
    }

    async fn set_clock(&self, settings: &ClockSettings) -> MaintenanceResult<()> {
        self.record("set_clock");
        match settings.timezone.as_deref() {
            Some("Nowhere") => Err(MaintenanceError::UnknownTimezone("Nowhere".to_string())),
            _ => Ok(()),
        }
    }
}

struct TestServer {
    socket_path: PathBuf,
    state: SharedStateStore,
    events: EventPublisher,
    maintenance: Arc<FakeMaintenance>,
    tokens: mpsc::UnboundedReceiver<ControlToken>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestServer {
    fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("run").join("argus.sock");

        let (tx, tokens) = mpsc::unbounded_channel();
        let state = SharedStateStore::new();
        let events = EventPublisher::new();
        let maintenance = Arc::new(FakeMaintenance::default());
        let cancel = CancellationToken::new();

        let context = ServerContext {
            broadcaster: Broadcaster::new().with_sink(Arc::new(QueueSink::new("test", tx))),
            state: state.clone(),
            events: events.clone(),
            maintenance: maintenance.clone(),
        };
        let config = SocketConfig {
            path: socket_path.clone(),
            permissions: Some("0660".to_string()),
            ..SocketConfig::default()
        };
        let server = IpcServer::bind(&config, context, cancel.clone()).expect("bind server");

        Self {
            socket_path,
            state,
            events,
            maintenance,
            tokens,
            cancel,
            task: tokio::spawn(server.run()),
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        timeout(REPLY_TIMEOUT * 2, self.task)
            .await
            .expect("server stops")
            .unwrap();
    }
}

/// Raw line-level client, so tests can send arbitrary bytes.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.send_bytes(line.as_bytes()).await;
    }

    async fn send_bytes(&mut self, line: &[u8]) {
        self.writer.write_all(line).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn recv_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply in time")
            .unwrap();
        (read > 0).then_some(line)
    }

    async fn call(&mut self, request: Value) -> Response {
        self.send_raw(&request.to_string()).await;
        let line = self.recv_line().await.expect("response line");
        serde_json::from_str(&line).unwrap()
    }
}

// ============================================================================
// Requests
// ============================================================================

#[tokio::test]
async fn test_get_requests_report_shared_state() {
    let server = TestServer::spawn();
    let mut client = server.connect().await;

    let arm = client.call(json!({"action": "get_arm"})).await;
    assert_eq!(arm, Response::ok_with(json!({"type": "disarm"})));

    server.state.set_arm(ArmType::Stay);
    server.state.set_monitoring(MonitoringState::Armed);
    server.state.set_power(PowerSource::Battery);

    let arm = client.call(json!({"action": "get_arm"})).await;
    assert_eq!(arm.value, Some(json!({"type": "stay"})));
    let state = client.call(json!({"action": "get_state"})).await;
    assert_eq!(state.value, Some(json!({"state": "monitoring_armed"})));
    let power = client.call(json!({"action": "get_power_state"})).await;
    assert_eq!(power.value, Some(json!({"source": "battery"})));

    server.shutdown().await;
}

#[tokio::test]
async fn test_control_actions_are_broadcast() {
    let mut server = TestServer::spawn();
    let mut client = server.connect().await;

    for (action, token) in [
        ("arm_away", ControlToken::ArmAway),
        ("arm_stay", ControlToken::ArmStay),
        ("disarm", ControlToken::Disarm),
        ("update_config", ControlToken::UpdateConfig),
        ("update_keypad", ControlToken::UpdateKeypad),
    ] {
        let response = client.call(json!({ "action": action })).await;
        assert!(response.result, "{action} should succeed");
        assert_eq!(server.tokens.recv().await, Some(token));
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_bad_input_keeps_connection_open() {
    let server = TestServer::spawn();
    let mut client = server.connect().await;

    let unknown = client.call(json!({"action": "self_destruct"})).await;
    assert!(!unknown.result);
    assert_eq!(unknown.message.as_deref(), Some("Unknown command"));

    client.send_raw("{not json").await;
    let line = client.recv_line().await.unwrap();
    let malformed: Response = serde_json::from_str(&line).unwrap();
    assert!(!malformed.result);
    assert!(malformed
        .message
        .unwrap()
        .starts_with("Invalid request:"));

    let missing = client.call(json!({"timezone": "UTC"})).await;
    assert!(!missing.result);

    // Blank lines are skipped without a reply.
    client.send_raw("").await;
    let arm = client.call(json!({"action": "get_arm"})).await;
    assert!(arm.result);

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_utf8_gets_a_reply() {
    let server = TestServer::spawn();
    let mut client = server.connect().await;

    client.send_bytes(b"{\"action\": \"arm\xff\xfe_away\"}").await;
    let line = client.recv_line().await.expect("reply to undecodable line");
    let rejected: Response = serde_json::from_str(&line).unwrap();
    assert!(!rejected.result);
    assert_eq!(
        rejected.message.as_deref(),
        Some("Invalid request: not valid UTF-8")
    );

    // Same connection keeps working.
    let arm = client.call(json!({"action": "get_arm"})).await;
    assert!(arm.result);

    server.shutdown().await;
}

#[tokio::test]
async fn test_undeliverable_control_action_is_reported() {
    let mut server = TestServer::spawn();
    server.tokens.close();
    let mut client = server.connect().await;

    let response = client.call(json!({"action": "disarm"})).await;
    assert!(!response.result);
    assert_eq!(
        response.message.as_deref(),
        Some("disarm not delivered to test")
    );

    let arm = client.call(json!({"action": "get_arm"})).await;
    assert!(arm.result);

    server.shutdown().await;
}

#[tokio::test]
async fn test_maintenance_results_are_reported() {
    let server = TestServer::spawn();
    let mut client = server.connect().await;

    assert!(client.call(json!({"action": "update_secure_connection"})).await.result);
    assert!(client.call(json!({"action": "sync_clock"})).await.result);

    let ssh = client.call(json!({"action": "update_ssh"})).await;
    assert!(!ssh.result);
    assert_eq!(ssh.message.as_deref(), Some("ssh update is not configured"));

    let clock = client
        .call(json!({"action": "set_clock", "timezone": "Nowhere"}))
        .await;
    assert!(!clock.result);
    assert!(clock.message.unwrap().contains("Nowhere"));

    assert_eq!(
        server.maintenance.calls(),
        vec!["secure_connection", "sync_clock", "ssh", "set_clock"]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_ipc_client_round_trip() {
    let server = TestServer::spawn();
    let mut client = IpcClient::connect(&server.socket_path).await.unwrap();

    let response = client.request(&Request::GetState).await.unwrap();
    assert_eq!(response.value, Some(json!({"state": "monitoring_startup"})));

    server.shutdown().await;
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn test_subscriber_gets_snapshot_then_events() {
    let server = TestServer::spawn();
    server.state.set_monitoring(MonitoringState::Ready);

    let client = IpcClient::connect(&server.socket_path).await.unwrap();
    let mut stream = client.subscribe().await.unwrap();

    let first = timeout(REPLY_TIMEOUT, stream.next_event()).await.unwrap().unwrap();
    assert_eq!(first, Some(PushEvent::ArmStateChange(ArmType::Disarm)));
    let second = timeout(REPLY_TIMEOUT, stream.next_event()).await.unwrap().unwrap();
    assert_eq!(
        second,
        Some(PushEvent::SystemStateChange(MonitoringState::Ready))
    );

    server.events.publish(PushEvent::SyrenStateChange(Some(true)));
    let pushed = timeout(REPLY_TIMEOUT, stream.next_event()).await.unwrap().unwrap();
    assert_eq!(pushed, Some(PushEvent::SyrenStateChange(Some(true))));

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_subscribers_and_removes_socket() {
    let server = TestServer::spawn();
    let client = IpcClient::connect(&server.socket_path).await.unwrap();
    let mut stream = client.subscribe().await.unwrap();
    stream.next_event().await.unwrap();
    stream.next_event().await.unwrap();

    let socket_path = server.socket_path.clone();
    server.cancel.cancel();

    let end = timeout(REPLY_TIMEOUT, stream.next_event()).await.unwrap().unwrap();
    assert_eq!(end, None);

    sleep(Duration::from_millis(50)).await;
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_rebind_replaces_stale_socket() {
    let server = TestServer::spawn();
    let path = server.socket_path.clone();
    assert!(path.exists());

    // A second bind on the same path takes the socket over.
    let (tx, _rx) = mpsc::unbounded_channel();
    let context = ServerContext {
        broadcaster: Broadcaster::new().with_sink(Arc::new(QueueSink::new("other", tx))),
        state: SharedStateStore::new(),
        events: EventPublisher::new(),
        maintenance: Arc::new(FakeMaintenance::default()),
    };
    let config = SocketConfig {
        path: path.clone(),
        ..SocketConfig::default()
    };
    let rebound = IpcServer::bind(&config, context, CancellationToken::new()).unwrap();
    assert_eq!(rebound.socket_path(), path.as_path());
}
