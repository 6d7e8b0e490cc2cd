//! End-to-end tests over a real listener: websocket protocol and http routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use telemetry_hub::acquisition::AcquisitionControl;
use telemetry_hub::broadcast::Hub;
use telemetry_hub::config::{SerialConfig, ServerConfig};
use telemetry_hub::error::{HubError, Result};
use telemetry_hub::hal::{PortDescriptor, SerialLink, SerialProvider};
use telemetry_hub::launcher::wait_for_server;
use telemetry_hub::server;
use telemetry_hub::widgets::WidgetCatalog;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

async fn start(config: ServerConfig) -> TestServer {
    start_hub(Hub::new(WidgetCatalog::from_names(["gauge", "map"])), config).await
}

async fn start_hub(hub: Hub, config: ServerConfig) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let app = server::router(hub, config);
    tokio::spawn(async move {
        server::serve(listener, app, async {
            let _ = rx.await;
        })
        .await
        .unwrap();
    });
    TestServer { addr, _shutdown: tx }
}

async fn open(addr: SocketAddr, query: &str) -> Socket {
    let (socket, _) = connect_async(format!("ws://{}/ws?{}", addr, query)).await.unwrap();
    socket
}

/// next json text frame
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for event")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_websocket_widget_flow() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(ServerConfig { static_dir: dir.path().to_path_buf(), ..ServerConfig::default() }).await;

    let mut viewer = open(server.addr, "id=viewer-1").await;
    assert_eq!(next_event(&mut viewer).await, json!({"event": "widget_permissions", "data": ["gauge", "map"]}));

    let mut admin = open(server.addr, "id=ADMIN_1&admin_secret=s3cret").await;
    assert_eq!(next_event(&mut admin).await["event"], "admin_auth_success");
    assert_eq!(
        next_event(&mut admin).await,
        json!({"event": "global_widgets_update", "data": ["gauge", "map"]})
    );
    let clients = next_event(&mut admin).await;
    assert_eq!(clients["event"], "clients_update");
    assert_eq!(clients["data"][0]["id"], "viewer-1");
    assert_eq!(clients["data"][0]["type"], "viewer");

    // garbage is ignored, the session stays usable
    admin.send(Message::Text("{not json".to_string())).await.unwrap();
    send(&mut admin, json!({"event": "update_global_widgets", "data": ["altitude"]})).await;

    assert_eq!(
        next_event(&mut viewer).await,
        json!({"event": "global_widgets_update", "data": ["altitude"]})
    );
    assert_eq!(next_event(&mut viewer).await, json!({"event": "widget_permissions", "data": ["altitude"]}));

    send(&mut admin, json!({"event": "admin_publish_data", "data": {"pressure": 1001.5}})).await;
    let update = next_event(&mut viewer).await;
    assert_eq!(update, json!({"event": "data_update", "data": {"pressure": 1001.5}}));
}

#[tokio::test]
async fn test_websocket_viewer_cannot_publish() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(ServerConfig { static_dir: dir.path().to_path_buf(), ..ServerConfig::default() }).await;

    let mut viewer = open(server.addr, "id=viewer-1").await;
    next_event(&mut viewer).await;

    send(&mut viewer, json!({"event": "admin_publish_data", "data": {"altitude": 1}})).await;
    assert_eq!(
        next_event(&mut viewer).await,
        json!({"event": "admin_auth_failed", "data": "not authenticated"})
    );
}

#[tokio::test]
async fn test_malformed_admin_payload_from_viewer_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(ServerConfig { static_dir: dir.path().to_path_buf(), ..ServerConfig::default() }).await;

    let mut viewer = open(server.addr, "id=viewer-1").await;
    next_event(&mut viewer).await;

    let refused = json!({"event": "admin_auth_failed", "data": "not authenticated"});
    send(&mut viewer, json!({"event": "admin_publish_data", "data": [1, 2, 3]})).await;
    assert_eq!(next_event(&mut viewer).await, refused);

    send(&mut viewer, json!({"event": "update_client_widgets", "data": {"client_id": "x", "widgets": 7}})).await;
    assert_eq!(next_event(&mut viewer).await, refused);

    // unknown events get no reply; the next admin-only event is still refused
    send(&mut viewer, json!({"event": "reboot"})).await;
    send(&mut viewer, json!({"event": "get_serial_ports"})).await;
    assert_eq!(next_event(&mut viewer).await, refused);
}

#[tokio::test]
async fn test_http_routes_and_spa_fallback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<html>dashboard</html>").unwrap();
    let server = start(ServerConfig { static_dir: dir.path().to_path_buf(), ..ServerConfig::default() }).await;
    let base = format!("http://{}", server.addr);

    assert!(wait_for_server(&format!("{}/", base), Duration::from_secs(5)).await);

    let widgets: Value = reqwest::get(format!("{}/api/widgets", base)).await.unwrap().json().await.unwrap();
    assert_eq!(widgets, json!({"catalog": ["gauge", "map"], "global": ["gauge", "map"]}));

    let health: Value = reqwest::get(format!("{}/api/health", base)).await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["sessions"], 0);

    // client-side routes get the app shell
    let page = reqwest::get(format!("{}/admin", base)).await.unwrap();
    assert!(page.status().is_success());
    assert_eq!(page.text().await.unwrap(), "<html>dashboard</html>");
}

#[tokio::test]
async fn test_dev_mode_redirects_pages() {
    let server = start(ServerConfig { dev_mode: true, dev_server_port: 5173, ..ServerConfig::default() }).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = client.get(format!("http://{}/admin", server.addr)).send().await.unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers()["location"].to_str().unwrap(),
        "http://127.0.0.1:5173/admin"
    );
}

/// no visible ports; nothing can be opened
struct NoPorts;

impl SerialProvider for NoPorts {
    fn available_ports(&self) -> Result<Vec<PortDescriptor>> {
        Ok(Vec::new())
    }

    fn open(&self, _name: &str, _baud_rate: u32, _timeout: Duration) -> Result<Box<dyn SerialLink>> {
        Err(HubError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)))
    }
}

#[tokio::test]
async fn test_health_reports_simulator_as_connected() {
    let control = Arc::new(AcquisitionControl::new(Arc::new(NoPorts), &SerialConfig::default()));
    let hub = Hub::new(WidgetCatalog::default()).with_acquisition(control.clone());
    let dir = tempfile::tempdir().unwrap();
    let server = start_hub(hub, ServerConfig { static_dir: dir.path().to_path_buf(), ..ServerConfig::default() }).await;
    let url = format!("http://{}/api/health", server.addr);

    let health: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(health["source"], "SIMULATOR");
    assert_eq!(health["source_connected"], true);

    control.set_port("/dev/ttyUSB9");
    let health: Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(health["source"], "/dev/ttyUSB9");
    assert_eq!(health["source_connected"], false);
    assert_eq!(health["receiving_data"], false);
}
