use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use wg_admin::auth::CredentialService;
use wg_admin::config::ServerConfig;
use wg_admin::device::MemoryDevice;
use wg_admin::http_api::{self, AppState};
use wg_admin::reconciler::Reconciler;
use wg_admin::store::Store;

const PORT: u16 = 18560;

fn spawn_with_ui() -> std::path::PathBuf {
    std::env::set_var("WG_ADMIN_HTTP_BIND", "127.0.0.1");
    let ui_dir = std::env::temp_dir().join("wg-admin-static-ui");
    let _ = std::fs::remove_dir_all(&ui_dir);
    std::fs::create_dir_all(&ui_dir).unwrap();
    std::fs::write(ui_dir.join("index.html"), "<html>admin ui</html>").unwrap();
    std::fs::write(ui_dir.join("app.js"), "console.log('ui')").unwrap();

    let db = std::env::temp_dir().join("wg-admin-static-ui.db.toml");
    let _ = std::fs::remove_file(&db);
    let store = Arc::new(Store::open(&db).unwrap());
    let reconciler = Arc::new(Reconciler::new(
        Box::new(MemoryDevice::new()),
        Arc::clone(&store),
    ));
    let cfg = ServerConfig {
        endpoint: "vpn.example.com".into(),
        http_port: PORT,
        static_dir: Some(ui_dir.to_string_lossy().into_owned()),
        ..ServerConfig::default()
    };
    let state = Arc::new(AppState {
        cfg,
        store,
        reconciler,
        credentials: Arc::new(CredentialService::new()),
        server_public_key_b64: String::new(),
    });
    http_api::spawn(state).unwrap();
    ui_dir
}

fn get(path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(("127.0.0.1", PORT)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let raw = format!("GET {path} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n");
    stream.write_all(raw.as_bytes()).unwrap();
    let mut buf = String::new();
    stream.read_to_string(&mut buf).unwrap();
    let (head, body) = buf.split_once("\r\n\r\n").unwrap_or((buf.as_str(), ""));
    let status = head
        .lines()
        .next()
        .unwrap()
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse()
        .unwrap();
    (status, body.to_string())
}

#[test]
fn ui_serving() {
    spawn_with_ui();

    // root serves the entry point
    let (status, body) = get("/");
    assert_eq!(status, 200);
    assert!(body.contains("admin ui"));

    // real assets are served as-is
    let (status, body) = get("/app.js");
    assert_eq!(status, 200);
    assert!(body.contains("console.log"));

    // unknown paths fall back to the entry point for client-side routing
    let (status, body) = get("/clients/overview");
    assert_eq!(status, 200);
    assert!(body.contains("admin ui"));

    // path traversal is refused, not resolved
    let (status, _) = get("/../secret");
    assert_eq!(status, 404);
}
