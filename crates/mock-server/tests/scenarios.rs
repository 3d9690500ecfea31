//! End-to-end scenarios against a live listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use mock_server::{watcher, MockServer};
use tokio::time::{sleep, timeout};

async fn start(spec: &str) -> (SocketAddr, Arc<MockServer>) {
    let endpoints = mock_core::endpoints_from_reader(spec.as_bytes()).expect("spec parses");
    let server = MockServer::new("/mock");
    server.install(endpoints);
    spawn(&server).await
}

async fn spawn(server: &Arc<MockServer>) -> (SocketAddr, Arc<MockServer>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(Arc::clone(server).serve(listener));
    (addr, Arc::clone(server))
}

// rename-and-replace like an editor saving, so the watcher never observes a
// half-written file
fn rewrite(path: &std::path::Path, contents: &str) {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).expect("write tmp");
    std::fs::rename(&tmp, path).expect("rename over spec");
}

async fn get_text(addr: SocketAddr, path: &str) -> (u16, String) {
    let resp = reqwest::get(format!("http://{addr}{path}"))
        .await
        .expect("request");
    let status = resp.status().as_u16();
    let body = resp.text().await.expect("body");
    (status, body)
}

#[tokio::test]
async fn round_robin_over_sequential_requests() {
    let (addr, _server) = start("### a\nGET /x\n\none\n### b\nGET /x\n\ntwo\n").await;

    let mut bodies = Vec::new();
    for _ in 0..3 {
        let (status, body) = get_text(addr, "/x").await;
        assert_eq!(status, 200);
        bodies.push(body);
    }
    assert_eq!(bodies, ["one", "two", "one"]);
}

#[tokio::test]
async fn variant_selection_by_query_parameter() {
    let spec = "### active\nGET /users?status=active\n\nACTIVE\n### default\nGET /users\n\nDEFAULT\n";
    let (addr, _server) = start(spec).await;

    let (_, body) = get_text(addr, "/users?status=active").await;
    assert_eq!(body, "ACTIVE");

    let (_, body) = get_text(addr, "/users").await;
    assert_eq!(body, "DEFAULT");

    let (_, body) = get_text(addr, "/users?status=other").await;
    assert_eq!(body, "DEFAULT");
}

#[tokio::test]
async fn substitution_resolves_path_globals_and_functions() {
    let spec = "@host = example.com\n### u\nGET /u/:id\n\nid={{id}} host={{host}} uuid={{uuid}}\n";
    let (addr, _server) = start(spec).await;

    let (status, first) = get_text(addr, "/u/42").await;
    assert_eq!(status, 200);
    assert!(
        first.starts_with("id=42 host=example.com uuid="),
        "body: {first}"
    );
    let uuid = first.rsplit('=').next().expect("uuid part");
    assert_eq!(uuid.len(), 36);
    assert!(!uuid.contains("{{"));

    let (_, second) = get_text(addr, "/u/42").await;
    assert_ne!(first, second, "uuid must be generated per request");
}

#[tokio::test]
async fn unknown_path_gets_404_with_message() {
    let (addr, _server) = start("### p\nGET /ping\n\npong\n").await;

    let (status, body) = get_text(addr, "/nonexistent").await;
    assert_eq!(status, 404);
    assert!(body.contains("could not be found"), "body: {body}");
}

#[tokio::test]
async fn wrong_method_gets_405_with_method_name() {
    let (addr, _server) = start("### p\nGET /ping\n\npong\n").await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/ping"))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 405);
    let body = resp.text().await.expect("body");
    assert!(body.contains("POST"), "body: {body}");
    assert!(body.contains("not supported"), "body: {body}");
}

#[tokio::test]
async fn empty_spec_serves_404_for_everything() {
    let (addr, _server) = start("").await;
    let (status, _) = get_text(addr, "/anything").await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn status_and_headers_from_record() {
    let spec = "###\n# @status = 201\nPOST /things\nX-Custom: yes\n\ncreated\n";
    let (addr, _server) = start(spec).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/things"))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(
        resp.headers().get("x-custom").and_then(|v| v.to_str().ok()),
        Some("yes")
    );
    assert_eq!(resp.text().await.expect("body"), "created");
}

#[tokio::test]
async fn delay_is_honored() {
    let spec = "###\n# @delay = 100ms\nGET /slow\n\nok\n###\nGET /fast\n\nok\n";
    let (addr, _server) = start(spec).await;

    let start_at = Instant::now();
    let (status, _) = get_text(addr, "/slow").await;
    assert_eq!(status, 200);
    assert!(start_at.elapsed() >= Duration::from_millis(100));

    let start_at = Instant::now();
    get_text(addr, "/fast").await;
    assert!(start_at.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn install_hot_swaps_routes_under_load() {
    let (addr, server) = start("### p\nGET /ping\n\npong\n").await;

    let (_, body) = get_text(addr, "/ping").await;
    assert_eq!(body, "pong");

    let endpoints =
        mock_core::endpoints_from_reader("### p\nGET /ping\n\nPONG!\n".as_bytes()).expect("spec");
    server.install(endpoints);

    let (_, body) = get_text(addr, "/ping").await;
    assert_eq!(body, "PONG!");
}

#[tokio::test]
async fn file_edit_triggers_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec_path = dir.path().join("api.http");
    std::fs::write(&spec_path, "### p\nGET /ping\n\npong\n").expect("write spec");

    let endpoints = mock_core::endpoints_from_file(&spec_path).expect("spec parses");
    let server = MockServer::new("/mock");
    server.install(endpoints);
    let _watcher = watcher::watch_spec(&spec_path, Arc::clone(&server)).expect("watcher");
    let (addr, _server) = spawn(&server).await;

    let (_, body) = get_text(addr, "/ping").await;
    assert_eq!(body, "pong");

    rewrite(&spec_path, "### p\nGET /ping\n\nPONG!\n");

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let (_, body) = get_text(addr, "/ping").await;
        if body == "PONG!" {
            break;
        }
        assert!(Instant::now() < deadline, "reload did not happen in time");
        sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn broken_edit_keeps_previous_routes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec_path = dir.path().join("api.http");
    std::fs::write(&spec_path, "### p\nGET /ping\n\npong\n").expect("write spec");

    let endpoints = mock_core::endpoints_from_file(&spec_path).expect("spec parses");
    let server = MockServer::new("/mock");
    server.install(endpoints);
    let _watcher = watcher::watch_spec(&spec_path, Arc::clone(&server)).expect("watcher");
    let (addr, _server) = spawn(&server).await;

    // an unparseable rewrite must not take down the live routes
    rewrite(&spec_path, "###\n# @bogus = nope\nGET /ping\n");
    sleep(Duration::from_millis(500)).await;

    let (status, body) = get_text(addr, "/ping").await;
    assert_eq!(status, 200);
    assert_eq!(body, "pong");
}

#[tokio::test]
async fn sse_clients_receive_request_records() {
    let (addr, _server) = start("### p\nGET /ping\n\npong\n").await;

    let connect = |addr: SocketAddr| async move {
        reqwest::get(format!("http://{addr}/mock/events"))
            .await
            .expect("sse connect")
    };

    let resp1 = connect(addr).await;
    assert_eq!(
        resp1.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    let resp2 = connect(addr).await;
    let mut stream1 = resp1.bytes_stream();
    let mut stream2 = resp2.bytes_stream();

    // give both subscriptions a moment to register
    sleep(Duration::from_millis(100)).await;
    get_text(addr, "/ping").await;

    for stream in [&mut stream1, &mut stream2] {
        let chunk = timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("record within a second")
            .expect("stream open")
            .expect("chunk");
        let frame = String::from_utf8_lossy(&chunk).into_owned();
        assert!(frame.starts_with("data: "), "frame: {frame}");

        let json: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).expect("json record");
        assert_eq!(json["request"]["method"], "GET");
        assert_eq!(json["request"]["url"], "/ping");
        assert_eq!(json["response"]["status"], 200);
        assert_eq!(json["response"]["body"], "pong");
    }
}

#[tokio::test]
async fn stalled_sse_client_does_not_slow_requests() {
    let (addr, _server) = start("### p\nGET /ping\n\npong\n").await;

    // connect and never read
    let stalled = tokio::net::TcpStream::connect(addr).await.expect("connect");
    {
        use tokio::io::AsyncWriteExt;
        let mut stalled = stalled;
        stalled
            .write_all(b"GET /mock/events HTTP/1.1\r\nHost: test\r\nAccept: text/event-stream\r\n\r\n")
            .await
            .expect("send request");

        sleep(Duration::from_millis(100)).await;

        let start_at = Instant::now();
        for _ in 0..50 {
            let (status, _) = get_text(addr, "/ping").await;
            assert_eq!(status, 200);
        }
        assert!(
            start_at.elapsed() < Duration::from_secs(1),
            "request path must not wait on a stalled subscriber"
        );
    }
}

#[tokio::test]
async fn observer_ui_is_served_and_not_logged() {
    let (addr, server) = start("### p\nGET /ping\n\npong\n").await;

    let (status, body) = get_text(addr, "/mock").await;
    assert_eq!(status, 200);
    assert!(body.contains("<html"), "expected the observer page");

    let (status, _) = get_text(addr, "/mock/unknown-asset.js").await;
    assert_eq!(status, 404);

    // observer traffic must not produce SSE records
    let (_, mut rx) = server.events().subscribe();
    get_text(addr, "/mock").await;
    get_text(addr, "/ping").await;
    let record = timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("one record")
        .expect("channel open");
    let json: serde_json::Value = serde_json::from_str(&record).expect("json");
    assert_eq!(json["request"]["url"], "/ping");
    assert!(rx.try_recv().is_err(), "only the mock request should log");
}
