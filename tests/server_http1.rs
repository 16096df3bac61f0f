//! End-to-end HTTP/1.1 behavior through a real listener: routing,
//! keep-alive, built-in endpoints and error handling.

use std::sync::Arc;

use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use switchyard::server::{Server, ServerConfig, service_fn, text_response};

async fn start_server() -> (Server, std::net::SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ServerConfig::default()).with_handler(Arc::new(service_fn(
        |req| async move {
            match req.uri().path() {
                "/hello" => text_response(StatusCode::OK, "hi there\n"),
                "/echo" => text_response(StatusCode::OK, req.into_body()),
                _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
            }
        },
    )));
    let runner = server.clone();
    tokio::spawn(async move { runner.run_with_listener(listener).await });
    (server, addr)
}

async fn read_response(stream: &mut TcpStream) -> String {
    // Responses here are small; one read after a short settle is
    // enough to capture head + body.
    let mut out = Vec::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        out.extend_from_slice(&buf[..n]);
        if n == 0 || contains_complete_response(&out) {
            return String::from_utf8_lossy(&out).into_owned();
        }
    }
}

fn contains_complete_response(raw: &[u8]) -> bool {
    let Some(head_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&raw[..head_end + 4]).to_lowercase();
    let Some(length) = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length: "))
        .and_then(|v| v.trim().parse::<usize>().ok())
    else {
        return true;
    };
    raw.len() >= head_end + 4 + length
}

#[tokio::test]
async fn routes_requests_to_the_handler() {
    let (_server, addr) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("connection: close"));
    assert!(response.ends_with("hi there\n"));
}

#[tokio::test]
async fn keep_alive_serves_multiple_requests_on_one_socket() {
    let (_server, addr) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n")
        .await
        .unwrap();
    let first = read_response(&mut stream).await;
    assert!(first.starts_with("HTTP/1.1 200 OK"));

    stream
        .write_all(b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nping")
        .await
        .unwrap();
    let second = read_response(&mut stream).await;
    assert!(second.starts_with("HTTP/1.1 200 OK"));
    assert!(second.ends_with("ping"));
}

#[tokio::test]
async fn health_endpoint_reports_up_then_down() {
    let (server, addr) = start_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("application/json"));
    assert!(response.contains("\"status\":\"UP\""));

    // Mark unhealthy via graceful shutdown; the in-flight listener
    // stops, so assert through the health state directly as well.
    server.health().mark_unhealthy();
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 503"));
    assert!(response.contains("\"status\":\"DOWN\""));
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let (_server, addr) = start_server().await;

    // One handled request first, so counters are non-zero.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    read_response(&mut stream).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health/metrics HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("# HELP http_requests_total"));
    assert!(response.contains("# TYPE http_requests_total counter"));
    assert!(response.contains("# TYPE http_request_duration_seconds histogram"));
    assert!(response.contains("http_active_connections"));
}

#[tokio::test]
async fn path_matching_is_exact_and_case_sensitive() {
    let (_server, addr) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /HEALTH HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    // Falls through to the application handler.
    assert!(response.starts_with("HTTP/1.1 404"));
}

#[tokio::test]
async fn malformed_requests_get_400_and_close() {
    let (_server, addr) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"NOT A REQUEST\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
}

#[tokio::test]
async fn head_requests_omit_the_body() {
    let (_server, addr) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"HEAD /hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let response = String::from_utf8_lossy(&out);
    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("content-length: 9"));
    assert!(response.ends_with("\r\n\r\n"));
}
