//! SSE switchover and broadcast through the full server.
//!
//! The topic registry is process-wide, so this suite keeps to a single
//! test with unique topics.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use switchyard::server::{Server, ServerConfig};
use switchyard::sse::{SseEvent, SseManager};

async fn read_until(stream: &mut TcpStream, needle: &str, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4096];
    while !String::from_utf8_lossy(out).contains(needle) {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "eof while waiting for {needle:?}");
        out.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn event_stream_lifecycle() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ServerConfig::default());
    let runner = server.clone();
    tokio::spawn(async move { runner.run_with_listener(listener).await });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /events?topic=sse-e2e HTTP/1.1\r\n\
              Host: localhost\r\n\
              Accept: text/event-stream\r\n\
              Last-Event-ID: 41\r\n\r\n",
        )
        .await
        .unwrap();

    // Response head plus the greeting event.
    let mut out = Vec::new();
    read_until(&mut stream, "data:connected\n\n", &mut out).await;
    let text = String::from_utf8_lossy(&out).into_owned();
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("content-type: text/event-stream"));
    assert!(text.contains("cache-control: no-cache"));
    assert!(text.contains("connection: keep-alive"));
    assert!(text.contains("event:system\n"));
    assert!(text.contains("retry:3000\n"));

    // The connection is registered and reachable by broadcast.
    let manager = SseManager::global();
    let listeners = manager.connections("sse-e2e");
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].last_event_id(), Some("41"));

    let delivered = manager
        .broadcast(
            "sse-e2e",
            &SseEvent::new("tick 1").with_event("clock").with_id("1"),
        )
        .await;
    assert_eq!(delivered, 1);

    let mut out = Vec::new();
    read_until(&mut stream, "data:tick 1\n\n", &mut out).await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("event:clock\nid:1\ndata:tick 1\n\n"));

    // Broadcasts to other topics do not reach this connection.
    assert_eq!(manager.broadcast("sse-e2e-other", &SseEvent::new("x")).await, 0);

    // Closing the connection unregisters it exactly once.
    listeners[0].close();
    let mut drain = [0u8; 1024];
    loop {
        match stream.read(&mut drain).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
    assert!(manager.connections("sse-e2e").is_empty());
    assert_eq!(manager.statistics().connections_per_topic.get("sse-e2e"), None);
}
