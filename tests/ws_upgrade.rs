//! WebSocket upgrade and message exchange through the full server.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use switchyard::server::{Server, ServerConfig};
use switchyard::ws::{OpCode, WsFrame, close_code};

async fn start_server() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(ServerConfig::default());
    tokio::spawn(async move { server.run_with_listener(listener).await });
    addr
}

async fn upgraded_socket(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /ws HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let response = read_until_blank_line(&mut stream).await;
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols"));
    assert!(response
        .to_lowercase()
        .contains("sec-websocket-accept: s3pplmbitxaq9kygzzhzrbk+xoo="));
    stream
}

async fn read_until_blank_line(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    while !out.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "eof before end of response head");
        out.push(byte[0]);
    }
    String::from_utf8(out).unwrap()
}

async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> WsFrame {
    loop {
        if let Some(frame) = WsFrame::parse(buf).unwrap() {
            return frame;
        }
        let n = stream.read_buf(buf).await.unwrap();
        assert!(n > 0, "eof while waiting for a frame");
    }
}

fn masked(fin: bool, opcode: OpCode, payload: &[u8]) -> BytesMut {
    let mut wire = BytesMut::new();
    WsFrame::new(
        fin,
        opcode,
        Some([0x11, 0x22, 0x33, 0x44]),
        Bytes::copy_from_slice(payload),
    )
    .encode(&mut wire);
    wire
}

#[tokio::test]
async fn rfc_sample_key_yields_the_expected_accept() {
    let addr = start_server().await;
    // The accept-key assertion happens inside upgraded_socket.
    let _stream = upgraded_socket(addr).await;
}

#[tokio::test]
async fn default_handler_echoes_messages() {
    let addr = start_server().await;
    let mut stream = upgraded_socket(addr).await;
    let mut buf = BytesMut::new();

    stream
        .write_all(&masked(true, OpCode::Text, b"round trip"))
        .await
        .unwrap();

    let echo = read_frame(&mut stream, &mut buf).await;
    assert_eq!(echo.opcode, OpCode::Text);
    assert!(echo.mask.is_none(), "server frames are unmasked");
    assert_eq!(&echo.payload[..], b"round trip");
}

#[tokio::test]
async fn fragmented_messages_are_echoed_whole() {
    let addr = start_server().await;
    let mut stream = upgraded_socket(addr).await;
    let mut buf = BytesMut::new();

    stream
        .write_all(&masked(false, OpCode::Text, b"frag"))
        .await
        .unwrap();
    stream
        .write_all(&masked(true, OpCode::Continuation, b"mented"))
        .await
        .unwrap();

    let echo = read_frame(&mut stream, &mut buf).await;
    assert_eq!(&echo.payload[..], b"fragmented");
}

#[tokio::test]
async fn close_handshake_completes() {
    let addr = start_server().await;
    let mut stream = upgraded_socket(addr).await;
    let mut buf = BytesMut::new();

    let close = WsFrame::close(close_code::NORMAL, "done");
    stream
        .write_all(&masked(true, OpCode::Close, &close.payload))
        .await
        .unwrap();

    let reply = read_frame(&mut stream, &mut buf).await;
    assert_eq!(reply.opcode, OpCode::Close);
    assert_eq!(
        u16::from_be_bytes([reply.payload[0], reply.payload[1]]),
        close_code::NORMAL
    );
}

#[tokio::test]
async fn missing_key_is_rejected_with_400_naming_the_field() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /ws HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let response = String::from_utf8_lossy(&out);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(response.contains("Sec-WebSocket-Key"));
}

#[tokio::test]
async fn wrong_version_is_rejected_with_400() {
    let addr = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(
            b"GET /ws HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 8\r\n\r\n",
        )
        .await
        .unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let response = String::from_utf8_lossy(&out);
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"));
    assert!(response.contains("Sec-WebSocket-Version"));
}
