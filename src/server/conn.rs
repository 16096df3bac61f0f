//! Per-connection protocol detection and HTTP/1.1 dispatch.
//!
//! Every accepted socket lands in [`serve_connection`]: the first bytes
//! decide between the HTTP/2 preface and HTTP/1.1, and an HTTP/1.1
//! request may further upgrade to WebSocket or switch into an SSE
//! stream. The read buffer is reused across keep-alive requests.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::{Buf, BytesMut};
use http::{Method, StatusCode, header};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::h1::{self, H1Error, RequestHead};
use crate::h2;
use crate::sse::{SseConnection, SseEvent, SseManager};
use crate::trace::TraceContext;
use crate::ws;

use super::ServerState;
use super::handler::{HttpRequest, text_response};

/// Serve one accepted socket until it closes.
pub(crate) async fn serve_connection(mut stream: TcpStream, state: Arc<ServerState>) {
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(err) => {
            tracing::debug!("peer address unavailable: {err}");
            return;
        }
    };

    let mut buf = state.buffer_pool.acquire();

    let outcome = match sniff_preface(&mut stream, &mut buf).await {
        Ok(true) => {
            tracing::debug!(%peer, "http/2 preface detected");
            buf.advance(h2::PREFACE.len());
            let conn = h2::Connection::new(
                stream,
                buf.split(),
                state.handler.clone(),
                state.metrics.clone(),
                state.config.h2.clone(),
            );
            conn.serve(state.shutdown.subscribe())
                .await
                .map_err(|err| err.to_string())
        }
        Ok(false) => serve_h1(stream, peer.ip(), &mut buf, &state)
            .await
            .map_err(|err| err.to_string()),
        Err(err) => Err(err.to_string()),
    };

    if let Err(err) = outcome {
        tracing::debug!(%peer, "connection ended with error: {err}");
    }
    state.buffer_pool.release(Some(buf));
}

/// Speculatively read the first 24 octets. Bytes stay in `buf`; the
/// answer is whether they are the HTTP/2 client preface.
async fn sniff_preface(stream: &mut TcpStream, buf: &mut BytesMut) -> std::io::Result<bool> {
    while buf.len() < h2::PREFACE.len() {
        let check = buf.len().min(h2::PREFACE.len());
        if buf[..check] != h2::PREFACE[..check] {
            return Ok(false);
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(false);
        }
    }
    Ok(&buf[..h2::PREFACE.len()] == h2::PREFACE)
}

enum H1Outcome {
    KeepAlive,
    Close,
    /// The socket was handed to another protocol (WebSocket or SSE).
    Consumed,
}

async fn serve_h1(
    mut stream: TcpStream,
    peer_ip: std::net::IpAddr,
    buf: &mut BytesMut,
    state: &Arc<ServerState>,
) -> Result<(), H1Error> {
    loop {
        let head =
            match h1::read_head(&mut stream, buf, state.config.max_head_size).await {
                Ok(Some(head)) => head,
                Ok(None) => return Ok(()),
                Err(H1Error::Io(err)) => return Err(H1Error::Io(err)),
                Err(err) => {
                    // Malformed request: 400 and close.
                    tracing::debug!("bad h1 request: {err}");
                    let response =
                        text_response(StatusCode::BAD_REQUEST, format!("{err}\n"));
                    let _ = h1::write_response(&mut stream, &response, false, false).await;
                    return Err(err);
                }
            };

        match dispatch_h1(stream, head, buf, peer_ip, state).await? {
            (H1Outcome::KeepAlive, Some(returned)) => {
                stream = returned;
                if *state.shutdown.subscribe().borrow() {
                    return Ok(());
                }
            }
            (H1Outcome::Close, Some(mut returned)) => {
                let _ = returned.shutdown().await;
                return Ok(());
            }
            _ => return Ok(()),
        }
    }
}

/// Handle one parsed request head. Returns the stream for keep-alive
/// reuse unless a protocol switch consumed it.
async fn dispatch_h1(
    mut stream: TcpStream,
    head: RequestHead,
    buf: &mut BytesMut,
    peer_ip: std::net::IpAddr,
    state: &Arc<ServerState>,
) -> Result<(H1Outcome, Option<TcpStream>), H1Error> {
    let trace = TraceContext::extract(
        head.headers
            .get("traceparent")
            .and_then(|value| value.to_str().ok()),
    );
    let trace_id = format!("{:032x}", trace.trace_id());
    tracing::debug!(
        %trace_id,
        method = %head.method,
        path = %head.uri.path(),
        "h1 request"
    );

    // WebSocket upgrade attempts take priority over routing.
    if wants_websocket(&head) {
        return upgrade_websocket(stream, head, buf, state).await;
    }

    let keep_alive = head.is_keep_alive();
    let head_only = head.method == Method::HEAD;
    let path = head.uri.path().to_owned();

    // SSE endpoint: exact path plus the EventSource Accept header.
    if path == state.config.sse_path && accepts_event_stream(&head) {
        let body = h1::read_body(&mut stream, buf, &head, state.config.max_body_size).await?;
        drop(body);
        return start_sse(stream, head, peer_ip, state).await.map(|()| {
            (H1Outcome::Consumed, None)
        });
    }

    let body = h1::read_body(&mut stream, buf, &head, state.config.max_body_size).await?;

    state.metrics.http_requests_total.inc();
    let timer = state.metrics.http_request_duration_seconds.start_timer();

    // Built-in endpoints are exact and case-sensitive.
    let response = match path.as_str() {
        "/health" => state.health.response(),
        "/health/metrics" => text_response(StatusCode::OK, state.metrics.export()),
        _ => {
            let mut builder = http::Request::builder()
                .method(head.method.clone())
                .uri(head.uri.clone())
                .version(head.version)
                .extension(trace);
            if let Some(headers) = builder.headers_mut() {
                *headers = head.headers;
            }
            let request: HttpRequest = builder
                .body(body)
                .map_err(|_| H1Error::BadHeader)?;
            state.handler.serve(request).await
        }
    };
    timer.observe_duration();

    let written = h1::write_response(&mut stream, &response, keep_alive, head_only).await?;
    state.metrics.http_response_size_bytes.observe(written as f64);

    if keep_alive {
        Ok((H1Outcome::KeepAlive, Some(stream)))
    } else {
        Ok((H1Outcome::Close, Some(stream)))
    }
}

async fn upgrade_websocket(
    mut stream: TcpStream,
    head: RequestHead,
    buf: &mut BytesMut,
    state: &Arc<ServerState>,
) -> Result<(H1Outcome, Option<TcpStream>), H1Error> {
    match ws::validate(&head.method, &head.headers) {
        Ok(handshake) => {
            let protocol = handshake.protocols.first().map(String::as_str);
            stream.write_all(&handshake.response(protocol)).await?;
            stream.flush().await?;
            tracing::debug!("websocket upgrade accepted");

            let result = ws::serve(
                stream,
                buf.split(),
                state.ws_handler.clone(),
                state.metrics.clone(),
                state.config.ws.clone(),
                state.shutdown.subscribe(),
            )
            .await;
            if let Err(err) = result {
                tracing::debug!("websocket session ended with error: {err}");
            }
            Ok((H1Outcome::Consumed, None))
        }
        Err(err) => {
            tracing::debug!("websocket handshake rejected: {err}");
            state.metrics.ws_handshake_failures_total.inc();
            let response = text_response(StatusCode::BAD_REQUEST, format!("{err}\n"));
            let _ = h1::write_response(&mut stream, &response, false, false).await;
            Ok((H1Outcome::Close, Some(stream)))
        }
    }
}

/// Switch the connection into an SSE stream; the socket now belongs to
/// the connection's sender task.
async fn start_sse(
    mut stream: TcpStream,
    head: RequestHead,
    peer_ip: std::net::IpAddr,
    state: &Arc<ServerState>,
) -> Result<(), H1Error> {
    let topic = query_param(head.uri.query(), "topic").unwrap_or_else(|| "default".to_owned());
    let last_event_id = head
        .headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\n\
              content-type: text/event-stream\r\n\
              cache-control: no-cache\r\n\
              connection: keep-alive\r\n\r\n",
        )
        .await?;
    stream.flush().await?;

    let id = state.sse_ids.fetch_add(1, Ordering::Relaxed);
    let conn = SseConnection::new(
        id,
        peer_ip,
        last_event_id,
        stream,
        state.config.sse.clone(),
        state.metrics.clone(),
        state.sse_handler.clone(),
    );

    let manager = SseManager::global();
    if !manager.register_connection(&topic, &conn) {
        tracing::debug!(%topic, %peer_ip, "sse admission rejected");
        conn.close();
        return Ok(());
    }

    if conn.open().is_err() {
        manager.unregister_connection(&conn);
        return Ok(());
    }

    // A retry hint right away lets EventSource clients back off sanely.
    let _ = conn
        .send_event(SseEvent::new("connected").with_event("system").with_retry_ms(3000))
        .await;

    tracing::debug!(%topic, id, "sse stream established");
    Ok(())
}

fn wants_websocket(head: &RequestHead) -> bool {
    head.headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
        })
}

fn accepts_event_stream(head: &RequestHead) -> bool {
    head.headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| {
            accept
                .split(',')
                .any(|part| part.trim().starts_with("text/event-stream"))
        })
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}
