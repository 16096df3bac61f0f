//! The per-connection WebSocket message loop.
//!
//! Runs after the 101 response has been written. Incoming frames are
//! reassembled into messages for the [`WsHandler`]; outgoing messages
//! are queued through a [`WsSender`] so handlers never block on the
//! socket. Control-frame semantics (ping/pong, close handshake) are
//! handled here.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::metrics::Metrics;

use super::frame::{OpCode, WsFrame};
use super::{ProtocolError, WsError, close_code};

/// A complete data message, after fragmentation reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Handle for sending messages into a connection from any task.
#[derive(Debug, Clone)]
pub struct WsSender {
    tx: mpsc::UnboundedSender<Outbound>,
}

#[derive(Debug)]
enum Outbound {
    Message(Message),
    Close { code: u16, reason: String },
}

impl WsSender {
    /// Queue a message. Returns `false` once the connection is gone.
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(Outbound::Message(message)).is_ok()
    }

    /// Start a server-initiated close handshake.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.to_owned(),
            })
            .is_ok()
    }
}

/// Application callbacks, contained at the connection boundary.
pub trait WsHandler: Send + Sync + 'static {
    fn on_open(&self, sender: &WsSender) {
        let _ = sender;
    }

    fn on_message(&self, sender: &WsSender, message: Message);

    fn on_close(&self, code: u16, reason: &str) {
        let _ = (code, reason);
    }

    fn on_error(&self, error: &WsError) {
        let _ = error;
    }
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub max_message_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024,
        }
    }
}

/// State of an in-progress fragmented message.
struct Fragmented {
    opcode: OpCode,
    payload: BytesMut,
}

/// Drive a connection that has completed its handshake. `leftover`
/// holds bytes read past the upgrade request.
pub async fn serve<T: AsyncRead + AsyncWrite + Unpin>(
    mut io: T,
    leftover: BytesMut,
    handler: Arc<dyn WsHandler>,
    metrics: Arc<Metrics>,
    config: WsConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), WsError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sender = WsSender { tx };

    metrics.ws_active_connections.inc();
    handler.on_open(&sender);

    let result = connection_loop(
        &mut io,
        leftover,
        &handler,
        &metrics,
        &config,
        &sender,
        &mut rx,
        &mut shutdown,
    )
    .await;

    metrics.ws_active_connections.dec();
    if let Err(err) = &result {
        handler.on_error(err);
    }
    let _ = io.shutdown().await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn connection_loop<T: AsyncRead + AsyncWrite + Unpin>(
    io: &mut T,
    mut read_buf: BytesMut,
    handler: &Arc<dyn WsHandler>,
    metrics: &Arc<Metrics>,
    config: &WsConfig,
    sender: &WsSender,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), WsError> {
    let mut write_buf = BytesMut::with_capacity(4 * 1024);
    let mut fragment: Option<Fragmented> = None;
    let mut sent_close = false;

    loop {
        // Drain complete frames before waiting for more input.
        while let Some(frame) = parse_or_close(&mut read_buf, io, &mut write_buf).await? {
            match handle_frame(
                frame,
                &mut fragment,
                &mut write_buf,
                handler,
                metrics,
                config,
                sender,
                sent_close,
            ) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Closed) => {
                    flush(io, &mut write_buf).await?;
                    return Ok(());
                }
                Err(err) => {
                    // The matching close frame is already queued.
                    flush(io, &mut write_buf).await?;
                    return Err(err);
                }
            }
        }
        flush(io, &mut write_buf).await?;

        tokio::select! {
            read = io.read_buf(&mut read_buf) => {
                if read? == 0 {
                    // Peer vanished without a close handshake.
                    handler.on_close(close_code::GOING_AWAY, "connection closed");
                    return Ok(());
                }
            }
            out = rx.recv() => {
                match out.expect("sender is held by this task") {
                    Outbound::Message(message) => {
                        if !sent_close {
                            encode_message(message, &mut write_buf);
                        }
                    }
                    Outbound::Close { code, reason } => {
                        if !sent_close {
                            WsFrame::close(code, &reason).encode(&mut write_buf);
                            sent_close = true;
                        }
                    }
                }
                flush(io, &mut write_buf).await?;
            }
            changed = shutdown.changed(), if !sent_close => {
                let _ = changed;
                WsFrame::close(close_code::GOING_AWAY, "server shutting down")
                    .encode(&mut write_buf);
                sent_close = true;
                flush(io, &mut write_buf).await?;
            }
        }
    }
}

enum Flow {
    Continue,
    Closed,
}

/// Parse one frame; protocol violations emit the matching close frame
/// before surfacing the error.
async fn parse_or_close<T: AsyncWrite + Unpin>(
    read_buf: &mut BytesMut,
    io: &mut T,
    write_buf: &mut BytesMut,
) -> Result<Option<WsFrame>, WsError> {
    match WsFrame::parse(read_buf) {
        Ok(frame) => Ok(frame),
        Err(err) => {
            WsFrame::close(close_code::PROTOCOL_ERROR, &err.to_string()).encode(write_buf);
            flush(io, write_buf).await?;
            Err(err.into())
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_frame(
    frame: WsFrame,
    fragment: &mut Option<Fragmented>,
    write_buf: &mut BytesMut,
    handler: &Arc<dyn WsHandler>,
    metrics: &Arc<Metrics>,
    config: &WsConfig,
    sender: &WsSender,
    sent_close: bool,
) -> Result<Flow, WsError> {
    // Every client frame must be masked.
    if frame.mask.is_none() {
        WsFrame::close(close_code::PROTOCOL_ERROR, "unmasked client frame").encode(write_buf);
        return Err(ProtocolError::UnmaskedClientFrame.into());
    }

    match frame.opcode {
        OpCode::Ping => {
            WsFrame::pong(frame.payload).encode(write_buf);
            Ok(Flow::Continue)
        }
        OpCode::Pong => Ok(Flow::Continue),
        OpCode::Close => {
            let close = match frame.parse_close() {
                Ok(close) => close,
                Err(err) => {
                    WsFrame::close(close_code::PROTOCOL_ERROR, &err.to_string())
                        .encode(write_buf);
                    return Err(err.into());
                }
            };
            let (code, reason) = close
                .map(|c| (c.code, c.reason))
                .unwrap_or((close_code::NORMAL, String::new()));
            if !sent_close {
                // Echo the close to complete the handshake.
                WsFrame::close(code, "").encode(write_buf);
            }
            handler.on_close(code, &reason);
            Ok(Flow::Closed)
        }
        OpCode::Text | OpCode::Binary => {
            if fragment.is_some() {
                WsFrame::close(close_code::PROTOCOL_ERROR, "interleaved data frame")
                    .encode(write_buf);
                return Err(ProtocolError::UnexpectedDataFrame.into());
            }
            if frame.payload.len() > config.max_message_size {
                return Err(too_long(frame.payload.len(), config, write_buf));
            }
            if frame.fin {
                deliver(frame.opcode, frame.payload, handler, metrics, sender, write_buf)?;
            } else {
                *fragment = Some(Fragmented {
                    opcode: frame.opcode,
                    payload: BytesMut::from(&frame.payload[..]),
                });
            }
            Ok(Flow::Continue)
        }
        OpCode::Continuation => {
            let Some(in_progress) = fragment.as_mut() else {
                WsFrame::close(close_code::PROTOCOL_ERROR, "continuation without start")
                    .encode(write_buf);
                return Err(ProtocolError::ContinuationWithoutStart.into());
            };
            let size = in_progress.payload.len() + frame.payload.len();
            if size > config.max_message_size {
                fragment.take();
                return Err(too_long(size, config, write_buf));
            }
            in_progress.payload.extend_from_slice(&frame.payload);
            if frame.fin {
                let done = fragment.take().expect("fragment in progress");
                deliver(
                    done.opcode,
                    done.payload.freeze(),
                    handler,
                    metrics,
                    sender,
                    write_buf,
                )?;
            }
            Ok(Flow::Continue)
        }
    }
}

fn too_long(size: usize, config: &WsConfig, write_buf: &mut BytesMut) -> WsError {
    WsFrame::close(close_code::MESSAGE_TOO_BIG, "message too big").encode(write_buf);
    WsError::MessageTooLong {
        size,
        max_size: config.max_message_size,
    }
}

/// Hand a reassembled message to the application.
fn deliver(
    opcode: OpCode,
    payload: Bytes,
    handler: &Arc<dyn WsHandler>,
    metrics: &Arc<Metrics>,
    sender: &WsSender,
    write_buf: &mut BytesMut,
) -> Result<(), WsError> {
    let message = match opcode {
        OpCode::Text => match String::from_utf8(payload.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(_) => {
                WsFrame::close(close_code::INVALID_PAYLOAD, "invalid utf-8").encode(write_buf);
                return Err(ProtocolError::InvalidUtf8.into());
            }
        },
        _ => Message::Binary(payload),
    };
    metrics.ws_messages_total.inc();
    handler.on_message(sender, message);
    Ok(())
}

fn encode_message(message: Message, write_buf: &mut BytesMut) {
    match message {
        Message::Text(text) => WsFrame::text(text).encode(write_buf),
        Message::Binary(data) => WsFrame::binary(data).encode(write_buf),
    }
}

async fn flush<T: AsyncWrite + Unpin>(io: &mut T, buf: &mut BytesMut) -> Result<(), WsError> {
    if buf.is_empty() {
        return Ok(());
    }
    let out = buf.split();
    io.write_all(&out).await?;
    io.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<Message>>,
        closes: Mutex<Vec<(u16, String)>>,
        errors: Mutex<Vec<String>>,
    }

    impl WsHandler for Recorder {
        fn on_message(&self, sender: &WsSender, message: Message) {
            // Echo, as a handler with output exercises the sender path.
            sender.send(message.clone());
            self.messages.lock().push(message);
        }

        fn on_close(&self, code: u16, reason: &str) {
            self.closes.lock().push((code, reason.to_owned()));
        }

        fn on_error(&self, error: &WsError) {
            self.errors.lock().push(error.to_string());
        }
    }

    fn masked(frame: WsFrame) -> BytesMut {
        let mut wire = BytesMut::new();
        WsFrame::new(frame.fin, frame.opcode, Some([1, 2, 3, 4]), frame.payload).encode(&mut wire);
        wire
    }

    async fn run_session(input: Vec<BytesMut>) -> (Arc<Recorder>, Vec<WsFrame>, Result<(), WsError>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let handler = Arc::new(Recorder::default());
        let dyn_handler: Arc<dyn WsHandler> = handler.clone();
        let metrics = Arc::new(Metrics::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(serve(
            server,
            BytesMut::new(),
            dyn_handler,
            metrics,
            WsConfig::default(),
            shutdown_rx,
        ));

        for chunk in input {
            client.write_all(&chunk).await.unwrap();
        }

        let mut replies = BytesMut::new();
        loop {
            let mut chunk = [0u8; 4096];
            match client.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => replies.extend_from_slice(&chunk[..n]),
            }
        }

        let mut frames = Vec::new();
        while let Ok(Some(frame)) = WsFrame::parse(&mut replies) {
            frames.push(frame);
        }
        let result = task.await.unwrap();
        (handler, frames, result)
    }

    #[tokio::test]
    async fn echoes_text_and_completes_close_handshake() {
        let (handler, frames, result) = run_session(vec![
            masked(WsFrame::text("hello")),
            masked(WsFrame::close(close_code::NORMAL, "bye")),
        ])
        .await;

        result.unwrap();
        assert_eq!(
            handler.messages.lock().clone(),
            vec![Message::Text("hello".into())]
        );
        assert_eq!(frames[0], WsFrame::text("hello"));
        assert_eq!(frames[1].opcode, OpCode::Close);
        assert_eq!(
            handler.closes.lock().clone(),
            vec![(close_code::NORMAL, "bye".into())]
        );
    }

    #[tokio::test]
    async fn pings_are_answered_with_pongs() {
        let (_, frames, result) = run_session(vec![
            masked(WsFrame::new(
                true,
                OpCode::Ping,
                None,
                Bytes::from_static(b"marco"),
            )),
            masked(WsFrame::close(close_code::NORMAL, "")),
        ])
        .await;

        result.unwrap();
        assert_eq!(frames[0].opcode, OpCode::Pong);
        assert_eq!(&frames[0].payload[..], b"marco");
    }

    #[tokio::test]
    async fn fragments_are_reassembled() {
        let (handler, frames, result) = run_session(vec![
            masked(WsFrame::new(
                false,
                OpCode::Text,
                None,
                Bytes::from_static(b"Hello, "),
            )),
            masked(WsFrame::new(
                true,
                OpCode::Continuation,
                None,
                Bytes::from_static(b"World!"),
            )),
            masked(WsFrame::close(close_code::NORMAL, "")),
        ])
        .await;

        result.unwrap();
        assert_eq!(
            handler.messages.lock().clone(),
            vec![Message::Text("Hello, World!".into())]
        );
        assert_eq!(frames[0], WsFrame::text("Hello, World!"));
    }

    #[tokio::test]
    async fn control_frames_interleave_between_fragments() {
        let (handler, frames, result) = run_session(vec![
            masked(WsFrame::new(
                false,
                OpCode::Binary,
                None,
                Bytes::from_static(&[1, 2]),
            )),
            masked(WsFrame::new(true, OpCode::Ping, None, Bytes::new())),
            masked(WsFrame::new(
                true,
                OpCode::Continuation,
                None,
                Bytes::from_static(&[3]),
            )),
            masked(WsFrame::close(close_code::NORMAL, "")),
        ])
        .await;

        result.unwrap();
        assert_eq!(frames[0].opcode, OpCode::Pong);
        assert_eq!(
            handler.messages.lock().clone(),
            vec![Message::Binary(Bytes::from_static(&[1, 2, 3]))]
        );
    }

    #[tokio::test]
    async fn unmasked_client_frames_close_with_1002() {
        let mut unmasked = BytesMut::new();
        WsFrame::text("nope").encode(&mut unmasked);
        let (handler, frames, result) = run_session(vec![unmasked]).await;

        assert!(matches!(
            result,
            Err(WsError::Protocol(ProtocolError::UnmaskedClientFrame))
        ));
        let close = frames.last().unwrap();
        assert_eq!(close.opcode, OpCode::Close);
        assert_eq!(
            u16::from_be_bytes([close.payload[0], close.payload[1]]),
            close_code::PROTOCOL_ERROR
        );
        assert_eq!(handler.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn continuation_without_start_is_a_protocol_error() {
        let (_, _, result) = run_session(vec![masked(WsFrame::new(
            true,
            OpCode::Continuation,
            None,
            Bytes::from_static(b"orphan"),
        ))])
        .await;

        assert!(matches!(
            result,
            Err(WsError::Protocol(ProtocolError::ContinuationWithoutStart))
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_text_closes_with_1007() {
        let (_, frames, result) = run_session(vec![masked(WsFrame::new(
            true,
            OpCode::Text,
            None,
            Bytes::from_static(&[0xff, 0xfe]),
        ))])
        .await;

        assert!(matches!(
            result,
            Err(WsError::Protocol(ProtocolError::InvalidUtf8))
        ));
        let close = frames.last().unwrap();
        assert_eq!(
            u16::from_be_bytes([close.payload[0], close.payload[1]]),
            close_code::INVALID_PAYLOAD
        );
    }
}
