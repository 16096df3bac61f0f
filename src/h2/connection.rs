//! Server side of one HTTP/2 connection.
//!
//! The connection task owns everything: codec state, HPACK tables, the
//! stream registry and both flow-control windows. Requests are
//! dispatched to the [`HttpService`] on their own tasks; responses come
//! back over a channel so streams can progress out of order while the
//! outbound byte stream stays strictly ordered.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use fnv::FnvHashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version, header};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::metrics::Metrics;
use crate::server::handler::{HttpRequest, HttpResponse, HttpService};

use super::codec::{FrameCodec, encode_header_block};
use super::flow::FlowControl;
use super::frame::{
    self, Data, Frame, GoAway, Ping, Reason, Reset, Settings, StreamId, WindowUpdate,
};
use super::state::{State, StateError};
use super::Error;

/// Knobs for one HTTP/2 connection; the defaults mirror what the server
/// advertises in its initial SETTINGS frame.
#[derive(Debug, Clone)]
pub struct H2Config {
    pub max_frame_size: u32,
    pub header_table_size: u32,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    /// Cap on one assembled header block (HEADERS + CONTINUATIONs).
    pub max_header_block_size: usize,
    pub max_body_size: usize,
    /// Policy window for the peer to ACK our SETTINGS.
    pub settings_ack_timeout: Duration,
}

impl Default for H2Config {
    fn default() -> Self {
        Self {
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            header_table_size: frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE as u32,
            max_concurrent_streams: 128,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_header_block_size: 64 * 1024,
            max_body_size: 1024 * 1024,
            settings_ack_timeout: Duration::from_secs(10),
        }
    }
}

struct Stream {
    state: State,
    send_window: FlowControl,
    recv_window: FlowControl,
    request: Option<RequestInProgress>,
    pending: Option<PendingSend>,
}

#[derive(Debug)]
struct RequestInProgress {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: BytesMut,
}

struct PendingSend {
    data: Bytes,
    end_stream: bool,
}

/// A header block being assembled across HEADERS/CONTINUATION frames.
struct PartialHeaderBlock {
    stream_id: StreamId,
    fragment: BytesMut,
    end_stream: bool,
    trailers: bool,
}

/// One server connection after the preface has been consumed.
pub struct Connection<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: BytesMut,
    codec: FrameCodec,
    hpack_encoder: super::hpack::Encoder,
    hpack_decoder: super::hpack::Decoder,
    streams: FnvHashMap<u32, Stream>,
    send_window: FlowControl,
    recv_window: FlowControl,
    peer_initial_window: u32,
    peer_max_frame_size: usize,
    got_peer_settings: bool,
    settings_ack_deadline: Option<Instant>,
    continuation: Option<PartialHeaderBlock>,
    last_stream_id: StreamId,
    goaway_sent: bool,
    draining: bool,
    config: H2Config,
    service: Arc<dyn HttpService>,
    metrics: Arc<Metrics>,
}

type ResponseTx = mpsc::UnboundedSender<(u32, HttpResponse)>;

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    /// Create a connection. `leftover` holds any bytes the dispatcher
    /// read past the 24-octet preface.
    pub fn new(
        io: T,
        leftover: BytesMut,
        service: Arc<dyn HttpService>,
        metrics: Arc<Metrics>,
        config: H2Config,
    ) -> Self {
        Self {
            io,
            read_buf: leftover,
            write_buf: BytesMut::with_capacity(8 * 1024),
            codec: FrameCodec::new(),
            hpack_encoder: super::hpack::Encoder::new(
                frame::DEFAULT_SETTINGS_HEADER_TABLE_SIZE,
            ),
            hpack_decoder: super::hpack::Decoder::new(config.header_table_size as usize),
            streams: FnvHashMap::default(),
            send_window: FlowControl::new(),
            recv_window: FlowControl::with_initial_size(config.initial_window_size),
            peer_initial_window: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            peer_max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE as usize,
            got_peer_settings: false,
            settings_ack_deadline: None,
            continuation: None,
            last_stream_id: StreamId::ZERO,
            goaway_sent: false,
            draining: false,
            config,
            service,
            metrics,
        }
    }

    /// Drive the connection to completion.
    pub async fn serve(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), Error> {
        self.send_initial_settings();
        self.flush().await?;

        let (res_tx, mut res_rx) = mpsc::unbounded_channel();

        loop {
            if let Err(err) = self.process_read_buf(&res_tx) {
                return self.fail(err).await;
            }
            self.flush().await?;

            if self.draining && self.streams.is_empty() {
                break;
            }

            let ack_deadline = self
                .settings_ack_deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;

                res = res_rx.recv() => {
                    let (id, response) = res.expect("a sender is always held");
                    match self.start_response(id, response) {
                        Ok(()) => {}
                        Err(Error::Stream { id, reason }) => self.reset_stream(id, reason),
                        Err(err) => return self.fail(err).await,
                    }
                }
                read = self.io.read_buf(&mut self.read_buf) => {
                    match read {
                        Ok(0) => {
                            tracing::trace!("h2 peer closed the connection");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(err) => return Err(Error::Io(err)),
                    }
                }
                _ = tokio::time::sleep_until(ack_deadline),
                    if self.settings_ack_deadline.is_some() =>
                {
                    tracing::debug!("peer did not ACK SETTINGS in time");
                    return self.fail(Error::Connection(Reason::SETTINGS_TIMEOUT)).await;
                }
                changed = shutdown.changed(), if !self.draining => {
                    let _ = changed;
                    self.begin_drain();
                }
            }
        }

        self.flush().await?;
        let _ = self.io.shutdown().await;
        Ok(())
    }

    fn send_initial_settings(&mut self) {
        let mut settings = Settings::default();
        settings.header_table_size = Some(self.config.header_table_size);
        settings.enable_push = Some(0);
        settings.max_concurrent_streams = Some(self.config.max_concurrent_streams);
        settings.initial_window_size = Some(self.config.initial_window_size);
        settings.max_frame_size = Some(self.config.max_frame_size);
        settings.encode(&mut self.write_buf);
        self.settings_ack_deadline =
            Some(Instant::now() + self.config.settings_ack_timeout);
    }

    fn begin_drain(&mut self) {
        tracing::debug!("h2 connection draining");
        self.draining = true;
        if !self.goaway_sent {
            GoAway::new(self.last_stream_id, Reason::NO_ERROR).encode(&mut self.write_buf);
            self.goaway_sent = true;
        }
    }

    /// Decode and handle every complete frame in the read buffer.
    fn process_read_buf(&mut self, res_tx: &ResponseTx) -> Result<(), Error> {
        loop {
            let frame = match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(err) => return Err(Error::Connection(err.reason())),
            };
            match self.handle_frame(frame, res_tx) {
                Ok(()) => {}
                Err(Error::Stream { id, reason }) => self.reset_stream(id, reason),
                Err(err) => return Err(err),
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame, res_tx: &ResponseTx) -> Result<(), Error> {
        // A header block in progress claims the connection: nothing may
        // interleave except its own CONTINUATION frames.
        if self.continuation.is_some() {
            match &frame {
                Frame::Continuation(c)
                    if Some(c.stream_id())
                        == self.continuation.as_ref().map(|p| p.stream_id) => {}
                _ => {
                    tracing::debug!("frame interleaved into a header block");
                    return Err(Error::Connection(Reason::PROTOCOL_ERROR));
                }
            }
        }

        // The client's first frame after the preface must be SETTINGS.
        if !self.got_peer_settings {
            match &frame {
                Frame::Settings(s) if !s.is_ack() => {}
                _ => {
                    tracing::debug!("first peer frame was not SETTINGS");
                    return Err(Error::Connection(Reason::PROTOCOL_ERROR));
                }
            }
        }

        match frame {
            Frame::Settings(settings) => self.handle_settings(settings),
            Frame::Ping(ping) => {
                if !ping.is_ack() {
                    Ping::pong(*ping.payload()).encode(&mut self.write_buf);
                }
                Ok(())
            }
            Frame::WindowUpdate(frame) => self.handle_window_update(frame),
            Frame::Headers(frame) => self.handle_headers(frame, res_tx),
            Frame::Continuation(frame) => self.handle_continuation(frame, res_tx),
            Frame::Data(frame) => self.handle_data(frame, res_tx),
            Frame::Reset(frame) => self.handle_reset(frame),
            Frame::GoAway(frame) => {
                tracing::debug!(reason = ?frame.reason(), "received GOAWAY");
                self.begin_drain();
                Ok(())
            }
            Frame::Priority(_) | Frame::Unknown(_) => Ok(()),
        }
    }

    fn handle_settings(&mut self, settings: Settings) -> Result<(), Error> {
        if settings.is_ack() {
            if self.settings_ack_deadline.take().is_none() {
                tracing::debug!("received unexpected settings ack");
                return Err(Error::Connection(Reason::PROTOCOL_ERROR));
            }
            // Our advertised settings are now in effect on the peer.
            self.hpack_decoder
                .set_max_table_size(self.config.header_table_size as usize);
            self.codec.set_max_recv_frame_size(self.config.max_frame_size);
            return Ok(());
        }

        self.got_peer_settings = true;

        if let Some(size) = settings.header_table_size {
            self.hpack_encoder.set_max_table_size(size as usize);
        }
        if let Some(max) = settings.max_frame_size {
            self.peer_max_frame_size = max as usize;
        }
        if let Some(initial) = settings.initial_window_size {
            let delta = i64::from(initial) - i64::from(self.peer_initial_window);
            self.peer_initial_window = initial;
            if delta != 0 {
                for stream in self.streams.values_mut() {
                    if stream
                        .send_window
                        .apply_delta(delta)
                        .is_err()
                    {
                        return Err(Error::Connection(Reason::FLOW_CONTROL_ERROR));
                    }
                }
            }
        }

        Settings::ack().encode(&mut self.write_buf);
        self.flush_all_pending()?;
        Ok(())
    }

    fn handle_window_update(&mut self, frame: WindowUpdate) -> Result<(), Error> {
        let id = frame.stream_id;
        if id.is_zero() {
            self.send_window
                .inc(frame.increment)
                .map_err(Error::Connection)?;
            self.flush_all_pending()?;
            return Ok(());
        }

        let idu: u32 = id.into();
        if let Some(stream) = self.streams.get_mut(&idu) {
            stream
                .send_window
                .inc(frame.increment)
                .map_err(|reason| Error::Stream { id, reason })?;
            self.flush_stream(idu)?;
            Ok(())
        } else if idu > self.last_stream_id.into() {
            // WINDOW_UPDATE on an idle stream.
            Err(Error::Connection(Reason::PROTOCOL_ERROR))
        } else {
            // Closed long ago; credit for a dead stream is dropped.
            Ok(())
        }
    }

    fn handle_headers(&mut self, frame: frame::Headers, res_tx: &ResponseTx) -> Result<(), Error> {
        let id = frame.stream_id();
        let idu: u32 = id.into();

        if !id.is_client_initiated() {
            return Err(Error::Connection(Reason::PROTOCOL_ERROR));
        }

        let trailers = if self.streams.contains_key(&idu) {
            let stream = &self.streams[&idu];
            if !stream.state.is_recv_streaming() {
                return Err(Error::Stream {
                    id,
                    reason: Reason::STREAM_CLOSED,
                });
            }
            // Trailers terminate the request body.
            if !frame.is_end_stream() {
                tracing::debug!("trailers without END_STREAM");
                return Err(Error::Connection(Reason::PROTOCOL_ERROR));
            }
            true
        } else {
            if idu <= self.last_stream_id.into() {
                // Stream identifiers must increase; this one is closed.
                return Err(Error::Stream {
                    id,
                    reason: Reason::STREAM_CLOSED,
                });
            }
            if self.draining {
                return Err(Error::Stream {
                    id,
                    reason: Reason::REFUSED_STREAM,
                });
            }
            if self.streams.len() as u32 >= self.config.max_concurrent_streams {
                tracing::debug!(limit = self.config.max_concurrent_streams, "too many streams");
                return Err(Error::Stream {
                    id,
                    reason: Reason::REFUSED_STREAM,
                });
            }

            self.last_stream_id = id;
            self.streams.insert(
                idu,
                Stream {
                    state: State::default(),
                    send_window: FlowControl::with_initial_size(self.peer_initial_window),
                    recv_window: FlowControl::with_initial_size(self.config.initial_window_size),
                    request: None,
                    pending: None,
                },
            );
            false
        };

        let block = PartialHeaderBlock {
            stream_id: id,
            fragment: BytesMut::from(&frame.fragment()[..]),
            end_stream: frame.is_end_stream(),
            trailers,
        };

        if frame.is_end_headers() {
            self.finish_header_block(block, res_tx)
        } else {
            self.continuation = Some(block);
            Ok(())
        }
    }

    fn handle_continuation(
        &mut self,
        frame: frame::Continuation,
        res_tx: &ResponseTx,
    ) -> Result<(), Error> {
        let Some(mut block) = self.continuation.take() else {
            tracing::debug!("CONTINUATION without an open header block");
            return Err(Error::Connection(Reason::PROTOCOL_ERROR));
        };
        debug_assert_eq!(block.stream_id, frame.stream_id());

        block.fragment.extend_from_slice(frame.fragment());
        if block.fragment.len() > self.config.max_header_block_size {
            tracing::debug!(
                limit = self.config.max_header_block_size,
                "header block exceeds limit"
            );
            return Err(Error::Connection(Reason::ENHANCE_YOUR_CALM));
        }

        if frame.is_end_headers() {
            self.finish_header_block(block, res_tx)
        } else {
            self.continuation = Some(block);
            Ok(())
        }
    }

    fn finish_header_block(
        &mut self,
        block: PartialHeaderBlock,
        res_tx: &ResponseTx,
    ) -> Result<(), Error> {
        let id = block.stream_id;
        let idu: u32 = id.into();

        // The decoder must consume every block to stay in sync, even if
        // the fields end up discarded.
        let fields = self
            .hpack_decoder
            .decode(&block.fragment)
            .map_err(|err| {
                tracing::debug!("hpack decoding failed: {err}");
                Error::Connection(Reason::COMPRESSION_ERROR)
            })?;

        let stream = self
            .streams
            .get_mut(&idu)
            .expect("stream exists while its header block is assembled");

        if block.trailers {
            // Trailer fields are parsed for conformance and dropped.
            stream.state.recv_close().map_err(|err| convert(id, err))?;
            return self.finish_request(idu, res_tx);
        }

        let request = match build_request(&fields) {
            Ok(request) => request,
            Err(reason) => {
                // A malformed request is a stream error; the state still
                // has to transition so follow-up frames are classified.
                stream.state.recv_open(block.end_stream).map_err(|err| convert(id, err))?;
                return Err(Error::Stream { id, reason });
            }
        };

        stream
            .state
            .recv_open(block.end_stream)
            .map_err(|err| convert(id, err))?;
        stream.request = Some(request);

        if block.end_stream {
            self.finish_request(idu, res_tx)?;
        }
        Ok(())
    }

    fn handle_data(&mut self, frame: Data, res_tx: &ResponseTx) -> Result<(), Error> {
        let id = frame.stream_id();
        let idu: u32 = id.into();
        let len = frame.payload().len() as u32;

        // Connection-level accounting happens even for doomed streams.
        self.recv_window
            .dec(len)
            .map_err(Error::Connection)?;

        let Some(stream) = self.streams.get_mut(&idu) else {
            if idu > self.last_stream_id.into() {
                return Err(Error::Connection(Reason::PROTOCOL_ERROR));
            }
            self.replenish_connection_window(len);
            return Err(Error::Stream {
                id,
                reason: Reason::STREAM_CLOSED,
            });
        };

        if let Err(err) = stream.state.ensure_recv_data() {
            self.replenish_connection_window(len);
            return Err(convert(id, err));
        }

        if let Err(reason) = stream.recv_window.dec(len) {
            self.replenish_connection_window(len);
            return Err(Error::Stream { id, reason });
        }

        let request = stream
            .request
            .as_mut()
            .expect("open stream carries a request");
        if request.body.len() + frame.payload().len() > self.config.max_body_size {
            tracing::debug!(limit = self.config.max_body_size, "request body too large");
            self.replenish_connection_window(len);
            return Err(Error::Stream {
                id,
                reason: Reason::CANCEL,
            });
        }
        request.body.extend_from_slice(frame.payload());

        if frame.is_end_stream() {
            stream.state.recv_close().map_err(|err| convert(id, err))?;
            self.replenish_connection_window(len);
            self.finish_request(idu, res_tx)?;
        } else {
            // Keep both windows topped up so the client can stream the
            // rest of the body without stalling.
            if len > 0 {
                let _ = stream.recv_window.inc(len);
                WindowUpdate::new(id, len).encode(&mut self.write_buf);
            }
            self.replenish_connection_window(len);
        }
        Ok(())
    }

    fn replenish_connection_window(&mut self, len: u32) {
        if len > 0 {
            let _ = self.recv_window.inc(len);
            WindowUpdate::new(StreamId::ZERO, len).encode(&mut self.write_buf);
        }
    }

    fn handle_reset(&mut self, frame: Reset) -> Result<(), Error> {
        let id = frame.stream_id;
        let idu: u32 = id.into();
        match self.streams.get_mut(&idu) {
            Some(stream) => {
                tracing::debug!(stream = idu, reason = ?frame.reason, "stream reset by peer");
                stream.state.recv_reset(frame.reason);
                self.streams.remove(&idu);
                Ok(())
            }
            None if idu > self.last_stream_id.into() => {
                Err(Error::Connection(Reason::PROTOCOL_ERROR))
            }
            None => Ok(()),
        }
    }

    /// The request on `id` is complete: hand it to the service.
    fn finish_request(&mut self, idu: u32, res_tx: &ResponseTx) -> Result<(), Error> {
        let stream = self.streams.get_mut(&idu).expect("stream exists");
        let Some(request) = stream.request.take() else {
            return Ok(());
        };

        let mut builder = http::Request::builder()
            .method(request.method)
            .uri(request.uri)
            .version(Version::HTTP_2);
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
        }
        let req = builder
            .body(request.body.freeze())
            .map_err(|_| Error::Stream {
                id: StreamId::from(idu),
                reason: Reason::PROTOCOL_ERROR,
            })?;

        self.metrics.http_requests_total.inc();
        let timer = self.metrics.http_request_duration_seconds.start_timer();
        let service = self.service.clone();
        let tx = res_tx.clone();
        tokio::spawn(async move {
            let response = service.serve(req).await;
            timer.observe_duration();
            let _ = tx.send((idu, response));
        });
        Ok(())
    }

    /// Encode the response head (and queue the body) for a stream.
    fn start_response(&mut self, idu: u32, response: HttpResponse) -> Result<(), Error> {
        let Some(stream) = self.streams.get_mut(&idu) else {
            // Reset while the handler was running.
            return Ok(());
        };
        if stream.state.is_reset() {
            self.streams.remove(&idu);
            return Ok(());
        }

        let (parts, body) = response.into_parts();
        let status = parts.status;
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        let mut fields: Vec<(&[u8], &[u8])> =
            vec![(b":status", status.as_str().as_bytes())];
        if !parts.headers.contains_key(header::DATE) {
            fields.push((b"date", date.as_bytes()));
        }
        for (name, value) in &parts.headers {
            if is_connection_level(name) {
                continue;
            }
            fields.push((name.as_str().as_bytes(), value.as_bytes()));
        }

        let fragment = self.hpack_encoder.encode(fields.into_iter());
        let end_stream = body.is_empty();

        self.metrics.http_response_size_bytes.observe(body.len() as f64);

        encode_header_block(
            StreamId::from(idu),
            fragment,
            end_stream,
            self.peer_max_frame_size,
            &mut self.write_buf,
        );

        let stream = self.streams.get_mut(&idu).expect("stream exists");
        stream.state.send_open(end_stream);
        if end_stream {
            self.finish_stream(idu);
            return Ok(());
        }

        stream.pending = Some(PendingSend {
            data: body,
            end_stream: true,
        });
        self.flush_stream(idu)
    }

    /// Write as much pending DATA as both windows allow.
    fn flush_stream(&mut self, idu: u32) -> Result<(), Error> {
        let peer_max_frame_size = self.peer_max_frame_size;
        loop {
            let conn_available = self.send_window.available();
            let Some(stream) = self.streams.get_mut(&idu) else {
                return Ok(());
            };
            let Some(pending) = stream.pending.as_mut() else {
                return Ok(());
            };

            let budget = conn_available
                .min(stream.send_window.available())
                .min(peer_max_frame_size as i64);
            if budget <= 0 && !pending.data.is_empty() {
                tracing::trace!(stream = idu, "flow-control blocked");
                return Ok(());
            }

            let take = pending.data.len().min(budget.max(0) as usize);
            let chunk = pending.data.split_to(take);
            let done = pending.data.is_empty();
            let end_stream = done && pending.end_stream;

            let mut data = Data::new(StreamId::from(idu), chunk);
            data.set_end_stream(end_stream);
            data.encode(&mut self.write_buf);

            if take > 0 {
                self.send_window
                    .dec(take as u32)
                    .map_err(Error::Connection)?;
                stream
                    .send_window
                    .dec(take as u32)
                    .map_err(|reason| Error::Stream {
                        id: StreamId::from(idu),
                        reason,
                    })?;
            }

            if done {
                stream.pending = None;
                if end_stream {
                    stream.state.send_close();
                    self.finish_stream(idu);
                }
                return Ok(());
            }
        }
    }

    fn flush_all_pending(&mut self) -> Result<(), Error> {
        let ids: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.pending.is_some())
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.flush_stream(id)?;
        }
        Ok(())
    }

    /// Drop fully-closed streams from the registry.
    fn finish_stream(&mut self, idu: u32) {
        if self
            .streams
            .get(&idu)
            .is_some_and(|s| s.state.is_closed() && s.pending.is_none())
        {
            self.streams.remove(&idu);
        }
    }

    fn reset_stream(&mut self, id: StreamId, reason: Reason) {
        tracing::debug!(stream = u32::from(id), reason = ?reason, "resetting stream");
        Reset::new(id, reason).encode(&mut self.write_buf);
        let idu: u32 = id.into();
        if let Some(stream) = self.streams.get_mut(&idu) {
            stream.state.send_reset(reason);
            stream.pending = None;
            self.streams.remove(&idu);
        }
        // A block that died mid-assembly would desync HPACK; it ends
        // with the stream.
        if self.continuation.as_ref().is_some_and(|b| b.stream_id == id) {
            self.continuation = None;
        }
    }

    /// Terminal connection error: GOAWAY with the matching code, flush,
    /// surface the error.
    async fn fail(&mut self, err: Error) -> Result<(), Error> {
        if let Error::Connection(reason) = err {
            if !self.goaway_sent {
                GoAway::new(self.last_stream_id, reason).encode(&mut self.write_buf);
                self.goaway_sent = true;
            }
            let _ = self.flush().await;
            let _ = self.io.shutdown().await;
            if reason == Reason::NO_ERROR {
                return Ok(());
            }
        }
        Err(err)
    }

    async fn flush(&mut self) -> Result<(), Error> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let buf = self.write_buf.split();
        self.io.write_all(&buf).await.map_err(Error::Io)?;
        self.io.flush().await.map_err(Error::Io)?;
        Ok(())
    }
}

fn convert(id: StreamId, err: StateError) -> Error {
    match err {
        StateError::Stream(reason) => Error::Stream { id, reason },
        StateError::Connection(reason) => Error::Connection(reason),
    }
}

fn is_connection_level(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name.as_str() == "keep-alive"
        || name.as_str() == "proxy-connection"
}

/// Turn a decoded header list into request parts. Pseudo-header rules:
/// they precede regular fields, may not repeat and `:method`/`:path`
/// are mandatory.
fn build_request(fields: &[(Bytes, Bytes)]) -> Result<RequestInProgress, Reason> {
    let mut method: Option<Method> = None;
    let mut path: Option<Bytes> = None;
    let mut scheme: Option<Bytes> = None;
    let mut authority: Option<Bytes> = None;
    let mut headers = HeaderMap::new();
    let mut seen_regular = false;

    for (name, value) in fields {
        if name.starts_with(b":") {
            if seen_regular {
                tracing::debug!("pseudo-header after regular field");
                return Err(Reason::PROTOCOL_ERROR);
            }
            let slot = match &name[..] {
                b":method" => {
                    if method
                        .replace(Method::from_bytes(value).map_err(|_| Reason::PROTOCOL_ERROR)?)
                        .is_some()
                    {
                        return Err(Reason::PROTOCOL_ERROR);
                    }
                    continue;
                }
                b":path" => &mut path,
                b":scheme" => &mut scheme,
                b":authority" => &mut authority,
                _ => return Err(Reason::PROTOCOL_ERROR),
            };
            if slot.replace(value.clone()).is_some() {
                return Err(Reason::PROTOCOL_ERROR);
            }
        } else {
            seen_regular = true;
            let name = HeaderName::from_bytes(name).map_err(|_| Reason::PROTOCOL_ERROR)?;
            if is_connection_level(&name) {
                return Err(Reason::PROTOCOL_ERROR);
            }
            let value = HeaderValue::from_bytes(value).map_err(|_| Reason::PROTOCOL_ERROR)?;
            headers.append(name, value);
        }
    }

    let method = method.ok_or(Reason::PROTOCOL_ERROR)?;
    let path = path.ok_or(Reason::PROTOCOL_ERROR)?;
    if path.is_empty() {
        return Err(Reason::PROTOCOL_ERROR);
    }
    let uri = Uri::try_from(&path[..]).map_err(|_| Reason::PROTOCOL_ERROR)?;

    if let Some(authority) = authority {
        let value =
            HeaderValue::from_bytes(&authority).map_err(|_| Reason::PROTOCOL_ERROR)?;
        headers.entry(header::HOST).or_insert(value);
    }
    let _ = scheme;

    Ok(RequestInProgress {
        method,
        uri,
        headers,
        body: BytesMut::new(),
    })
}
