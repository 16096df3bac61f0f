use bytes::{Buf, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version, header};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{ChunkedDecoder, H1Error};

const MAX_HEADERS: usize = 64;

/// A parsed request head.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    /// Keep-alive is the HTTP/1.1 default; `Connection: close` (or an
    /// HTTP/1.0 request without `keep-alive`) terminates after the
    /// response.
    #[must_use]
    pub fn is_keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.connection_contains("close"),
            Version::HTTP_10 => self.connection_contains("keep-alive"),
            _ => false,
        }
    }

    /// Case-insensitive token search within the `Connection` header.
    #[must_use]
    pub fn connection_contains(&self, token: &str) -> bool {
        header_contains_token(&self.headers, header::CONNECTION, token)
    }

    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.headers
            .get(header::TRANSFER_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
            })
    }

    pub fn content_length(&self) -> Result<Option<u64>, H1Error> {
        match self.headers.get(header::CONTENT_LENGTH) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Some)
                .ok_or(H1Error::InvalidContentLength),
        }
    }
}

/// Case-insensitive token search in a comma-separated header value.
#[must_use]
pub(crate) fn header_contains_token(
    headers: &HeaderMap,
    name: HeaderName,
    token: &str,
) -> bool {
    headers.get_all(name).iter().any(|value| {
        value.to_str().is_ok_and(|v| {
            v.split(',')
                .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
        })
    })
}

/// Read and parse one request head.
///
/// Returns `None` on a clean EOF before any request bytes: the peer
/// simply closed an idle keep-alive connection.
pub async fn read_head<R: AsyncRead + Unpin>(
    io: &mut R,
    buf: &mut BytesMut,
    max_head_size: usize,
) -> Result<Option<RequestHead>, H1Error> {
    loop {
        if !buf.is_empty() {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(&buf[..])? {
                httparse::Status::Complete(parsed_len) => {
                    let head = build_head(&req)?;
                    buf.advance(parsed_len);
                    return Ok(Some(head));
                }
                httparse::Status::Partial => {
                    if buf.len() > max_head_size {
                        return Err(H1Error::HeadTooLarge);
                    }
                }
            }
        }

        let read = io.read_buf(buf).await?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(H1Error::UnexpectedEof);
        }
    }
}

fn build_head(req: &httparse::Request<'_, '_>) -> Result<RequestHead, H1Error> {
    let method = Method::from_bytes(req.method.ok_or(H1Error::BadHeader)?.as_bytes())
        .map_err(|_| H1Error::BadHeader)?;
    let uri = req
        .path
        .ok_or(H1Error::BadHeader)?
        .parse::<Uri>()
        .map_err(|_| H1Error::BadHeader)?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(H1Error::BadHeader),
    };

    let mut headers = HeaderMap::with_capacity(req.headers.len());
    for h in req.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| H1Error::BadHeader)?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| H1Error::BadHeader)?;
        headers.append(name, value);
    }

    Ok(RequestHead {
        method,
        uri,
        version,
        headers,
    })
}

/// Drain the request body following `head`, honoring Content-Length or
/// chunked transfer coding. Requests without either have no body.
pub async fn read_body<R: AsyncRead + Unpin>(
    io: &mut R,
    buf: &mut BytesMut,
    head: &RequestHead,
    max_body_size: usize,
) -> Result<Bytes, H1Error> {
    if head.is_chunked() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = BytesMut::new();
        loop {
            if decoder.decode(buf, &mut out)? {
                return Ok(out.freeze());
            }
            if out.len() > max_body_size {
                return Err(H1Error::BodyTooLarge);
            }
            if io.read_buf(buf).await? == 0 {
                return Err(H1Error::UnexpectedEof);
            }
        }
    }

    let len = match head.content_length()? {
        Some(0) | None => return Ok(Bytes::new()),
        Some(len) => len as usize,
    };
    if len > max_body_size {
        return Err(H1Error::BodyTooLarge);
    }

    let mut out = BytesMut::with_capacity(len.min(64 * 1024));
    loop {
        let take = buf.len().min(len - out.len());
        out.extend_from_slice(&buf[..take]);
        buf.advance(take);
        if out.len() == len {
            return Ok(out.freeze());
        }
        if io.read_buf(buf).await? == 0 {
            return Err(H1Error::UnexpectedEof);
        }
    }
}
