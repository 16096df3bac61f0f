use bytes::{BufMut, BytesMut};
use http::header;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::server::handler::HttpResponse;

/// Serialize and write a complete response. Returns the number of
/// octets written (head + body) for metrics.
///
/// The body length is always known here, so `Content-Length` framing is
/// used; streaming responses (SSE, upgrades) never pass through this
/// writer.
pub async fn write_response<W: AsyncWrite + Unpin>(
    io: &mut W,
    response: &HttpResponse,
    keep_alive: bool,
    head_only: bool,
) -> std::io::Result<usize> {
    let status = response.status();
    let body = response.body();

    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(b"HTTP/1.1 ");
    head.extend_from_slice(status.as_str().as_bytes());
    head.put_u8(b' ');
    head.extend_from_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    head.put_slice(b"\r\n");

    let headers = response.headers();
    if !headers.contains_key(header::DATE) {
        write_header(
            &mut head,
            "date",
            httpdate::fmt_http_date(std::time::SystemTime::now()).as_bytes(),
        );
    }
    if !headers.contains_key(header::CONTENT_LENGTH) {
        let mut len = itoa::Buffer::new();
        write_header(&mut head, "content-length", len.format(body.len()).as_bytes());
    }
    if !keep_alive {
        write_header(&mut head, "connection", b"close");
    }
    for (name, value) in headers {
        write_header(&mut head, name.as_str(), value.as_bytes());
    }
    head.put_slice(b"\r\n");

    let mut written = head.len();
    io.write_all(&head).await?;
    if !head_only && !body.is_empty() {
        io.write_all(body).await?;
        written += body.len();
    }
    io.flush().await?;
    Ok(written)
}

fn write_header(dst: &mut BytesMut, name: &str, value: &[u8]) {
    dst.extend_from_slice(name.as_bytes());
    dst.put_slice(b": ");
    dst.extend_from_slice(value);
    dst.put_slice(b"\r\n");
}
