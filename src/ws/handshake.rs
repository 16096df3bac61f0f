//! WebSocket opening handshake (RFC 6455 §4).

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::{HeaderMap, Method, header};
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A validated upgrade request.
#[derive(Debug, Clone)]
pub struct WsHandshake {
    pub key: String,
    /// Protocols offered via `Sec-WebSocket-Protocol`, in order.
    pub protocols: Vec<String>,
    /// `Origin` is passed through for the application to vet.
    pub origin: Option<String>,
}

/// Why an upgrade request was rejected; the message names the
/// offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    MethodNotGet,
    MissingUpgrade,
    InvalidUpgrade,
    MissingConnection,
    InvalidConnection,
    MissingVersion,
    UnsupportedVersion(String),
    MissingKey,
    InvalidKey,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotGet => f.write_str("websocket handshake requires the GET method"),
            Self::MissingUpgrade => f.write_str("missing Upgrade header"),
            Self::InvalidUpgrade => f.write_str("Upgrade header does not contain 'websocket'"),
            Self::MissingConnection => f.write_str("missing Connection header"),
            Self::InvalidConnection => {
                f.write_str("Connection header does not contain 'upgrade'")
            }
            Self::MissingVersion => f.write_str("missing Sec-WebSocket-Version header"),
            Self::UnsupportedVersion(found) => {
                write!(f, "unsupported Sec-WebSocket-Version '{found}' (expected 13)")
            }
            Self::MissingKey => f.write_str("missing Sec-WebSocket-Key header"),
            Self::InvalidKey => {
                f.write_str("Sec-WebSocket-Key is not 16 base64-encoded bytes")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Validate an HTTP/1.1 request as a WebSocket upgrade.
pub fn validate(method: &Method, headers: &HeaderMap) -> Result<WsHandshake, HandshakeError> {
    if method != Method::GET {
        return Err(HandshakeError::MethodNotGet);
    }

    let upgrade = headers
        .get(header::UPGRADE)
        .ok_or(HandshakeError::MissingUpgrade)?;
    if !value_contains_token(upgrade.as_bytes(), "websocket") {
        return Err(HandshakeError::InvalidUpgrade);
    }

    let connection = headers
        .get(header::CONNECTION)
        .ok_or(HandshakeError::MissingConnection)?;
    if !value_contains_token(connection.as_bytes(), "upgrade") {
        return Err(HandshakeError::InvalidConnection);
    }

    let version = headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .ok_or(HandshakeError::MissingVersion)?;
    let version = String::from_utf8_lossy(version.as_bytes());
    if version.trim() != "13" {
        return Err(HandshakeError::UnsupportedVersion(version.into_owned()));
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(HandshakeError::MissingKey)?;
    let key = std::str::from_utf8(key.as_bytes())
        .map_err(|_| HandshakeError::InvalidKey)?
        .trim()
        .to_owned();
    match BASE64.decode(&key) {
        Ok(raw) if raw.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidKey),
    }

    let protocols = headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|p| p.trim().to_owned())
        .filter(|p| !p.is_empty())
        .collect();

    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    Ok(WsHandshake {
        key,
        protocols,
        origin,
    })
}

/// `base64(sha1(key ++ GUID))`, the `Sec-WebSocket-Accept` value.
#[must_use]
pub fn derive_accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64.encode(sha1.finalize())
}

impl WsHandshake {
    /// Serialize the 101 response, echoing the negotiated subprotocol
    /// only when one was selected.
    #[must_use]
    pub fn response(&self, protocol: Option<&str>) -> Vec<u8> {
        let mut response = String::with_capacity(160);
        response.push_str("HTTP/1.1 101 Switching Protocols\r\n");
        response.push_str("upgrade: websocket\r\n");
        response.push_str("connection: Upgrade\r\n");
        response.push_str("sec-websocket-accept: ");
        response.push_str(&derive_accept_key(&self.key));
        response.push_str("\r\n");
        if let Some(protocol) = protocol.filter(|p| !p.is_empty()) {
            response.push_str("sec-websocket-protocol: ");
            response.push_str(protocol);
            response.push_str("\r\n");
        }
        response.push_str("\r\n");
        response.into_bytes()
    }
}

fn value_contains_token(value: &[u8], token: &str) -> bool {
    String::from_utf8_lossy(value)
        .split(',')
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}
