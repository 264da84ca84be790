//! Opening handshake (HTTP Upgrade).
//!
//! The server side validates the request head and either produces the
//! `101 Switching Protocols` response or a rejection response. Failure is
//! terminal: the connection never opens and there is no retry.
//!
//! ```http
//! GET /ws HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! The client side builds the request and checks the server's answer.


use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this engine speaks.
pub const WS_VERSION: &str = "13";

/// Default cap on the size of a request head.
pub const DEFAULT_MAX_HEAD_SIZE: usize = 8 * 1024;

/// Handshake failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Request or response head could not be parsed
    #[error("malformed HTTP head: {0}")]
    Malformed(String),

    /// Head exceeded the configured size before the terminator arrived
    #[error("HTTP head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// Request method other than GET
    #[error("method {0} not allowed, expected GET")]
    MethodNotAllowed(String),

    /// HTTP version other than 1.1
    #[error("unsupported HTTP version {0}")]
    HttpVersion(String),

    /// Request target does not match the upgrade path
    #[error("no WebSocket endpoint at {0}")]
    NotFound(String),

    /// Required header absent
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// Header present with an unacceptable value
    #[error("invalid {name} header: {value:?}")]
    InvalidHeader {
        /// Header name
        name: &'static str,
        /// Received value
        value: String,
    },

    /// `Sec-WebSocket-Key` does not decode to 16 bytes
    #[error("Sec-WebSocket-Key must be 16 base64-encoded bytes: {0:?}")]
    InvalidKey(String),

    /// `Sec-WebSocket-Version` other than 13
    #[error("unsupported WebSocket version {0:?}, expected 13")]
    UnsupportedVersion(String),

    /// Server answered with something other than 101
    #[error("server responded with status {0}")]
    UnexpectedStatus(u16),

    /// Server's `Sec-WebSocket-Accept` does not match our key
    #[error("Sec-WebSocket-Accept mismatch")]
    AcceptMismatch,
}

impl HandshakeError {
    /// HTTP status used to reject a request failing with this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::MethodNotAllowed(_) => 405,
            Self::NotFound(_) => 404,
            Self::UnsupportedVersion(_) => 426,
            Self::HeadTooLarge(_) => 431,
            _ => 400,
        }
    }

    /// Complete HTTP rejection response for this error.
    pub fn rejection(&self) -> Bytes {
        let status = self.status();
        let body = format!("{self}\n");

        let mut head = format!("HTTP/1.1 {status} {}\r\n", reason_phrase(status));
        head.push_str("Connection: close\r\n");
        head.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        match self {
            Self::UnsupportedVersion(_) => {
                head.push_str(&format!("Sec-WebSocket-Version: {WS_VERSION}\r\n"));
            },
            Self::MethodNotAllowed(_) => head.push_str("Allow: GET\r\n"),
            _ => {},
        }
        head.push_str("\r\n");
        head.push_str(&body);
        Bytes::from(head)
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        404 => "Not Found",
        405 => "Method Not Allowed",
        426 => "Upgrade Required",
        431 => "Request Header Fields Too Large",
        _ => "Bad Request",
    }
}

/// Compute `Sec-WebSocket-Accept` for a client key:
/// `base64(SHA-1(key ++ GUID))`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Locate the end of an HTTP head.
///
/// Returns the index just past the blank line (`\r\n\r\n`), i.e. the length
/// of the head. Anything after it belongs to the upgraded stream.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Parsed header list (names lowercased, values trimmed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Headers(Vec<(String, String)>);

impl Headers {
    fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, HandshakeError> {
        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::Malformed(format!("header line {line:?}")))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
        Ok(Self(headers))
    }

    /// All values of a header joined with ", " (repeated headers fold into
    /// one list).
    fn get(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect();
        if values.is_empty() { None } else { Some(values.join(", ")) }
    }

    /// Check whether a comma-separated header contains `token`
    /// (case-insensitive).
    fn has_token(&self, name: &str, token: &str) -> bool {
        self.get(name)
            .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
    }
}

fn head_text(data: &[u8]) -> Result<&str, HandshakeError> {
    std::str::from_utf8(data).map_err(|_| HandshakeError::Malformed("head is not UTF-8".into()))
}

/// Request head of an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method
    pub method: String,
    /// Request target (path and query)
    pub target: String,
    /// HTTP version token, e.g. `HTTP/1.1`
    pub version: String,
    headers: Headers,
}

impl HttpRequest {
    /// Parse a request head (request line and headers).
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let mut lines = head_text(data)?.lines();

        let request_line =
            lines.next().ok_or_else(|| HandshakeError::Malformed("empty request".into()))?;
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HandshakeError::Malformed(format!("request line {request_line:?}")));
        };

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers: Headers::parse(lines)?,
        })
    }

    /// Header value by name (case-insensitive); repeated headers are joined.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.target.split_once('?').map_or(self.target.as_str(), |(path, _)| path)
    }
}

/// Response head of an upgrade response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    headers: Headers,
}

impl HttpResponse {
    /// Parse a response head (status line and headers).
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let mut lines = head_text(data)?.lines();

        let status_line =
            lines.next().ok_or_else(|| HandshakeError::Malformed("empty response".into()))?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| HandshakeError::Malformed(format!("status line {status_line:?}")))?;

        Ok(Self { status, headers: Headers::parse(lines)? })
    }

    /// Header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name)
    }
}

/// Successful negotiation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Computed `Sec-WebSocket-Accept` value
    pub accept_key: String,
}

impl HandshakeResponse {
    /// `101 Switching Protocols` response bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\r\n",
            self.accept_key
        ))
    }
}

/// Server-side handshake validation.
#[derive(Debug, Clone, Default)]
pub struct ServerHandshake {
    path: Option<String>,
}

impl ServerHandshake {
    /// Accept upgrades on any path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept upgrades whose request path equals `path`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Validate an upgrade request.
    ///
    /// Checks, in order: method is GET, HTTP/1.1, path (if
    /// configured), `Upgrade: websocket`, `Connection: Upgrade`, a
    /// `Sec-WebSocket-Key` of 16 base64 bytes and `Sec-WebSocket-Version:
    /// 13`.
    pub fn accept(&self, request: &HttpRequest) -> Result<HandshakeResponse, HandshakeError> {
        if request.method != "GET" {
            return Err(HandshakeError::MethodNotAllowed(request.method.clone()));
        }

        if request.version != "HTTP/1.1" {
            return Err(HandshakeError::HttpVersion(request.version.clone()));
        }

        if let Some(path) = &self.path {
            if request.path() != path {
                return Err(HandshakeError::NotFound(request.path().to_string()));
            }
        }

        let upgrade = request.header("upgrade").ok_or(HandshakeError::MissingHeader("Upgrade"))?;
        if !request.headers.has_token("upgrade", "websocket") {
            return Err(HandshakeError::InvalidHeader { name: "Upgrade", value: upgrade });
        }

        let connection =
            request.header("connection").ok_or(HandshakeError::MissingHeader("Connection"))?;
        if !request.headers.has_token("connection", "upgrade") {
            return Err(HandshakeError::InvalidHeader { name: "Connection", value: connection });
        }

        let key = request
            .header("sec-websocket-key")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;
        match STANDARD.decode(key.as_bytes()) {
            Ok(raw) if raw.len() == 16 => {},
            _ => return Err(HandshakeError::InvalidKey(key)),
        }

        let version = request
            .header("sec-websocket-version")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Version"))?;
        if version != WS_VERSION {
            return Err(HandshakeError::UnsupportedVersion(version));
        }

        Ok(HandshakeResponse { accept_key: compute_accept_key(&key) })
    }

    /// Parse and validate a request head in one step.
    pub fn negotiate(&self, head: &[u8]) -> Result<HandshakeResponse, HandshakeError> {
        self.accept(&HttpRequest::parse(head)?)
    }
}

/// Client-side handshake.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    host: String,
    path: String,
    key: String,
}

impl ClientHandshake {
    /// Build a handshake for `host` and `path` from a 16-byte nonce.
    pub fn new(host: impl Into<String>, path: impl Into<String>, nonce: [u8; 16]) -> Self {
        Self { host: host.into(), path: path.into(), key: STANDARD.encode(nonce) }
    }

    /// Base64 `Sec-WebSocket-Key` sent in the request.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Upgrade request bytes.
    pub fn request_bytes(&self) -> Bytes {
        Bytes::from(format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {WS_VERSION}\r\n\r\n",
            self.path, self.host, self.key
        ))
    }

    /// Check the server's response to our request.
    pub fn validate(&self, response: &HttpResponse) -> Result<(), HandshakeError> {
        if response.status != 101 {
            return Err(HandshakeError::UnexpectedStatus(response.status));
        }
        if !response.headers.has_token("upgrade", "websocket") {
            return Err(HandshakeError::InvalidHeader {
                name: "Upgrade",
                value: response.header("upgrade").unwrap_or_default(),
            });
        }
        if !response.headers.has_token("connection", "upgrade") {
            return Err(HandshakeError::InvalidHeader {
                name: "Connection",
                value: response.header("connection").unwrap_or_default(),
            });
        }
        let accept = response
            .header("sec-websocket-accept")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
        if accept != compute_accept_key(&self.key) {
            return Err(HandshakeError::AcceptMismatch);
        }
        Ok(())
    }
}
