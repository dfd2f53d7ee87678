//! C7 — handshake. URI parsing (ws/wss/http/https with default ports and
//! path defaulting to `/`), HTTP upgrade request construction, and
//! `Sec-WebSocket-Accept` verification.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{CoreError, CoreResult};

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const HANDSHAKE_RECV_BUF: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUri {
    pub secure: bool,
    pub host: String,
    pub port: u16,
    pub path: String,
}

/// Parses `ws://`, `wss://`, `http://`, `https://` URIs. `http`/`ws` share
/// port 80, `https`/`wss` share port 443; a missing path defaults to `/`.
pub fn parse_uri(uri: &str) -> CoreResult<WsUri> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| CoreError::InvalidParam(format!("missing scheme in uri: {uri}")))?;

    let secure = match scheme {
        "ws" | "http" => false,
        "wss" | "https" => true,
        other => return Err(CoreError::InvalidParam(format!("unsupported scheme: {other}"))),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(CoreError::InvalidParam(format!("missing host in uri: {uri}")));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| CoreError::InvalidParam(format!("invalid port in uri: {uri}")))?;
            (h.to_string(), port)
        }
        None => (authority.to_string(), if secure { 443 } else { 80 }),
    };

    Ok(WsUri { secure, host, port, path: path.to_string() })
}

/// Generates a fresh random 16-byte key, base64 encoded, for
/// `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    BASE64.encode(raw)
}

fn expected_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Builds the HTTP/1.1 upgrade request bytes.
pub fn build_request(uri: &WsUri, key: &str) -> Vec<u8> {
    let host_header = if (uri.secure && uri.port == 443) || (!uri.secure && uri.port == 80) {
        uri.host.clone()
    } else {
        format!("{}:{}", uri.host, uri.port)
    };

    format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        path = uri.path,
        host = host_header,
        key = key,
    )
    .into_bytes()
}

/// Reads from `r` byte-at-a-time up to `HANDSHAKE_RECV_BUF` bytes looking
/// for the end of the HTTP response headers (`\r\n\r\n`), then validates
/// the status line and `Sec-WebSocket-Accept`.
pub fn perform_handshake<RW: std::io::Read + std::io::Write>(
    stream: &mut RW,
    uri: &WsUri,
) -> CoreResult<()> {
    let key = generate_key();
    let request = build_request(uri, &key);
    stream
        .write_all(&request)
        .map_err(|e| CoreError::SendError(e.to_string()))?;

    let mut buf = Vec::with_capacity(HANDSHAKE_RECV_BUF);
    let mut byte = [0u8; 1];
    loop {
        if buf.len() >= HANDSHAKE_RECV_BUF {
            return Err(CoreError::Protocol("handshake response too large".into()));
        }
        stream
            .read_exact(&mut byte)
            .map_err(|e| CoreError::RecvError(e.to_string()))?;
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
    }

    let response = String::from_utf8_lossy(&buf);
    let mut lines = response.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    if !status_line.contains("101") {
        return Err(CoreError::Protocol(format!("handshake rejected: {status_line}")));
    }

    let accept = lines
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Accept:").or_else(|| line.strip_prefix("sec-websocket-accept:")))
        .map(|v| v.trim().to_string())
        .ok_or_else(|| CoreError::Protocol("missing Sec-WebSocket-Accept".into()))?;

    if accept != expected_accept(&key) {
        return Err(CoreError::Protocol("Sec-WebSocket-Accept mismatch".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read, Write};

    /// Serves a fixed response buffer on read, discards writes — lets a
    /// handshake test feed a canned HTTP response without the request
    /// write clobbering it (a plain `Cursor` shares one position for both).
    struct MockStream {
        response: Cursor<Vec<u8>>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.response.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn parses_ws_with_default_port_and_path() {
        let uri = parse_uri("ws://example.com").unwrap();
        assert!(!uri.secure);
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, 80);
        assert_eq!(uri.path, "/");
    }

    #[test]
    fn parses_wss_with_explicit_port_and_path() {
        let uri = parse_uri("wss://example.com:9443/voice/v1").unwrap();
        assert!(uri.secure);
        assert_eq!(uri.port, 9443);
        assert_eq!(uri.path, "/voice/v1");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(parse_uri("ftp://example.com").is_err());
    }

    #[test]
    fn accept_is_sha1_base64_of_key_plus_guid() {
        // RFC 6455 §1.3 worked example.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(expected_accept(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_forged_accept_value() {
        let uri = parse_uri("ws://example.com/").unwrap();
        let bad_response =
            b"HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: bm90dGhlcmlnaHR2YWx1ZQ==\r\n\r\n"
                .to_vec();
        let mut mock = MockStream { response: Cursor::new(bad_response) };
        let result = perform_handshake(&mut mock, &uri);
        assert!(result.is_err());
    }
}
