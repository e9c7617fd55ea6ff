//! Minimal HTTP/1.1 framing for the GP Amendment B Admin HTTP wire format
//! (spec.md section 4.7/6): one POST request, one header block split on
//! `\r\n\r\n`, `Content-Length` or `chunked` bodies. No keep-alive
//! pipelining beyond the admin session's own request/response cycle, no
//! general-purpose routing -- this is deliberately narrow, grounded in
//! `gp_ota_tester/simulator/http_client.py::parse_response`/
//! `_decode_chunked` from `original_source`.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

pub const ADMIN_CONTENT_TYPE: &str = "application/vnd.globalplatform.card-content-mgt;version=1.0";
pub const ADMIN_RESPONSE_CONTENT_TYPE: &str = "application/vnd.globalplatform.card-content-mgt-response;version=1.0";

/// A parsed inbound POST: method/path/headers are kept case-preserved;
/// header lookups are case-insensitive via [`HttpRequest::header`].
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Reads headers byte-by-byte until `\r\n\r\n`, then the body per
/// `Content-Length` (primary) or chunked transfer-encoding (required on
/// receive). `max_body_bytes` bounds both forms against a pathological
/// peer.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S, max_body_bytes: usize) -> Result<HttpRequest, Error> {
    let header_block = read_until_double_crlf(stream).await?;
    let mut lines = header_block.split("\r\n");
    let request_line = lines.next().ok_or_else(|| Error::MalformedHttp("empty request".into()))?;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| Error::MalformedHttp("missing method".into()))?.to_string();
    let path = parts.next().ok_or_else(|| Error::MalformedHttp("missing path".into()))?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::MalformedHttp(format!("malformed header line: {line}")))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    let req_headers = HttpRequest { method, path, headers, body: Vec::new() };

    let body = if let Some(encoding) = req_headers.header("Transfer-Encoding") {
        if !encoding.eq_ignore_ascii_case("chunked") {
            return Err(Error::UnsupportedTransferEncoding(encoding.to_string()));
        }
        read_chunked_body(stream, max_body_bytes).await?
    } else if let Some(len) = req_headers.header("Content-Length") {
        let len: usize = len.trim().parse().map_err(|_| Error::MalformedHttp(format!("bad Content-Length: {len}")))?;
        if len > max_body_bytes {
            return Err(Error::BodyTooLarge(len));
        }
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        buf
    } else {
        Vec::new()
    };

    Ok(HttpRequest { body, ..req_headers })
}

async fn read_until_double_crlf<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, Error> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::MalformedHttp("connection closed before headers completed".into()));
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            buf.truncate(buf.len() - 4);
            break;
        }
        if buf.len() > 64 * 1024 {
            return Err(Error::MalformedHttp("header block too large".into()));
        }
    }
    String::from_utf8(buf).map_err(|e| Error::MalformedHttp(e.to_string()))
}

async fn read_chunked_body<S: AsyncRead + Unpin>(stream: &mut S, max_body_bytes: usize) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    loop {
        let size_line = read_line(stream).await?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| Error::MalformedHttp(format!("bad chunk size: {size_line}")))?;

        if size == 0 {
            // Trailing headers (if any) end with a bare CRLF line.
            loop {
                let trailer = read_line(stream).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            break;
        }

        if body.len() + size > max_body_bytes {
            return Err(Error::BodyTooLarge(body.len() + size));
        }

        let mut chunk = vec![0u8; size];
        stream.read_exact(&mut chunk).await?;
        body.extend_from_slice(&chunk);

        let mut crlf = [0u8; 2];
        stream.read_exact(&mut crlf).await?;
        if &crlf != b"\r\n" {
            return Err(Error::MalformedHttp("missing chunk trailer CRLF".into()));
        }
    }
    Ok(body)
}

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, Error> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::MalformedHttp("connection closed mid-chunk".into()));
        }
        if byte[0] == b'\n' {
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8(buf).map_err(|e| Error::MalformedHttp(e.to_string()))
}

/// Writes a minimal status-line + headers + body response. `status` must
/// be one of the three the profile uses: 200, 204, or a 4xx/5xx that
/// terminates the session.
pub async fn write_response<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: u16,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<(), Error> {
    let reason = reason_phrase(status);
    let mut head = format!("HTTP/1.1 {status} {reason}\r\n");
    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {ct}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    stream.write_all(head.as_bytes()).await?;
    if !body.is_empty() {
        stream.write_all(body).await?;
    }
    stream.flush().await?;
    Ok(())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_content_length_body() {
        let raw = b"POST /admin HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nABCD";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let req = read_request(&mut cursor, 1024).await.unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/admin");
        assert_eq!(req.body, b"ABCD");
    }

    #[tokio::test]
    async fn reads_chunked_body() {
        let raw = b"POST /admin HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nABCD\r\n2\r\nEF\r\n0\r\n\r\n";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let req = read_request(&mut cursor, 1024).await.unwrap();
        assert_eq!(req.body, b"ABCDEF");
    }

    #[tokio::test]
    async fn empty_body_when_no_length_or_encoding() {
        let raw = b"POST /admin HTTP/1.1\r\nHost: x\r\n\r\n";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let req = read_request(&mut cursor, 1024).await.unwrap();
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn header_lookup_is_case_insensitive() {
        let raw = b"POST /admin HTTP/1.1\r\nX-Admin-From: //se/iccid/123\r\n\r\n";
        let mut cursor = std::io::Cursor::new(raw.to_vec());
        let req = read_request(&mut cursor, 1024).await.unwrap();
        assert_eq!(req.header("x-admin-from"), Some("//se/iccid/123"));
    }

    #[tokio::test]
    async fn write_response_204_has_no_body() {
        let mut out = Vec::new();
        write_response(&mut out, 204, None, &[]).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));
    }
}
