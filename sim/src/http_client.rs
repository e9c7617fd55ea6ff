//! Client-role half of the minimal Admin HTTP framing (spec.md section
//! 4.7/6): writes the outbound POST, parses the inbound status-line +
//! headers + body. Grounded in `gp_ota_tester/simulator/http_client.py`'s
//! `parse_response`/`_decode_chunked` from `original_source` -- the
//! counterpart to `gp_ota_server::http`'s server-side request parsing.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

pub const ADMIN_REQUEST_CONTENT_TYPE: &str = "application/vnd.globalplatform.card-content-mgt-response;version=1.0";

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

/// Writes a minimal `POST <path>` request with the GP Amendment B headers
/// and an optional `X-Admin-From` identifier on the first request.
pub async fn write_request<S: AsyncWrite + Unpin>(
    stream: &mut S,
    path: &str,
    admin_from: Option<&str>,
    body: &[u8],
) -> Result<(), Error> {
    let mut head = format!("POST {path} HTTP/1.1\r\nHost: admin\r\nContent-Type: {ADMIN_REQUEST_CONTENT_TYPE}\r\n");
    if let Some(admin_from) = admin_from {
        head.push_str(&format!("X-Admin-From: {admin_from}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    stream.write_all(head.as_bytes()).await?;
    if !body.is_empty() {
        stream.write_all(body).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Reads a status-line + header block + body, decoding `Content-Length`
/// (primary) or chunked transfer-encoding (required on receive).
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S, max_body_bytes: usize) -> Result<HttpResponse, Error> {
    let header_block = read_until_double_crlf(stream).await?;
    let mut lines = header_block.split("\r\n");
    let status_line = lines.next().ok_or_else(|| Error::MalformedHttp("empty response".into()))?;

    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::MalformedHttp(format!("malformed status line: {status_line}")))?
        .parse()
        .map_err(|_| Error::MalformedHttp(format!("non-numeric status: {status_line}")))?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) =
            line.split_once(':').ok_or_else(|| Error::MalformedHttp(format!("malformed header line: {line}")))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    let partial = HttpResponse { status, headers, body: Vec::new() };

    let body = if let Some(encoding) = partial.header("Transfer-Encoding") {
        if !encoding.eq_ignore_ascii_case("chunked") {
            return Err(Error::UnsupportedTransferEncoding(encoding.to_string()));
        }
        read_chunked_body(stream, max_body_bytes).await?
    } else if let Some(len) = partial.header("Content-Length") {
        let len: usize = len.trim().parse().map_err(|_| Error::MalformedHttp(format!("bad Content-Length: {len}")))?;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        buf
    } else {
        Vec::new()
    };

    Ok(HttpResponse { body, ..partial })
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
        let size =
            usize::from_str_radix(size_hex, 16).map_err(|_| Error::MalformedHttp(format!("bad chunk size: {size_line}")))?;

        if size == 0 {
            loop {
                let trailer = read_line(stream).await?;
                if trailer.is_empty() {
                    break;
                }
            }
            break;
        }

        if body.len() + size > max_body_bytes {
            return Err(Error::MalformedHttp("chunked body exceeds maximum".into()));
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
