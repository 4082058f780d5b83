//! Minimal HTTP/1.1 response reader for probe exchanges

use crate::error::ProbeError;
use crate::proxy::models::ProbeResponse;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest status line plus header block accepted
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Largest body accepted; verifier answers are tiny
const MAX_BODY_BYTES: usize = 1024 * 1024;

const MAX_HEADERS: usize = 64;

const READ_CHUNK: usize = 8192;

/// How the body following the head is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilEof,
}

#[derive(Debug)]
struct ResponseHead {
    status: u16,
    head_len: usize,
    framing: BodyFraming,
}

/// Read one response (status, headers, body) from `reader`
pub async fn read_response<R>(reader: &mut R) -> Result<ProbeResponse, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);

    let head = loop {
        if let Some(head) = parse_head(&buf)? {
            break head;
        }
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(ProbeError::MalformedResponse("header block too large".into()));
        }
        if !fill(reader, &mut buf).await? {
            return Err(ProbeError::Truncated);
        }
    };

    let mut pending = buf.split_off(head.head_len);
    let body = match head.framing {
        BodyFraming::Empty => Vec::new(),
        BodyFraming::Length(len) => read_length(reader, pending, len).await?,
        BodyFraming::Chunked => read_chunked(reader, &mut pending).await?,
        BodyFraming::UntilEof => read_to_eof(reader, pending).await?,
    };

    Ok(ProbeResponse::new(head.status, body))
}

fn parse_head(buf: &[u8]) -> Result<Option<ResponseHead>, ProbeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);

    let head_len = match response.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProbeError::MalformedResponse(e.to_string())),
    };

    let status = response
        .code
        .ok_or_else(|| ProbeError::MalformedResponse("missing status code".into()))?;

    let framing = if (100..200).contains(&status) || status == 204 || status == 304 {
        BodyFraming::Empty
    } else {
        framing_from_headers(response.headers)?
    };

    Ok(Some(ResponseHead {
        status,
        head_len,
        framing,
    }))
}

fn framing_from_headers(headers: &[httparse::Header<'_>]) -> Result<BodyFraming, ProbeError> {
    let value_of = |name: &str| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| String::from_utf8_lossy(h.value).trim().to_ascii_lowercase())
    };

    if let Some(encoding) = value_of("transfer-encoding") {
        if encoding.split(',').any(|part| part.trim() == "chunked") {
            return Ok(BodyFraming::Chunked);
        }
    }

    match value_of("content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map(BodyFraming::Length)
            .map_err(|_| ProbeError::MalformedResponse(format!("bad content-length: {}", raw))),
        None => Ok(BodyFraming::UntilEof),
    }
}

/// Append more bytes to `buf`; `false` once the peer has closed.
///
/// Peers behind relays often drop the TLS session without close_notify,
/// which surfaces as `UnexpectedEof` and is treated as a normal close.
async fn fill<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    match reader.read(&mut chunk).await {
        Ok(0) => Ok(false),
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(ProbeError::Io(e)),
    }
}

async fn read_length<R>(reader: &mut R, mut body: Vec<u8>, len: usize) -> Result<Vec<u8>, ProbeError>
where
    R: AsyncRead + Unpin,
{
    if len > MAX_BODY_BYTES {
        return Err(ProbeError::MalformedResponse(format!("body too large: {} bytes", len)));
    }
    while body.len() < len {
        if !fill(reader, &mut body).await? {
            return Err(ProbeError::Truncated);
        }
    }
    body.truncate(len);
    Ok(body)
}

async fn read_to_eof<R>(reader: &mut R, mut body: Vec<u8>) -> Result<Vec<u8>, ProbeError>
where
    R: AsyncRead + Unpin,
{
    while fill(reader, &mut body).await? {
        if body.len() > MAX_BODY_BYTES {
            return Err(ProbeError::MalformedResponse("body too large".into()));
        }
    }
    Ok(body)
}

async fn read_chunked<R>(reader: &mut R, pending: &mut Vec<u8>) -> Result<Vec<u8>, ProbeError>
where
    R: AsyncRead + Unpin,
{
    let mut body = Vec::new();

    loop {
        let line_end = loop {
            if let Some(pos) = find_crlf(pending) {
                break pos;
            }
            if pending.len() > MAX_HEAD_BYTES {
                return Err(ProbeError::MalformedResponse("chunk size line too long".into()));
            }
            if !fill(reader, pending).await? {
                return Err(ProbeError::Truncated);
            }
        };

        let size = parse_chunk_size(&pending[..line_end])?;
        pending.drain(..line_end + 2);

        // Trailers after the last chunk are not needed
        if size == 0 {
            return Ok(body);
        }
        // `size` comes straight from the peer; bound it before any arithmetic
        if size > MAX_BODY_BYTES - body.len() {
            return Err(ProbeError::MalformedResponse("body too large".into()));
        }
        let framed = size
            .checked_add(2)
            .ok_or_else(|| ProbeError::MalformedResponse("chunk size overflow".into()))?;

        while pending.len() < framed {
            if !fill(reader, pending).await? {
                return Err(ProbeError::Truncated);
            }
        }
        if &pending[size..framed] != b"\r\n" {
            return Err(ProbeError::MalformedResponse("chunk not terminated by CRLF".into()));
        }
        body.extend_from_slice(&pending[..size]);
        pending.drain(..framed);
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ProbeError> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ProbeError::MalformedResponse("non-UTF-8 chunk size".into()))?;
    let digits = line.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(digits, 16)
        .map_err(|_| ProbeError::MalformedResponse(format!("bad chunk size: {:?}", digits)))
}
