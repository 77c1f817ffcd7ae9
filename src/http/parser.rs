//! Incremental HTTP/1.x request parsing over a byte buffer.
//!
//! `parse` looks at the front of the buffer only and never consumes input
//! itself; the framer decides what to drop.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{Method, Version};
use thiserror::Error;

use crate::config::FramingConfig;
use crate::http::request::Headers;

/// Most header lines accepted in one request.
pub const MAX_HEADERS: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed request head: {0}")]
    Head(httparse::Error),

    #[error("Unsupported HTTP version")]
    Version,

    #[error("Invalid method")]
    Method,

    #[error("Invalid header {0:?}")]
    Header(String),

    #[error("Header block exceeds {0} bytes")]
    HeadersTooLarge(usize),

    #[error("Body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Conflicting or invalid Content-Length")]
    ContentLength,

    #[error("Unsupported Transfer-Encoding")]
    TransferEncoding,

    #[error("Malformed chunked body")]
    Chunk,
}

/// A complete request, before origin metadata is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub headers: Headers,
    pub body: Bytes,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A request and the number of bytes it occupied.
    Complete(ParsedRequest, usize),
    /// More input is needed; nothing can change before the buffer holds at
    /// least `needed` bytes.
    Incomplete { needed: usize },
    Invalid(ParseError),
}

enum BodyKind {
    None,
    Length(usize),
    Chunked,
}

/// Try to parse one request from the front of `buf`.
pub fn parse(buf: &[u8], limits: &FramingConfig) -> ParseOutcome {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);

    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            if buf.len() > limits.max_header_bytes {
                return ParseOutcome::Invalid(ParseError::HeadersTooLarge(limits.max_header_bytes));
            }
            return ParseOutcome::Incomplete { needed: buf.len() + 1 };
        }
        Err(e) => return ParseOutcome::Invalid(ParseError::Head(e)),
    };
    if head_len > limits.max_header_bytes {
        return ParseOutcome::Invalid(ParseError::HeadersTooLarge(limits.max_header_bytes));
    }

    let head = match build_head(&req) {
        Ok(head) => head,
        Err(e) => return ParseOutcome::Invalid(e),
    };
    let (method, target, version, headers) = head;

    let kind = match body_kind(&headers, limits.max_body_bytes) {
        Ok(kind) => kind,
        Err(e) => return ParseOutcome::Invalid(e),
    };

    let rest = &buf[head_len..];
    let (body, body_len) = match kind {
        BodyKind::None => (Bytes::new(), 0),
        BodyKind::Length(len) => {
            if rest.len() < len {
                return ParseOutcome::Incomplete { needed: head_len + len };
            }
            (Bytes::copy_from_slice(&rest[..len]), len)
        }
        BodyKind::Chunked => match decode_chunked(rest, limits.max_body_bytes) {
            Ok(Chunked::Done(body, used)) => (body, used),
            Ok(Chunked::NeedAtLeast(n)) => {
                return ParseOutcome::Incomplete { needed: head_len + n };
            }
            Err(e) => return ParseOutcome::Invalid(e),
        },
    };

    ParseOutcome::Complete(
        ParsedRequest {
            method,
            target,
            version,
            headers,
            body,
        },
        head_len + body_len,
    )
}

fn build_head(req: &httparse::Request<'_, '_>) -> Result<(Method, String, Version, Headers), ParseError> {
    let method = req
        .method
        .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
        .ok_or(ParseError::Method)?;
    let target = req.path.unwrap_or("/").to_string();
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => return Err(ParseError::Version),
    };

    let mut headers = Headers::with_capacity(req.headers.len());
    for h in req.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| ParseError::Header(h.name.to_string()))?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| ParseError::Header(h.name.to_string()))?;
        headers.append(name, value);
    }
    Ok((method, target, version, headers))
}

fn body_kind(headers: &Headers, max_body: usize) -> Result<BodyKind, ParseError> {
    let mut codings = Vec::new();
    for value in headers.get_all("transfer-encoding") {
        let value = value.to_str().map_err(|_| ParseError::TransferEncoding)?;
        codings.extend(value.split(',').map(str::trim).filter(|c| !c.is_empty()));
    }

    let mut length: Option<u64> = None;
    for value in headers.get_all("content-length") {
        let value = value.to_str().map_err(|_| ParseError::ContentLength)?;
        for part in value.split(',') {
            let n: u64 = part.trim().parse().map_err(|_| ParseError::ContentLength)?;
            if length.is_some_and(|prev| prev != n) {
                return Err(ParseError::ContentLength);
            }
            length = Some(n);
        }
    }

    if !codings.is_empty() {
        // Chunked must be the final coding; both framings at once is ambiguous.
        let chunked_last = codings.last().is_some_and(|c| c.eq_ignore_ascii_case("chunked"));
        if !chunked_last || length.is_some() {
            return Err(ParseError::TransferEncoding);
        }
        return Ok(BodyKind::Chunked);
    }

    match length {
        None | Some(0) => Ok(BodyKind::None),
        Some(n) if n > max_body as u64 => Err(ParseError::BodyTooLarge(max_body)),
        Some(n) => Ok(BodyKind::Length(n as usize)),
    }
}

enum Chunked {
    /// Decoded body and the encoded length consumed.
    Done(Bytes, usize),
    NeedAtLeast(usize),
}

fn decode_chunked(buf: &[u8], max_body: usize) -> Result<Chunked, ParseError> {
    let mut body = BytesMut::new();
    let mut pos = 0;

    loop {
        let (used, size) = match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete(found)) => found,
            Ok(httparse::Status::Partial) => return Ok(Chunked::NeedAtLeast(buf.len() + 1)),
            Err(_) => return Err(ParseError::Chunk),
        };
        pos += used;

        if size == 0 {
            return match skip_trailers(buf, pos) {
                Some(end) => Ok(Chunked::Done(body.freeze(), end)),
                None => Ok(Chunked::NeedAtLeast(buf.len() + 1)),
            };
        }

        let size = usize::try_from(size).map_err(|_| ParseError::BodyTooLarge(max_body))?;
        if body.len().saturating_add(size) > max_body {
            return Err(ParseError::BodyTooLarge(max_body));
        }
        let end = pos + size;
        if buf.len() < end + 2 {
            return Ok(Chunked::NeedAtLeast(end + 2));
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(ParseError::Chunk);
        }
        body.extend_from_slice(&buf[pos..end]);
        pos = end + 2;
    }
}

/// Skip the trailer section after the last chunk. Returns the offset just
/// past the terminating empty line.
fn skip_trailers(buf: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let newline = buf[pos..].iter().position(|&b| b == b'\n')?;
        let line = &buf[pos..pos + newline];
        pos += newline + 1;
        if line.is_empty() || line == b"\r" {
            return Some(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> FramingConfig {
        FramingConfig::default()
    }

    fn complete(buf: &[u8]) -> (ParsedRequest, usize) {
        match parse(buf, &limits()) {
            ParseOutcome::Complete(req, used) => (req, used),
            other => panic!("expected complete request, got {other:?}"),
        }
    }

    #[test]
    fn parses_get_without_body() {
        let raw = b"GET /index.html?q=1 HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\nGET";
        let (req, used) = complete(raw);
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.target, "/index.html?q=1");
        assert_eq!(req.version, Version::HTTP_11);
        assert_eq!(req.headers.len(), 2);
        assert!(req.body.is_empty());
        assert_eq!(used, raw.len() - 3);
    }

    #[test]
    fn content_length_body_waits_for_all_bytes() {
        let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello";
        match parse(raw, &limits()) {
            ParseOutcome::Incomplete { needed } => assert_eq!(needed, raw.len() + 6),
            other => panic!("unexpected {other:?}"),
        }

        let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world";
        let (req, used) = complete(raw);
        assert_eq!(&req.body[..], b"hello world");
        assert_eq!(used, raw.len());
    }

    #[test]
    fn chunked_body_is_decoded() {
        let raw = b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let (req, used) = complete(raw);
        assert_eq!(&req.body[..], b"hello world");
        assert_eq!(used, raw.len());
    }

    #[test]
    fn partial_chunked_body_is_incomplete() {
        let raw = b"POST /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel";
        assert!(matches!(parse(raw, &limits()), ParseOutcome::Incomplete { .. }));
    }

    #[test]
    fn conflicting_lengths_are_invalid() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\nabcd";
        assert_eq!(parse(raw, &limits()), ParseOutcome::Invalid(ParseError::ContentLength));

        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 4\r\n\r\n";
        assert_eq!(parse(raw, &limits()), ParseOutcome::Invalid(ParseError::TransferEncoding));
    }

    #[test]
    fn oversized_body_is_invalid() {
        let small = FramingConfig {
            max_body_bytes: 4,
            ..FramingConfig::default()
        };
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nabcde";
        assert_eq!(parse(raw, &small), ParseOutcome::Invalid(ParseError::BodyTooLarge(4)));
    }

    #[test]
    fn garbage_is_invalid_not_incomplete() {
        assert!(matches!(
            parse(b"HTTP/1.1 200 OK\r\n\r\n", &limits()),
            ParseOutcome::Invalid(_)
        ));
        assert!(matches!(parse(b"GET / HT", &limits()), ParseOutcome::Incomplete { .. }));
    }
}
