use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use super::{
    decode::Decoder,
    encode::BodyMode,
};
use crate::{
    error::{Error, Result},
    request::{find_header, header_has_token, trim_ascii, RawRequest},
};

pub(crate) const MAX_HEADERS: usize = 100;
pub(crate) const MAX_HEAD_SIZE: usize = 64 * 1024;

/// The HTTP version a response was spoken in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Version {
    Http10,
    Http11,
}

impl Version {
    pub(crate) fn as_bytes(&self) -> &'static [u8] {
        match self {
            Version::Http10 => b"HTTP/1.0",
            Version::Http11 => b"HTTP/1.1",
        }
    }
}

/// A parsed response head, plus the decisions derived from it.
#[derive(Debug)]
pub(crate) struct Head {
    pub(crate) status: u16,
    pub(crate) reason: Bytes,
    pub(crate) version: Version,
    pub(crate) headers: Vec<(Bytes, Bytes)>,
    pub(crate) keep_alive: bool,
    pub(crate) decoder: Decoder,
}

/// Write the request line and headers, and decide the body framing.
///
/// Headers are written verbatim: the caller's casing, ordering, and
/// duplicates all reach the wire untouched.
pub(crate) fn encode_head(request: &RawRequest, dst: &mut Vec<u8>) -> Result<BodyMode> {
    let method = &request.method;
    if method.is_empty() || !method.iter().all(|&b| is_token_byte(b)) {
        return Err(Error::protocol(format!(
            "invalid request method {:?}",
            crate::util::Escape::new(method)
        )));
    }

    dst.reserve(64 + request.headers.len() * 32 + request.url.target().len());
    dst.extend_from_slice(method);
    dst.extend_from_slice(b" ");
    dst.extend_from_slice(request.url.target());
    dst.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in &request.headers {
        if name.is_empty() || !name.iter().all(|&b| is_token_byte(b)) {
            return Err(Error::protocol(format!(
                "invalid header name {:?}",
                crate::util::Escape::new(name)
            )));
        }
        if value.iter().any(|&b| b == b'\r' || b == b'\n') {
            return Err(Error::protocol("header value contains a line break"));
        }
        dst.extend_from_slice(name);
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value);
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");

    request_body_mode(request)
}

fn request_body_mode(request: &RawRequest) -> Result<BodyMode> {
    if header_has_token(&request.headers, "transfer-encoding", "chunked") {
        return Ok(BodyMode::Chunked);
    }
    match content_length(&request.headers)? {
        Some(len) => Ok(BodyMode::Length(len)),
        None => Ok(BodyMode::None),
    }
}

/// Try to parse a response head from the buffered bytes.
///
/// Returns `Ok(None)` when more data is needed. Informational `1xx`
/// responses are consumed and skipped; `101` is refused since upgrades are
/// not supported.
pub(crate) fn parse_head(buf: &mut BytesMut, head_request: bool) -> Result<Option<Head>> {
    loop {
        // The httparse response borrows the buffer, so everything needed is
        // copied out before the head bytes are consumed.
        let (len, status, version, reason, headers) = {
            let mut parsed_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut response = httparse::Response::new(&mut parsed_headers);

            match response.parse(&buf[..]) {
                Ok(httparse::Status::Complete(len)) => {
                    let status = response.code.ok_or_else(incomplete)?;
                    let version = match response.version.ok_or_else(incomplete)? {
                        0 => Version::Http10,
                        _ => Version::Http11,
                    };
                    let reason =
                        Bytes::copy_from_slice(response.reason.unwrap_or_default().as_bytes());
                    let headers: Vec<(Bytes, Bytes)> = response
                        .headers
                        .iter()
                        .map(|header| {
                            (
                                Bytes::copy_from_slice(header.name.as_bytes()),
                                Bytes::copy_from_slice(header.value),
                            )
                        })
                        .collect();
                    (len, status, version, reason, headers)
                }
                Ok(httparse::Status::Partial) => {
                    if buf.len() > MAX_HEAD_SIZE {
                        return Err(Error::protocol(format!(
                            "response header section exceeds {MAX_HEAD_SIZE} bytes"
                        )));
                    }
                    return Ok(None);
                }
                Err(err) => return Err(Error::protocol(err)),
            }
        };

        buf.advance(len);

        if (100..200).contains(&status) {
            if status == 101 {
                return Err(Error::protocol(
                    "unsupported 101 Switching Protocols response",
                ));
            }
            trace!("skipping informational response {status}");
            if buf.is_empty() {
                return Ok(None);
            }
            continue;
        }

        let mut keep_alive = match version {
            Version::Http11 => !header_has_token(&headers, "connection", "close"),
            Version::Http10 => header_has_token(&headers, "connection", "keep-alive"),
        };

        // RFC 7230 section 3.3.3: HEAD responses and 204/304 have no body;
        // chunked wins over Content-Length; neither means read-until-close.
        let decoder = if head_request || status == 204 || status == 304 {
            Decoder::Empty
        } else if find_header(&headers, "transfer-encoding").is_some() {
            if header_has_token(&headers, "transfer-encoding", "chunked") {
                Decoder::chunked()
            } else {
                Decoder::CloseDelimited
            }
        } else {
            match content_length(&headers)? {
                Some(len) => Decoder::Length(len),
                None => Decoder::CloseDelimited,
            }
        };

        if matches!(decoder, Decoder::CloseDelimited) {
            keep_alive = false;
        }

        return Ok(Some(Head {
            status,
            reason,
            version,
            headers,
            keep_alive,
            decoder,
        }));
    }
}

fn incomplete() -> Error {
    Error::protocol("httparse reported a complete head without a status line")
}

/// All `Content-Length` values must agree and be plain digits.
fn content_length(headers: &[(Bytes, Bytes)]) -> Result<Option<u64>> {
    let mut length: Option<u64> = None;
    for (name, value) in headers {
        if !name.eq_ignore_ascii_case(b"content-length") {
            continue;
        }
        let digits = trim_ascii(value);
        let parsed = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::protocol("invalid Content-Length header"))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(Error::protocol("conflicting Content-Length headers"));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

fn is_token_byte(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
        | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}
