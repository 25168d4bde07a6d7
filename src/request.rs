use bytes::Bytes;

use crate::{body::Body, url::RawUrl};

/// Ordered request or response headers as raw `(name, value)` byte pairs.
///
/// Case and duplicates are preserved exactly as provided; what goes in is
/// what appears on the wire.
pub type RawHeaders = Vec<(Bytes, Bytes)>;

/// A request as the core consumes it: method, target URL, raw headers, and
/// a lazy body.
///
/// The core does not invent headers. `Host`, framing headers, and anything
/// else the exchange needs must already be present; body framing follows
/// `Transfer-Encoding: chunked` or `Content-Length` as set by the caller.
#[derive(Debug)]
pub struct RawRequest {
    pub(crate) method: Bytes,
    pub(crate) url: RawUrl,
    pub(crate) headers: RawHeaders,
    pub(crate) body: Body,
}

impl RawRequest {
    /// Assemble a request.
    pub fn new<M, H, N, V>(method: M, url: RawUrl, headers: H, body: Body) -> RawRequest
    where
        M: Into<Bytes>,
        H: IntoIterator<Item = (N, V)>,
        N: Into<Bytes>,
        V: Into<Bytes>,
    {
        RawRequest {
            method: method.into(),
            url,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body,
        }
    }

    /// The request method bytes.
    pub fn method(&self) -> &[u8] {
        &self.method
    }

    /// The request URL.
    pub fn url(&self) -> &RawUrl {
        &self.url
    }

    /// The request headers, in the order they will be written.
    pub fn headers(&self) -> &[(Bytes, Bytes)] {
        &self.headers
    }

    /// The value of the first header matching `name`, ASCII
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&Bytes> {
        find_header(&self.headers, name)
    }
}

pub(crate) fn find_header<'a>(headers: &'a [(Bytes, Bytes)], name: &str) -> Option<&'a Bytes> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name.as_bytes()))
        .map(|(_, value)| value)
}

/// Whether any header named `name` carries `token` in its comma-separated
/// value list, ASCII case-insensitively. Used for `Connection` handling.
pub(crate) fn header_has_token(headers: &[(Bytes, Bytes)], name: &str, token: &str) -> bool {
    headers
        .iter()
        .filter(|(header, _)| header.eq_ignore_ascii_case(name.as_bytes()))
        .any(|(_, value)| {
            value
                .split(|&b| b == b',')
                .any(|part| trim_ascii(part).eq_ignore_ascii_case(token.as_bytes()))
        })
}

pub(crate) fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheme;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let url = RawUrl::new(Scheme::Http, "example.com", None, "/");
        let request = RawRequest::new(
            "GET",
            url,
            [("Host", "example.com"), ("X-Custom", "1")],
            Body::empty(),
        );
        assert_eq!(request.header("host").unwrap().as_ref(), b"example.com");
        assert_eq!(request.header("x-CUSTOM").unwrap().as_ref(), b"1");
        assert!(request.header("content-length").is_none());
    }

    #[test]
    fn connection_tokens() {
        let headers: RawHeaders = vec![(
            Bytes::from_static(b"Connection"),
            Bytes::from_static(b"keep-alive, Close"),
        )];
        assert!(header_has_token(&headers, "connection", "close"));
        assert!(header_has_token(&headers, "Connection", "keep-alive"));
        assert!(!header_has_token(&headers, "connection", "upgrade"));
    }
}
