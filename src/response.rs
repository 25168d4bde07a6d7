use bytes::Bytes;

use crate::{
    body::ResponseBody,
    request::{find_header, RawHeaders},
};

/// A response as the core produces it: status, raw headers, a streaming
/// body, and the extensions the wire parser extracted.
///
/// The body remains attached to the connection that produced it; see
/// [`ResponseBody`] for the close contract.
#[derive(Debug)]
pub struct RawResponse {
    pub(crate) status: u16,
    pub(crate) headers: RawHeaders,
    pub(crate) body: ResponseBody,
    pub(crate) extensions: Extensions,
}

/// Out-of-band data carried alongside a response: the HTTP version and the
/// reason phrase from the status line.
#[derive(Clone, Debug)]
pub struct Extensions {
    pub(crate) http_version: Bytes,
    pub(crate) reason_phrase: Bytes,
}

impl Extensions {
    /// The version token from the status line, e.g. `HTTP/1.1`.
    pub fn http_version(&self) -> &[u8] {
        &self.http_version
    }

    /// The reason phrase from the status line, possibly empty.
    pub fn reason_phrase(&self) -> &[u8] {
        &self.reason_phrase
    }
}

impl RawResponse {
    pub(crate) fn new(
        status: u16,
        headers: RawHeaders,
        body: ResponseBody,
        extensions: Extensions,
    ) -> RawResponse {
        RawResponse {
            status,
            headers,
            body,
            extensions,
        }
    }

    /// The response status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The response headers, in wire order, with the server's casing.
    pub fn headers(&self) -> &[(Bytes, Bytes)] {
        &self.headers
    }

    /// The value of the first header matching `name`, ASCII
    /// case-insensitively.
    pub fn header(&self, name: &str) -> Option<&Bytes> {
        find_header(&self.headers, name)
    }

    /// The response extensions.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// The response body.
    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Consume the response, keeping only the body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Close the response body; see [`ResponseBody::close`].
    pub fn close(&mut self) {
        self.body.close();
    }
}
