use std::{
    fmt, mem,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::{StreamExt, TryStreamExt};

use crate::{error::BoxError, error::Result, h1::RecvBody, pool::PoolNotify};

/// A request body: a lazy producer of byte chunks.
///
/// The body carries no framing information of its own. How it is put on the
/// wire is decided entirely by the `Transfer-Encoding` / `Content-Length`
/// headers the caller set on the request; a non-empty body without either
/// header is rejected by the sender.
pub struct Body {
    inner: Inner,
}

enum Inner {
    Empty,
    Full(Bytes),
    Streaming(Pin<Box<dyn Stream<Item = std::result::Result<Bytes, BoxError>> + Send>>),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Body {
        Body { inner: Inner::Empty }
    }

    /// Wrap a `TryStream` of byte chunks as a request body.
    pub fn wrap_stream<S>(stream: S) -> Body
    where
        S: futures_core::TryStream + Send + 'static,
        S::Ok: Into<Bytes>,
        S::Error: Into<BoxError>,
    {
        Body {
            inner: Inner::Streaming(Box::pin(stream.map_ok(Into::into).map_err(Into::into))),
        }
    }

    /// Whether this body is known to be empty without polling it.
    pub fn is_empty(&self) -> bool {
        match self.inner {
            Inner::Empty => true,
            Inner::Full(ref bytes) => bytes.is_empty(),
            Inner::Streaming(_) => false,
        }
    }
}

impl Default for Body {
    fn default() -> Body {
        Body::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Body {
        Body {
            inner: Inner::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(vec: Vec<u8>) -> Body {
        Body {
            inner: Inner::Full(vec.into()),
        }
    }
}

impl From<&'static [u8]> for Body {
    fn from(slice: &'static [u8]) -> Body {
        Body {
            inner: Inner::Full(Bytes::from_static(slice)),
        }
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Body {
        s.as_bytes().into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        s.into_bytes().into()
    }
}

impl Stream for Body {
    type Item = std::result::Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner {
            Inner::Empty => Poll::Ready(None),
            Inner::Full(_) => {
                let bytes = match mem::replace(&mut this.inner, Inner::Empty) {
                    Inner::Full(bytes) => bytes,
                    _ => unreachable!(),
                };
                if bytes.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(bytes)))
                }
            }
            Inner::Streaming(ref mut stream) => stream.as_mut().poll_next(cx),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner {
            Inner::Empty => f.write_str("Body(Empty)"),
            Inner::Full(ref bytes) => write!(f, "Body(Full, {} bytes)", bytes.len()),
            Inner::Streaming(_) => f.write_str("Body(Streaming)"),
        }
    }
}

/// A response body: a single-pass stream of byte chunks.
///
/// The body and its originating connection share a lifetime. Until the body
/// is closed, the connection stays `ACTIVE` and cannot serve another
/// request. Closing the body, either explicitly with [`close`] or by
/// dropping it, runs the connection's keep-alive decision and, for
/// pool-issued responses, hands the connection back to the pool exactly
/// once.
///
/// [`close`]: ResponseBody::close
pub struct ResponseBody {
    source: Source,
    notify: Option<PoolNotify>,
}

pub(crate) enum Source {
    Empty,
    Conn(RecvBody),
}

impl ResponseBody {
    pub(crate) fn from_conn(body: RecvBody) -> ResponseBody {
        ResponseBody {
            source: Source::Conn(body),
            notify: None,
        }
    }

    pub(crate) fn set_pool_notify(&mut self, notify: PoolNotify) {
        self.notify = Some(notify);
    }

    /// Read the remaining chunks and concatenate them.
    pub async fn read_all(&mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Close the body, releasing the underlying connection.
    ///
    /// If every chunk was consumed and the exchange ended cleanly, the
    /// connection becomes reusable; otherwise it is closed. Idempotent, and
    /// also run on drop.
    pub fn close(&mut self) {
        if let Source::Conn(body) = mem::replace(&mut self.source, Source::Empty) {
            body.shutdown();
        }
        if let Some(notify) = self.notify.take() {
            notify.notify();
        }
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.source {
            Source::Empty => Poll::Ready(None),
            Source::Conn(ref mut body) => body.poll_chunk(cx),
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Source::Empty => f.write_str("ResponseBody(Empty)"),
            Source::Conn(_) => f.write_str("ResponseBody(Streaming)"),
        }
    }
}
