//! An in-memory transport that replays a script of byte chunks.
//!
//! Each `read` yields at most one script chunk; after the last chunk the
//! script restarts from the beginning, so a single scripted response can
//! serve every exchange in a connection-reuse test. An empty chunk in the
//! script is delivered as a zero-length read, i.e. orderly EOF.
//!
//! Writes always succeed and are recorded, so tests can assert on the exact
//! bytes a request put on the wire.

use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::{NetworkBackend, NetworkStream};
use crate::{error::Result, url::Origin};

/// A backend whose streams replay a pre-recorded script.
#[derive(Clone, Debug)]
pub struct MockBackend {
    script: Vec<Bytes>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MockBackend {
    /// A backend whose streams serve `script` cyclically.
    pub fn new<I>(script: I) -> MockBackend
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        MockBackend {
            script: script.into_iter().map(Into::into).collect(),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Everything written to any stream this backend has produced.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkBackend for MockBackend {
    async fn connect(&self, _origin: &Origin) -> Result<Box<dyn NetworkStream>> {
        Ok(Box::new(MockStream {
            script: self.script.clone(),
            pos: 0,
            pending: Bytes::new(),
            written: self.written.clone(),
        }))
    }
}

/// A single scripted stream; see the [module docs](self) for the replay
/// rules.
#[derive(Debug)]
pub struct MockStream {
    script: Vec<Bytes>,
    pos: usize,
    pending: Bytes,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MockStream {
    /// A standalone stream serving `script` cyclically.
    pub fn new<I>(script: I) -> MockStream
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        MockStream {
            script: script.into_iter().map(Into::into).collect(),
            pos: 0,
            pending: Bytes::new(),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Everything written to this stream so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// A handle observing this stream's writes after it has been handed to
    /// a connection.
    pub fn written_handle(&self) -> WrittenHandle {
        WrittenHandle(self.written.clone())
    }
}

/// Shared view of a [`MockStream`]'s written bytes.
#[derive(Clone, Debug)]
pub struct WrittenHandle(Arc<Mutex<Vec<u8>>>);

impl WrittenHandle {
    /// Everything written to the stream so far.
    pub fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pending.is_empty() {
            if this.script.is_empty() {
                // No script at all: permanent EOF.
                return Poll::Ready(Ok(()));
            }
            let pos = this.pos;
            this.pos = (pos + 1) % this.script.len();
            this.pending = this.script[pos].clone();
            if this.pending.is_empty() {
                // Scripted EOF.
                return Poll::Ready(Ok(()));
            }
        }

        let n = std::cmp::min(buf.remaining(), this.pending.len());
        let chunk = this.pending.split_to(n);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
