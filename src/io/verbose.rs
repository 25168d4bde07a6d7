use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use log::trace;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::NetworkStream;
use crate::util::{fast_random, Escape};

/// Controls whether streams are wrapped to log their I/O.
#[derive(Clone, Copy)]
pub(crate) struct Verbose(pub(crate) bool);

impl Verbose {
    pub(crate) const OFF: Verbose = Verbose(false);

    pub(crate) fn wrap<T>(&self, stream: T) -> Box<dyn NetworkStream>
    where
        T: NetworkStream + 'static,
    {
        if self.0 {
            Box::new(Wrapper {
                id: fast_random(),
                inner: stream,
            })
        } else {
            Box::new(stream)
        }
    }
}

pin_project! {
    struct Wrapper<T> {
        id: u64,
        #[pin]
        inner: T,
    }
}

impl<T: AsyncRead> AsyncRead for Wrapper<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                trace!("{:08x} read: {:?}", this.id, Escape::new(&buf.filled()[before..]));
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<T: AsyncWrite> AsyncWrite for Wrapper<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                trace!("{:08x} write: {:?}", this.id, Escape::new(&buf[..n]));
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        trace!("{:08x} shutdown", this.id);
        this.inner.poll_shutdown(cx)
    }
}
