//! The transport seam between connections and the network.
//!
//! A connection owns exactly one [`NetworkStream`] and drives it with
//! at-most-n reads and all-or-error writes; closing is dropping (or an
//! orderly [`AsyncWriteExt::shutdown`][tokio::io::AsyncWriteExt::shutdown]
//! where it matters). A [`NetworkBackend`] turns an [`Origin`] into a
//! stream, performing the TLS handshake itself for `https` origins.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{error::Result, url::Origin};

pub mod mock;
mod tcp;
mod verbose;

pub use tcp::{start_tls, TokioBackend};
#[cfg(unix)]
pub use tcp::UnixBackend;
pub(crate) use verbose::Verbose;

/// A bidirectional byte stream a connection can own.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite + Send + Unpin`
/// type, so plain TCP streams, TLS streams, Unix sockets, and in-memory
/// mocks all qualify.
pub trait NetworkStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> NetworkStream for T {}

/// Opens network streams for origins.
///
/// Implementations resolve and dial the origin and, for `https`, complete
/// the TLS handshake before returning; the connection state machine never
/// sees a half-established stream.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    /// Open a stream to `origin`.
    async fn connect(&self, origin: &Origin) -> Result<Box<dyn NetworkStream>>;
}
