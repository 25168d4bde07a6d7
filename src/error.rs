use std::{error::Error as StdError, fmt, io};

/// A `Result` alias where the `Err` case is `htwire::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type that can be used for dynamic error handling.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The errors that may occur while sending a request through the pool or
/// over a single connection.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
            }),
        }
    }

    pub(crate) fn unavailable() -> Error {
        Error::new(Kind::ConnectionNotAvailable, None::<Error>)
    }

    pub(crate) fn protocol<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Protocol, Some(e))
    }

    pub(crate) fn unsupported_protocol(scheme: impl Into<String>) -> Error {
        Error::new(Kind::UnsupportedProtocol(scheme.into()), None::<Error>)
    }

    pub(crate) fn connect<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connect, Some(e))
    }

    pub(crate) fn io(e: io::Error) -> Error {
        Error::new(Kind::Io, Some(e))
    }

    pub(crate) fn body<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Body, Some(e))
    }

    pub(crate) fn url<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Url, Some(e))
    }

    pub(crate) fn pool_timeout() -> Error {
        Error::new(Kind::PoolTimeout, None::<Error>)
    }

    pub(crate) fn pool_closed() -> Error {
        Error::new(Kind::PoolClosed, None::<Error>)
    }
}

impl Error {
    /// Returns true if the connection was not in a state where it could
    /// accept another request.
    ///
    /// The pool handles this internally by retrying on another connection;
    /// it only surfaces when driving an [`Http1Connection`] directly.
    ///
    /// [`Http1Connection`]: crate::Http1Connection
    pub fn is_unavailable(&self) -> bool {
        matches!(self.inner.kind, Kind::ConnectionNotAvailable)
    }

    /// Returns true if the peer violated the HTTP/1.1 wire protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol)
    }

    /// Returns true if a URL carried a scheme other than `http` or `https`.
    pub fn is_unsupported_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::UnsupportedProtocol(_))
    }

    /// Returns true if the error occurred while establishing a connection,
    /// including TLS handshake failures.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// Returns true if the underlying transport failed mid-exchange.
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// Returns true if the request body producer failed, or if the body did
    /// not match the framing headers set on the request.
    pub fn is_body(&self) -> bool {
        matches!(self.inner.kind, Kind::Body)
    }

    /// Returns true if waiting for pool capacity exceeded the configured
    /// acquire timeout.
    pub fn is_pool_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::PoolTimeout)
    }

    /// Returns true if the pool had already been shut down.
    pub fn is_pool_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::PoolClosed)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("htwire::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.kind {
            Kind::ConnectionNotAvailable => f.write_str("connection not available")?,
            Kind::Protocol => f.write_str("HTTP/1.1 protocol error")?,
            Kind::UnsupportedProtocol(ref scheme) => {
                write!(f, "unsupported URL scheme {scheme:?}")?
            }
            Kind::Connect => f.write_str("error connecting")?,
            Kind::Io => f.write_str("connection I/O error")?,
            Kind::Body => f.write_str("request body error")?,
            Kind::Url => f.write_str("invalid URL")?,
            Kind::PoolTimeout => f.write_str("timed out waiting for pool capacity")?,
            Kind::PoolClosed => f.write_str("connection pool is closed")?,
        };

        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    ConnectionNotAvailable,
    Protocol,
    UnsupportedProtocol(String),
    Connect,
    Io,
    Body,
    Url,
    PoolTimeout,
    PoolClosed,
}
