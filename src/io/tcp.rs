use std::{fmt, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

use super::{NetworkBackend, NetworkStream, Verbose};
use crate::{
    error::{Error, Result},
    url::{Origin, Scheme},
};

static DEFAULT_TLS_CONFIG: Lazy<Arc<rustls::ClientConfig>> = Lazy::new(|| {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    Arc::new(
        rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
});

/// Upgrade a plain stream to TLS.
///
/// Consumes the plain stream; after this returns, the TLS stream is the
/// only handle to the transport.
pub async fn start_tls<S>(
    stream: S,
    hostname: &str,
    config: Arc<rustls::ClientConfig>,
) -> Result<TlsStream<S>>
where
    S: NetworkStream,
{
    let server_name = rustls::ServerName::try_from(hostname)
        .map_err(|_| Error::connect(format!("invalid TLS server name {hostname:?}")))?;

    TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(Error::connect)
}

/// The default backend: TCP via tokio, TLS via rustls for `https` origins.
#[derive(Clone)]
pub struct TokioBackend {
    tls_config: Arc<rustls::ClientConfig>,
    connect_timeout: Option<Duration>,
    nodelay: bool,
    verbose: Verbose,
}

impl TokioBackend {
    /// A backend with the default TLS configuration (webpki roots) and no
    /// connect timeout.
    pub fn new() -> TokioBackend {
        TokioBackend {
            tls_config: DEFAULT_TLS_CONFIG.clone(),
            connect_timeout: None,
            nodelay: true,
            verbose: Verbose::OFF,
        }
    }

    /// Use a caller-supplied TLS client configuration.
    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> TokioBackend {
        self.tls_config = config;
        self
    }

    /// Fail dials that take longer than `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> TokioBackend {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Log every read and write at `trace!` level.
    pub fn with_verbose(mut self, enabled: bool) -> TokioBackend {
        self.verbose = Verbose(enabled);
        self
    }

    async fn dial(&self, origin: &Origin) -> Result<TcpStream> {
        let addr = (origin.host(), origin.port());
        let connect = TcpStream::connect(addr);
        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| {
                    Error::connect(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {origin} timed out"),
                    ))
                })?
                .map_err(Error::connect)?,
            None => connect.await.map_err(Error::connect)?,
        };
        stream.set_nodelay(self.nodelay).map_err(Error::connect)?;
        Ok(stream)
    }
}

impl Default for TokioBackend {
    fn default() -> TokioBackend {
        TokioBackend::new()
    }
}

impl fmt::Debug for TokioBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioBackend")
            .field("connect_timeout", &self.connect_timeout)
            .field("nodelay", &self.nodelay)
            .finish()
    }
}

#[async_trait]
impl NetworkBackend for TokioBackend {
    async fn connect(&self, origin: &Origin) -> Result<Box<dyn NetworkStream>> {
        let stream = self.dial(origin).await?;
        log::debug!("connected to {origin}");

        match origin.scheme() {
            Scheme::Http => Ok(self.verbose.wrap(stream)),
            Scheme::Https => {
                let tls = start_tls(stream, origin.host(), self.tls_config.clone()).await?;
                log::debug!("TLS established with {}", origin.host());
                Ok(self.verbose.wrap(tls))
            }
        }
    }
}

/// A backend that dials a Unix domain socket instead of TCP.
///
/// The origin still decides TLS: an `https` origin is handshaken over the
/// socket with the origin host as the server name.
#[cfg(unix)]
pub struct UnixBackend {
    path: std::path::PathBuf,
    tls_config: Arc<rustls::ClientConfig>,
    verbose: Verbose,
}

#[cfg(unix)]
impl UnixBackend {
    /// A backend connecting to the socket at `path`.
    pub fn new(path: impl Into<std::path::PathBuf>) -> UnixBackend {
        UnixBackend {
            path: path.into(),
            tls_config: DEFAULT_TLS_CONFIG.clone(),
            verbose: Verbose::OFF,
        }
    }

    /// Use a caller-supplied TLS client configuration.
    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> UnixBackend {
        self.tls_config = config;
        self
    }

    /// Log every read and write at `trace!` level.
    pub fn with_verbose(mut self, enabled: bool) -> UnixBackend {
        self.verbose = Verbose(enabled);
        self
    }
}

#[cfg(unix)]
impl fmt::Debug for UnixBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnixBackend")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(unix)]
#[async_trait]
impl NetworkBackend for UnixBackend {
    async fn connect(&self, origin: &Origin) -> Result<Box<dyn NetworkStream>> {
        let stream = tokio::net::UnixStream::connect(&self.path)
            .await
            .map_err(Error::connect)?;
        log::debug!("connected to {:?} for {origin}", self.path);

        match origin.scheme() {
            Scheme::Http => Ok(self.verbose.wrap(stream)),
            Scheme::Https => {
                let tls = start_tls(stream, origin.host(), self.tls_config.clone()).await?;
                Ok(self.verbose.wrap(tls))
            }
        }
    }
}
