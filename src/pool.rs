//! The connection pool: origin affinity, capacity accounting, keep-alive
//! recycling, and eviction.

use std::{
    fmt, mem,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, trace};
use tokio::sync::{Semaphore, TryAcquireError};

use crate::{
    error::{Error, Result},
    h1::Conn,
    io::{NetworkBackend, TokioBackend},
    request::RawRequest,
    response::RawResponse,
    url::Origin,
};

/// The pool-facing contract a connection type must satisfy.
///
/// HTTP/1.1 connections implement it today; a future multiplexed
/// connection type would plug in here with a different answer to
/// `is_available`.
#[async_trait]
pub(crate) trait PoolableConnection: Send + Sync {
    /// Run one exchange. On a connection-not-available error the request is
    /// left untouched, so the caller can retry it elsewhere.
    async fn send_request(self: Arc<Self>, request: &mut RawRequest) -> Result<RawResponse>;

    fn origin(&self) -> &Origin;
    fn is_available(&self) -> bool;
    fn has_expired(&self) -> bool;
    fn is_closed(&self) -> bool;
    fn attempt_close(&self) -> bool;
    fn close(&self);
    fn info(&self) -> String;
}

#[async_trait]
impl PoolableConnection for Conn {
    async fn send_request(self: Arc<Self>, request: &mut RawRequest) -> Result<RawResponse> {
        self.handle_request(request).await
    }

    fn origin(&self) -> &Origin {
        Conn::origin(self)
    }

    fn is_available(&self) -> bool {
        Conn::is_available(self)
    }

    fn has_expired(&self) -> bool {
        Conn::has_expired(self)
    }

    fn is_closed(&self) -> bool {
        Conn::is_closed(self)
    }

    fn attempt_close(&self) -> bool {
        Conn::attempt_close(self)
    }

    fn close(&self) {
        Conn::close(self)
    }

    fn info(&self) -> String {
        Conn::info(self)
    }
}

fn same_connection(a: &Arc<dyn PoolableConnection>, b: &Arc<dyn PoolableConnection>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

struct PoolInner {
    /// Most-recently-used at the front; eviction walks from the back.
    entries: Vec<Arc<dyn PoolableConnection>>,
    closed: bool,
}

pub(crate) struct PoolShared {
    backend: Arc<dyn NetworkBackend>,
    keepalive_expiry: Option<Duration>,
    max_keepalive_connections: usize,
    acquire_timeout: Option<Duration>,
    semaphore: Semaphore,
    inner: Mutex<PoolInner>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Find a reusable connection for `origin` and move it to the MRU
    /// front. `is_available` excludes `NEW` and `ACTIVE` connections, so a
    /// connection still being opened is only ever used by its creator.
    fn checkout(&self, origin: &Origin) -> Result<Option<Arc<dyn PoolableConnection>>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(Error::pool_closed());
        }
        let found = inner
            .entries
            .iter()
            .position(|conn| conn.origin() == origin && conn.is_available());
        match found {
            Some(idx) => {
                let conn = inner.entries.remove(idx);
                inner.entries.insert(0, conn.clone());
                trace!("reusing idle connection to {origin}");
                Ok(Some(conn))
            }
            None => Ok(None),
        }
    }

    /// Take a capacity permit, evicting an idle connection if the pool is
    /// full, and insert a fresh connection for `origin` at the MRU front.
    async fn open_connection(&self, origin: &Origin) -> Result<Arc<dyn PoolableConnection>> {
        loop {
            if self.lock().closed {
                return Err(Error::pool_closed());
            }
            match self.semaphore.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    break;
                }
                Err(TryAcquireError::Closed) => return Err(Error::pool_closed()),
                Err(TryAcquireError::NoPermits) => {}
            }
            if !self.close_one_idle_connection() {
                debug!("pool at capacity, waiting for a connection slot");
                let acquire = self.semaphore.acquire();
                let permit = match self.acquire_timeout {
                    Some(timeout) => match tokio::time::timeout(timeout, acquire).await {
                        Ok(acquired) => acquired.map_err(|_| Error::pool_closed())?,
                        Err(_) => return Err(Error::pool_timeout()),
                    },
                    None => acquire.await.map_err(|_| Error::pool_closed())?,
                };
                permit.forget();
                break;
            }
        }

        let connection: Arc<dyn PoolableConnection> = Conn::new(
            origin.clone(),
            Some(self.backend.clone()),
            None,
            self.keepalive_expiry,
        );
        {
            let mut inner = self.lock();
            if inner.closed {
                drop(inner);
                self.semaphore.add_permits(1);
                return Err(Error::pool_closed());
            }
            inner.entries.insert(0, connection.clone());
        }
        debug!("created connection to {origin}");
        Ok(connection)
    }

    /// Close one idle connection, least-recently-used first. Returns
    /// whether any connection was closed (and its permit released).
    fn close_one_idle_connection(&self) -> bool {
        let removed = {
            let mut inner = self.lock();
            let mut removed = None;
            for idx in (0..inner.entries.len()).rev() {
                if inner.entries[idx].attempt_close() {
                    removed = Some(inner.entries.remove(idx));
                    break;
                }
            }
            removed
        };
        match removed {
            Some(conn) => {
                self.semaphore.add_permits(1);
                debug!("evicted idle connection to {}", conn.origin());
                true
            }
            None => false,
        }
    }

    fn close_expired_connections(&self) {
        let freed = {
            let mut inner = self.lock();
            let mut freed = 0;
            let mut idx = 0;
            while idx < inner.entries.len() {
                if inner.entries[idx].has_expired() && inner.entries[idx].attempt_close() {
                    let conn = inner.entries.remove(idx);
                    debug!("closed expired connection to {}", conn.origin());
                    freed += 1;
                } else {
                    idx += 1;
                }
            }
            freed
        };
        if freed > 0 {
            self.semaphore.add_permits(freed);
        }
    }

    /// Bookkeeping after a response body is closed: drop closed
    /// connections, reap expired keep-alives, and trim back to the
    /// keep-alive cap.
    pub(crate) fn response_closed(&self, connection: &Arc<dyn PoolableConnection>) {
        if connection.is_closed() {
            let removed = {
                let mut inner = self.lock();
                match inner
                    .entries
                    .iter()
                    .position(|entry| same_connection(entry, connection))
                {
                    Some(idx) => {
                        inner.entries.remove(idx);
                        true
                    }
                    None => false,
                }
            };
            if removed {
                self.semaphore.add_permits(1);
                trace!("dropped closed connection to {}", connection.origin());
            }
        }

        self.close_expired_connections();

        loop {
            let over_cap = self.lock().entries.len() > self.max_keepalive_connections;
            if !over_cap || !self.close_one_idle_connection() {
                break;
            }
        }
    }
}

/// Consumed exactly once when a pool-issued response body is closed, to
/// hand the connection back to the pool.
pub(crate) struct PoolNotify {
    shared: Arc<PoolShared>,
    connection: Arc<dyn PoolableConnection>,
}

impl PoolNotify {
    pub(crate) fn notify(self) {
        self.shared.response_closed(&self.connection);
    }
}

/// Keeps the pool consistent while an exchange is in flight: unless
/// converted into the response's [`PoolNotify`], dropping it (error or
/// cancellation) runs the pool's close bookkeeping.
struct PendingResponse {
    shared: Option<Arc<PoolShared>>,
    connection: Arc<dyn PoolableConnection>,
}

impl PendingResponse {
    fn disarm(mut self) {
        self.shared = None;
    }

    fn into_notify(mut self) -> PoolNotify {
        let shared = self
            .shared
            .take()
            .expect("pending response consumed twice");
        PoolNotify {
            shared,
            connection: self.connection.clone(),
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.response_closed(&self.connection);
        }
    }
}

/// A pool of HTTP/1.1 connections, shared across request initiators.
///
/// Requests to the same origin reuse idle connections; capacity is bounded
/// by `max_connections`, surplus idle connections are evicted
/// least-recently-used first, and keep-alive lifetimes are enforced on
/// every recycle.
///
/// Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// A pool with the default configuration and network backend.
    pub fn new() -> ConnectionPool {
        ConnectionPool::builder().build()
    }

    /// Configure a pool.
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Send a request, reusing or opening a connection for its origin, and
    /// return the response. The response body must be closed (or dropped)
    /// before the connection can serve another request.
    pub async fn handle_request(&self, request: RawRequest) -> Result<RawResponse> {
        let origin = request.url().origin();
        let mut request = request;

        loop {
            let connection = match self.shared.checkout(&origin)? {
                Some(connection) => connection,
                None => self.shared.open_connection(&origin).await?,
            };

            let pending = PendingResponse {
                shared: Some(self.shared.clone()),
                connection: connection.clone(),
            };

            match connection.clone().send_request(&mut request).await {
                Ok(mut response) => {
                    response.body_mut().set_pool_notify(pending.into_notify());
                    return Ok(response);
                }
                Err(err) if err.is_unavailable() => {
                    // Benign race: another request won this connection
                    // between checkout and the state gate. The request is
                    // untouched, so try the acquisition again.
                    pending.disarm();
                    trace!("connection to {origin} raced away, retrying");
                    continue;
                }
                Err(err) => {
                    drop(pending);
                    return Err(err);
                }
            }
        }
    }

    /// Per-connection descriptors for every connection currently in the
    /// pool, most-recently-used first.
    pub fn pool_info(&self) -> Vec<String> {
        self.shared
            .lock()
            .entries
            .iter()
            .map(|conn| conn.info())
            .collect()
    }

    /// Shut the pool down: close every connection regardless of state and
    /// fail all subsequent requests.
    pub fn close(&self) {
        let entries = {
            let mut inner = self.shared.lock();
            inner.closed = true;
            mem::take(&mut inner.entries)
        };
        for connection in &entries {
            connection.close();
        }
        self.shared.semaphore.close();
        debug!("pool closed, dropped {} connections", entries.len());
    }
}

impl Default for ConnectionPool {
    fn default() -> ConnectionPool {
        ConnectionPool::new()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ConnectionPool")
            .field("connections", &inner.entries.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Configuration for a [`ConnectionPool`].
pub struct PoolBuilder {
    max_connections: usize,
    max_keepalive_connections: Option<usize>,
    keepalive_expiry: Option<Duration>,
    acquire_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    backend: Option<Arc<dyn NetworkBackend>>,
}

impl PoolBuilder {
    fn new() -> PoolBuilder {
        PoolBuilder {
            max_connections: 10,
            max_keepalive_connections: None,
            keepalive_expiry: None,
            acquire_timeout: None,
            connect_timeout: None,
            tls_config: None,
            backend: None,
        }
    }

    /// Maximum concurrent connections across all origins. At least 1;
    /// defaults to 10.
    pub fn max_connections(mut self, max: usize) -> PoolBuilder {
        self.max_connections = max.max(1);
        self
    }

    /// Maximum idle keep-alive connections retained between requests.
    ///
    /// Clamped to `max_connections - 1` so that eviction can always free a
    /// slot; defaults to exactly that.
    pub fn max_keepalive_connections(mut self, max: usize) -> PoolBuilder {
        self.max_keepalive_connections = Some(max);
        self
    }

    /// How long an idle connection stays reusable. Unset means no expiry.
    pub fn keepalive_expiry(mut self, expiry: Duration) -> PoolBuilder {
        self.keepalive_expiry = Some(expiry);
        self
    }

    /// Deadline for waiting on pool capacity. Unset means wait forever.
    pub fn acquire_timeout(mut self, timeout: Duration) -> PoolBuilder {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Connect timeout for the default backend. Ignored when a custom
    /// backend is supplied.
    pub fn connect_timeout(mut self, timeout: Duration) -> PoolBuilder {
        self.connect_timeout = Some(timeout);
        self
    }

    /// TLS configuration for `https` origins on the default backend.
    /// Ignored when a custom backend is supplied.
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> PoolBuilder {
        self.tls_config = Some(config);
        self
    }

    /// Replace the network backend entirely (e.g. with a mock, or a Unix
    /// socket dialer).
    pub fn network_backend(mut self, backend: Arc<dyn NetworkBackend>) -> PoolBuilder {
        self.backend = Some(backend);
        self
    }

    /// Build the pool.
    pub fn build(self) -> ConnectionPool {
        let max_connections = self.max_connections.max(1);
        let max_keepalive_connections = self
            .max_keepalive_connections
            .unwrap_or(max_connections - 1)
            .min(max_connections - 1);

        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                let mut backend = TokioBackend::new();
                if let Some(tls) = self.tls_config {
                    backend = backend.with_tls_config(tls);
                }
                if let Some(timeout) = self.connect_timeout {
                    backend = backend.with_connect_timeout(timeout);
                }
                Arc::new(backend)
            }
        };

        ConnectionPool {
            shared: Arc::new(PoolShared {
                backend,
                keepalive_expiry: self.keepalive_expiry,
                max_keepalive_connections,
                acquire_timeout: self.acquire_timeout,
                semaphore: Semaphore::new(max_connections),
                inner: Mutex::new(PoolInner {
                    entries: Vec::new(),
                    closed: false,
                }),
            }),
        }
    }
}

impl fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("max_connections", &self.max_connections)
            .field("max_keepalive_connections", &self.max_keepalive_connections)
            .field("keepalive_expiry", &self.keepalive_expiry)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}
