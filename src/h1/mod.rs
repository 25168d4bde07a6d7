//! The HTTP/1.1 connection: one wire conversation at a time over one owned
//! stream, plus the pool-facing lifecycle around it.

mod decode;
mod encode;
mod role;

use std::{
    fmt, io, mem,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{ready, Context, Poll},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use log::trace;
use tokio::{
    io::{AsyncRead, AsyncWriteExt, ReadBuf},
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    time::Instant,
};

use self::{
    decode::{Decoded, Decoder},
    encode::Encoder,
    role::{Head, Version},
};
use crate::{
    body::ResponseBody,
    error::{Error, Result},
    io::{NetworkBackend, NetworkStream},
    request::{header_has_token, RawRequest},
    response::{Extensions, RawResponse},
    url::Origin,
};

const READ_NUM_BYTES: usize = 64 * 1024;

/// Connection lifecycle, as the pool sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnState {
    New,
    Active,
    Idle,
    Closed,
}

impl ConnState {
    fn as_str(&self) -> &'static str {
        match self {
            ConnState::New => "NEW",
            ConnState::Active => "ACTIVE",
            ConnState::Idle => "IDLE",
            ConnState::Closed => "CLOSED",
        }
    }
}

/// One direction of the wire conversation. The connection is reusable only
/// when both halves are `Done`, at which point both reset to `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HalfState {
    Idle,
    Head,
    Body,
    Done,
    Error,
}

struct State {
    phase: ConnState,
    request_count: usize,
    expire_at: Option<Instant>,
}

/// The wire-facing half of a connection: the stream, the read buffer, and
/// the per-direction protocol state. Exactly one exchange holds this at a
/// time, via the async mutex around it.
struct Transaction {
    stream: Option<Box<dyn NetworkStream>>,
    read_buf: BytesMut,
    send: HalfState,
    recv: HalfState,
    decoder: Decoder,
    connection_close: bool,
    head_request: bool,
}

impl Transaction {
    fn new(stream: Option<Box<dyn NetworkStream>>) -> Transaction {
        Transaction {
            stream,
            read_buf: BytesMut::new(),
            send: HalfState::Idle,
            recv: HalfState::Idle,
            decoder: Decoder::Empty,
            connection_close: false,
            head_request: false,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut Box<dyn NetworkStream>> {
        self.stream.as_mut().ok_or_else(|| {
            Error::io(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            ))
        })
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(buf).await.map_err(Error::io)
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream_mut()?.flush().await.map_err(Error::io)
    }

    async fn read_some(&mut self) -> Result<usize> {
        std::future::poll_fn(|cx| self.poll_read_some(cx))
            .await
            .map_err(Error::io)
    }

    /// One at-most-`READ_NUM_BYTES` read into the buffer. `Ok(0)` is EOF.
    fn poll_read_some(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "connection closed",
                )))
            }
        };

        self.read_buf.reserve(READ_NUM_BYTES);
        let spare = self.read_buf.spare_capacity_mut();
        let limit = std::cmp::min(spare.len(), READ_NUM_BYTES);
        let mut buf = ReadBuf::uninit(&mut spare[..limit]);
        ready!(Pin::new(stream).poll_read(cx, &mut buf))?;
        let n = buf.filled().len();
        // SAFETY: poll_read initialized exactly `n` bytes of spare capacity.
        unsafe {
            self.read_buf.set_len(self.read_buf.len() + n);
        }
        Poll::Ready(Ok(n))
    }
}

/// The shared connection object: `Http1Connection` and every in-flight
/// response body hold it through an `Arc`.
pub(crate) struct Conn {
    origin: Origin,
    backend: Option<Arc<dyn NetworkBackend>>,
    keepalive_expiry: Option<Duration>,
    state: Mutex<State>,
    transaction: Arc<AsyncMutex<Transaction>>,
}

impl Conn {
    pub(crate) fn new(
        origin: Origin,
        backend: Option<Arc<dyn NetworkBackend>>,
        stream: Option<Box<dyn NetworkStream>>,
        keepalive_expiry: Option<Duration>,
    ) -> Arc<Conn> {
        Arc::new(Conn {
            origin,
            backend,
            keepalive_expiry,
            state: Mutex::new(State {
                phase: ConnState::New,
                request_count: 0,
                expire_at: None,
            }),
            transaction: Arc::new(AsyncMutex::new(Transaction::new(stream))),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Run one request/response exchange. The returned response's body
    /// keeps exclusive hold of the transaction until it is closed.
    pub(crate) async fn handle_request(
        self: Arc<Self>,
        request: &mut RawRequest,
    ) -> Result<RawResponse> {
        {
            let mut state = self.state();
            match state.phase {
                ConnState::New | ConnState::Idle => {
                    state.phase = ConnState::Active;
                    state.request_count += 1;
                    state.expire_at = None;
                }
                _ => return Err(Error::unavailable()),
            }
        }

        // If this future is dropped mid-exchange the connection is no
        // longer in a usable state; the guard closes it.
        let cancel = CancelGuard {
            conn: Some(self.clone()),
        };
        let mut guard = self.transaction.clone().lock_owned().await;
        let outcome = self.exchange(&mut guard, request).await;
        cancel.disarm();

        match outcome {
            Ok((status, reason, version, headers)) => {
                let extensions = Extensions {
                    http_version: Bytes::from_static(version.as_bytes()),
                    reason_phrase: reason,
                };
                let body = ResponseBody::from_conn(RecvBody {
                    conn: self,
                    guard: Some(guard),
                });
                Ok(RawResponse::new(status, headers, body, extensions))
            }
            Err(err) => {
                self.close_transaction(&mut guard);
                Err(err)
            }
        }
    }

    async fn exchange(
        &self,
        tx: &mut Transaction,
        request: &mut RawRequest,
    ) -> Result<(u16, Bytes, Version, Vec<(Bytes, Bytes)>)> {
        if tx.stream.is_none() {
            let backend = match self.backend {
                Some(ref backend) => backend.clone(),
                None => {
                    return Err(Error::connect(
                        "connection constructed from a stream cannot re-dial",
                    ))
                }
            };
            trace!("connecting to {}", self.origin);
            let stream = backend.connect(&self.origin).await?;
            tx.stream = Some(stream);
        }

        tx.send = HalfState::Head;
        let mut head_buf = Vec::new();
        let mode = role::encode_head(request, &mut head_buf)?;
        if header_has_token(&request.headers, "connection", "close") {
            tx.connection_close = true;
        }
        tx.head_request = request.method.eq_ignore_ascii_case(b"HEAD");
        trace!(
            "{} sending request head ({} bytes)",
            self.origin,
            head_buf.len()
        );
        tx.write_all(&head_buf).await?;

        tx.send = HalfState::Body;
        let mut body = mem::take(&mut request.body);
        let mut encoder = Encoder::new(mode);
        while let Some(chunk) = body.next().await {
            let data = chunk.map_err(Error::body)?;
            if data.is_empty() {
                continue;
            }
            for segment in encoder.frame(data)? {
                tx.write_all(&segment).await?;
            }
        }
        if let Some(tail) = encoder.finish()? {
            tx.write_all(&tail).await?;
        }
        tx.flush().await?;
        tx.send = HalfState::Done;

        tx.recv = HalfState::Head;
        let head = loop {
            if let Some(head) = role::parse_head(&mut tx.read_buf, tx.head_request)? {
                break head;
            }
            if tx.read_some().await? == 0 {
                return Err(Error::protocol(
                    "server closed connection before sending a complete response",
                ));
            }
        };

        let Head {
            status,
            reason,
            version,
            headers,
            keep_alive,
            decoder,
        } = head;
        trace!("{} received response {}", self.origin, status);
        if !keep_alive {
            tx.connection_close = true;
        }
        tx.decoder = decoder;
        tx.recv = HalfState::Body;

        Ok((status, reason, version, headers))
    }

    /// The keep-alive decision, run exactly once per exchange when the
    /// response body is closed.
    fn response_closed(&self, tx: &mut Transaction) {
        let mut state = self.state();
        let reusable = tx.send == HalfState::Done
            && tx.recv == HalfState::Done
            && !tx.connection_close
            && tx.read_buf.is_empty()
            && state.phase == ConnState::Active;

        if reusable {
            tx.send = HalfState::Idle;
            tx.recv = HalfState::Idle;
            tx.decoder = Decoder::Empty;
            tx.head_request = false;
            state.phase = ConnState::Idle;
            state.expire_at = self.keepalive_expiry.map(|expiry| Instant::now() + expiry);
            trace!("{} connection idle, reusable", self.origin);
        } else {
            state.phase = ConnState::Closed;
            state.expire_at = None;
            tx.stream = None;
            tx.read_buf.clear();
            trace!("{} connection closed after exchange", self.origin);
        }
    }

    /// Unconditional close while holding the transaction. Used on every
    /// error path inside an exchange.
    fn close_transaction(&self, tx: &mut Transaction) {
        let mut state = self.state();
        state.phase = ConnState::Closed;
        state.expire_at = None;
        if tx.send != HalfState::Done {
            tx.send = HalfState::Error;
        }
        if tx.recv != HalfState::Done {
            tx.recv = HalfState::Error;
        }
        tx.stream = None;
        tx.read_buf.clear();
        trace!("{} connection closed", self.origin);
    }

    pub(crate) fn is_available(&self) -> bool {
        // NEW connections are not available: only the request that created
        // one may use it, so an opening connection that might settle on a
        // different protocol is never handed out speculatively.
        self.state().phase == ConnState::Idle
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state().phase == ConnState::Idle
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().phase == ConnState::Closed
    }

    pub(crate) fn has_expired(&self) -> bool {
        match self.state().expire_at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Close only if no exchange could be running: idle, or never used with
    /// the stream already present. Returns whether the connection moved to
    /// `CLOSED`.
    pub(crate) fn attempt_close(&self) -> bool {
        let mut state = self.state();
        if state.phase != ConnState::New && state.phase != ConnState::Idle {
            return false;
        }
        let mut tx = match self.transaction.try_lock() {
            Ok(tx) => tx,
            Err(_) => return false,
        };
        if state.phase == ConnState::New && tx.stream.is_none() {
            // Not dialed yet: the request that created it is about to run.
            return false;
        }
        state.phase = ConnState::Closed;
        state.expire_at = None;
        tx.stream = None;
        tx.read_buf.clear();
        trace!("{} connection closed while idle", self.origin);
        true
    }

    /// Unconditional close. Must not race a concurrent `handle_request`.
    pub(crate) fn close(&self) {
        let mut state = self.state();
        state.phase = ConnState::Closed;
        state.expire_at = None;
        if let Ok(mut tx) = self.transaction.try_lock() {
            tx.stream = None;
            tx.read_buf.clear();
        }
    }

    pub(crate) fn info(&self) -> String {
        let state = self.state();
        format!(
            "'{}', HTTP/1.1, {}, Request Count: {}",
            self.origin,
            state.phase.as_str(),
            state.request_count
        )
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        write!(
            f,
            "Conn [{}, Request Count: {}]",
            state.phase.as_str(),
            state.request_count
        )
    }
}

struct CancelGuard {
    conn: Option<Arc<Conn>>,
}

impl CancelGuard {
    fn disarm(mut self) {
        self.conn = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            trace!("{} exchange cancelled", conn.origin);
            conn.close();
        }
    }
}

/// The connection-backed response body stream. Holds the transaction guard
/// for the duration of the body, and runs the keep-alive decision exactly
/// once on shutdown or drop.
pub(crate) struct RecvBody {
    conn: Arc<Conn>,
    guard: Option<OwnedMutexGuard<Transaction>>,
}

impl RecvBody {
    pub(crate) fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes>>> {
        let guard = match self.guard.as_mut() {
            Some(guard) => guard,
            None => return Poll::Ready(None),
        };
        let tx = &mut **guard;
        if tx.recv != HalfState::Body {
            return Poll::Ready(None);
        }

        loop {
            match tx.decoder.decode(&mut tx.read_buf) {
                Ok(Decoded::Data(data)) => return Poll::Ready(Some(Ok(data))),
                Ok(Decoded::Complete) => {
                    tx.recv = HalfState::Done;
                    return Poll::Ready(None);
                }
                Ok(Decoded::NeedMore) => {}
                Err(err) => {
                    self.conn.close_transaction(tx);
                    return Poll::Ready(Some(Err(err)));
                }
            }

            match ready!(tx.poll_read_some(cx)) {
                Ok(0) => match tx.decoder.on_eof() {
                    Ok(()) => {
                        // Orderly EOF on a close-delimited body: the body is
                        // complete but the connection is spent.
                        tx.recv = HalfState::Done;
                        tx.connection_close = true;
                        return Poll::Ready(None);
                    }
                    Err(err) => {
                        self.conn.close_transaction(tx);
                        return Poll::Ready(Some(Err(err)));
                    }
                },
                Ok(_) => {}
                Err(err) => {
                    let err = Error::io(err);
                    self.conn.close_transaction(tx);
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
    }

    /// Run the keep-alive decision and release the transaction.
    pub(crate) fn shutdown(mut self) {
        if let Some(mut guard) = self.guard.take() {
            self.conn.response_closed(&mut guard);
        }
    }
}

impl Drop for RecvBody {
    fn drop(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            self.conn.response_closed(&mut guard);
        }
    }
}

/// A single HTTP/1.1 connection.
///
/// Drives exactly one request/response exchange at a time over its owned
/// stream. A second `handle_request` while an exchange is in flight fails
/// with a connection-not-available error and has no side effects.
///
/// Cloning is cheap and shares the underlying connection.
#[derive(Clone)]
pub struct Http1Connection {
    pub(crate) inner: Arc<Conn>,
}

impl Http1Connection {
    /// A connection that will dial `origin` through `backend` on its first
    /// request.
    pub fn new(
        origin: Origin,
        backend: Arc<dyn NetworkBackend>,
        keepalive_expiry: Option<Duration>,
    ) -> Http1Connection {
        Http1Connection {
            inner: Conn::new(origin, Some(backend), None, keepalive_expiry),
        }
    }

    /// A connection over an already-established stream.
    pub fn from_stream(
        origin: Origin,
        stream: Box<dyn NetworkStream>,
        keepalive_expiry: Option<Duration>,
    ) -> Http1Connection {
        Http1Connection {
            inner: Conn::new(origin, None, Some(stream), keepalive_expiry),
        }
    }

    /// Send a request and return the response, whose body stays attached to
    /// this connection until closed.
    pub async fn handle_request(&self, request: RawRequest) -> Result<RawResponse> {
        let mut request = request;
        self.inner.clone().handle_request(&mut request).await
    }

    /// The origin this connection serves.
    pub fn origin(&self) -> &Origin {
        self.inner.origin()
    }

    /// Whether the pool may hand this connection to a new request.
    pub fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    /// Whether the connection is idle.
    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether the keep-alive deadline has passed.
    pub fn has_expired(&self) -> bool {
        self.inner.has_expired()
    }

    /// Close the connection if it is idle or never-used; returns whether it
    /// was closed.
    pub fn attempt_close(&self) -> bool {
        self.inner.attempt_close()
    }

    /// Close the connection unconditionally. Must not be called while a
    /// `handle_request` is in flight.
    pub fn close(&self) {
        self.inner.close()
    }

    /// A one-line description: origin, protocol, state, request count.
    pub fn info(&self) -> String {
        self.inner.info()
    }
}

impl fmt::Debug for Http1Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        write!(
            f,
            "Http1Connection [{}, Request Count: {}]",
            state.phase.as_str(),
            state.request_count
        )
    }
}
