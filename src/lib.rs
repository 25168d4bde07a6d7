#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(warnings))]

//! # htwire
//!
//! A low-level async HTTP/1.1 client core: a **connection pool** that
//! multiplexes many logical requests over a bounded set of persistent
//! TCP/TLS connections, and the **per-connection wire state machine** that
//! drives each exchange.
//!
//! This is deliberately not a high-level client. There are no redirects, no
//! cookies, no content decoding, no request builders; callers hand the pool
//! a fully-formed [`RawRequest`] (raw-case headers, explicit framing) and
//! get back a [`RawResponse`] whose body streams straight off the
//! connection. Higher layers are expected to live on top.
//!
//! ## Example
//!
//! ```no_run
//! use htwire::{Body, ConnectionPool, RawRequest, RawUrl};
//!
//! # async fn run() -> htwire::Result<()> {
//! let pool = ConnectionPool::builder().max_connections(10).build();
//!
//! let url = RawUrl::parse("https://example.com/")?;
//! let request = RawRequest::new("GET", url, [("Host", "example.com")], Body::empty());
//!
//! let mut response = pool.handle_request(request).await?;
//! let body = response.body_mut().read_all().await?;
//! assert_eq!(response.status(), 200);
//!
//! // Closing the body is what returns the connection to the pool;
//! // dropping the response does it too.
//! response.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Connection reuse
//!
//! Connections are keyed by [`Origin`], the `(scheme, host, port)` triple.
//! After a clean exchange with no `Connection: close` in either direction,
//! the connection returns to the pool and the next request to the same
//! origin reuses it. [`ConnectionPool::pool_info`] shows the pool's state:
//!
//! ```text
//! 'https://example.com:443', HTTP/1.1, IDLE, Request Count: 2
//! 'http://example.com:80', HTTP/1.1, ACTIVE, Request Count: 1
//! ```
//!
//! ## Transports
//!
//! The [`io`] module is the seam between connections and the network:
//! plain TCP and TLS via [`io::TokioBackend`], Unix domain sockets via
//! `io::UnixBackend`, and a scripted in-memory transport in [`io::mock`]
//! for tests.

mod body;
mod error;
mod h1;
pub mod io;
mod pool;
mod request;
mod response;
mod url;
mod util;

pub use crate::body::{Body, ResponseBody};
pub use crate::error::{BoxError, Error, Result};
pub use crate::h1::Http1Connection;
pub use crate::pool::{ConnectionPool, PoolBuilder};
pub use crate::request::{RawHeaders, RawRequest};
pub use crate::response::{Extensions, RawResponse};
pub use crate::url::{Origin, RawUrl, Scheme};
