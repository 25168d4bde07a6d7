use std::sync::{Arc, Mutex};
use std::time::Duration;

use htwire::io::mock::MockBackend;
use htwire::{Body, ConnectionPool, RawRequest, RawUrl, Scheme};

const SIMPLE_RESPONSE: &[&'static [u8]] = &[
    b"HTTP/1.1 200 OK\r\n",
    b"Content-Type: plain/text\r\n",
    b"Content-Length: 13\r\n",
    b"\r\n",
    b"Hello, world!",
];

fn mock_backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::new(SIMPLE_RESPONSE.iter().copied()))
}

fn https_request() -> RawRequest {
    let url = RawUrl::new(Scheme::Https, "example.com", Some(443), "/");
    RawRequest::new("GET", url, [("Host", "example.com")], Body::empty())
}

#[tokio::test]
async fn keepalive_requests_return_to_the_pool() {
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .network_backend(mock_backend())
        .build();

    // An initial request; once complete the connection goes back, IDLE.
    let mut response = pool.handle_request(https_request()).await.unwrap();
    assert_eq!(
        pool.pool_info(),
        vec!["'https://example.com:443', HTTP/1.1, ACTIVE, Request Count: 1"]
    );
    let body = response.body_mut().read_all().await.unwrap();
    response.close();

    assert_eq!(response.status(), 200);
    assert_eq!(body.as_ref(), b"Hello, world!");
    assert_eq!(
        pool.pool_info(),
        vec!["'https://example.com:443', HTTP/1.1, IDLE, Request Count: 1"]
    );

    // A second request to the same origin reuses the IDLE connection.
    let mut response = pool.handle_request(https_request()).await.unwrap();
    assert_eq!(
        pool.pool_info(),
        vec!["'https://example.com:443', HTTP/1.1, ACTIVE, Request Count: 2"]
    );
    let body = response.body_mut().read_all().await.unwrap();
    response.close();

    assert_eq!(response.status(), 200);
    assert_eq!(body.as_ref(), b"Hello, world!");
    assert_eq!(
        pool.pool_info(),
        vec!["'https://example.com:443', HTTP/1.1, IDLE, Request Count: 2"]
    );
}

#[tokio::test]
async fn different_origins_do_not_share_connections() {
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .network_backend(mock_backend())
        .build();

    // Warm up an https connection with two exchanges.
    for _ in 0..2 {
        let mut response = pool.handle_request(https_request()).await.unwrap();
        response.body_mut().read_all().await.unwrap();
        response.close();
    }

    // Same host, different scheme and port: a different origin, so a new
    // connection.
    let url = RawUrl::new(Scheme::Http, "example.com", Some(80), "/");
    let request = RawRequest::new("GET", url, [("Host", "example.com")], Body::empty());
    let mut response = pool.handle_request(request).await.unwrap();
    assert_eq!(
        pool.pool_info(),
        vec![
            "'http://example.com:80', HTTP/1.1, ACTIVE, Request Count: 1",
            "'https://example.com:443', HTTP/1.1, IDLE, Request Count: 2",
        ]
    );
    let body = response.body_mut().read_all().await.unwrap();
    response.close();

    assert_eq!(body.as_ref(), b"Hello, world!");
    assert_eq!(
        pool.pool_info(),
        vec![
            "'http://example.com:80', HTTP/1.1, IDLE, Request Count: 1",
            "'https://example.com:443', HTTP/1.1, IDLE, Request Count: 2",
        ]
    );
}

#[tokio::test]
async fn connection_close_requests_are_not_pooled() {
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .network_backend(mock_backend())
        .build();

    let url = RawUrl::new(Scheme::Https, "example.com", Some(443), "/");
    let request = RawRequest::new(
        "GET",
        url,
        [("Host", "example.com"), ("Connection", "close")],
        Body::empty(),
    );

    let mut response = pool.handle_request(request).await.unwrap();
    assert_eq!(
        pool.pool_info(),
        vec!["'https://example.com:443', HTTP/1.1, ACTIVE, Request Count: 1"]
    );
    let body = response.body_mut().read_all().await.unwrap();
    response.close();

    assert_eq!(response.status(), 200);
    assert_eq!(body.as_ref(), b"Hello, world!");
    assert!(pool.pool_info().is_empty());
}

#[tokio::test]
async fn zero_keepalive_expiry_discards_connections_immediately() {
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .keepalive_expiry(Duration::ZERO)
        .network_backend(mock_backend())
        .build();

    let mut response = pool.handle_request(https_request()).await.unwrap();
    let body = response.body_mut().read_all().await.unwrap();
    response.close();

    assert_eq!(response.status(), 200);
    assert_eq!(body.as_ref(), b"Hello, world!");
    assert!(pool.pool_info().is_empty());
}

#[tokio::test]
async fn no_keepalive_connections_allowed() {
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .max_keepalive_connections(0)
        .network_backend(mock_backend())
        .build();

    let mut response = pool.handle_request(https_request()).await.unwrap();
    let body = response.body_mut().read_all().await.unwrap();
    response.close();

    assert_eq!(body.as_ref(), b"Hello, world!");
    assert!(pool.pool_info().is_empty());
}

#[tokio::test]
async fn failed_exchanges_are_evicted() {
    let backend = Arc::new(MockBackend::new(vec![&b"Wait, this isn't valid HTTP!"[..]]));
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .network_backend(backend)
        .build();

    let err = pool.handle_request(https_request()).await.unwrap_err();
    assert!(err.is_protocol());
    assert!(pool.pool_info().is_empty());
}

#[tokio::test]
async fn capacity_one_serialises_connections() {
    let pool = ConnectionPool::builder()
        .max_connections(1)
        .network_backend(mock_backend())
        .build();

    let snapshots: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));

    async fn fetch(
        pool: &ConnectionPool,
        domain: &'static str,
        snapshots: &Arc<Mutex<Vec<Vec<String>>>>,
    ) {
        let url = RawUrl::new(Scheme::Http, domain, Some(80), "/");
        let request = RawRequest::new("GET", url, [("Host", domain)], Body::empty());
        let mut response = pool.handle_request(request).await.unwrap();
        snapshots.lock().unwrap().push(pool.pool_info());
        response.body_mut().read_all().await.unwrap();
        response.close();
    }

    tokio::join!(
        fetch(&pool, "a.com", &snapshots),
        fetch(&pool, "b.com", &snapshots),
        fetch(&pool, "c.com", &snapshots),
        fetch(&pool, "d.com", &snapshots),
        fetch(&pool, "e.com", &snapshots),
    );

    // Every time the pool was observed mid-request, it held exactly the
    // observer's own connection: connections were opened strictly serially.
    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 5);
    let expected = ["a.com", "b.com", "c.com", "d.com", "e.com"].map(|domain| {
        format!("'http://{domain}:80', HTTP/1.1, ACTIVE, Request Count: 1")
    });
    for snapshot in snapshots.iter() {
        assert_eq!(snapshot.len(), 1);
        assert!(expected.contains(&snapshot[0]), "unexpected {snapshot:?}");
    }
}

#[tokio::test]
async fn full_pool_evicts_the_least_recently_used_idle_connection() {
    let pool = ConnectionPool::builder()
        .max_connections(3)
        .network_backend(mock_backend())
        .build();

    let fetch = |domain: &'static str| {
        let url = RawUrl::new(Scheme::Http, domain, Some(80), "/");
        RawRequest::new("GET", url, [("Host", domain)], Body::empty())
    };

    // Two completed exchanges leave idle connections to a.com and b.com.
    for domain in ["a.com", "b.com"] {
        let mut response = pool.handle_request(fetch(domain)).await.unwrap();
        response.body_mut().read_all().await.unwrap();
        response.close();
    }

    // A third origin takes the last slot and stays active.
    let mut held = pool.handle_request(fetch("c.com")).await.unwrap();

    // A fourth origin needs a slot: the pool closes one idle connection,
    // from the least-recently-used end.
    let mut response = pool.handle_request(fetch("d.com")).await.unwrap();
    assert_eq!(
        pool.pool_info(),
        vec![
            "'http://d.com:80', HTTP/1.1, ACTIVE, Request Count: 1",
            "'http://c.com:80', HTTP/1.1, ACTIVE, Request Count: 1",
            "'http://b.com:80', HTTP/1.1, IDLE, Request Count: 1",
        ]
    );

    response.body_mut().read_all().await.unwrap();
    response.close();
    held.body_mut().read_all().await.unwrap();
    held.close();
}

#[tokio::test]
async fn acquire_timeout_surfaces_as_pool_timeout() {
    let pool = ConnectionPool::builder()
        .max_connections(1)
        .acquire_timeout(Duration::from_millis(50))
        .network_backend(mock_backend())
        .build();

    // Hold the only slot by leaving the response body open.
    let held = pool.handle_request(https_request()).await.unwrap();

    let err = pool.handle_request(https_request()).await.unwrap_err();
    assert!(err.is_pool_timeout());

    drop(held);
}

#[tokio::test]
async fn shutdown_closes_everything_and_fails_new_requests() {
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .network_backend(mock_backend())
        .build();

    let mut response = pool.handle_request(https_request()).await.unwrap();
    response.body_mut().read_all().await.unwrap();
    response.close();
    assert_eq!(pool.pool_info().len(), 1);

    pool.close();
    assert!(pool.pool_info().is_empty());

    let err = pool.handle_request(https_request()).await.unwrap_err();
    assert!(err.is_pool_closed());
}

#[tokio::test]
async fn repeated_exchanges_reuse_a_single_connection() {
    let pool = ConnectionPool::builder()
        .max_connections(10)
        .network_backend(mock_backend())
        .build();

    for count in 1..=20 {
        let mut response = pool.handle_request(https_request()).await.unwrap();
        response.body_mut().read_all().await.unwrap();
        response.close();
        assert_eq!(
            pool.pool_info(),
            vec![format!(
                "'https://example.com:443', HTTP/1.1, IDLE, Request Count: {count}"
            )]
        );
    }
}

#[test]
fn unsupported_schemes_are_rejected_at_parse_time() {
    let err = RawUrl::parse("ftp://example.com/").unwrap_err();
    assert!(err.is_unsupported_protocol());
}
