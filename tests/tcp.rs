use std::net::SocketAddr;
use std::sync::Arc;

use htwire::{Body, ConnectionPool, RawRequest, RawUrl, Scheme};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

async fn read_request_head<S>(socket: &mut S) -> Vec<u8>
where
    S: AsyncReadExt + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let mut tmp = [0u8; 1024];
        let n = socket.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if buf.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }
    buf
}

async fn one_shot_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_request_head(&mut socket).await;
        assert!(head.starts_with(b"GET / HTTP/1.1\r\n"));
        socket.write_all(RESPONSE).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn tcp_round_trip() {
    let addr = one_shot_server().await;
    let pool = ConnectionPool::builder().max_connections(2).build();

    let url = RawUrl::new(Scheme::Http, "127.0.0.1", Some(addr.port()), "/");
    let request = RawRequest::new("GET", url, [("Host", "127.0.0.1")], Body::empty());

    let mut response = pool.handle_request(request).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.body_mut().read_all().await.unwrap();
    assert_eq!(body.as_ref(), b"ok");
    response.close();

    assert_eq!(pool.pool_info().len(), 1);
    pool.close();
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_round_trip() {
    use htwire::io::UnixBackend;

    let path = std::env::temp_dir().join(format!("htwire-test-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let listener = tokio::net::UnixListener::bind(&path).unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let head = read_request_head(&mut socket).await;
        assert!(head.starts_with(b"GET / HTTP/1.1\r\n"));
        socket.write_all(RESPONSE).await.unwrap();
    });

    let backend = Arc::new(UnixBackend::new(path.clone()));
    let pool = ConnectionPool::builder().network_backend(backend).build();

    let url = RawUrl::new(Scheme::Http, "localhost", None, "/");
    let request = RawRequest::new("GET", url, [("Host", "localhost")], Body::empty());

    let mut response = pool.handle_request(request).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.body_mut().read_all().await.unwrap();
    assert_eq!(body.as_ref(), b"ok");
    response.close();

    pool.close();
    let _ = std::fs::remove_file(&path);
}
