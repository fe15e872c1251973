//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fog::config::{ProxyConfig, ServerKind};
use fog::http::HttpServer;
use fog::lifecycle::Shutdown;
use fog::{ProtocolType, ProxyHop, Target};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Start a TCP server that echoes every byte back.
pub async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Start a TCP server that reads until EOF, then answers with the bytes reversed.
pub async fn start_reply_after_eof_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                if socket.read_to_end(&mut request).await.is_err() {
                    return;
                }
                request.reverse();
                let _ = socket.write_all(&request).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a listener that only counts accepted connections.
pub async fn start_counting_listener() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(socket);
        }
    });
    (addr, accepted)
}

/// Start an HTTP origin answering every request with `body`.
///
/// Request heads are recorded in arrival order.
pub async fn start_origin(body: &'static str) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));

    let recorded = heads.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                recorded.lock().unwrap().push(head);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Origin: yes\r\nKeep-Alive: timeout=5\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, heads)
}

/// Start an HTTP origin that streams a chunked body until its client goes away.
///
/// The counter goes up once per connection that stopped accepting chunks.
pub async fn start_streaming_origin() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let closed = Arc::new(AtomicUsize::new(0));

    let closed_count = closed.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let closed_count = closed_count.clone();
            tokio::spawn(async move {
                read_head(&mut socket).await;
                let mut out = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
                loop {
                    out.extend_from_slice(b"5\r\ntick\n\r\n");
                    if socket.write_all(&out).await.is_err() {
                        break;
                    }
                    out.clear();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                closed_count.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    (addr, closed)
}

/// A scripted HTTP CONNECT proxy.
pub struct ConnectHop {
    pub addr: SocketAddr,
    /// Request heads received, in order.
    pub heads: Arc<Mutex<Vec<String>>>,
    /// Client connections that have fully closed.
    pub closed: Arc<AtomicUsize>,
}

impl ConnectHop {
    pub fn hop(&self) -> ProxyHop {
        ProxyHop::new(ProtocolType::Http, target_of(self.addr))
    }
}

/// Start a CONNECT proxy; with `required_auth` set, any other credential gets 407.
pub async fn start_connect_hop(required_auth: Option<&'static str>) -> ConnectHop {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicUsize::new(0));

    let (recorded, closed_count) = (heads.clone(), closed.clone());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            let closed_count = closed_count.clone();
            tokio::spawn(async move {
                let head = read_head(&mut socket).await;
                recorded.lock().unwrap().push(head.clone());

                let authorized = match required_auth {
                    Some(expected) => header_value(&head, "proxy-authorization").as_deref() == Some(expected),
                    None => true,
                };
                let destination = head.split_whitespace().nth(1).unwrap_or_default().to_string();

                if !authorized {
                    let _ = socket
                        .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: Basic realm=\"proxy\"\r\nContent-Length: 0\r\n\r\n")
                        .await;
                    wait_for_eof(&mut socket).await;
                } else {
                    match TcpStream::connect(destination.as_str()).await {
                        Ok(mut upstream) => {
                            let _ = socket.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n").await;
                            let _ = tokio::io::copy_bidirectional(&mut socket, &mut upstream).await;
                        }
                        Err(_) => {
                            let _ = socket.write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n").await;
                            wait_for_eof(&mut socket).await;
                        }
                    }
                }
                closed_count.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    ConnectHop { addr, heads, closed }
}

/// Start a hop that reads the handshake and never answers.
pub async fn start_stalling_hop() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let closed = Arc::new(AtomicUsize::new(0));

    let closed_count = closed.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let closed_count = closed_count.clone();
            tokio::spawn(async move {
                wait_for_eof(&mut socket).await;
                closed_count.fetch_add(1, Ordering::SeqCst);
            });
        }
    });
    (addr, closed)
}

/// Run a server for `config` on an ephemeral loopback port.
///
/// The server stops when the returned `Shutdown` is dropped.
pub async fn start_server(config: ProxyConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });
    (addr, shutdown)
}

/// Run a protocol endpoint server with the given credential.
pub async fn start_endpoint(kind: ServerKind, auth: &str) -> (SocketAddr, Shutdown) {
    let config = ProxyConfig {
        server: kind,
        auth: auth.to_string(),
        ..ProxyConfig::default()
    };
    start_server(config).await
}

pub fn target_of(addr: SocketAddr) -> Target {
    Target::new(addr.ip().to_string(), addr.port())
}

/// Read an HTTP head byte by byte so nothing past it is consumed.
pub async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(1) => head.push(byte[0]),
            _ => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Case-insensitive lookup of a header in a raw head.
pub fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

/// Open a CONNECT tunnel through `proxy`, returning the socket and the response head.
pub async fn open_connect(proxy: SocketAddr, target: SocketAddr, auth: Option<&str>) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(credential) = auth {
        request.push_str(&format!("Proxy-Authorization: {credential}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let head = read_head(&mut stream).await;
    (stream, head)
}

/// Write `payload` and expect it echoed back unchanged.
pub async fn assert_echo<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut echoed))
        .await
        .expect("echo timed out")
        .unwrap();
    assert_eq!(echoed, payload);
}

/// Poll `counter` until it reaches `expected` or five seconds pass.
pub async fn wait_for_count(counter: &AtomicUsize, expected: usize) -> bool {
    for _ in 0..100 {
        if counter.load(Ordering::SeqCst) >= expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn wait_for_eof(socket: &mut TcpStream) {
    let mut buf = [0u8; 1024];
    while let Ok(n) = socket.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}
