//! Request validation on the protocol endpoint servers.

mod common;

use std::sync::atomic::Ordering;

use fog::config::ServerKind;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn test_scifin_requires_post() {
    let (endpoint, _shutdown) = common::start_endpoint(ServerKind::Scifin, "").await;

    let response = client()
        .get(format!("http://{endpoint}/"))
        .header("target", "127.0.0.1:9")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 405);
    assert_eq!(
        response.text().await.unwrap(),
        "Incorrect method GET, expected POST"
    );
}

#[tokio::test]
async fn test_scifin_requires_target_header() {
    let (endpoint, _shutdown) = common::start_endpoint(ServerKind::Scifin, "").await;

    let response = client()
        .post(format!("http://{endpoint}/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "No `Target` header given.");
}

#[tokio::test]
async fn test_scifin_checks_credentials_before_dialling() {
    let (target, accepted) = common::start_counting_listener().await;
    let (endpoint, _shutdown) = common::start_endpoint(ServerKind::Scifin, "secret").await;

    let response = client()
        .post(format!("http://{endpoint}/"))
        .header("target", target.to_string())
        .header("proxy-authorization", "wrong")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 407);
    assert!(response.headers().contains_key("proxy-authenticate"));
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_millimol_requires_upgrade() {
    let (endpoint, _shutdown) = common::start_endpoint(ServerKind::Millimol, "").await;

    let response = client()
        .get(format!("http://{endpoint}/"))
        .header("target", "127.0.0.1:9")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 426);
}

#[tokio::test]
async fn test_ws_requires_upgrade() {
    let (endpoint, _shutdown) = common::start_endpoint(ServerKind::Ws, "").await;

    let response = client()
        .get(format!("http://{endpoint}/"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 426);
}

#[tokio::test]
async fn test_ws_requires_key() {
    let (endpoint, _shutdown) = common::start_endpoint(ServerKind::Ws, "").await;

    let mut stream = TcpStream::connect(endpoint).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: 127.0.0.1:9\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Version: 13\r\n\r\n",
        )
        .await
        .unwrap();
    let head = common::read_head(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 400"), "{head}");
}

#[tokio::test]
async fn test_millimol_unknown_target_is_404() {
    let (endpoint, _shutdown) = common::start_endpoint(ServerKind::Millimol, "").await;

    let mut stream = TcpStream::connect(endpoint).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: does-not-exist.invalid:80\r\nTarget: does-not-exist.invalid:80\r\nConnection: Upgrade\r\nUpgrade: millimol\r\n\r\n",
        )
        .await
        .unwrap();
    let head = common::read_head(&mut stream).await;

    assert!(head.starts_with("HTTP/1.1 404"), "{head}");
}
