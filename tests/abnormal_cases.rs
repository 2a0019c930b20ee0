use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use lora_downlink_dispatch::handler::DispatchResponse;
use lora_downlink_dispatch::{DispatchGateway, DispatchServer, InMemoryQueueStore};

async fn start_server() -> std::net::SocketAddr {
    let server = DispatchServer::new(DispatchGateway::new(Arc::new(InMemoryQueueStore::new())))
        .with_idle_timeout(Duration::from_millis(500));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run_listener_on(listener).await;
    });
    addr
}

async fn submit_and_read(addr: std::net::SocketAddr, req: &str) -> DispatchResponse {
    let mut s = TcpStream::connect(addr).await.expect("connect");
    s.write_all(format!("{req}\n").as_bytes()).await.unwrap();
    let mut lines = BufReader::new(s).lines();
    let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("timeout")
        .unwrap()
        .expect("response");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn partial_send_then_close_server_remains_healthy() {
    let addr = start_server().await;

    // send an incomplete request, then close
    let mut s = TcpStream::connect(addr).await.expect("connect");
    let _ = s.write_all(br#"{"op":"downlink","DevAd"#).await;
    let _ = s.shutdown().await;
    drop(s);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resp = submit_and_read(
        addr,
        r#"{"op":"downlink","DevAddr":"0000ABCD","Downlink":"4321"}"#,
    )
    .await;
    assert!(resp.is_success(), "{resp:?}");
}

#[tokio::test]
async fn immediate_close_then_server_remains_healthy() {
    let addr = start_server().await;

    let s = TcpStream::connect(addr).await.expect("connect");
    drop(s);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resp = submit_and_read(
        addr,
        r#"{"op":"maccommand","DevAddr":"10FC2942","MACCommand":"0203"}"#,
    )
    .await;
    assert!(resp.is_success(), "{resp:?}");
}

#[tokio::test]
async fn garbage_line_does_not_poison_connection() {
    let addr = start_server().await;
    let mut s = TcpStream::connect(addr).await.expect("connect");
    s.write_all(b"\x00\xff\xfe garbage\n{\"op\":\"length\",\"DevAddr\":\"0000ABCD\",\"kind\":\"downlink\"}\n")
        .await
        .unwrap();
    let mut lines = BufReader::new(s).lines();
    assert_eq!(next_response(&mut lines).await.code, 400);
    assert_eq!(next_response(&mut lines).await.length, Some(0));
}

async fn next_response(
    lines: &mut tokio::io::Lines<BufReader<TcpStream>>,
) -> DispatchResponse {
    let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("timeout")
        .unwrap()
        .expect("line");
    serde_json::from_str(&line).unwrap()
}
