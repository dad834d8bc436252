//! Peer against a real WebSocket server.

use protoo_client::{CloseCause, Peer, PeerHandlers, Reply};
use serde_json::json;
use tokio::net::TcpListener;

use crate::harness::{fast_policy, next_lifecycle, observe, Lifecycle, TestServer};

#[tokio::test]
async fn test_handshake_advertises_protoo_and_request_roundtrips() {
    let mut server = TestServer::start().await.unwrap();
    let (handlers, mut lifecycle) = observe(PeerHandlers::new());
    let peer = Peer::new(server.url.clone(), fast_policy(3), handlers);
    peer.open().unwrap();

    let mut conn = server.accept().await;
    assert_eq!(conn.protocol.as_deref(), Some("protoo"));
    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Open);

    let caller = peer.clone();
    let call = tokio::spawn(async move {
        caller
            .request_with("getRouterRtpCapabilities", &json!({ "codecs": true }))
            .await
    });

    let request = conn.recv_json().await.unwrap();
    assert_eq!(request["request"], true);
    assert_eq!(request["method"], "getRouterRtpCapabilities");
    assert_eq!(request["data"]["codecs"], true);
    conn.send_json(json!({
        "response": true,
        "ok": true,
        "id": request["id"],
        "data": { "codecs": ["opus", "VP8"] }
    }))
    .await;

    let response = call.await.unwrap().unwrap();
    assert!(response.is_ok());
    let data: serde_json::Value = response.data().unwrap();
    assert_eq!(data["codecs"][0], "opus");

    peer.close();
    assert!(conn.expect_close().await);
    assert_eq!(
        next_lifecycle(&mut lifecycle).await,
        Lifecycle::Closed(CloseCause::ClientClosed)
    );
}

#[tokio::test]
async fn test_server_request_gets_handler_reply() {
    let mut server = TestServer::start().await.unwrap();
    let handlers = PeerHandlers::new().on_request(|request| async move {
        let data: serde_json::Value = request.data()?;
        match request.method.as_str() {
            "newConsumer" => Ok::<_, anyhow::Error>(Reply::ok(&json!({ "accepted": data["kind"] }))?),
            _ => Ok(Reply::reject(403, "not allowed")),
        }
    });
    let (handlers, mut lifecycle) = observe(handlers);
    let peer = Peer::new(server.url.clone(), fast_policy(3), handlers);
    peer.open().unwrap();
    let mut conn = server.accept().await;
    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Open);

    conn.send_json(json!({
        "request": true,
        "method": "newConsumer",
        "id": 41,
        "data": { "kind": "audio" }
    }))
    .await;
    let reply = conn.recv_json().await.unwrap();
    assert_eq!(reply, json!({ "response": true, "ok": true, "id": 41, "data": { "accepted": "audio" } }));

    conn.send_json(json!({ "request": true, "method": "kick", "id": 42 }))
        .await;
    let reply = conn.recv_json().await.unwrap();
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["errorCode"], 403);
    assert_eq!(reply["errorReason"], "not allowed");
}

#[tokio::test]
async fn test_server_close_ends_session() {
    let mut server = TestServer::start().await.unwrap();
    let (handlers, mut lifecycle) = observe(PeerHandlers::new());
    let peer = Peer::new(server.url.clone(), fast_policy(3), handlers);
    peer.open().unwrap();
    let conn = server.accept().await;
    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Open);

    conn.close().await;
    assert_eq!(
        next_lifecycle(&mut lifecycle).await,
        Lifecycle::Closed(CloseCause::ServerClosed)
    );
    assert!(!peer.is_connected());
    assert!(peer.notify("late").is_err());
}

#[tokio::test]
async fn test_dropped_socket_reconnects() {
    let mut server = TestServer::start().await.unwrap();
    let (handlers, mut lifecycle) = observe(PeerHandlers::new());
    let peer = Peer::new(server.url.clone(), fast_policy(5), handlers);
    peer.open().unwrap();

    let first = server.accept().await;
    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Open);
    drop(first);

    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Disconnected);
    let mut second = server.accept().await;
    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Open);

    peer.notify_with("resumed", &json!({ "ok": 1 })).unwrap();
    let notification = second.recv_json().await.unwrap();
    assert_eq!(notification["notification"], true);
    assert_eq!(notification["method"], "resumed");
}

#[tokio::test]
async fn test_unreachable_server_exhausts_retries() {
    // Bind and release a port so nothing is listening on it.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (handlers, mut lifecycle) = observe(PeerHandlers::new());
    let peer = Peer::new(format!("ws://127.0.0.1:{port}/"), fast_policy(2), handlers);
    peer.open().unwrap();

    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Failed(0));
    assert_eq!(next_lifecycle(&mut lifecycle).await, Lifecycle::Failed(1));
    assert_eq!(
        next_lifecycle(&mut lifecycle).await,
        Lifecycle::Closed(CloseCause::RetriesExhausted)
    );
}
