//! Peer scenarios over the in-memory transport, on a paused clock.

use std::time::Duration;

use parking_lot::Mutex;
use protoo_client::{PeerError, PeerHandlers, Reply};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::harness::{memory_peer, next_lifecycle, Lifecycle, WAIT};

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_ping_end_to_end() {
    let mut mp = memory_peer(PeerHandlers::new(), Some(vec![7]));
    mp.peer.open().unwrap();
    let mut remote = mp.listener.accept().await.unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);

    let peer = mp.peer.clone();
    let call = tokio::spawn(async move { peer.request_with("ping", &json!({ "n": 1 })).await });

    let sent = parse(&remote.recv_text().await.unwrap());
    assert_eq!(
        sent,
        json!({ "request": true, "method": "ping", "id": 7, "data": { "n": 1 } })
    );
    remote.send_text(r#"{"response":true,"ok":true,"id":7,"data":{"pong":true}}"#);

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.id, 7);
    assert!(response.is_ok());
    assert_eq!(response.data::<Value>().unwrap(), json!({ "pong": true }));
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_responses_match_by_id() {
    let mut mp = memory_peer(PeerHandlers::new(), Some(vec![1, 2, 3]));
    mp.peer.open().unwrap();
    let mut remote = mp.listener.accept().await.unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);

    let mut calls = Vec::new();
    for method in ["a", "b", "c"] {
        let peer = mp.peer.clone();
        calls.push(tokio::spawn(async move { peer.request(method).await }));
        // Sequential sends keep id assignment deterministic.
        let sent = parse(&remote.recv_text().await.unwrap());
        assert_eq!(sent["method"], method);
    }
    assert_eq!(mp.peer.pending_requests(), 3);

    for id in [3, 1, 2] {
        remote.send_text(format!(
            r#"{{"response":true,"ok":false,"id":{id},"errorCode":{},"errorReason":"r{id}"}}"#,
            400 + id
        ));
    }
    for (call, id) in calls.into_iter().zip([1u32, 2, 3]) {
        let response = call.await.unwrap().unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.error_code(), Some(400 + i64::from(id)));
        assert_eq!(response.error_reason(), Some(format!("r{id}").as_str()));
    }
    assert_eq!(mp.peer.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_response_id_leaves_pending_alone() {
    let mut mp = memory_peer(PeerHandlers::new(), Some(vec![10, 20]));
    mp.peer.open().unwrap();
    let mut remote = mp.listener.accept().await.unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);

    let mut calls = Vec::new();
    for method in ["first", "second"] {
        let peer = mp.peer.clone();
        calls.push(tokio::spawn(async move { peer.request(method).await }));
        remote.recv_text().await.unwrap();
    }
    assert_eq!(mp.peer.pending_requests(), 2);

    remote.send_text(r#"{"response":true,"ok":true,"id":999,"data":"stray"}"#);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(mp.peer.pending_requests(), 2);

    remote.send_text(r#"{"response":true,"ok":true,"id":20,"data":"second"}"#);
    remote.send_text(r#"{"response":true,"ok":true,"id":10,"data":"first"}"#);
    for (call, (id, data)) in calls.into_iter().zip([(10u32, "first"), (20, "second")]) {
        let response = call.await.unwrap().unwrap();
        assert_eq!(response.id, id);
        assert_eq!(response.data::<String>().unwrap(), data);
    }
    assert_eq!(mp.peer.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_three_refusals_then_open() {
    let mut mp = memory_peer(PeerHandlers::new(), None);
    for _ in 0..3 {
        mp.transport.refuse_next("server restarting");
    }
    mp.peer.open().unwrap();

    let mut stamps = Vec::new();
    for expected in [
        Lifecycle::Failed(0),
        Lifecycle::Failed(1),
        Lifecycle::Failed(2),
        Lifecycle::Open,
    ] {
        assert_eq!(next_lifecycle(&mut mp.lifecycle).await, expected);
        stamps.push(Instant::now());
    }
    let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000)
        ]
    );
    assert!(mp.peer.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_reply_not_sent_on_replacement_connection() {
    let handlers = PeerHandlers::new().on_request(|_request| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, anyhow::Error>(Reply::empty())
    });
    let mut mp = memory_peer(handlers, None);
    mp.peer.open().unwrap();
    let first = mp.listener.accept().await.unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);

    first.send_text(r#"{"request":true,"method":"slow","id":11}"#);
    tokio::task::yield_now().await;
    first.break_connection("reset");
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Disconnected);

    let mut second = mp.listener.accept().await.unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);

    // The handler finishes at t=5s, after the link was replaced.
    let reply = tokio::time::timeout(Duration::from_secs(10), second.recv_text()).await;
    assert!(reply.is_err(), "stale reply leaked onto the new connection");
}

#[tokio::test(start_paused = true)]
async fn test_close_fails_pending_and_blocks_new_requests() {
    let mut mp = memory_peer(PeerHandlers::new(), None);
    mp.peer.open().unwrap();
    let mut remote = mp.listener.accept().await.unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);

    let peer = mp.peer.clone();
    let call = tokio::spawn(async move { peer.request("join").await });
    remote.recv_text().await.unwrap();

    mp.peer.close();
    remote.close();
    assert!(matches!(call.await.unwrap(), Err(PeerError::Closed)));
    assert!(matches!(
        next_lifecycle(&mut mp.lifecycle).await,
        Lifecycle::Closed(_)
    ));
    assert!(matches!(mp.peer.request("again").await, Err(PeerError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lagging_session_keeps_links_apart() {
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let handlers = PeerHandlers::new().on_notification(move |n| {
        if n.method == "hold" {
            let _ = entered_tx.send(());
            // Stalls the session task until the test lets go.
            tokio::task::block_in_place(|| release_rx.lock().recv())?;
        }
        Ok(())
    });
    let mut mp = memory_peer(handlers, Some(vec![21]));
    mp.peer.open().unwrap();
    let first = mp.listener.accept().await.unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);

    first.send_text(r#"{"notification":true,"method":"hold"}"#);
    entered_rx.recv().await.unwrap();
    first.send_text(r#"{"request":true,"method":"stale","id":5}"#);
    first.break_connection("reset");

    // The manager reconnects while the session task is still stuck.
    let mut second = tokio::time::timeout(WAIT, mp.listener.accept())
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(WAIT, async {
        while !mp.peer.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let peer = mp.peer.clone();
    let fresh = tokio::spawn(async move { peer.request("fresh").await });
    let sent = parse(&second.recv_text().await.unwrap());
    assert_eq!(sent["method"], "fresh");
    assert_eq!(sent["id"], 21);

    release_tx.send(()).unwrap();
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Disconnected);
    assert_eq!(next_lifecycle(&mut mp.lifecycle).await, Lifecycle::Open);
    assert_eq!(mp.peer.pending_requests(), 1);

    // The 404 for request 5 belongs to the dead link.
    let leaked = tokio::time::timeout(Duration::from_millis(200), second.recv_text()).await;
    assert!(leaked.is_err(), "reply leaked onto the new link: {leaked:?}");

    second.send_text(r#"{"response":true,"ok":true,"id":21}"#);
    let response = fresh.await.unwrap().unwrap();
    assert_eq!(response.id, 21);
    assert!(response.is_ok());
}
