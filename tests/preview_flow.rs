//! End-to-end preview flows against an in-process signaling server and a
//! recording media transport

mod common;

use camconsole::{Console, ConsoleConfig, IceCandidate, SlotId};
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config(url: &str) -> ConsoleConfig {
    let mut config = ConsoleConfig::new(url);
    config.reconnect_delay = Duration::from_millis(50);
    config
}

/// Spawn a console, accept its connection and walk through the role
/// announcement handshake
async fn start(server: &MockServer) -> (Console, Arc<MockFactory>, Arc<RecordingSink>, ServerConn) {
    let factory = Arc::new(MockFactory::default());
    let sink = Arc::new(RecordingSink::default());
    let console =
        Console::spawn_with_factory(config(&server.url), sink.clone(), factory.clone()).unwrap();

    let mut conn = server.accept().await;
    conn.send(json!({"type": "welcome", "peerId": "console-1"}))
        .await;
    let announce = conn.recv_type("setPeerStatus").await;
    assert_eq!(announce["roles"], json!(["listener"]));
    conn.recv_type("listCameras").await;
    (console, factory, sink, conn)
}

async fn send_camera_list(conn: &mut ServerConn) {
    conn.send(json!({"type": "listCameras", "cameras": [
        {"id": "1", "name": "Lobby", "location": "hq", "url": "rtsp://cam/1"},
        {"id": "2", "name": "Dock", "location": "hq", "url": "rtsp://cam/2"},
    ]}))
    .await;
}

async fn announce_producer(conn: &mut ServerConn, peer_id: &str, camera_id: &str) {
    conn.send(json!({
        "type": "peerStatusChanged",
        "roles": ["producer"],
        "peerId": peer_id,
        "meta": {"id": camera_id},
    }))
    .await;
}

fn local_candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP {n} 10.0.0.1 9 typ host"),
        sdp_m_line_index: 0,
        sdp_mid: None,
    }
}

#[tokio::test]
async fn preview_end_to_end() {
    let server = MockServer::bind().await;
    let (console, factory, sink, mut conn) = start(&server).await;

    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;
    assert_eq!(console.peer_id().await.unwrap().as_deref(), Some("console-1"));

    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    let preview = conn.recv_type("preview").await;
    assert_eq!(preview["id"], "1");
    assert_eq!(preview["url"], "rtsp://cam/1");
    eventually_async("preview flag set", || async {
        console.cameras().await[0].preview_open
    })
    .await;

    announce_producer(&mut conn, "p1", "1").await;
    let start = conn.recv_type("startSession").await;
    assert_eq!(start["peerId"], "p1");
    assert_eq!(factory.created_count(), 1);

    conn.send(json!({"type": "sessionStarted", "sessionId": "s1", "peerId": "p1"}))
        .await;
    conn.send(json!({
        "type": "peer", "sessionId": "s1",
        "sdp": {"type": "offer", "sdp": "v=0\r\noffer"},
    }))
    .await;
    let answer = conn.recv_type("peer").await;
    assert_eq!(answer["sessionId"], "s1");
    assert_eq!(answer["sdp"]["type"], "answer");

    // Remote candidates land on the transport in delivery order
    conn.send(json!({
        "type": "peer", "sessionId": "s1",
        "ice": {"candidate": "candidate:1 1 UDP 1 10.0.0.2 9 typ host", "sdpMLineIndex": 0},
    }))
    .await;
    conn.send(json!({
        "type": "peer", "sessionId": "s1",
        "ice": {"candidate": "candidate:2 1 UDP 2 10.0.0.2 9 typ host", "sdpMLineIndex": 0, "sdpMid": "0"},
    }))
    .await;
    let created = factory.created_at(0);
    eventually("both remote candidates applied", || {
        created.transport.candidates.lock().unwrap().len() == 2
    })
    .await;

    // Local candidates go out tagged with the confirmed session id
    created.emit_local_candidate(Some(local_candidate(9))).await;
    let ice = conn.recv_type("peer").await;
    assert_eq!(ice["sessionId"], "s1");
    assert!(ice["ice"]["candidate"]
        .as_str()
        .unwrap()
        .starts_with("candidate:9"));

    created.emit_remote_track(1).await;
    eventually("stream attached to the sink", || {
        !sink.attached.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(sink.attached.lock().unwrap()[0].0, "main");

    console.stop_preview(SlotId::new("main")).await.unwrap();
    let stop = conn.recv_type("stopPreview").await;
    assert_eq!(stop["id"], "1");
    eventually("transport closed", || created.transport.closed()).await;
    eventually("sink detached", || {
        sink.detached.lock().unwrap().contains(&"main".to_string())
    })
    .await;
    eventually_async("preview flag cleared", || async {
        !console.cameras().await[0].preview_open
    })
    .await;

    console.shutdown().await;
}

#[tokio::test]
async fn new_request_replaces_the_slot_session() {
    let server = MockServer::bind().await;
    let (console, factory, _sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    // First session fully confirmed on the slot
    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    announce_producer(&mut conn, "p1", "1").await;
    conn.recv_type("startSession").await;
    conn.send(json!({"type": "sessionStarted", "sessionId": "s1", "peerId": "p1"}))
        .await;

    // Re-request on the same slot for another camera
    console
        .request_preview(SlotId::new("main"), "2")
        .await
        .unwrap();
    let preview = conn.recv_type("preview").await;
    assert_eq!(preview["id"], "2");
    announce_producer(&mut conn, "p2", "2").await;
    let start = conn.recv_type("startSession").await;
    assert_eq!(start["peerId"], "p2");

    // The old session was released before the new one came up
    assert_eq!(factory.created_count(), 2);
    let first = factory.created_at(0);
    eventually("first transport closed", || first.transport.closed()).await;

    conn.send(json!({"type": "sessionStarted", "sessionId": "s2", "peerId": "p2"}))
        .await;
    conn.send(json!({
        "type": "peer", "sessionId": "s2",
        "sdp": {"type": "offer", "sdp": "v=0\r\noffer"},
    }))
    .await;
    let answer = conn.recv_type("peer").await;
    assert_eq!(answer["sessionId"], "s2");

    // Traffic for the dead session no longer routes anywhere
    conn.send(json!({
        "type": "peer", "sessionId": "s1",
        "ice": {"candidate": "candidate:7 1 UDP 7 10.0.0.2 9 typ host", "sdpMLineIndex": 0},
    }))
    .await;
    conn.send(json!({
        "type": "peer", "sessionId": "s2",
        "ice": {"candidate": "candidate:8 1 UDP 8 10.0.0.2 9 typ host", "sdpMLineIndex": 0},
    }))
    .await;
    let second = factory.created_at(1);
    eventually("live session got its candidate", || {
        second.transport.candidates.lock().unwrap().len() == 1
    })
    .await;
    assert!(second.transport.candidates.lock().unwrap()[0]
        .candidate
        .starts_with("candidate:8"));
    assert!(first.transport.candidates.lock().unwrap().is_empty());

    console.shutdown().await;
}

#[tokio::test]
async fn ended_session_traffic_never_reaches_a_replacement_session() {
    let server = MockServer::bind().await;
    let (console, factory, _sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    // A confirmed session that the operator then stops
    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    announce_producer(&mut conn, "p1", "1").await;
    conn.recv_type("startSession").await;
    conn.send(json!({"type": "sessionStarted", "sessionId": "s1", "peerId": "p1"}))
        .await;
    console.stop_preview(SlotId::new("main")).await.unwrap();
    conn.recv_type("stopPreview").await;
    let first = factory.created_at(0);
    eventually("first transport closed", || first.transport.closed()).await;

    // Replacement session on the slot, still awaiting its confirmation
    console
        .request_preview(SlotId::new("main"), "2")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    announce_producer(&mut conn, "p2", "2").await;
    conn.recv_type("startSession").await;

    // A late trickle candidate from the dead session arrives while the
    // replacement has no id yet; it must be discarded, not buffered into it
    conn.send(json!({
        "type": "peer", "sessionId": "s1",
        "ice": {"candidate": "candidate:66 1 UDP 66 10.9.9.9 9 typ host", "sdpMLineIndex": 0},
    }))
    .await;

    conn.send(json!({"type": "sessionStarted", "sessionId": "s2", "peerId": "p2"}))
        .await;
    conn.send(json!({
        "type": "peer", "sessionId": "s2",
        "sdp": {"type": "offer", "sdp": "v=0\r\noffer"},
    }))
    .await;
    let answer = conn.recv_type("peer").await;
    assert_eq!(answer["sessionId"], "s2");

    conn.send(json!({
        "type": "peer", "sessionId": "s2",
        "ice": {"candidate": "candidate:8 1 UDP 8 10.0.0.2 9 typ host", "sdpMLineIndex": 0},
    }))
    .await;
    let second = factory.created_at(1);
    eventually("live session got its own candidate", || {
        second.transport.candidates.lock().unwrap().len() == 1
    })
    .await;
    assert!(second.transport.candidates.lock().unwrap()[0]
        .candidate
        .starts_with("candidate:8"));
    assert!(first.transport.candidates.lock().unwrap().is_empty());

    console.shutdown().await;
}

#[tokio::test]
async fn producer_match_for_an_overwritten_request_is_ignored() {
    let server = MockServer::bind().await;
    let (console, factory, _sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    console
        .request_preview(SlotId::new("main"), "2")
        .await
        .unwrap();
    conn.recv_type("preview").await;

    // The producer for the superseded camera no longer matches anything
    announce_producer(&mut conn, "p1", "1").await;
    conn.expect_silence(Duration::from_millis(150)).await;
    assert_eq!(factory.created_count(), 0);

    announce_producer(&mut conn, "p2", "2").await;
    let start = conn.recv_type("startSession").await;
    assert_eq!(start["peerId"], "p2");
    assert_eq!(factory.created_count(), 1);

    console.shutdown().await;
}

#[tokio::test]
async fn nothing_is_sent_before_the_session_id_is_confirmed() {
    let server = MockServer::bind().await;
    let (console, factory, _sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    announce_producer(&mut conn, "p1", "1").await;
    conn.recv_type("startSession").await;
    let created = factory.created_at(0);

    // Offer and a local candidate both race ahead of sessionStarted
    conn.send(json!({
        "type": "peer", "sessionId": "s1",
        "sdp": {"type": "offer", "sdp": "v=0\r\noffer"},
    }))
    .await;
    created.emit_local_candidate(Some(local_candidate(3))).await;
    conn.expect_silence(Duration::from_millis(150)).await;
    assert!(created.transport.offers.lock().unwrap().is_empty());

    // Confirmation drains the buffers: candidate first, then the answer
    conn.send(json!({"type": "sessionStarted", "sessionId": "s1", "peerId": "p1"}))
        .await;
    let ice = conn.recv_type("peer").await;
    assert_eq!(ice["sessionId"], "s1");
    assert!(ice["ice"]["candidate"]
        .as_str()
        .unwrap()
        .starts_with("candidate:3"));
    let answer = conn.recv_type("peer").await;
    assert_eq!(answer["sessionId"], "s1");
    assert_eq!(answer["sdp"]["type"], "answer");
    assert_eq!(created.transport.offers.lock().unwrap().len(), 1);

    console.shutdown().await;
}

#[tokio::test]
async fn stopping_twice_releases_once() {
    let server = MockServer::bind().await;
    let (console, factory, _sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    announce_producer(&mut conn, "p1", "1").await;
    conn.recv_type("startSession").await;
    conn.send(json!({"type": "sessionStarted", "sessionId": "s1", "peerId": "p1"}))
        .await;
    let created = factory.created_at(0);

    console.stop_preview(SlotId::new("main")).await.unwrap();
    conn.recv_type("stopPreview").await;
    eventually("transport closed", || created.transport.closed()).await;

    console.stop_preview(SlotId::new("main")).await.unwrap();
    conn.expect_silence(Duration::from_millis(150)).await;
    assert_eq!(
        created
            .transport
            .close_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    console.shutdown().await;
}

#[tokio::test]
async fn stream_without_video_tears_the_session_down() {
    let server = MockServer::bind().await;
    let (console, factory, sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    announce_producer(&mut conn, "p1", "1").await;
    conn.recv_type("startSession").await;
    conn.send(json!({"type": "sessionStarted", "sessionId": "s1", "peerId": "p1"}))
        .await;
    let created = factory.created_at(0);

    created.emit_remote_track(0).await;
    eventually("transport closed", || created.transport.closed()).await;
    assert!(sink.attached.lock().unwrap().is_empty());
    eventually_async("preview flag cleared", || async {
        !console.cameras().await[0].preview_open
    })
    .await;

    console.shutdown().await;
}

#[tokio::test]
async fn server_end_session_releases_the_slot() {
    let server = MockServer::bind().await;
    let (console, factory, _sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    console
        .request_preview(SlotId::new("main"), "1")
        .await
        .unwrap();
    conn.recv_type("preview").await;
    announce_producer(&mut conn, "p1", "1").await;
    conn.recv_type("startSession").await;
    conn.send(json!({"type": "sessionStarted", "sessionId": "s1", "peerId": "p1"}))
        .await;
    let created = factory.created_at(0);

    conn.send(json!({"type": "endSession", "sessionId": "s1"}))
        .await;
    eventually("transport closed", || created.transport.closed()).await;
    eventually_async("preview flag cleared", || async {
        !console.cameras().await[0].preview_open
    })
    .await;

    console.shutdown().await;
}

#[tokio::test]
async fn server_error_tears_down_all_sessions() {
    let server = MockServer::bind().await;
    let (console, factory, _sink, mut conn) = start(&server).await;
    send_camera_list(&mut conn).await;
    eventually_async("camera list cached", || async {
        console.cameras().await.len() == 2
    })
    .await;

    for (slot, camera, peer, session) in
        [("a", "1", "p1", "s1"), ("b", "2", "p2", "s2")]
    {
        console
            .request_preview(SlotId::new(slot), camera)
            .await
            .unwrap();
        conn.recv_type("preview").await;
        announce_producer(&mut conn, peer, camera).await;
        conn.recv_type("startSession").await;
        conn.send(json!({"type": "sessionStarted", "sessionId": session, "peerId": peer}))
            .await;
    }
    assert_eq!(factory.created_count(), 2);

    conn.send(json!({"type": "error", "details": "producer crashed"}))
        .await;
    eventually("both transports closed", || {
        factory.created_at(0).transport.closed() && factory.created_at(1).transport.closed()
    })
    .await;

    console.shutdown().await;
}
