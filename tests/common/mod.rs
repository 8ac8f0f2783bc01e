//! Shared fixtures: an in-process signaling server, a recording transport
//! factory, and a recording sink

#![allow(dead_code)]

use async_trait::async_trait;
use camconsole::{
    IceCandidate, PeerTransport, PeerTransportFactory, RemoteStream, SlotId, TransportEvent,
    TransportEventKind, VideoSink,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

/// Poll a condition until it holds or the deadline passes
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

/// Async variant of [`eventually`]
pub async fn eventually_async<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

/// Minimal in-process signaling server end
pub struct MockServer {
    listener: TcpListener,
    pub url: String,
}

impl MockServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        Self { listener, url }
    }

    pub async fn accept(&self) -> ServerConn {
        let (stream, _) = tokio::time::timeout(Duration::from_secs(3), self.listener.accept())
            .await
            .expect("no client connected")
            .unwrap();
        let ws = accept_async(stream).await.unwrap();
        ServerConn { ws }
    }
}

/// One accepted client connection, driven frame by frame from the test
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    pub async fn send(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Next text frame, parsed
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(3), self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(payload) => {
                    self.ws.send(Message::Pong(payload)).await.unwrap();
                }
                _ => {}
            }
        }
    }

    /// Skip frames until one with the given `type` arrives
    pub async fn recv_type(&mut self, message_type: &str) -> Value {
        loop {
            let value = self.recv().await;
            if value["type"] == message_type {
                return value;
            }
        }
    }

    /// Assert that no frame arrives within the window
    pub async fn expect_silence(&mut self, window: Duration) {
        match tokio::time::timeout(window, self.ws.next()).await {
            Err(_) => {}
            Ok(Some(Ok(Message::Ping(_)))) => {}
            Ok(frame) => panic!("expected silence, got {frame:?}"),
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.send(Message::Close(None)).await;
    }
}

/// Transport double recording everything the negotiation machine does
#[derive(Default)]
pub struct MockTransport {
    pub offers: Mutex<Vec<String>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub close_calls: AtomicU32,
}

impl MockTransport {
    pub fn closed(&self) -> bool {
        self.close_calls.load(Ordering::SeqCst) > 0
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn apply_remote_offer(&self, sdp: String) -> camconsole::Result<()> {
        self.offers.lock().unwrap().push(sdp);
        Ok(())
    }

    async fn create_answer(&self) -> camconsole::Result<String> {
        Ok("v=0\r\ns=answer\r\n".to_string())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> camconsole::Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> camconsole::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A transport the factory handed out, plus the event hook back into the
/// console loop so tests can raise tracks/candidates
pub struct CreatedTransport {
    pub slot: SlotId,
    pub generation: u64,
    pub events: mpsc::Sender<TransportEvent>,
    pub transport: Arc<MockTransport>,
}

impl CreatedTransport {
    pub async fn emit_remote_track(&self, video_tracks: usize) {
        self.events
            .send(TransportEvent {
                slot: self.slot.clone(),
                generation: self.generation,
                kind: TransportEventKind::RemoteTrack(RemoteStream {
                    id: format!("stream-{}", self.slot),
                    video_tracks,
                    track: None,
                }),
            })
            .await
            .unwrap();
    }

    pub async fn emit_local_candidate(&self, candidate: Option<IceCandidate>) {
        self.events
            .send(TransportEvent {
                slot: self.slot.clone(),
                generation: self.generation,
                kind: TransportEventKind::LocalCandidate(candidate),
            })
            .await
            .unwrap();
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub created: Mutex<Vec<Arc<CreatedTransport>>>,
}

impl MockFactory {
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn created_at(&self, index: usize) -> Arc<CreatedTransport> {
        Arc::clone(&self.created.lock().unwrap()[index])
    }
}

#[async_trait]
impl PeerTransportFactory for MockFactory {
    async fn create(
        &self,
        slot: SlotId,
        generation: u64,
        events: mpsc::Sender<TransportEvent>,
    ) -> camconsole::Result<Arc<dyn PeerTransport>> {
        let transport = Arc::new(MockTransport::default());
        self.created.lock().unwrap().push(Arc::new(CreatedTransport {
            slot,
            generation,
            events,
            transport: Arc::clone(&transport),
        }));
        Ok(transport)
    }
}

/// Sink double recording attach/detach order
#[derive(Default)]
pub struct RecordingSink {
    pub attached: Mutex<Vec<(String, String)>>,
    pub detached: Mutex<Vec<String>>,
}

#[async_trait]
impl VideoSink for RecordingSink {
    async fn attach(&self, slot: &SlotId, stream: RemoteStream) {
        self.attached
            .lock()
            .unwrap()
            .push((slot.to_string(), stream.id));
    }

    async fn detach(&self, slot: &SlotId) {
        self.detached.lock().unwrap().push(slot.to_string());
    }
}
