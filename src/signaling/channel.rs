//! Reconnecting control-channel client
//!
//! Owns the raw WebSocket to the signaling server and the versioned message
//! envelope. No business logic lives here: subscribers get parsed frames and
//! connection lifecycle events, and decide what to do with them.
//!
//! Policy is reset-and-retry: on any close or error every in-flight state is
//! abandoned, the socket is discarded, and a new connection is opened after a
//! fixed delay. Nothing is queued or redelivered across reconnects.

use crate::config::ConsoleConfig;
use crate::signaling::protocol::{IncomingMessage, OutgoingMessage};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Lifecycle and message events observed by channel subscribers.
///
/// Every event carries the connection generation it belongs to; a subscriber
/// holding state from generation N must discard it when it sees an event for
/// generation M > N.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Transport opened; announce roles and refresh state now
    Ready { generation: u64 },
    /// A parsed inbound frame
    Message {
        generation: u64,
        message: IncomingMessage,
    },
    /// An inbound frame that failed to parse; logged and otherwise ignored
    ProtocolError { generation: u64, details: String },
    /// Transport closed or errored; a reconnect is scheduled
    Closed { generation: u64 },
}

struct ChannelInner {
    config: ConsoleConfig,
    events: broadcast::Sender<ChannelEvent>,
    /// Present only while a connection is open. `send` drops messages (with
    /// a warning) while this is `None`.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    generation: AtomicU64,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

/// Handle to the process-wide control channel.
///
/// Cheap to clone; all clones observe the same logical connection. Only the
/// top-level lifecycle may call [`SignalingChannel::shutdown`] — sessions
/// and views must never close the channel themselves.
#[derive(Clone)]
pub struct SignalingChannel {
    inner: Arc<ChannelInner>,
}

impl SignalingChannel {
    pub fn new(config: ConsoleConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(ChannelInner {
                config,
                events,
                outbound: Mutex::new(None),
                generation: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                shutdown_notify: Notify::new(),
            }),
        }
    }

    /// Subscribe to channel events. Subscribers joining mid-connection only
    /// see events from that point on.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    /// Generation of the current (or most recent) connection
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Whether the transport is currently open
    pub fn is_open(&self) -> bool {
        self.inner.outbound.lock().is_some()
    }

    /// Serialize and transmit a message.
    ///
    /// Never fails toward the caller: while disconnected the message is
    /// dropped with a warning, relying on the caller to retry after the
    /// channel announces `Ready` again.
    pub fn send(&self, message: &OutgoingMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                warn!("dropping unserializable outbound message: {err}");
                return;
            }
        };
        let guard = self.inner.outbound.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(Message::Text(text)).is_err() {
                    warn!("control channel writer gone, message dropped");
                }
            }
            None => {
                warn!("control channel not connected, message dropped");
            }
        }
    }

    /// Stop the reconnect loop and close the current socket
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        *self.inner.outbound.lock() = None;
        self.inner.shutdown_notify.notify_waiters();
    }

    /// Run the connect/reconnect loop until [`SignalingChannel::shutdown`].
    ///
    /// Intended to be spawned once by the console lifecycle.
    pub async fn run(&self) {
        loop {
            if self.inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            match connect_async(self.inner.config.server_url.as_str()).await {
                Ok((stream, _)) => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    info!(generation, url = %self.inner.config.server_url, "control channel connected");
                    self.serve_connection(stream, generation).await;
                    let _ = self
                        .inner
                        .events
                        .send(ChannelEvent::Closed { generation });
                }
                Err(err) => {
                    warn!(url = %self.inner.config.server_url, "control channel connect failed: {err}");
                }
            }

            if self.inner.shutdown.load(Ordering::Acquire) {
                break;
            }
            debug!(
                delay_ms = self.inner.config.reconnect_delay.as_millis() as u64,
                "scheduling control channel reconnect"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.inner.config.reconnect_delay) => {}
                _ = self.inner.shutdown_notify.notified() => break,
            }
        }
        info!("control channel loop stopped");
    }

    async fn serve_connection<S>(
        &self,
        stream: tokio_tungstenite::WebSocketStream<S>,
        generation: u64,
    ) where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *self.inner.outbound.lock() = Some(out_tx);
        let _ = self.inner.events.send(ChannelEvent::Ready { generation });

        loop {
            tokio::select! {
                _ = self.inner.shutdown_notify.notified() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                outbound = out_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            if let Err(err) = ws_tx.send(msg).await {
                                warn!(generation, "control channel write failed: {err}");
                                break;
                            }
                        }
                        // Sender slot cleared (shutdown)
                        None => break,
                    }
                }
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<IncomingMessage>(&text) {
                                Ok(message) => {
                                    let _ = self.inner.events.send(ChannelEvent::Message {
                                        generation,
                                        message,
                                    });
                                }
                                Err(err) => {
                                    warn!(generation, "discarding malformed inbound frame: {err}");
                                    let _ = self.inner.events.send(ChannelEvent::ProtocolError {
                                        generation,
                                        details: err.to_string(),
                                    });
                                }
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if let Err(err) = ws_tx.send(Message::Pong(payload)).await {
                                warn!(generation, "pong failed: {err}");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!(generation, "control channel closed by server");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Binary/pong frames carry nothing for us
                        }
                        Some(Err(err)) => {
                            warn!(generation, "control channel read error: {err}");
                            break;
                        }
                        None => {
                            info!(generation, "control channel stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Detach: further sends drop-with-warning until the next generation
        *self.inner.outbound.lock() = None;
    }
}
