//! Per-instance WebSocket fan-out.
//!
//! Each entity instance owns one `FanOut` holding its live subscriber
//! set. Events are serialized once and written to every open socket in
//! the order the instance produced them; a subscriber whose outbound
//! buffer fills up is evicted with close code 1011 so a slow socket
//! never delays the others.
//!
//! Sockets are held as opaque channel handles: the instance side only
//! ever enqueues frames, and the per-socket pump tasks own the actual
//! sink and stream halves. Closing is one-directional.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::domain::now_rfc3339;
use crate::events::ControlFrame;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Subscription to a route that does not resolve to an entity.
pub const CLOSE_INVALID_ROUTE: u16 = 1008;
/// Backpressure eviction: the subscriber's send buffer overflowed.
pub const CLOSE_BACKPRESSURE: u16 = 1011;
/// Subscriber table full.
pub const CLOSE_RATE: u16 = 1013;

/// Close request shared between the subscriber table and the pump tasks.
///
/// The table side stores a code and notifies; the write pump picks it up
/// and performs the actual close handshake.
#[derive(Debug)]
struct CloseSignal {
    code: AtomicU16,
    notify: Notify,
}

impl CloseSignal {
    fn new() -> Self {
        Self {
            code: AtomicU16::new(CLOSE_NORMAL),
            notify: Notify::new(),
        }
    }

    fn trigger(&self, code: u16) {
        self.code.store(code, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn code(&self) -> u16 {
        self.code.load(Ordering::SeqCst)
    }
}

/// A live subscriber as seen from the instance.
#[derive(Debug)]
struct Subscriber {
    sender: mpsc::Sender<Message>,
    close: Arc<CloseSignal>,
    subscribed_at: DateTime<Utc>,
    last_ping_at: Arc<parking_lot::Mutex<DateTime<Utc>>>,
}

/// Fan-out engine for one entity instance.
#[derive(Debug)]
pub struct FanOut {
    /// Entity label for tracing (e.g. `task/TASK-A`).
    entity: String,
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    config: WebSocketConfig,
}

impl FanOut {
    #[must_use]
    pub fn new(entity: String, config: WebSocketConfig) -> Self {
        Self {
            entity,
            subscribers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Serialize an event once and enqueue it on every open socket.
    ///
    /// Never blocks: frames are handed to bounded per-socket channels.
    /// A full channel evicts its subscriber with close code 1011; a
    /// closed channel just drops the stale entry.
    pub fn broadcast<T: Serialize>(&self, event: &T) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(entity = %self.entity, error = %e, "Failed to serialize event");
                return;
            }
        };

        let mut stale = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, subscriber) in subscribers.iter() {
                match subscriber
                    .sender
                    .try_send(Message::Text(text.clone().into()))
                {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            entity = %self.entity,
                            subscriber = %id,
                            "Subscriber buffer full, evicting"
                        );
                        subscriber.close.trigger(CLOSE_BACKPRESSURE);
                        stale.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stale.push(*id);
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in stale {
                subscribers.remove(&id);
            }
        }
    }

    /// Register a socket and run its pump tasks until it closes.
    ///
    /// Returns immediately after spawning the write pump; the read pump
    /// runs on the caller's task and removes the subscriber when the
    /// client goes away.
    pub async fn attach(self: Arc<Self>, socket: WebSocket) {
        if self.subscriber_count() >= self.config.max_subscribers {
            tracing::warn!(entity = %self.entity, "Subscriber table full, rejecting socket");
            close_socket(socket, CLOSE_RATE).await;
            return;
        }

        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.config.send_buffer);
        let close = Arc::new(CloseSignal::new());
        let last_ping_at = Arc::new(parking_lot::Mutex::new(Utc::now()));

        self.subscribers.write().insert(
            id,
            Subscriber {
                sender: sender.clone(),
                close: close.clone(),
                subscribed_at: Utc::now(),
                last_ping_at: last_ping_at.clone(),
            },
        );
        tracing::debug!(
            entity = %self.entity,
            subscriber = %id,
            total = self.subscriber_count(),
            "Subscriber attached"
        );

        let (sink, stream) = socket.split();

        tokio::spawn(write_pump(
            sink,
            receiver,
            close.clone(),
            last_ping_at,
            self.config.clone(),
        ));

        self.read_pump(stream, id, sender, close).await;
    }

    /// Read loop: handles client pings, ignores other messages, and
    /// enforces the idle timeout. Any client frame resets the timer.
    async fn read_pump(
        self: Arc<Self>,
        mut stream: SplitStream<WebSocket>,
        id: Uuid,
        sender: mpsc::Sender<Message>,
        close: Arc<CloseSignal>,
    ) {
        let idle = Duration::from_secs(self.config.idle_timeout_secs);

        loop {
            match tokio::time::timeout(idle, stream.next()).await {
                Err(_) => {
                    tracing::debug!(entity = %self.entity, subscriber = %id, "Subscriber idle, closing");
                    close.trigger(CLOSE_NORMAL);
                    break;
                }
                Ok(None) | Ok(Some(Err(_))) => break,
                Ok(Some(Ok(message))) => match message {
                    Message::Text(text) => {
                        if let Ok(ControlFrame::Ping) = serde_json::from_str(&text) {
                            let pong = ControlFrame::Pong {
                                timestamp: now_rfc3339(),
                            };
                            if let Ok(json) = serde_json::to_string(&pong) {
                                // Dropped silently if the buffer is full;
                                // the client will ping again.
                                let _ = sender.try_send(Message::Text(json.into()));
                            }
                        }
                        // Any other client message is ignored.
                    }
                    Message::Close(_) => break,
                    _ => {}
                },
            }
        }

        self.detach(id);
    }

    /// Remove one subscriber.
    fn detach(&self, id: Uuid) {
        if self.subscribers.write().remove(&id).is_some() {
            tracing::debug!(
                entity = %self.entity,
                subscriber = %id,
                total = self.subscriber_count(),
                "Subscriber detached"
            );
        }
    }

    /// Close every subscriber with the given code (instance teardown).
    pub fn close_all(&self, code: u16) {
        let mut subscribers = self.subscribers.write();
        for (_, subscriber) in subscribers.drain() {
            subscriber.close.trigger(code);
        }
    }

    /// Subscription age of the oldest live subscriber, for diagnostics.
    #[must_use]
    pub fn oldest_subscriber(&self) -> Option<DateTime<Utc>> {
        self.subscribers
            .read()
            .values()
            .map(|s| s.subscribed_at)
            .min()
    }

    /// Most recent server ping across subscribers, for diagnostics.
    #[must_use]
    pub fn last_ping_at(&self) -> Option<DateTime<Utc>> {
        self.subscribers
            .read()
            .values()
            .map(|s| *s.last_ping_at.lock())
            .max()
    }
}

/// Write loop: drains the outbound channel in order, sends the periodic
/// server ping, and performs the close handshake when signalled.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut receiver: mpsc::Receiver<Message>,
    close: Arc<CloseSignal>,
    last_ping_at: Arc<parking_lot::Mutex<DateTime<Utc>>>,
    config: WebSocketConfig,
) {
    let send_timeout = Duration::from_secs(config.send_timeout_secs);
    let period = Duration::from_secs(config.ping_interval_secs);
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            frame = receiver.recv() => match frame {
                Some(message) => {
                    match tokio::time::timeout(send_timeout, sink.send(message)).await {
                        Ok(Ok(())) => {}
                        // Send error or timeout: the socket is done.
                        Ok(Err(_)) | Err(_) => break,
                    }
                }
                // All senders dropped: the subscriber was removed.
                None => {
                    finish(sink, close.code()).await;
                    return;
                }
            },
            _ = ping.tick() => {
                *last_ping_at.lock() = Utc::now();
                let json = match serde_json::to_string(&ControlFrame::Ping) {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                if tokio::time::timeout(send_timeout, sink.send(Message::Text(json.into())))
                    .await
                    .map_or(true, |r| r.is_err())
                {
                    break;
                }
            }
            _ = close.notify.notified() => {
                finish(sink, close.code()).await;
                return;
            }
        }
    }

    let _ = sink.close().await;
}

async fn finish(mut sink: SplitSink<WebSocket, Message>, code: u16) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: close_reason(code).into(),
        })))
        .await;
    let _ = sink.close().await;
}

async fn close_socket(mut socket: WebSocket, code: u16) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: close_reason(code).into(),
        })))
        .await;
}

fn close_reason(code: u16) -> &'static str {
    match code {
        CLOSE_INVALID_ROUTE => "invalid route",
        CLOSE_BACKPRESSURE => "send buffer overflow",
        CLOSE_RATE => "subscriber limit reached",
        _ => "",
    }
}

/// Close a raw socket that was never attached (unknown entity).
pub async fn reject_socket(socket: WebSocket, code: u16) {
    close_socket(socket, code).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_signal_carries_code() {
        let signal = CloseSignal::new();
        assert_eq!(signal.code(), CLOSE_NORMAL);
        signal.trigger(CLOSE_BACKPRESSURE);
        assert_eq!(signal.code(), CLOSE_BACKPRESSURE);
    }

    #[test]
    fn test_broadcast_without_subscribers_is_noop() {
        let fanout = FanOut::new("task/TASK-A".into(), WebSocketConfig::default());
        fanout.broadcast(&serde_json::json!({"type": "progress"}));
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
