//! One websocket session.
//!
//! [`run`] drives the socket: inbound frames, live events from the engine's
//! bus and the heartbeat share a single `select!` loop. The protocol state
//! lives in [`Session`], which never touches the socket and can be driven
//! directly in tests. Storage work runs on tokio's blocking pool so a slow
//! SQLite call never stalls the async workers.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use gatehouse_core::Event;
use gatehouse_core::metrics::{self, SUBSCRIPTIONS_TOTAL};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinError;
use tokio::time::Instant;

use super::{MSG_STORE_FAILED, RelayEngine};
use super::message::{self, ClientMessage};
use super::subscription::Subscriptions;

/// Ping interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Close the session after this long without any inbound frame.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Largest text frame the session will parse.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Protocol state of one connection.
pub struct Session {
    engine: Arc<RelayEngine>,
    subscriptions: Subscriptions,
}

impl Session {
    pub fn new(engine: Arc<RelayEngine>) -> Self {
        Self {
            engine,
            subscriptions: Subscriptions::new(),
        }
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Handle one inbound text frame and return the replies, in order.
    pub async fn handle_text(&mut self, text: &str) -> Vec<Value> {
        if text.len() > MAX_MESSAGE_SIZE {
            return vec![message::notice(&format!(
                "invalid: message too large ({} bytes, max {MAX_MESSAGE_SIZE})",
                text.len()
            ))];
        }

        match ClientMessage::parse(text) {
            Ok(msg) => self.handle_message(msg).await,
            Err(refusal) => vec![refusal.into_reply()],
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Vec<Value> {
        match msg {
            ClientMessage::Event(raw) => {
                let id = raw
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match self.on_engine(move |engine| engine.handle_event(&raw)).await {
                    Ok(reply) => vec![reply],
                    Err(e) => {
                        tracing::error!(event_id = %id, error = %e, "event task failed");
                        vec![message::ok(&id, false, MSG_STORE_FAILED)]
                    }
                }
            }
            ClientMessage::Req { sub_id, filters } => {
                if let Err(reason) = self.subscriptions.insert(&sub_id, filters.clone()) {
                    return vec![message::closed(&sub_id, &reason)];
                }
                metrics::increment(SUBSCRIPTIONS_TOTAL, 1);

                match self.on_engine(move |engine| engine.query(&filters)).await {
                    Ok(Ok(events)) => {
                        tracing::debug!(sub_id = %sub_id, stored = events.len(), "subscription opened");
                        let mut replies: Vec<Value> = events
                            .iter()
                            .map(|event| message::event(&sub_id, event))
                            .collect();
                        replies.push(message::eose(&sub_id));
                        replies
                    }
                    Ok(Err(e)) => self.query_failed(&sub_id, &e),
                    Err(e) => self.query_failed(&sub_id, &e),
                }
            }
            ClientMessage::Count { sub_id, filters } => {
                match self.on_engine(move |engine| engine.count(&filters)).await {
                    Ok(Ok(n)) => vec![message::count(&sub_id, n)],
                    Ok(Err(e)) => count_failed(&sub_id, &e),
                    Err(e) => count_failed(&sub_id, &e),
                }
            }
            ClientMessage::Close(sub_id) => {
                if self.subscriptions.remove(&sub_id) {
                    tracing::debug!(sub_id = %sub_id, "subscription closed");
                }
                Vec::new()
            }
        }
    }

    /// Run a storage-bound engine call on the blocking pool.
    async fn on_engine<T, F>(&self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce(&RelayEngine) -> T + Send + 'static,
        T: Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine)).await
    }

    fn query_failed(&mut self, sub_id: &str, error: &dyn Display) -> Vec<Value> {
        tracing::error!(sub_id = %sub_id, error = %error, "subscription query failed");
        self.subscriptions.remove(sub_id);
        vec![message::closed(sub_id, "error: could not query events")]
    }

    /// `EVENT` frames for every open subscription matching a live event.
    pub fn live_replies(&self, event: &Event) -> Vec<Value> {
        self.subscriptions
            .matching(event)
            .into_iter()
            .map(|sub_id| message::event(sub_id, event))
            .collect()
    }
}

/// Drive a websocket session until the client leaves or goes quiet.
///
/// `on_connect` and `on_disconnect` fire exactly once each.
pub async fn run(socket: WebSocket, remote: SocketAddr, engine: Arc<RelayEngine>) {
    let hooks = Arc::clone(engine.hooks());
    hooks.on_connect(remote);

    let mut live = engine.subscribe();
    let mut session = Session::new(engine);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // consume first immediate tick
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::debug!(remote = %remote, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                };
                last_seen = Instant::now();

                let replies = match frame {
                    Message::Text(text) => session.handle_text(text.as_str()).await,
                    Message::Binary(_) => {
                        vec![message::notice("invalid: binary frames are not supported")]
                    }
                    Message::Close(_) => break,
                    // axum answers pings itself
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                if send_all(&mut ws_tx, replies).await.is_err() {
                    break;
                }
            }
            received = live.recv() => {
                match received {
                    Ok(event) => {
                        let replies = session.live_replies(&event);
                        if send_all(&mut ws_tx, replies).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(remote = %remote, skipped, "session lagged behind live events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= CLIENT_TIMEOUT {
                    tracing::debug!(remote = %remote, "closing idle session");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                tracing::trace!(remote = %remote, "sent ping");
            }
        }
    }

    let _ = ws_tx.close().await;
    hooks.on_disconnect(remote);
}

fn count_failed(sub_id: &str, error: &dyn Display) -> Vec<Value> {
    tracing::error!(sub_id = %sub_id, error = %error, "count query failed");
    vec![message::closed(sub_id, "error: could not count events")]
}

async fn send_all<S>(sink: &mut S, replies: Vec<Value>) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    for reply in replies {
        sink.send(Message::Text(reply.to_string().into())).await?;
    }
    Ok(())
}
