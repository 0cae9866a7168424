//! Kite streaming feed connection
//!
//! One long-lived receive loop. Binary frames are decoded and handed to the
//! publisher before the next frame is read; text frames are JSON control
//! messages. Any connect/read failure reconnects after a fixed delay and
//! replays the retained subscription.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::bus::{publish_or_warn, EventPublisher};
use crate::config::FeedConfig;
use crate::domain::{Tick, TickMode};
use crate::error::{BridgeError, Result};
use crate::feed::decoder::decode;
use crate::gateway::AccessToken;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const TEXT_PREVIEW_CHARS: usize = 200;

/// Instruments and mode replayed on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub instruments: Vec<u32>,
    pub mode: TickMode,
}

impl Subscription {
    pub fn new(instruments: Vec<u32>, mode: TickMode) -> Self {
        Self { instruments, mode }
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// `subscribe` then `mode` control messages.
    pub fn control_messages(&self) -> [Value; 2] {
        [
            json!({"a": "subscribe", "v": self.instruments}),
            json!({"a": "mode", "v": [self.mode.as_wire(), self.instruments]}),
        ]
    }
}

#[derive(Debug, Serialize)]
struct TickEvent<'a> {
    event: &'static str,
    #[serde(flatten)]
    tick: &'a Tick,
}

pub struct KiteTicker {
    ws_url: String,
    api_key: String,
    reconnect_delay: Duration,
    ping_interval: Duration,
    session: watch::Receiver<Option<AccessToken>>,
    subscription: RwLock<Subscription>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    live_control: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl KiteTicker {
    pub fn new(
        config: &FeedConfig,
        api_key: &str,
        session: watch::Receiver<Option<AccessToken>>,
        subscription: Subscription,
        publisher: Arc<dyn EventPublisher>,
        topic: &str,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            ws_url: config.ws_url.clone(),
            api_key: api_key.to_string(),
            reconnect_delay: config.reconnect_delay(),
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            session,
            subscription: RwLock::new(subscription),
            publisher,
            topic: topic.to_string(),
            live_control: Mutex::new(None),
            connected: AtomicBool::new(false),
            stop_tx,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub async fn subscription(&self) -> Subscription {
        self.subscription.read().await.clone()
    }

    /// Replace the subscription; applied immediately when connected and
    /// replayed after every reconnect.
    pub async fn subscribe(&self, instruments: Vec<u32>, mode: TickMode) {
        let sub = Subscription::new(instruments, mode);
        *self.subscription.write().await = sub.clone();
        info!(
            "Feed subscription set to {} instruments ({})",
            sub.instruments.len(),
            sub.mode
        );

        let control = self
            .live_control
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(tx) = control {
            for msg in sub.control_messages() {
                let _ = tx.send(Message::Text(msg.to_string()));
            }
        }
    }

    /// Disable reconnects, then close the live connection.
    pub fn stop(&self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        info!("Feed stop requested");
    }

    fn build_url(&self, token: &AccessToken) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| BridgeError::Internal(format!("Invalid WebSocket URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("access_token", token.expose());
        Ok(url)
    }

    /// Run until [`KiteTicker::stop`] is called.
    pub async fn run(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        info!("Starting feed loop");

        loop {
            if self.is_stopped() {
                break;
            }

            let Some(token) = self.wait_for_session(&mut stop_rx).await else {
                break;
            };

            match self.connect_and_stream(&token, &mut stop_rx).await {
                Ok(()) => info!("Feed connection closed"),
                Err(e) => error!("Feed connection error: {}", e),
            }
            self.connected.store(false, Ordering::SeqCst);
            *self.live_control.lock().unwrap_or_else(|e| e.into_inner()) = None;

            // Checked before every reconnect so shutdown never races a new connection
            if self.is_stopped() {
                break;
            }

            info!("Reconnecting feed in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = stop_rx.changed() => {}
            }
        }

        info!("Feed loop stopped");
    }

    /// Wait until a session token is available; `None` means stop was requested.
    async fn wait_for_session(&self, stop_rx: &mut watch::Receiver<bool>) -> Option<AccessToken> {
        let mut session = self.session.clone();
        loop {
            if let Some(token) = session.borrow_and_update().clone() {
                return Some(token);
            }
            debug!("Feed waiting for a brokerage session");
            tokio::select! {
                changed = session.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return None;
                    }
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        token: &AccessToken,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let url = self.build_url(token)?;
        info!("Connecting to feed at {}", self.ws_url);

        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(url.as_str()),
        )
        .await
        .map_err(|_| BridgeError::Internal("Feed connection timeout".to_string()))??;

        let (mut write, mut read) = ws_stream.split();
        self.connected.store(true, Ordering::SeqCst);
        info!("Feed connected");

        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        *self.live_control.lock().unwrap_or_else(|e| e.into_inner()) = Some(control_tx);

        let sub = self.subscription().await;
        if !sub.is_empty() {
            for msg in sub.control_messages() {
                write.send(Message::Text(msg.to_string())).await?;
            }
            info!(
                "Resubscribed to {} instruments ({})",
                sub.instruments.len(),
                sub.mode
            );
        }

        let mut session = self.session.clone();
        session.borrow_and_update();
        let mut ping_interval = interval(self.ping_interval);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(frame))) => {
                            self.handle_frame(&frame).await;
                        }
                        Some(Ok(Message::Text(text))) => {
                            handle_text(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Received close frame from feed");
                            break;
                        }
                        Some(Err(e)) => {
                            return Err(e.into());
                        }
                        None => {
                            info!("Feed stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
                Some(msg) = control_rx.recv() => {
                    write.send(msg).await?;
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(vec![])).await?;
                    debug!("Sent feed ping");
                }
                changed = session.changed() => {
                    if changed.is_err() || session.borrow().as_ref() != Some(token) {
                        info!("Brokerage session changed; dropping feed connection");
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_frame(&self, frame: &[u8]) {
        let ticks = decode(frame);
        if ticks.is_empty() {
            return;
        }
        debug!("Decoded {} ticks", ticks.len());
        for tick in &ticks {
            let event = TickEvent { event: "TICK", tick };
            publish_or_warn(self.publisher.as_ref(), &self.topic, &event).await;
        }
    }
}

fn handle_text(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(msg) if msg.get("type").and_then(Value::as_str) == Some("error") => {
            warn!("Feed error message: {}", msg);
        }
        Ok(_) => debug!("Feed message: {}", preview(text, TEXT_PREVIEW_CHARS)),
        Err(_) => debug!("Ignoring non-JSON feed text"),
    }
}

/// At most `max_chars` characters of `text`, cut on a char boundary.
fn preview(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(end, _)| &text[..end])
}
