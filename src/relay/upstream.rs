use std::sync::Arc;
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RelayError;
use crate::relay::protocol::{UpstreamCommand, UpstreamFrame};
use crate::relay::registry::SubscriptionRegistry;
use crate::relay::service::RelayEvent;
use crate::relay::symbol::Symbol;

/// Identifies one connection attempt. Every reconnect gets a fresh id so
/// late events from a dead connection can be told apart.
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

/// Opens transport connections to the feed. `open` must not block: it
/// starts the connection in the background and reports progress as
/// `RelayEvent::Upstream` events. Strings pushed into the returned sender
/// are written to the feed; dropping the sender closes the connection.
pub trait UpstreamConnector: Send + Sync + 'static {
    fn open(&self, connection: ConnectionId, events: mpsc::Sender<RelayEvent>) -> mpsc::UnboundedSender<String>;
}

struct LiveConnection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
}

/// Lifecycle of the single feed connection: `Connecting -> Open -> Closed`,
/// with a fixed-delay reconnect after every close.
pub struct UpstreamLink {
    connector: Arc<dyn UpstreamConnector>,
    events: mpsc::Sender<RelayEvent>,
    reconnect_delay: Duration,
    state: ReadyState,
    connection: Option<LiveConnection>,
    next_id: ConnectionId,
}

impl UpstreamLink {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        events: mpsc::Sender<RelayEvent>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            events,
            reconnect_delay,
            state: ReadyState::Closed,
            connection: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> ReadyState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ReadyState::Open
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|c| c.id)
    }

    /// Starts a new connection unless one is already open or in flight.
    pub fn connect(&mut self) -> bool {
        if matches!(self.state, ReadyState::Connecting | ReadyState::Open) {
            debug!("Upstream connect skipped, link is {:?}", self.state);
            return false;
        }

        let id = self.next_id;
        self.next_id += 1;

        info!("Connecting to upstream feed (connection {})", id);
        let outbound = self.connector.open(id, self.events.clone());
        self.connection = Some(LiveConnection { id, outbound });
        self.state = ReadyState::Connecting;
        true
    }

    /// Marks the link open and replays the registry. Returns the number of
    /// subscribe commands sent.
    pub fn on_open(&mut self, id: ConnectionId, registry: &SubscriptionRegistry) -> usize {
        if !self.is_current(id) {
            debug!("Ignoring open from stale upstream connection {}", id);
            return 0;
        }

        self.state = ReadyState::Open;
        if registry.is_empty() {
            info!("Connected to upstream feed (connection {})", id);
        } else {
            info!(
                "Connected to upstream feed (connection {}), replaying {} symbols",
                id,
                registry.len()
            );
        }

        registry
            .resubscribe_all()
            .into_iter()
            .filter(|symbol| self.subscribe(symbol))
            .count()
    }

    pub fn on_message(&self, id: ConnectionId, raw: String) -> Option<UpstreamFrame> {
        if !self.is_current(id) {
            return None;
        }

        let frame = UpstreamFrame::decode(raw);
        if frame.is_none() {
            debug!("Dropping malformed upstream payload");
        }
        frame
    }

    pub fn on_error(&self, id: ConnectionId, message: &str) {
        if self.is_current(id) {
            error!("Upstream feed error (connection {}): {}", id, message);
        } else {
            debug!("Error from stale upstream connection {}: {}", id, message);
        }
    }

    /// Marks the link closed and schedules the next connect. Returns `false`
    /// for events from a connection that was already replaced.
    pub fn on_close(&mut self, id: ConnectionId) -> bool {
        if !self.is_current(id) {
            debug!("Ignoring close from stale upstream connection {}", id);
            return false;
        }

        self.state = ReadyState::Closed;
        self.connection = None;
        warn!(
            "Upstream feed closed. Reconnecting in {}s...",
            self.reconnect_delay.as_secs_f64()
        );
        self.schedule_reconnect();
        true
    }

    pub fn subscribe(&self, symbol: &Symbol) -> bool {
        self.send(UpstreamCommand::Subscribe { symbol: symbol.clone() })
    }

    pub fn unsubscribe(&self, symbol: &Symbol) -> bool {
        self.send(UpstreamCommand::Unsubscribe { symbol: symbol.clone() })
    }

    /// Drops the live connection without scheduling a reconnect.
    pub fn shutdown(&mut self) {
        if self.connection.take().is_some() {
            info!("Upstream link shut down");
        }
        self.state = ReadyState::Closed;
    }

    fn is_current(&self, id: ConnectionId) -> bool {
        self.connection_id() == Some(id)
    }

    // Only sent while open; the registry is replayed on the next open.
    fn send(&self, command: UpstreamCommand) -> bool {
        if self.state != ReadyState::Open {
            debug!("Upstream not open, deferring {:?} to next resubscribe", command);
            return false;
        }
        let Some(connection) = &self.connection else {
            return false;
        };

        match serde_json::to_string(&command) {
            Ok(json) => {
                info!("Upstream <- {}", json);
                connection.outbound.send(json).is_ok()
            }
            Err(e) => {
                error!("Failed to encode upstream command: {}", e);
                false
            }
        }
    }

    fn schedule_reconnect(&self) {
        let events = self.events.clone();
        let delay = self.reconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events.send(RelayEvent::Reconnect).await.is_err() {
                debug!("Relay stopped before reconnect fired");
            }
        });
    }
}

/// WebSocket connector for the real feed.
pub struct FeedConnector {
    url: String,
}

impl FeedConnector {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

impl UpstreamConnector for FeedConnector {
    fn open(&self, connection: ConnectionId, events: mpsc::Sender<RelayEvent>) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = self.url.clone();

        tokio::spawn(async move {
            if let Err(e) = run_feed_connection(&url, connection, rx, &events).await {
                let _ = events
                    .send(RelayEvent::upstream(connection, UpstreamEvent::Error(e.to_string())))
                    .await;
            }
            let _ = events
                .send(RelayEvent::upstream(connection, UpstreamEvent::Closed))
                .await;
        });

        tx
    }
}

async fn run_feed_connection(
    url: &str,
    connection: ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: &mpsc::Sender<RelayEvent>,
) -> Result<(), RelayError> {
    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();

    if events
        .send(RelayEvent::upstream(connection, UpstreamEvent::Opened))
        .await
        .is_err()
    {
        return Err(RelayError::Stopped);
    }

    loop {
        tokio::select! {
            command = outbound.recv() => {
                match command {
                    Some(text) => write.send(Message::Text(text)).await?,
                    None => {
                        // Link dropped this connection.
                        let _ = write.close().await;
                        return Ok(());
                    }
                }
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Close(frame))) => {
                        info!("Upstream feed sent close frame: {:?}", frame);
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                };

                if events
                    .send(RelayEvent::upstream(connection, UpstreamEvent::Message(text)))
                    .await
                    .is_err()
                {
                    return Err(RelayError::Stopped);
                }
            }
        }
    }
}
