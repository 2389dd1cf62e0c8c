use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{Config, EVENT_CHANNEL_SIZE};
use crate::error::RelayError;
use crate::relay::dispatcher::{FanoutDispatcher, TickBatches};
use crate::relay::protocol::{UpstreamFrame, ViewerCommand, ViewerReply};
use crate::relay::registry::SubscriptionRegistry;
use crate::relay::session::{SessionId, ViewerSession};
use crate::relay::symbol::Symbol;
use crate::relay::upstream::{ConnectionId, UpstreamConnector, UpstreamEvent, UpstreamLink};

/// Everything the dispatch loop reacts to. Network tasks never touch relay
/// state directly; they post one of these instead.
#[derive(Debug)]
pub enum RelayEvent {
    Upstream {
        connection: ConnectionId,
        event: UpstreamEvent,
    },
    Reconnect,
    Accept {
        session: SessionId,
        peer_addr: String,
        outbound: mpsc::Sender<String>,
    },
    Command {
        session: SessionId,
        text: String,
    },
    Close {
        session: SessionId,
    },
    Stop,
}

impl RelayEvent {
    pub fn upstream(connection: ConnectionId, event: UpstreamEvent) -> Self {
        RelayEvent::Upstream { connection, event }
    }
}

/// Read-only view of relay state for status endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySnapshot {
    pub upstream_ready: bool,
    pub subscribed: Vec<Symbol>,
    pub symbol_viewers: BTreeMap<Symbol, usize>,
    pub viewers: usize,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub reconnect_delay: Duration,
    pub viewer_queue_size: usize,
}

impl From<&Config> for RelaySettings {
    fn from(config: &Config) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            viewer_queue_size: config.viewer_queue_size,
        }
    }
}

/// Cloneable front door to the relay used by connection handlers.
#[derive(Clone)]
pub struct RelayHandle {
    events: mpsc::Sender<RelayEvent>,
    snapshot: watch::Receiver<RelaySnapshot>,
    viewer_queue_size: usize,
}

impl RelayHandle {
    pub(crate) fn new(
        events: mpsc::Sender<RelayEvent>,
        snapshot: watch::Receiver<RelaySnapshot>,
        viewer_queue_size: usize,
    ) -> Self {
        Self {
            events,
            snapshot,
            viewer_queue_size,
        }
    }

    /// Registers a new viewer. Messages for it arrive on the returned receiver.
    pub async fn accept(&self, peer_addr: String) -> Result<(SessionId, mpsc::Receiver<String>), RelayError> {
        let session = Uuid::new_v4();
        let (outbound, rx) = mpsc::channel(self.viewer_queue_size);
        self.post(RelayEvent::Accept { session, peer_addr, outbound }).await?;
        Ok((session, rx))
    }

    pub async fn command(&self, session: SessionId, text: String) -> Result<(), RelayError> {
        self.post(RelayEvent::Command { session, text }).await
    }

    pub async fn close(&self, session: SessionId) -> Result<(), RelayError> {
        self.post(RelayEvent::Close { session }).await
    }

    pub async fn stop(&self) -> Result<(), RelayError> {
        self.post(RelayEvent::Stop).await
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        self.snapshot.borrow().clone()
    }

    async fn post(&self, event: RelayEvent) -> Result<(), RelayError> {
        self.events.send(event).await.map_err(|_| RelayError::Stopped)
    }
}

/// Owns all relay state. Runs as a single task so registry and session
/// mutations are serialized.
pub struct RelayService {
    registry: SubscriptionRegistry,
    upstream: UpstreamLink,
    sessions: HashMap<SessionId, ViewerSession>,
    dispatcher: FanoutDispatcher,
    snapshot: watch::Sender<RelaySnapshot>,
}

impl RelayService {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        events: mpsc::Sender<RelayEvent>,
        snapshot: watch::Sender<RelaySnapshot>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            registry: SubscriptionRegistry::new(),
            upstream: UpstreamLink::new(connector, events, reconnect_delay),
            sessions: HashMap::new(),
            dispatcher: FanoutDispatcher::new(),
            snapshot,
        }
    }

    /// Spawns the dispatch loop and opens the upstream connection.
    pub fn start(settings: RelaySettings, connector: Arc<dyn UpstreamConnector>) -> (RelayHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(RelaySnapshot::default());

        let service = RelayService::new(connector, events_tx.clone(), snapshot_tx, settings.reconnect_delay);
        let task = tokio::spawn(service.run(events_rx));

        (RelayHandle::new(events_tx, snapshot_rx, settings.viewer_queue_size), task)
    }

    async fn run(mut self, mut events: mpsc::Receiver<RelayEvent>) {
        info!("Relay dispatch loop started");
        self.upstream.connect();
        self.publish_snapshot();

        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        self.stop();
        info!("Relay dispatch loop stopped");
    }

    /// Applies one event. Returns `false` once the relay should stop.
    pub fn handle_event(&mut self, event: RelayEvent) -> bool {
        let changes_state = !matches!(
            event,
            RelayEvent::Upstream { event: UpstreamEvent::Message(_), .. }
        );

        match event {
            RelayEvent::Upstream { connection, event } => self.on_upstream(connection, event),
            RelayEvent::Reconnect => {
                self.upstream.connect();
            }
            RelayEvent::Accept { session, peer_addr, outbound } => self.accept(session, peer_addr, outbound),
            RelayEvent::Command { session, text } => self.handle_command(session, &text),
            RelayEvent::Close { session } => self.handle_close(session),
            RelayEvent::Stop => return false,
        }

        if changes_state {
            self.publish_snapshot();
        }
        true
    }

    pub fn accept(&mut self, id: SessionId, peer_addr: String, outbound: mpsc::Sender<String>) {
        info!("Viewer {} connected from {}", id, peer_addr);
        self.sessions.insert(id, ViewerSession::new(id, peer_addr, outbound));
    }

    pub fn handle_command(&mut self, id: SessionId, text: &str) {
        let Some(session) = self.sessions.get_mut(&id) else {
            warn!("Command for unknown viewer {}", id);
            return;
        };

        let reply = match ViewerCommand::decode(text) {
            Ok(ViewerCommand::SetSymbol(next)) => {
                let prev = session.bind(next.clone());

                // A rebind to the same symbol keeps its single reference.
                if prev.as_ref() != Some(&next) {
                    if self.registry.acquire(&next) {
                        self.upstream.subscribe(&next);
                    }
                    // Release strictly after acquire.
                    if let Some(prev) = prev {
                        if self.registry.release(&prev) {
                            self.upstream.unsubscribe(&prev);
                        }
                    }
                }

                info!("Viewer {} bound to {}", id, next);
                ViewerReply::bound(next)
            }
            Err(e) => {
                warn!("Rejected command from viewer {}: {}", id, e);
                ViewerReply::rejected(&e)
            }
        };

        session.reply(&reply);
    }

    pub fn handle_close(&mut self, id: SessionId) {
        let Some(session) = self.sessions.remove(&id) else {
            debug!("Close for unknown viewer {}", id);
            return;
        };

        let peer_addr = session.peer_addr().to_string();
        if let Some(symbol) = session.close() {
            if self.registry.release(&symbol) {
                self.upstream.unsubscribe(&symbol);
            }
        }
        info!("Viewer {} ({}) disconnected", id, peer_addr);
    }

    pub fn snapshot(&self) -> RelaySnapshot {
        let mut symbol_viewers = BTreeMap::new();
        for (symbol, count) in self.registry.iter() {
            symbol_viewers.insert(symbol.clone(), count);
        }

        RelaySnapshot {
            upstream_ready: self.upstream.is_ready(),
            subscribed: self.registry.resubscribe_all(),
            symbol_viewers,
            viewers: self.sessions.len(),
        }
    }

    fn on_upstream(&mut self, connection: ConnectionId, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Opened => {
                let replayed = self.upstream.on_open(connection, &self.registry);
                if replayed > 0 {
                    info!("Resubscribed {} symbols upstream", replayed);
                }
            }
            UpstreamEvent::Message(raw) => match self.upstream.on_message(connection, raw) {
                Some(UpstreamFrame::Trades(ticks)) => {
                    let batches = TickBatches::group(ticks);
                    let delivered = self.dispatcher.dispatch(self.sessions.values(), &batches);
                    debug!(
                        "Fanned out {} symbols to {} viewers",
                        batches.symbol_count(),
                        delivered
                    );
                }
                Some(UpstreamFrame::Passthrough(raw)) => {
                    self.dispatcher.broadcast(self.sessions.values(), &raw);
                }
                None => {}
            },
            UpstreamEvent::Error(message) => self.upstream.on_error(connection, &message),
            UpstreamEvent::Closed => {
                self.upstream.on_close(connection);
            }
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(self.snapshot());
    }

    fn stop(&mut self) {
        self.upstream.shutdown();
        let viewers = self.sessions.len();
        self.sessions.clear();
        self.publish_snapshot();
        info!("Relay stopped, dropped {} viewer sessions", viewers);
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn upstream(&self) -> &UpstreamLink {
        &self.upstream
    }
}
