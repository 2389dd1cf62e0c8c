use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::relay::service::RelayEvent;
use crate::relay::upstream::{ConnectionId, UpstreamConnector};

/// In-memory connector that records every connection it is asked to open
/// and the commands written to each.
#[derive(Default)]
pub struct RecordingConnector {
    connections: Mutex<Vec<(ConnectionId, mpsc::UnboundedReceiver<String>)>>,
}

impl RecordingConnector {
    pub fn opened(&self) -> Vec<ConnectionId> {
        self.connections.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    /// Drains the commands written to connection `id` since the last call.
    pub fn sent(&self, id: ConnectionId) -> Vec<String> {
        let mut connections = self.connections.lock().unwrap();
        let mut sent = Vec::new();
        if let Some((_, rx)) = connections.iter_mut().find(|(opened, _)| *opened == id) {
            while let Ok(command) = rx.try_recv() {
                sent.push(command);
            }
        }
        sent
    }

    pub fn is_dropped(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().unwrap();
        connections
            .iter_mut()
            .find(|(opened, _)| *opened == id)
            .map(|(_, rx)| matches!(rx.try_recv(), Err(TryRecvError::Disconnected)))
            .unwrap_or(false)
    }
}

impl UpstreamConnector for RecordingConnector {
    fn open(&self, connection: ConnectionId, _events: mpsc::Sender<RelayEvent>) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().unwrap().push((connection, rx));
        tx
    }
}
