use std::mem;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::relay::protocol::ViewerReply;
use crate::relay::symbol::Symbol;

pub type SessionId = Uuid;

/// Relay-side state of one viewer connection. Closing consumes the session,
/// so a closed session cannot be observed.
pub struct ViewerSession {
    id: SessionId,
    peer_addr: String,
    bound_symbol: Option<Symbol>,
    outbound: mpsc::Sender<String>,
}

impl ViewerSession {
    pub fn new(id: SessionId, peer_addr: String, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id,
            peer_addr,
            bound_symbol: None,
            outbound,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn bound_symbol(&self) -> Option<&Symbol> {
        self.bound_symbol.as_ref()
    }

    /// Binds to `next` and hands back the previous binding.
    pub fn bind(&mut self, next: Symbol) -> Option<Symbol> {
        mem::replace(&mut self.bound_symbol, Some(next))
    }

    /// Ends the session, returning the symbol it still held.
    pub fn close(self) -> Option<Symbol> {
        self.bound_symbol
    }

    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Queues a payload without waiting. A full or closed queue drops the
    /// payload for this viewer only.
    pub fn send(&self, payload: String) -> bool {
        match self.outbound.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Viewer {} ({}) is lagging, dropped message", self.id, self.peer_addr);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Viewer {} ({}) is gone, skipped message", self.id, self.peer_addr);
                false
            }
        }
    }

    pub fn reply(&self, reply: &ViewerReply) -> bool {
        match serde_json::to_string(reply) {
            Ok(json) => self.send(json),
            Err(e) => {
                warn!("Failed to encode reply for viewer {}: {}", self.id, e);
                false
            }
        }
    }
}
