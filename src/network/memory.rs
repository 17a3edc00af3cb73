//! In-process peer network
//!
//! Every node created from the same [`MemoryHub`] discovers every other
//! started node, and dials are served by `tokio::io::duplex` pipes. Useful
//! for running a streamer, a prism and viewers inside one process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use super::{NetworkEvent, PeerId, PeerNetwork};
use crate::error::{Error, Result};

/// Default pipe capacity for dialed streams
const PIPE_CAPACITY: usize = 64 * 1024;

type EventTx = mpsc::UnboundedSender<NetworkEvent<DuplexStream>>;

#[derive(Default)]
struct NodeSlot {
    protocols: HashSet<String>,
    events: Option<EventTx>,
}

/// Shared switchboard for in-process nodes
#[derive(Clone, Default)]
pub struct MemoryHub {
    nodes: Arc<Mutex<HashMap<PeerId, NodeSlot>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node with the given identity
    pub fn node(&self, id: impl Into<PeerId>) -> MemoryNetwork {
        let id = id.into();
        self.nodes.lock().entry(id.clone()).or_default();
        MemoryNetwork {
            id,
            hub: self.clone(),
        }
    }

    /// Simulate loss of the link between two nodes
    ///
    /// Both sides receive `Disconnected`. Streams already dialed stay open.
    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        let nodes = self.nodes.lock();
        if let Some(tx) = nodes.get(a).and_then(|slot| slot.events.as_ref()) {
            let _ = tx.send(NetworkEvent::Disconnected(b.clone()));
        }
        if let Some(tx) = nodes.get(b).and_then(|slot| slot.events.as_ref()) {
            let _ = tx.send(NetworkEvent::Disconnected(a.clone()));
        }
    }
}

/// One node attached to a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryNetwork {
    id: PeerId,
    hub: MemoryHub,
}

impl PeerNetwork for MemoryNetwork {
    type Stream = DuplexStream;

    fn local_peer_id(&self) -> PeerId {
        self.id.clone()
    }

    fn handle(&self, protocol: &str) {
        self.hub
            .nodes
            .lock()
            .entry(self.id.clone())
            .or_default()
            .protocols
            .insert(protocol.to_string());
    }

    async fn start(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent<DuplexStream>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut nodes = self.hub.nodes.lock();

        for (peer, slot) in nodes.iter() {
            if *peer == self.id {
                continue;
            }
            if let Some(other) = slot.events.as_ref() {
                let _ = other.send(NetworkEvent::Discovered(self.id.clone()));
                let _ = tx.send(NetworkEvent::Discovered(peer.clone()));
            }
        }

        nodes.entry(self.id.clone()).or_default().events = Some(tx);
        tracing::debug!(peer = %self.id.short(), "Memory node started");
        Ok(rx)
    }

    async fn dial(&self, peer: &PeerId, protocol: &str) -> Result<DuplexStream> {
        let nodes = self.hub.nodes.lock();
        let dial_error = |reason: &str| Error::DialFailure {
            peer: peer.clone(),
            protocol: protocol.to_string(),
            reason: reason.to_string(),
        };

        let target = nodes.get(peer).ok_or_else(|| dial_error("unknown peer"))?;
        let target_tx = target
            .events
            .as_ref()
            .ok_or_else(|| dial_error("peer not started"))?;
        if !target.protocols.contains(protocol) {
            return Err(dial_error("protocol not supported"));
        }

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        target_tx
            .send(NetworkEvent::Inbound {
                peer: self.id.clone(),
                protocol: protocol.to_string(),
                stream: remote,
            })
            .map_err(|_| dial_error("peer not started"))?;
        let _ = target_tx.send(NetworkEvent::Connected(self.id.clone()));

        if let Some(own) = nodes.get(&self.id).and_then(|slot| slot.events.as_ref()) {
            let _ = own.send(NetworkEvent::Connected(peer.clone()));
        }

        Ok(local)
    }

    async fn stop(&self) {
        let mut nodes = self.hub.nodes.lock();
        if let Some(slot) = nodes.get_mut(&self.id) {
            slot.events = None;
        }
        for (peer, slot) in nodes.iter() {
            if *peer == self.id {
                continue;
            }
            if let Some(tx) = slot.events.as_ref() {
                let _ = tx.send(NetworkEvent::Disconnected(self.id.clone()));
            }
        }
        tracing::debug!(peer = %self.id.short(), "Memory node stopped");
    }
}
