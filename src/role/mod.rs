//! Broadcast roles
//!
//! A node plays one role: [`Streamer`] publishes a media session, [`Viewer`]
//! discovers channels through prisms and consumes them. Each role runs one
//! dispatch task that owns all of its state:
//!
//! ```text
//!     handle ── commands ──┐
//!     network events ──────┤
//!     channel events ──────┼──► dispatch task ──► EventBus
//!     transport events ────┤        │
//!     dial outcomes ───────┤        └──► SignalingChannel::send / MediaTransport
//!     timeout ticker ──────┘
//! ```
//!
//! Dials run in spawned tasks and re-enter the loop as [`DialOutcome`]s, so
//! no transition ever runs concurrently with another.

pub mod streamer;
pub mod viewer;


use std::future::Future;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::sync::mpsc;

use crate::config::{DialPolicy, NodeConfig};
use crate::error::{Error, Result};
use crate::events::{EventBus, EventKind, LifecycleEvent, SubscriptionHandle};
use crate::media::MediaEngine;
use crate::network::{dial_with_retry, PeerId, PeerNetwork};
use crate::protocol::constants::streamer_info_protocol;
use crate::protocol::SignalingMessage;
use crate::signaling::read_message;

pub use streamer::{Streamer, StreamerPhase};
pub use viewer::{ChannelSummary, PrismState, Viewer};

/// Which role a node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Streamer,
    Viewer,
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleKind::Streamer => f.write_str("streamer"),
            RoleKind::Viewer => f.write_str("viewer"),
        }
    }
}

/// Behavior shared by every role
pub trait Role {
    fn kind(&self) -> RoleKind;

    fn local_peer_id(&self) -> PeerId;

    /// Bus the role publishes lifecycle events on
    fn events(&self) -> &EventBus;

    fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.events().subscribe(kind, handler)
    }

    /// Start the peer network and the dispatch task
    fn start(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Close every session and channel, then stop the peer network
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

/// A node of either role
pub enum Node<N: PeerNetwork, E: MediaEngine> {
    Streamer(Streamer<N, E>),
    Viewer(Viewer<N, E>),
}

impl<N: PeerNetwork, E: MediaEngine> Node<N, E> {
    pub fn as_streamer(&self) -> Option<&Streamer<N, E>> {
        match self {
            Node::Streamer(streamer) => Some(streamer),
            Node::Viewer(_) => None,
        }
    }

    pub fn as_viewer(&self) -> Option<&Viewer<N, E>> {
        match self {
            Node::Viewer(viewer) => Some(viewer),
            Node::Streamer(_) => None,
        }
    }
}

impl<N: PeerNetwork, E: MediaEngine> Role for Node<N, E> {
    fn kind(&self) -> RoleKind {
        match self {
            Node::Streamer(streamer) => streamer.kind(),
            Node::Viewer(viewer) => viewer.kind(),
        }
    }

    fn local_peer_id(&self) -> PeerId {
        match self {
            Node::Streamer(streamer) => streamer.local_peer_id(),
            Node::Viewer(viewer) => viewer.local_peer_id(),
        }
    }

    fn events(&self) -> &EventBus {
        match self {
            Node::Streamer(streamer) => streamer.events(),
            Node::Viewer(viewer) => viewer.events(),
        }
    }

    async fn start(&mut self) -> Result<()> {
        match self {
            Node::Streamer(streamer) => streamer.start().await,
            Node::Viewer(viewer) => viewer.start().await,
        }
    }

    async fn stop(&mut self) {
        match self {
            Node::Streamer(streamer) => streamer.stop().await,
            Node::Viewer(viewer) => viewer.stop().await,
        }
    }
}

/// Build the node selected by `config`
pub fn create_node<N, E>(config: NodeConfig, network: N, engine: E) -> Node<N, E>
where
    N: PeerNetwork,
    E: MediaEngine,
{
    match config {
        NodeConfig::Streamer(config) => Node::Streamer(Streamer::new(config, network, engine)),
        NodeConfig::Viewer(config) => Node::Viewer(Viewer::new(config, network, engine)),
    }
}

/// Result of a dial spawned by a dispatch loop
#[derive(Debug)]
pub(crate) struct DialOutcome<S> {
    pub peer: PeerId,
    pub protocol: String,
    pub result: Result<S>,
}

/// Dial in the background and report back through `outcomes`
pub(crate) fn spawn_dial<N: PeerNetwork>(
    network: Arc<N>,
    peer: PeerId,
    protocol: String,
    policy: DialPolicy,
    outcomes: mpsc::UnboundedSender<DialOutcome<N::Stream>>,
) {
    tokio::spawn(async move {
        let result = dial_with_retry(network.as_ref(), &peer, &protocol, &policy).await;
        let _ = outcomes.send(DialOutcome {
            peer,
            protocol,
            result,
        });
    });
}

/// Ask a streamer which prism it is connected to
pub(crate) async fn resolve_prism<N: PeerNetwork>(
    network: &N,
    streamer: &PeerId,
    service_id: &str,
    policy: &DialPolicy,
) -> Result<PeerId> {
    let protocol = streamer_info_protocol(service_id);
    let stream = dial_with_retry(network, streamer, &protocol, policy).await?;
    let mut reader = BufReader::new(stream);

    match read_message(&mut reader).await? {
        Some(SignalingMessage::ConnectedPrismPeerId { prism_peer_id }) => {
            tracing::debug!(streamer = %streamer, prism = %prism_peer_id, "Resolved prism");
            Ok(prism_peer_id)
        }
        Some(other) => Err(Error::MalformedMessage(format!(
            "expected connectedPrismPeerId, got {}",
            other.topic()
        ))),
        None => Err(Error::ChannelClosed),
    }
}
