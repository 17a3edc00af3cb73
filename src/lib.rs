//! Peer-to-peer live broadcast signaling
//!
//! A streamer publishes a WebRTC media session to a *prism*, a relay peer
//! that keeps a directory of live channels, and viewers discover channels
//! through prisms and receive the stream. This crate implements the
//! signaling side of all of it:
//!
//! - [`Streamer`] and [`Viewer`] roles, each driven by one dispatch task
//! - A newline-delimited JSON envelope codec for the signaling topics
//! - Per-viewer [`ChannelDirectory`] of what each prism broadcasts
//! - SDP rewriting that moves a preferred video codec to the front
//! - An [`EventBus`] publishing lifecycle events to the application
//!
//! The peer network and the media engine are collaborators behind the
//! [`PeerNetwork`] and [`MediaEngine`] traits. [`MemoryHub`] provides an
//! in-process network for running every role inside one process.
//!
//! # Architecture
//!
//! ```text
//!   Streamer ──/controller/<sid>──► Prism ◄──/controller/<sid>── Viewer
//!      ▲                              │                            │
//!      └──/streamer/<sid>/unified-plan┘                            │
//!      ▲                                                           │
//!      └──────────────/streamer/<sid>/info─────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use casto::{create_node, EventKind, MemoryHub, NodeConfig, Role, ViewerConfig};
//! # use casto::media::MediaEngine;
//!
//! # async fn example<E: MediaEngine>(engine: E) -> casto::Result<()> {
//! let hub = MemoryHub::new();
//! let config = NodeConfig::Viewer(ViewerConfig::default().streamer_peer_id("QmStreamer"));
//! let mut node = create_node(config, hub.node("QmViewer"), engine);
//!
//! node.subscribe(EventKind::ChannelAdded, |event| println!("{:?}", event));
//! node.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod role;
pub mod session;
pub mod signaling;
pub mod stats;

pub use config::{DialPolicy, NodeConfig, PeerConnectionConfig, StreamerConfig, ViewerConfig};
pub use error::{Error, Result};
pub use events::{EventBus, EventKind, LifecycleEvent, SubscriptionHandle};
pub use media::{
    IceCandidate, MediaEngine, MediaStream, MediaTrack, MediaTransport, SessionDescription,
    TrackKind,
};
pub use network::{MemoryHub, MemoryNetwork, NetworkEvent, PeerId, PeerNetwork};
pub use protocol::{ChannelInfo, SignalingMessage};
pub use registry::{Channel, ChannelDirectory};
pub use role::{
    create_node, ChannelSummary, Node, PrismState, Role, RoleKind, Streamer, StreamerPhase, Viewer,
};
pub use session::{NegotiationState, Session};
pub use signaling::SignalingChannel;
