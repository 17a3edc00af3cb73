//! Peer network layer interface
//!
//! The overlay itself (identity, discovery, multiplexed transports) lives
//! outside this crate. Roles only need to register sub-protocols, receive
//! discovery/connect/disconnect/inbound-stream events, and dial a peer on a
//! named sub-protocol to obtain a duplex byte stream.

pub mod memory;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::config::DialPolicy;
use crate::error::{Error, Result};

pub use memory::{MemoryHub, MemoryNetwork};

/// Opaque peer-network identity, compared by its string form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Events emitted by a started peer network
#[derive(Debug)]
pub enum NetworkEvent<S> {
    /// A peer became known through discovery
    Discovered(PeerId),
    /// A connection to the peer was established
    Connected(PeerId),
    /// The connection to the peer was lost
    Disconnected(PeerId),
    /// A remote peer opened a stream on a protocol registered with `handle`
    Inbound {
        peer: PeerId,
        protocol: String,
        stream: S,
    },
}

/// Peer network collaborator
///
/// Implementations deliver inbound streams only for protocols registered
/// through [`PeerNetwork::handle`] before [`PeerNetwork::start`].
pub trait PeerNetwork: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Identity of the local node
    fn local_peer_id(&self) -> PeerId;

    /// Register interest in inbound streams for a sub-protocol
    fn handle(&self, protocol: &str);

    /// Start the node and return its event stream
    fn start(
        &self,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<NetworkEvent<Self::Stream>>>> + Send;

    /// Open a stream to `peer` speaking `protocol`
    fn dial(&self, peer: &PeerId, protocol: &str)
        -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Stop the node
    fn stop(&self) -> impl Future<Output = ()> + Send;
}

/// Dial with bounded exponential backoff
///
/// Returns the last `DialFailure` once `policy.attempts` dials have failed.
pub async fn dial_with_retry<N: PeerNetwork>(
    network: &N,
    peer: &PeerId,
    protocol: &str,
    policy: &DialPolicy,
) -> Result<N::Stream> {
    let attempts = policy.attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match network.dial(peer, protocol).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    protocol = protocol,
                    attempt = attempt,
                    error = %e,
                    "Dial failed"
                );
                last_error = Some(e);
            }
        }

        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(policy.max_backoff.max(Duration::from_millis(1)));
        }
    }

    let cause = match last_error {
        Some(Error::DialFailure { reason, .. }) => reason,
        Some(other) => other.to_string(),
        None => "no attempt made".to_string(),
    };
    Err(Error::DialFailure {
        peer: peer.clone(),
        protocol: protocol.to_string(),
        reason: format!("gave up after {} attempts: {}", attempts, cause),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_equality_by_string() {
        let a = PeerId::from("QmPrism");
        let b = PeerId::new(String::from("QmPrism"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "QmPrism");
    }

    #[test]
    fn test_peer_id_short() {
        assert_eq!(PeerId::from("QmAbcdefghijk").short(), "QmAbcdef");
        assert_eq!(PeerId::from("abc").short(), "abc");
    }

    #[test]
    fn test_peer_id_serializes_as_string() {
        let json = serde_json::to_string(&PeerId::from("QmX")).unwrap();
        assert_eq!(json, "\"QmX\"");
    }

    #[tokio::test]
    async fn test_dial_with_retry_gives_up() {
        let hub = MemoryHub::new();
        let node = hub.node("viewer");
        let _events = node.start().await.unwrap();

        let policy = DialPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        };
        let result =
            dial_with_retry(&node, &PeerId::from("nobody"), "/controller/TESTO", &policy).await;

        match result {
            Err(Error::DialFailure { peer, reason, .. }) => {
                assert_eq!(peer, PeerId::from("nobody"));
                assert!(reason.contains("3 attempts"));
                assert!(reason.ends_with("unknown peer"));
            }
            other => panic!("expected dial failure, got {:?}", other.map(|_| ())),
        }
    }
}
