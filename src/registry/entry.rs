//! Channel entry type

use std::time::Instant;

use crate::network::PeerId;
use crate::protocol::ChannelInfo;

/// One broadcaster's channel as announced by a prism
#[derive(Debug)]
pub struct Channel<S> {
    /// Broadcaster peer id
    pub peer_id: PeerId,

    /// Prism that announced the channel
    pub prism_peer_id: PeerId,

    /// Metadata from the prism, if any
    pub info: Option<ChannelInfo>,

    /// Negotiation in progress or established for this channel
    pub session: Option<S>,

    /// When the channel was first announced
    pub added_at: Instant,
}

impl<S> Channel<S> {
    pub(super) fn new(peer_id: PeerId, prism_peer_id: PeerId, info: Option<ChannelInfo>) -> Self {
        Self {
            peer_id,
            prism_peer_id,
            info,
            session: None,
            added_at: Instant::now(),
        }
    }

    /// Check if a session is attached
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Detach the session so the caller can close it
    pub fn take_session(&mut self) -> Option<S> {
        self.session.take()
    }
}
