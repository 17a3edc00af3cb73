//! Session state machine
//!
//! Tracks one negotiation from transport creation until it is closed.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::media::{prefer_codec, IceCandidate, MediaTransport, SessionDescription};
use crate::network::PeerId;
use crate::stats::SessionStats;

/// Negotiation lifecycle state
///
/// States only move forward; a session never returns to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NegotiationState {
    /// Transport created, nothing exchanged
    New,
    /// An offer was created or received
    Offered,
    /// The answer was created or applied
    Answered,
    /// ICE completed
    Connected,
    /// Session ended
    Closed,
}

impl NegotiationState {
    pub fn is_closed(&self) -> bool {
        *self == NegotiationState::Closed
    }
}

/// Negotiation context with one remote peer
pub struct Session<T> {
    /// Unique session ID, also tags transport events
    id: u64,

    /// Peer on the other end of the media path
    remote: PeerId,

    transport: T,

    state: NegotiationState,

    /// Remote candidates received before the remote description
    pending: Vec<IceCandidate>,

    remote_description_set: bool,

    stats: SessionStats,
}

impl<T: MediaTransport> Session<T> {
    pub fn new(id: u64, remote: PeerId, transport: T) -> Self {
        Self {
            id,
            remote,
            transport,
            state: NegotiationState::New,
            pending: Vec::new(),
            remote_description_set: false,
            stats: SessionStats::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    /// Number of remote candidates waiting for the remote description
    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Move to `next` if it is later than the current state
    pub fn advance(&mut self, next: NegotiationState) -> bool {
        if next <= self.state {
            return false;
        }
        tracing::trace!(
            session_id = self.id,
            from = ?self.state,
            to = ?next,
            "Session state change"
        );
        self.state = next;
        true
    }

    /// Create an offer, reorder its video formats and apply it locally
    ///
    /// An offer without a video section is published unchanged.
    pub async fn create_offer(&mut self, preferred_codec: &str) -> Result<SessionDescription> {
        let mut offer = self.transport.create_offer().await?;

        match prefer_codec(&offer.sdp, preferred_codec) {
            Ok(sdp) => offer.sdp = sdp,
            Err(Error::NoVideoSection) => {
                tracing::warn!(session_id = self.id, "Offer has no video section");
            }
            Err(e) => return Err(e),
        }

        self.transport.set_local_description(offer.clone()).await?;
        self.advance(NegotiationState::Offered);
        Ok(offer)
    }

    /// Apply a remote offer and produce the local answer
    pub async fn accept_offer(&mut self, offer: SessionDescription) -> Result<SessionDescription> {
        self.advance(NegotiationState::Offered);
        self.apply_remote_description(offer).await?;

        let answer = self.transport.create_answer().await?;
        self.transport.set_local_description(answer.clone()).await?;
        self.advance(NegotiationState::Answered);
        Ok(answer)
    }

    /// Apply the remote answer to our offer
    pub async fn accept_answer(&mut self, answer: SessionDescription) -> Result<()> {
        self.apply_remote_description(answer).await?;
        self.advance(NegotiationState::Answered);
        Ok(())
    }

    /// Set the remote description, then add buffered candidates in arrival order
    pub async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        self.transport.set_remote_description(desc).await?;
        self.remote_description_set = true;

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            tracing::debug!(
                session_id = self.id,
                count = pending.len(),
                "Flushing buffered candidates"
            );
        }
        for candidate in pending {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                tracing::warn!(session_id = self.id, error = %e, "Buffered candidate rejected");
            }
        }
        Ok(())
    }

    /// Add a remote candidate, buffering it until the remote description is set
    pub async fn add_remote_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        self.stats.candidates_received += 1;

        if !self.remote_description_set {
            self.stats.candidates_buffered += 1;
            self.pending.push(candidate);
            return Ok(());
        }

        self.transport.add_ice_candidate(candidate).await
    }

    /// Count a local candidate trickled to the remote
    pub fn record_local_candidate(&mut self) {
        self.stats.candidates_sent += 1;
    }

    /// ICE completed
    pub fn mark_connected(&mut self) -> bool {
        if !self.advance(NegotiationState::Connected) {
            return false;
        }
        self.stats.connected_at = Some(Instant::now());
        true
    }

    /// True if the session has neither connected nor closed within `timeout`
    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.state < NegotiationState::Connected && self.stats.age() > timeout
    }

    /// Stop every transceiver before closing
    pub async fn deactivate(&mut self) {
        if self.state.is_closed() {
            return;
        }
        if let Err(e) = self.transport.deactivate_transceivers().await {
            tracing::debug!(session_id = self.id, error = %e, "Deactivating transceivers failed");
        }
    }

    /// Close the transport; idempotent
    pub async fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!(session_id = self.id, error = %e, "Closing transport failed");
        }
        self.pending.clear();
        self.state = NegotiationState::Closed;

        tracing::debug!(
            session_id = self.id,
            remote = %self.remote,
            negotiation_ms = ?self.stats.negotiation_time().map(|d| d.as_millis()),
            "Session closed"
        );
    }
}

impl<T> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::PeerConnectionConfig;
    use crate::media::fake::{FakeEngine, FakeTransport};
    use crate::media::{IceConnectionState, MediaEngine, TransportEvent, TransportEvents};

    async fn session(
        id: u64,
    ) -> (
        Session<FakeTransport>,
        mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        let engine = FakeEngine::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = engine
            .create_transport(&PeerConnectionConfig::default(), TransportEvents::new(id, tx))
            .await
            .unwrap();
        (Session::new(id, PeerId::from("QmRemote"), transport), rx)
    }

    #[test]
    fn test_state_order() {
        assert!(NegotiationState::New < NegotiationState::Offered);
        assert!(NegotiationState::Offered < NegotiationState::Answered);
        assert!(NegotiationState::Answered < NegotiationState::Connected);
        assert!(NegotiationState::Connected < NegotiationState::Closed);
    }

    #[tokio::test]
    async fn test_state_only_moves_forward() {
        let (mut session, _rx) = session(1).await;

        assert!(session.advance(NegotiationState::Offered));
        assert!(!session.advance(NegotiationState::New));
        assert!(session.mark_connected());
        assert!(!session.mark_connected());
        assert!(!session.advance(NegotiationState::Answered));
        assert_eq!(session.state(), NegotiationState::Connected);

        session.close().await;
        assert_eq!(session.state(), NegotiationState::Closed);
        assert!(!session.advance(NegotiationState::Connected));
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_remote_description() {
        let (mut session, _rx) = session(2).await;

        session
            .add_remote_candidate(IceCandidate::new("candidate:a"))
            .await
            .unwrap();
        session
            .add_remote_candidate(IceCandidate::new("candidate:b"))
            .await
            .unwrap();
        assert_eq!(session.pending_candidates(), 2);
        assert!(session.transport().remote_candidates().is_empty());

        session
            .accept_offer(SessionDescription::offer("v=0\r\nm=video 9 RTP/AVP 96\r\n"))
            .await
            .unwrap();

        assert_eq!(session.pending_candidates(), 0);
        let added: Vec<String> = session
            .transport()
            .remote_candidates()
            .into_iter()
            .map(|c| c.candidate)
            .collect();
        assert_eq!(added, ["candidate:a", "candidate:b"]);
        assert_eq!(session.stats().candidates_buffered, 2);
        assert_eq!(session.state(), NegotiationState::Answered);

        session
            .add_remote_candidate(IceCandidate::new("candidate:c"))
            .await
            .unwrap();
        assert_eq!(session.transport().remote_candidates().len(), 3);
        assert_eq!(session.stats().candidates_received, 3);
    }

    #[tokio::test]
    async fn test_offer_prefers_codec() {
        let (mut session, mut rx) = session(3).await;

        let offer = session.create_offer("h264").await.unwrap();
        assert!(offer.sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 102 96 97\r\n"));
        assert_eq!(session.state(), NegotiationState::Offered);

        // Local description produced a candidate
        let (id, event) = rx.recv().await.unwrap();
        assert_eq!(id, 3);
        assert!(matches!(event, TransportEvent::IceCandidate(_)));
    }

    #[tokio::test]
    async fn test_answer_completes_negotiation() {
        let (mut session, mut rx) = session(4).await;

        session.create_offer("h264").await.unwrap();
        session
            .accept_answer(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap();
        session
            .add_remote_candidate(IceCandidate::new("candidate:1"))
            .await
            .unwrap();

        let mut states = Vec::new();
        while let Ok((_, event)) = rx.try_recv() {
            if let TransportEvent::IceConnectionState(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            [IceConnectionState::Connected, IceConnectionState::Completed]
        );
    }

    #[tokio::test]
    async fn test_expiry_and_close() {
        let (mut session, _rx) = session(5).await;

        assert!(!session.is_expired(Duration::from_secs(60)));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(session.is_expired(Duration::from_millis(1)));

        session.deactivate().await;
        session.close().await;
        session.close().await;
        assert!(session.transport().is_closed());
        assert!(session.transport().state.lock().deactivated);
        assert!(!session.is_expired(Duration::from_millis(1)));
    }
}
