//! Media transport layer interface
//!
//! This module provides:
//! - Wire types shared with the transport (session descriptions, ICE candidates)
//! - Local media stream/track handles
//! - The `MediaEngine`/`MediaTransport` collaborator traits
//! - SDP codec preference rewriting
//!
//! A transport is created per session. Its asynchronous notifications (local
//! candidates, ICE state changes, inbound tracks) are pushed into the
//! [`TransportEvents`] sink it was created with, which tags them with the
//! owning session id so the role loop can route them.

pub mod sdp;

#[cfg(test)]
pub(crate) mod fake;

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::PeerConnectionConfig;
use crate::error::Result;

pub use sdp::prefer_codec;

/// Session description kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as exchanged on the wire: `{type, sdp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate as exchanged on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Handle to one media track owned by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Shared set of tracks
///
/// Cloning yields another handle to the same stream, so tracks attached by
/// the role loop are visible to the application.
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Arc<RwLock<Vec<MediaTrack>>>,
}

impl MediaStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a stream from already captured tracks
    pub fn with_tracks(tracks: impl IntoIterator<Item = MediaTrack>) -> Self {
        Self {
            tracks: Arc::new(RwLock::new(tracks.into_iter().collect())),
        }
    }

    /// Add a track; a track with the same id is replaced
    pub fn add_track(&self, track: MediaTrack) {
        let mut tracks = self.tracks.write();
        tracks.retain(|t| t.id != track.id);
        tracks.push(track);
    }

    pub fn remove_track(&self, id: &str) -> Option<MediaTrack> {
        let mut tracks = self.tracks.write();
        let pos = tracks.iter().position(|t| t.id == id)?;
        Some(tracks.remove(pos))
    }

    /// Remove every track
    pub fn clear(&self) {
        self.tracks.write().clear();
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }
}

/// ICE connection state reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notification from a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Local ICE candidate to trickle to the remote side
    IceCandidate(IceCandidate),
    /// ICE connection state changed
    IceConnectionState(IceConnectionState),
    /// Remote track received
    Track(MediaTrack),
}

/// Sink a transport pushes its notifications into
#[derive(Debug, Clone)]
pub struct TransportEvents {
    session_id: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportEvents {
    pub fn new(session_id: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { session_id, tx }
    }

    /// Session this sink is bound to
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Returns false once the owning role has stopped
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.session_id, event)).is_ok()
    }
}

/// Factory for per-session transports
pub trait MediaEngine: Send + Sync + 'static {
    type Transport: MediaTransport;

    fn create_transport(
        &self,
        config: &PeerConnectionConfig,
        events: TransportEvents,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}

/// One media negotiation handle (a peer connection)
///
/// Engine failures are reported as `Error::NegotiationFailure`.
pub trait MediaTransport: Send + Sync + 'static {
    /// Attach a local track for sending
    fn add_track(&self, track: MediaTrack) -> impl Future<Output = Result<()>> + Send;

    fn create_offer(&self) -> impl Future<Output = Result<SessionDescription>> + Send;

    fn create_answer(&self) -> impl Future<Output = Result<SessionDescription>> + Send;

    fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> impl Future<Output = Result<()>> + Send;

    fn add_ice_candidate(&self, candidate: IceCandidate) -> impl Future<Output = Result<()>> + Send;

    /// Stop sending and receiving on every transceiver
    fn deactivate_transceivers(&self) -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_format() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();

        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");

        let parsed: SessionDescription =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0"}"#).unwrap();
        assert_eq!(parsed.sdp_type, SdpType::Answer);
    }

    #[test]
    fn test_ice_candidate_wire_format() {
        let parsed: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(parsed.sdp_mid.as_deref(), Some("0"));
        assert_eq!(parsed.sdp_m_line_index, Some(0));

        let bare = serde_json::to_string(&IceCandidate::new("candidate:2")).unwrap();
        assert_eq!(bare, r#"{"candidate":"candidate:2"}"#);
    }

    #[test]
    fn test_media_stream_shared_between_clones() {
        let stream = MediaStream::new();
        let handle = stream.clone();

        handle.add_track(MediaTrack::new("v1", TrackKind::Video));
        handle.add_track(MediaTrack::new("a1", TrackKind::Audio));
        assert_eq!(stream.len(), 2);

        // Same id replaces
        handle.add_track(MediaTrack::new("v1", TrackKind::Video));
        assert_eq!(stream.len(), 2);

        assert!(stream.remove_track("a1").is_some());
        assert!(stream.remove_track("a1").is_none());

        stream.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn test_transport_events_tagged_with_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(7, tx);

        assert!(events.emit(TransportEvent::IceConnectionState(
            IceConnectionState::Checking
        )));
        let (id, event) = rx.try_recv().unwrap();
        assert_eq!(id, 7);
        assert_eq!(
            event,
            TransportEvent::IceConnectionState(IceConnectionState::Checking)
        );

        drop(rx);
        assert!(!events.emit(TransportEvent::IceConnectionState(
            IceConnectionState::Closed
        )));
    }
}
