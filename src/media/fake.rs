//! Scripted media engine for tests
//!
//! Offers carry one `a=x-track:<kind>:<id>` line per local track so the
//! answering side can report inbound tracks. A transport "completes" once it
//! has a local description, a remote description and at least one remote
//! candidate: it then reports the remote tracks followed by the `connected`
//! and `completed` ICE states.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    IceCandidate, IceConnectionState, MediaEngine, MediaTrack, MediaTransport, SdpType,
    SessionDescription, TrackKind, TransportEvent, TransportEvents,
};
use crate::config::PeerConnectionConfig;
use crate::error::{Error, Result};

const TRACK_PREFIX: &str = "a=x-track:";

#[derive(Default)]
pub(crate) struct FakeEngine {
    created: Mutex<Vec<FakeTransport>>,
    fail_answers: AtomicBool,
    next_port: AtomicU32,
}

impl FakeEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later `create_answer` fail
    pub(crate) fn fail_answers(&self) {
        self.fail_answers.store(true, Ordering::SeqCst);
    }

    pub(crate) fn transports(&self) -> Vec<FakeTransport> {
        self.created.lock().clone()
    }
}

impl MediaEngine for Arc<FakeEngine> {
    type Transport = FakeTransport;

    async fn create_transport(
        &self,
        _config: &PeerConnectionConfig,
        events: TransportEvents,
    ) -> Result<FakeTransport> {
        let port = 50_000 + self.next_port.fetch_add(1, Ordering::SeqCst);
        let transport = FakeTransport {
            events,
            port,
            fail_answers: self.fail_answers.load(Ordering::SeqCst),
            state: Arc::new(Mutex::new(FakeState::default())),
        };
        self.created.lock().push(transport.clone());
        Ok(transport)
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub local_tracks: Vec<MediaTrack>,
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub remote_tracks: Vec<MediaTrack>,
    pub remote_candidates: Vec<IceCandidate>,
    pub completed: bool,
    pub deactivated: bool,
    pub closed: bool,
}

#[derive(Clone)]
pub(crate) struct FakeTransport {
    events: TransportEvents,
    port: u32,
    fail_answers: bool,
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub(crate) fn session_id(&self) -> u64 {
        self.events.session_id()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Push an ICE state change as the engine would
    pub(crate) fn report(&self, state: IceConnectionState) {
        self.events.emit(TransportEvent::IceConnectionState(state));
    }

    fn maybe_complete(&self) {
        let remote_tracks = {
            let mut state = self.state.lock();
            if state.completed
                || state.closed
                || state.local.is_none()
                || state.remote.is_none()
                || state.remote_candidates.is_empty()
            {
                return;
            }
            state.completed = true;
            state.remote_tracks.clone()
        };

        for track in remote_tracks {
            self.events.emit(TransportEvent::Track(track));
        }
        self.report(IceConnectionState::Connected);
        self.report(IceConnectionState::Completed);
    }
}

impl MediaTransport for FakeTransport {
    async fn add_track(&self, track: MediaTrack) -> Result<()> {
        self.state.lock().local_tracks.push(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut sdp = String::from(
            "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=rtpmap:111 opus/48000/2\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 102\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=rtpmap:102 h264/90000\r\n",
        );
        for track in self.state.lock().local_tracks.iter() {
            sdp.push_str(&format!("{}{}:{}\r\n", TRACK_PREFIX, track.kind.as_str(), track.id));
        }
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.fail_answers {
            return Err(Error::NegotiationFailure("answer rejected by engine".into()));
        }
        if self.state.lock().remote.is_none() {
            return Err(Error::NegotiationFailure("no remote offer".into()));
        }
        Ok(SessionDescription::answer(
            "v=0\r\no=- 3 4 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 102\r\n",
        ))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.state.lock().local = Some(desc);
        self.events.emit(TransportEvent::IceCandidate(IceCandidate {
            candidate: format!(
                "candidate:{} 1 UDP 2130706431 127.0.0.1 {} typ host",
                self.session_id(),
                self.port
            ),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }));
        self.maybe_complete();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        {
            let mut state = self.state.lock();
            if desc.sdp_type == SdpType::Offer {
                state.remote_tracks = parse_tracks(&desc.sdp);
            }
            state.remote = Some(desc);
        }
        self.maybe_complete();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.remote.is_none() {
                return Err(Error::NegotiationFailure(
                    "candidate before remote description".into(),
                ));
            }
            state.remote_candidates.push(candidate);
        }
        self.maybe_complete();
        Ok(())
    }

    async fn deactivate_transceivers(&self) -> Result<()> {
        self.state.lock().deactivated = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let newly_closed = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.closed, true)
        };
        if newly_closed {
            self.report(IceConnectionState::Closed);
        }
        Ok(())
    }
}

fn parse_tracks(sdp: &str) -> Vec<MediaTrack> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix(TRACK_PREFIX))
        .filter_map(|rest| {
            let (kind, id) = rest.split_once(':')?;
            let kind = match kind {
                "audio" => TrackKind::Audio,
                "video" => TrackKind::Video,
                _ => return None,
            };
            Some(MediaTrack::new(id, kind))
        })
        .collect()
}
