//! Streamer role
//!
//! Publishes one media session at a time to a remote bound through a
//! controller prism.
//!
//! # Example
//! ```no_run
//! use casto::{MemoryHub, Role, Streamer, StreamerConfig};
//! # use casto::media::MediaEngine;
//!
//! # async fn example<E: MediaEngine>(engine: E) -> casto::Result<()> {
//! let hub = MemoryHub::new();
//! let config = StreamerConfig::default().title("morning show");
//! let mut streamer = Streamer::new(config, hub.node("QmStreamer"), engine);
//!
//! streamer.start().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{spawn_dial, DialOutcome, Role, RoleKind};
use crate::config::StreamerConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::media::{
    IceConnectionState, MediaEngine, MediaStream, TransportEvent, TransportEvents,
};
use crate::network::{NetworkEvent, PeerId, PeerNetwork};
use crate::protocol::constants::{controller_protocol, streamer_info_protocol, streamer_protocol};
use crate::protocol::SignalingMessage;
use crate::session::{NegotiationState, Session};
use crate::signaling::{write_message, ChannelEvent, InboundEvent, SignalingChannel};

/// Streamer lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerPhase {
    /// Not started
    Idle,
    /// Network up, no controller channel yet
    AwaitingController,
    /// Announced to a controller prism
    Registered,
    /// A prism is ready for the offer
    NegotiatingOffer,
    /// Offer sent, waiting for ICE
    Offered,
    /// ICE completed with the bound remote
    Connected,
    /// Session ended after connecting
    Completed,
    /// Session ended
    Closed,
}

enum Command {
    StartBroadcast(MediaStream),
    StopBroadcast,
    BoundRemote(oneshot::Sender<Option<PeerId>>),
    Shutdown(oneshot::Sender<()>),
}

struct Parts<N, E> {
    network: N,
    engine: E,
    phase_tx: watch::Sender<StreamerPhase>,
}

/// Streamer role handle
pub struct Streamer<N: PeerNetwork, E: MediaEngine> {
    config: StreamerConfig,
    local_peer_id: PeerId,
    events: EventBus,
    phase_rx: watch::Receiver<StreamerPhase>,
    parts: Option<Parts<N, E>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl<N: PeerNetwork, E: MediaEngine> Streamer<N, E> {
    pub fn new(config: StreamerConfig, network: N, engine: E) -> Self {
        let (phase_tx, phase_rx) = watch::channel(StreamerPhase::Idle);

        Self {
            config,
            local_peer_id: network.local_peer_id(),
            events: EventBus::new(),
            phase_rx,
            parts: Some(Parts {
                network,
                engine,
                phase_tx,
            }),
            commands: None,
            task: None,
        }
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Current phase
    pub fn phase(&self) -> StreamerPhase {
        *self.phase_rx.borrow()
    }

    /// Receiver notified on every phase change
    pub fn watch_phase(&self) -> watch::Receiver<StreamerPhase> {
        self.phase_rx.clone()
    }

    /// Publish the tracks of `stream`
    ///
    /// If no prism has signaled `readyToCast` yet, the stream is kept and
    /// offered as soon as one does.
    pub fn start_broadcast(&self, stream: MediaStream) -> Result<()> {
        self.command(Command::StartBroadcast(stream))
    }

    /// End the current session
    pub fn stop_broadcast(&self) -> Result<()> {
        self.command(Command::StopBroadcast)
    }

    /// Remote the streamer is currently bound to
    pub async fn bound_remote(&self) -> Result<Option<PeerId>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::BoundRemote(tx))?;
        rx.await.map_err(|_| Error::NotRunning)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or(Error::NotRunning)?
            .send(command)
            .map_err(|_| Error::NotRunning)
    }
}

impl<N: PeerNetwork, E: MediaEngine> Role for Streamer<N, E> {
    fn kind(&self) -> RoleKind {
        RoleKind::Streamer
    }

    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id.clone()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    async fn start(&mut self) -> Result<()> {
        let Parts {
            network,
            engine,
            phase_tx,
        } = self.parts.take().ok_or(Error::AlreadyStarted)?;

        let sid = &self.config.service_id;
        network.handle(&streamer_protocol(sid));
        network.handle(&streamer_info_protocol(sid));
        let network_rx = network.start().await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        tracing::info!(
            peer = %self.local_peer_id,
            service_id = %self.config.service_id,
            title = %self.config.title,
            "Streamer started"
        );
        self.events.emit(LifecycleEvent::NodeInitiated {
            peer_id: self.local_peer_id.clone(),
        });
        phase_tx.send_replace(StreamerPhase::AwaitingController);

        let mut task = StreamerTask {
            config: self.config.clone(),
            local_peer_id: self.local_peer_id.clone(),
            network: Arc::new(network),
            engine,
            events: self.events.clone(),
            phase_tx,
            inbound_tx,
            dial_tx,
            transport_tx,
            channels: HashMap::new(),
            controller: None,
            tried: HashSet::new(),
            binding: None,
            session: None,
            pending_stream: None,
            ready_at: None,
            next_session_id: 1,
        };

        if let Some(prism) = self.config.prism.clone() {
            task.dial_controller(prism);
        }

        self.task = Some(tokio::spawn(task.run(
            command_rx,
            network_rx,
            inbound_rx,
            dial_rx,
            transport_rx,
        )));
        self.commands = Some(command_tx);
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(commands) = self.commands.take() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Remote bound by `requestStreamerInfo` and the channel it came through
#[derive(Debug, Clone)]
struct Binding {
    remote: PeerId,
    channel_id: u64,
}

struct StreamerTask<N: PeerNetwork, E: MediaEngine> {
    config: StreamerConfig,
    local_peer_id: PeerId,
    network: Arc<N>,
    engine: E,
    events: EventBus,
    phase_tx: watch::Sender<StreamerPhase>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    dial_tx: mpsc::UnboundedSender<DialOutcome<N::Stream>>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,

    /// Controller channels by channel id
    channels: HashMap<u64, SignalingChannel>,
    /// Prism of the first controller channel
    controller: Option<PeerId>,
    /// Discovered peers already tried as controller
    tried: HashSet<PeerId>,

    binding: Option<Binding>,
    session: Option<Session<E::Transport>>,
    /// Stream supplied before the prism was ready
    pending_stream: Option<MediaStream>,
    /// When `readyToCast` arrived for the current binding
    ready_at: Option<Instant>,
    next_session_id: u64,
}

impl<N: PeerNetwork, E: MediaEngine> StreamerTask<N, E> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut network: mpsc::UnboundedReceiver<NetworkEvent<N::Stream>>,
        mut inbound: mpsc::UnboundedReceiver<InboundEvent>,
        mut dials: mpsc::UnboundedReceiver<DialOutcome<N::Stream>>,
        mut transport: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        let mut ticker = tokio::time::interval(self.config.timeout_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(event) = network.recv() => self.handle_network_event(event),
                Some(event) = inbound.recv() => self.handle_inbound(event).await,
                Some(outcome) = dials.recv() => self.handle_dial_outcome(outcome),
                Some((session_id, event)) = transport.recv() => {
                    self.handle_transport_event(session_id, event).await
                }
                _ = ticker.tick() => self.check_timeouts().await,
            }
        }
    }

    fn set_phase(&self, phase: StreamerPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = ?previous, to = ?phase, "Streamer phase change");
        }
    }

    fn phase(&self) -> StreamerPhase {
        *self.phase_tx.borrow()
    }

    fn dial_controller(&mut self, prism: PeerId) {
        self.tried.insert(prism.clone());
        tracing::debug!(prism = %prism, "Dialing controller");
        spawn_dial(
            Arc::clone(&self.network),
            prism,
            controller_protocol(&self.config.service_id),
            self.config.dial.clone(),
            self.dial_tx.clone(),
        );
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartBroadcast(stream) => {
                tracing::info!(tracks = stream.len(), "Broadcast requested");
                self.pending_stream = Some(stream);
                if self.ready_at.is_some() && self.session.is_none() {
                    self.begin_broadcast().await;
                }
            }
            Command::StopBroadcast => {
                self.pending_stream = None;
                let connected = self
                    .session
                    .as_ref()
                    .map(|s| s.state() == NegotiationState::Connected)
                    .unwrap_or(false);
                if self.session.is_some() || self.binding.is_some() {
                    self.end_session("stopped locally").await;
                }
                if connected {
                    self.set_phase(StreamerPhase::Completed);
                }
            }
            Command::BoundRemote(reply) => {
                let _ = reply.send(self.binding.as_ref().map(|b| b.remote.clone()));
            }
            Command::Shutdown(_) => {}
        }
    }

    fn handle_network_event(&mut self, event: NetworkEvent<N::Stream>) {
        match event {
            NetworkEvent::Discovered(peer) => {
                tracing::debug!(peer = %peer, "Peer discovered");
                if self.config.prism.is_none()
                    && self.controller.is_none()
                    && !self.tried.contains(&peer)
                {
                    self.dial_controller(peer);
                }
            }
            NetworkEvent::Connected(peer) => {
                tracing::trace!(peer = %peer, "Peer connected");
            }
            NetworkEvent::Disconnected(peer) => {
                let bound = self.binding.as_ref().map(|b| b.remote == peer).unwrap_or(false);
                if bound {
                    tracing::info!(peer = %peer, "Bound remote disconnected");
                } else {
                    tracing::debug!(peer = %peer, "Peer disconnected");
                }
            }
            NetworkEvent::Inbound {
                peer,
                protocol,
                stream,
            } => {
                let sid = &self.config.service_id;
                if protocol == streamer_protocol(sid) {
                    self.open_controller(peer, protocol, stream);
                } else if protocol == streamer_info_protocol(sid) {
                    self.answer_info_request(peer, stream);
                } else {
                    tracing::debug!(peer = %peer, protocol = %protocol, "Ignoring inbound stream");
                }
            }
        }
    }

    fn handle_dial_outcome(&mut self, outcome: DialOutcome<N::Stream>) {
        match outcome.result {
            Ok(stream) => {
                if self.config.prism.is_none() && self.controller.is_some() {
                    tracing::debug!(peer = %outcome.peer, "Controller already open, dropping stream");
                    return;
                }
                self.open_controller(outcome.peer, outcome.protocol, stream);
            }
            Err(e) => {
                if self.config.prism.as_ref() == Some(&outcome.peer) {
                    tracing::error!(prism = %outcome.peer, error = %e, "Controller dial failed");
                } else {
                    tracing::debug!(peer = %outcome.peer, error = %e, "Peer is not a controller");
                }
            }
        }
    }

    /// Open a controller channel and announce ourselves on it
    fn open_controller(&mut self, peer: PeerId, protocol: String, stream: N::Stream) {
        let channel = SignalingChannel::open(peer.clone(), protocol, stream, self.inbound_tx.clone());
        channel.send(SignalingMessage::update_streamer_info(
            self.config.profile.clone(),
            self.config.title.clone(),
        ));

        tracing::info!(
            prism = %peer,
            channel_id = channel.id(),
            title = %self.config.title,
            "Registered with controller"
        );

        if self.controller.is_none() {
            self.controller = Some(peer);
        }
        self.channels.insert(channel.id(), channel);
        if self.phase() == StreamerPhase::AwaitingController {
            self.set_phase(StreamerPhase::Registered);
        }
    }

    /// Reply on the info protocol with the prism the streamer is bound to
    fn answer_info_request(&self, peer: PeerId, mut stream: N::Stream) {
        let prism = self
            .binding
            .as_ref()
            .map(|b| b.remote.clone())
            .or_else(|| self.controller.clone());

        tokio::spawn(async move {
            if let Some(prism_peer_id) = prism {
                let reply = SignalingMessage::ConnectedPrismPeerId { prism_peer_id };
                if let Err(e) = write_message(&mut stream, &reply).await {
                    tracing::debug!(peer = %peer, error = %e, "Info reply failed");
                }
            } else {
                tracing::debug!(peer = %peer, "Info request before any prism is known");
            }
            let _ = stream.shutdown().await;
        });
    }

    async fn handle_inbound(&mut self, inbound: InboundEvent) {
        let InboundEvent {
            channel_id,
            peer,
            event,
        } = inbound;

        let msg = match event {
            ChannelEvent::Message(msg) => msg,
            ChannelEvent::Closed => {
                self.channel_closed(channel_id, &peer).await;
                return;
            }
        };

        if !self.channels.contains_key(&channel_id) {
            return;
        }

        let topic = msg.topic();
        match msg {
            SignalingMessage::RequestStreamerInfo { peer_id } => {
                self.handle_request_streamer_info(channel_id, peer_id)
            }
            SignalingMessage::DeniedSetupStreamInfo {} => {
                tracing::info!(prism = %peer, "Prism denied stream setup");
                if self.binding.as_ref().map(|b| b.channel_id) == Some(channel_id) {
                    self.end_session("setup denied").await;
                }
                self.remove_channel(channel_id);
            }
            SignalingMessage::ReadyToCast {} => self.handle_ready_to_cast(channel_id).await,
            SignalingMessage::SendCreatedAnswer { sdp, .. } => {
                let result = match self.session.as_mut() {
                    Some(session) => session.accept_answer(sdp).await,
                    None => {
                        tracing::warn!(prism = %peer, "Answer without an offer");
                        return;
                    }
                };
                match result {
                    Ok(()) => tracing::debug!(prism = %peer, "Remote answer applied"),
                    Err(e) => {
                        tracing::warn!(prism = %peer, error = %e, "Applying answer failed");
                        self.end_session("answer rejected").await;
                    }
                }
            }
            SignalingMessage::SendTrickleCandidate { ice, .. } => match self.session.as_mut() {
                Some(session) => {
                    if let Err(e) = session.add_remote_candidate(ice).await {
                        tracing::warn!(prism = %peer, error = %e, "Remote candidate rejected");
                    }
                }
                None => tracing::debug!(prism = %peer, "Candidate without a session"),
            },
            SignalingMessage::UpdateStreamerInfo { .. }
            | SignalingMessage::SetupStreamInfo {}
            | SignalingMessage::DeniedStreamInfo {}
            | SignalingMessage::SendCreatedOffer { .. }
            | SignalingMessage::RegisterWaveInfo { .. }
            | SignalingMessage::SendChannelsList { .. }
            | SignalingMessage::UpdateChannelInfo { .. }
            | SignalingMessage::UpdateWaves { .. }
            | SignalingMessage::RequestCreateOffer { .. }
            | SignalingMessage::ConnectedPrismPeerId { .. } => {
                tracing::debug!(prism = %peer, topic = topic, "Unexpected message for streamer");
            }
        }
    }

    /// Bind the first remote; deny everyone else
    ///
    /// A denied request on the channel that holds the binding leaves that
    /// channel open, since closing it would also tear down the bound session.
    fn handle_request_streamer_info(&mut self, channel_id: u64, remote: PeerId) {
        if let Some(binding) = &self.binding {
            tracing::info!(
                requested = %remote,
                bound = %binding.remote,
                "Denying stream info, already bound"
            );
            let same_channel = binding.channel_id == channel_id;
            if let Some(channel) = self.channels.get(&channel_id) {
                channel.send(SignalingMessage::DeniedStreamInfo {});
            }
            if !same_channel {
                self.remove_channel(channel_id);
            }
            return;
        }

        let Some(channel) = self.channels.get(&channel_id) else {
            return;
        };
        tracing::info!(remote = %remote, prism = %channel.peer(), "Bound remote");
        channel.send(SignalingMessage::SetupStreamInfo {});
        self.binding = Some(Binding { remote, channel_id });
        self.set_phase(StreamerPhase::Registered);
    }

    async fn handle_ready_to_cast(&mut self, channel_id: u64) {
        let remote = match &self.binding {
            Some(binding) if binding.channel_id == channel_id => binding.remote.clone(),
            _ => {
                tracing::warn!(channel_id = channel_id, "readyToCast without a binding");
                return;
            }
        };

        tracing::info!(remote = %remote, "Ready to cast");
        self.ready_at = Some(Instant::now());
        self.set_phase(StreamerPhase::NegotiatingOffer);
        self.events.emit(LifecycleEvent::ReadyToCast { remote });

        if self.pending_stream.is_some() && self.session.is_none() {
            self.begin_broadcast().await;
        }
    }

    /// Create the session, add the tracks, and send the rewritten offer
    async fn begin_broadcast(&mut self) {
        let (Some(binding), Some(stream)) = (self.binding.clone(), self.pending_stream.clone())
        else {
            return;
        };

        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let events = TransportEvents::new(session_id, self.transport_tx.clone());
        let transport = match self
            .engine
            .create_transport(&self.config.peer_connection, events)
            .await
        {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(error = %e, "Creating transport failed");
                self.end_session("transport unavailable").await;
                return;
            }
        };

        let mut session = Session::new(session_id, binding.remote.clone(), transport);
        let result = publish_offer(&mut session, &stream, &self.config.preferred_codec).await;
        self.session = Some(session);

        let offer = match result {
            Ok(offer) => offer,
            Err(e) => {
                tracing::warn!(remote = %binding.remote, error = %e, "Creating offer failed");
                self.end_session("offer failed").await;
                return;
            }
        };

        let sent = self
            .channels
            .get(&binding.channel_id)
            .map(|channel| channel.send(SignalingMessage::offer(offer, None)))
            .unwrap_or(false);
        if !sent {
            self.end_session("controller channel gone").await;
            return;
        }

        tracing::info!(
            remote = %binding.remote,
            session_id = session_id,
            tracks = stream.len(),
            codec = %self.config.preferred_codec,
            "Offer sent"
        );
        self.set_phase(StreamerPhase::Offered);
    }

    async fn handle_transport_event(&mut self, session_id: u64, event: TransportEvent) {
        let Some(session) = self.session.as_mut().filter(|s| s.id() == session_id) else {
            return;
        };

        match event {
            TransportEvent::IceCandidate(ice) => {
                session.record_local_candidate();
                let channel = self
                    .binding
                    .as_ref()
                    .and_then(|b| self.channels.get(&b.channel_id));
                match channel {
                    Some(channel) => {
                        channel.send(SignalingMessage::candidate(ice, None));
                    }
                    None => tracing::debug!(session_id = session_id, "No channel for local candidate"),
                }
            }
            TransportEvent::IceConnectionState(state) => match state {
                IceConnectionState::Connected => {
                    tracing::info!(remote = %session.remote(), "ICE connected");
                }
                IceConnectionState::Completed => {
                    if session.mark_connected() {
                        let remote = session.remote().clone();
                        tracing::info!(
                            remote = %remote,
                            negotiation_ms = ?session.stats().negotiation_time().map(|d| d.as_millis()),
                            "Broadcast connected"
                        );
                        self.set_phase(StreamerPhase::Connected);
                        self.events.emit(LifecycleEvent::Completed { remote });
                    }
                }
                IceConnectionState::Disconnected => {
                    tracing::info!(remote = %session.remote(), "ICE disconnected");
                    session.deactivate().await;
                    self.end_session("ice disconnected").await;
                }
                IceConnectionState::Failed | IceConnectionState::Closed => {
                    self.end_session("ice closed").await;
                }
                IceConnectionState::New | IceConnectionState::Checking => {
                    tracing::trace!(state = ?state, "ICE state");
                }
            },
            TransportEvent::Track(track) => {
                tracing::debug!(track = %track.id, "Ignoring inbound track");
            }
        }
    }

    async fn channel_closed(&mut self, channel_id: u64, peer: &PeerId) {
        if self.channels.remove(&channel_id).is_none() {
            return;
        }
        tracing::info!(prism = %peer, channel_id = channel_id, "Controller channel closed");

        let bound_here = self.binding.as_ref().map(|b| b.channel_id) == Some(channel_id);
        let connected = self
            .session
            .as_ref()
            .map(|s| s.state() == NegotiationState::Connected)
            .unwrap_or(false);
        if bound_here && !connected {
            self.end_session("controller channel closed").await;
        }

        if self.controller.as_ref() == Some(peer)
            && !self.channels.values().any(|c| c.peer() == peer)
        {
            self.controller = None;
        }
        if self.channels.is_empty() && self.session.is_none() {
            self.set_phase(StreamerPhase::AwaitingController);
        }
    }

    fn remove_channel(&mut self, channel_id: u64) {
        if let Some(channel) = self.channels.remove(&channel_id) {
            tracing::debug!(prism = %channel.peer(), channel_id = channel_id, "Ending channel");
            channel.close();
        }
    }

    /// Close the session, clear the binding and emit `Closed`
    async fn end_session(&mut self, reason: &str) {
        let remote = self.binding.take().map(|b| b.remote);
        self.ready_at = None;

        if let Some(mut session) = self.session.take() {
            session.close().await;
        }

        tracing::info!(remote = ?remote, reason = reason, "Session ended");
        self.set_phase(StreamerPhase::Closed);
        self.events.emit(LifecycleEvent::Closed { remote });
    }

    async fn check_timeouts(&mut self) {
        let timeout = self.config.negotiation_timeout;

        let session_expired = self
            .session
            .as_ref()
            .map(|s| s.is_expired(timeout))
            .unwrap_or(false);
        let wait_expired = self.session.is_none()
            && self
                .ready_at
                .map(|at| at.elapsed() > timeout)
                .unwrap_or(false);

        if session_expired || wait_expired {
            let e = Error::NegotiationFailure("timed out".into());
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, error = %e, "Negotiation stalled");
            self.end_session("negotiation timed out").await;
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        for (_, channel) in self.channels.drain() {
            channel.close();
        }
        self.binding = None;
        self.network.stop().await;
        self.set_phase(StreamerPhase::Idle);
        tracing::info!(peer = %self.local_peer_id, "Streamer stopped");
    }
}

async fn publish_offer<T: crate::media::MediaTransport>(
    session: &mut Session<T>,
    stream: &MediaStream,
    preferred_codec: &str,
) -> Result<crate::media::SessionDescription> {
    for track in stream.tracks() {
        session.transport().add_track(track).await?;
    }
    session.create_offer(preferred_codec).await
}
