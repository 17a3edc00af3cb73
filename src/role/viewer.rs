//! Viewer role
//!
//! Registers with every prism it discovers, mirrors each prism's channel
//! directory, and negotiates a receive-only session for the channel the
//! application chooses to watch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{resolve_prism, spawn_dial, DialOutcome, Role, RoleKind};
use crate::config::ViewerConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::media::{
    IceCandidate, IceConnectionState, MediaEngine, MediaStream, SessionDescription,
    TransportEvent, TransportEvents,
};
use crate::network::{NetworkEvent, PeerId, PeerNetwork};
use crate::protocol::constants::controller_protocol;
use crate::protocol::{ChannelInfo, ChannelUpdateKind, SignalingMessage};
use crate::registry::{Channel, ChannelDirectory};
use crate::session::{NegotiationState, Session};
use crate::signaling::{ChannelEvent, InboundEvent, SignalingChannel};

/// State of a prism as seen by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrismState {
    Discovered,
    Dialing,
    Registered,
}

/// Snapshot of one directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSummary {
    pub peer_id: PeerId,
    pub prism_peer_id: PeerId,
    pub info: Option<ChannelInfo>,
    /// Negotiation state if a session is attached
    pub session: Option<NegotiationState>,
}

enum Command {
    GetChannel {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<MediaStream>>,
    },
    Channels(oneshot::Sender<Vec<ChannelSummary>>),
    ConnectedPrism {
        streamer: PeerId,
        reply: oneshot::Sender<Result<PeerId>>,
    },
    Shutdown(oneshot::Sender<()>),
}

struct Parts<N, E> {
    network: N,
    engine: E,
}

/// Viewer role handle
pub struct Viewer<N: PeerNetwork, E: MediaEngine> {
    config: ViewerConfig,
    local_peer_id: PeerId,
    events: EventBus,
    parts: Option<Parts<N, E>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl<N: PeerNetwork, E: MediaEngine> Viewer<N, E> {
    pub fn new(config: ViewerConfig, network: N, engine: E) -> Self {
        Self {
            config,
            local_peer_id: network.local_peer_id(),
            events: EventBus::new(),
            parts: Some(Parts { network, engine }),
            commands: None,
            task: None,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Ask the owning prism for an offer from `peer_id` and return the local
    /// stream its tracks will be attached to
    pub async fn get_channel(&self, peer_id: impl Into<PeerId>) -> Result<MediaStream> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::GetChannel {
            peer_id: peer_id.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::NotRunning)?
    }

    /// Every channel known through any prism
    pub async fn channels(&self) -> Result<Vec<ChannelSummary>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Channels(reply))?;
        rx.await.map_err(|_| Error::NotRunning)
    }

    /// Ask `streamer` which prism it is connected to
    pub async fn connected_prism(&self, streamer: impl Into<PeerId>) -> Result<PeerId> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::ConnectedPrism {
            streamer: streamer.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::NotRunning)?
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or(Error::NotRunning)?
            .send(command)
            .map_err(|_| Error::NotRunning)
    }
}

impl<N: PeerNetwork, E: MediaEngine> Role for Viewer<N, E> {
    fn kind(&self) -> RoleKind {
        RoleKind::Viewer
    }

    fn local_peer_id(&self) -> PeerId {
        self.local_peer_id.clone()
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    async fn start(&mut self) -> Result<()> {
        let Parts { network, engine } = self.parts.take().ok_or(Error::AlreadyStarted)?;
        let network_rx = network.start().await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (dial_tx, dial_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (resolve_tx, resolve_rx) = mpsc::unbounded_channel();

        tracing::info!(
            peer = %self.local_peer_id,
            service_id = %self.config.service_id,
            "Viewer started"
        );
        self.events.emit(LifecycleEvent::NodeInitiated {
            peer_id: self.local_peer_id.clone(),
        });

        let task = ViewerTask {
            config: self.config.clone(),
            local_peer_id: self.local_peer_id.clone(),
            network: Arc::new(network),
            engine,
            events: self.events.clone(),
            inbound_tx,
            dial_tx,
            transport_tx,
            resolve_tx,
            prisms: HashMap::new(),
            channel_index: HashMap::new(),
            owners: HashMap::new(),
            sessions: HashMap::new(),
            watching: None,
            media: MediaStream::new(),
            next_session_id: 1,
        };

        self.task = Some(tokio::spawn(task.run(
            command_rx,
            network_rx,
            inbound_rx,
            dial_rx,
            transport_rx,
            resolve_rx,
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

/// One relay peer and everything learned through it
struct Prism<T> {
    peer_id: PeerId,
    state: PrismState,
    channel: Option<SignalingChannel>,
    directory: ChannelDirectory<Session<T>>,
    /// Channel most recently requested through this prism
    active: Option<PeerId>,
}

impl<T> Prism<T> {
    fn new(peer_id: PeerId) -> Self {
        Self {
            directory: ChannelDirectory::new(peer_id.clone()),
            peer_id,
            state: PrismState::Discovered,
            channel: None,
            active: None,
        }
    }

    fn send(&self, msg: SignalingMessage) -> bool {
        self.channel
            .as_ref()
            .map(|channel| channel.send(msg))
            .unwrap_or(false)
    }
}

/// Where a session lives: (prism, broadcaster)
type SessionOwner = (PeerId, PeerId);

struct ViewerTask<N: PeerNetwork, E: MediaEngine> {
    config: ViewerConfig,
    local_peer_id: PeerId,
    network: Arc<N>,
    engine: E,
    events: EventBus,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
    dial_tx: mpsc::UnboundedSender<DialOutcome<N::Stream>>,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    resolve_tx: mpsc::UnboundedSender<(PeerId, Result<PeerId>)>,

    prisms: HashMap<PeerId, Prism<E::Transport>>,
    /// Signaling channel id to prism
    channel_index: HashMap<u64, PeerId>,
    /// Broadcaster to the prism that announced it
    owners: HashMap<PeerId, PeerId>,
    /// Session id to its owner
    sessions: HashMap<u64, SessionOwner>,

    /// Broadcaster whose tracks go to `media`
    watching: Option<PeerId>,
    media: MediaStream,
    next_session_id: u64,
}

impl<N: PeerNetwork, E: MediaEngine> ViewerTask<N, E> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut network: mpsc::UnboundedReceiver<NetworkEvent<N::Stream>>,
        mut inbound: mpsc::UnboundedReceiver<InboundEvent>,
        mut dials: mpsc::UnboundedReceiver<DialOutcome<N::Stream>>,
        mut transport: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
        mut resolved: mpsc::UnboundedReceiver<(PeerId, Result<PeerId>)>,
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
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                Some(event) = network.recv() => self.handle_network_event(event).await,
                Some(event) = inbound.recv() => self.handle_inbound(event).await,
                Some(outcome) = dials.recv() => self.handle_dial_outcome(outcome),
                Some((session_id, event)) = transport.recv() => {
                    self.handle_transport_event(session_id, event).await
                }
                Some((streamer, result)) = resolved.recv() => self.handle_resolved(streamer, result),
                _ = ticker.tick() => self.check_timeouts().await,
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::GetChannel { peer_id, reply } => {
                let _ = reply.send(self.get_channel(peer_id));
            }
            Command::Channels(reply) => {
                let _ = reply.send(self.channel_summaries());
            }
            Command::ConnectedPrism { streamer, reply } => {
                let network = Arc::clone(&self.network);
                let service_id = self.config.service_id.clone();
                let policy = self.config.dial.clone();
                tokio::spawn(async move {
                    let result = resolve_prism(network.as_ref(), &streamer, &service_id, &policy).await;
                    let _ = reply.send(result);
                });
            }
            Command::Shutdown(_) => {}
        }
    }

    fn get_channel(&mut self, peer_id: PeerId) -> Result<MediaStream> {
        let prism = self
            .owners
            .get(&peer_id)
            .and_then(|prism| self.prisms.get_mut(prism))
            .filter(|prism| prism.directory.contains(&peer_id))
            .ok_or_else(|| Error::ChannelNotFound(peer_id.clone()))?;

        self.media.clear();
        if !prism.send(SignalingMessage::request_create_offer(peer_id.clone())) {
            return Err(Error::ChannelClosed);
        }

        tracing::info!(channel = %peer_id, prism = %prism.peer_id, "Requested channel");
        prism.active = Some(peer_id.clone());
        self.watching = Some(peer_id);
        Ok(self.media.clone())
    }

    fn channel_summaries(&self) -> Vec<ChannelSummary> {
        let mut summaries: Vec<ChannelSummary> = self
            .prisms
            .values()
            .flat_map(|prism| prism.directory.iter())
            .map(|channel| ChannelSummary {
                peer_id: channel.peer_id.clone(),
                prism_peer_id: channel.prism_peer_id.clone(),
                info: channel.info.clone(),
                session: channel.session.as_ref().map(|s| s.state()),
            })
            .collect();
        summaries.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        summaries
    }

    fn dial_prism(&mut self, peer: PeerId) {
        let prism = self
            .prisms
            .entry(peer.clone())
            .or_insert_with(|| Prism::new(peer.clone()));
        if prism.state != PrismState::Discovered {
            return;
        }
        prism.state = PrismState::Dialing;

        tracing::debug!(prism = %peer, "Dialing prism");
        spawn_dial(
            Arc::clone(&self.network),
            peer,
            controller_protocol(&self.config.service_id),
            self.config.dial.clone(),
            self.dial_tx.clone(),
        );
    }

    async fn handle_network_event(&mut self, event: NetworkEvent<N::Stream>) {
        match event {
            NetworkEvent::Discovered(peer) => {
                tracing::debug!(peer = %peer, "Peer discovered");
                match &self.config.streamer_peer_id {
                    Some(streamer) if *streamer == peer => self.resolve(peer),
                    Some(_) => {}
                    None => {
                        if !self.prisms.contains_key(&peer) {
                            self.dial_prism(peer);
                        }
                    }
                }
            }
            NetworkEvent::Connected(peer) => {
                tracing::trace!(peer = %peer, "Peer connected");
            }
            NetworkEvent::Disconnected(peer) => {
                if self.prisms.contains_key(&peer) {
                    tracing::info!(prism = %peer, "Prism disconnected");
                    self.remove_prism(&peer).await;
                }
            }
            NetworkEvent::Inbound { peer, protocol, .. } => {
                tracing::debug!(peer = %peer, protocol = %protocol, "Ignoring inbound stream");
            }
        }
    }

    fn resolve(&self, streamer: PeerId) {
        let network = Arc::clone(&self.network);
        let service_id = self.config.service_id.clone();
        let policy = self.config.dial.clone();
        let resolved = self.resolve_tx.clone();

        tokio::spawn(async move {
            let result = resolve_prism(network.as_ref(), &streamer, &service_id, &policy).await;
            let _ = resolved.send((streamer, result));
        });
    }

    fn handle_resolved(&mut self, streamer: PeerId, result: Result<PeerId>) {
        match result {
            Ok(prism) => {
                tracing::info!(streamer = %streamer, prism = %prism, "Streamer resolved to prism");
                self.dial_prism(prism);
            }
            Err(e) => {
                tracing::warn!(streamer = %streamer, error = %e, "Resolving streamer failed");
            }
        }
    }

    fn handle_dial_outcome(&mut self, outcome: DialOutcome<N::Stream>) {
        let DialOutcome {
            peer,
            protocol,
            result,
        } = outcome;

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Peer is not a prism");
                self.prisms.remove(&peer);
                return;
            }
        };

        let Some(prism) = self.prisms.get_mut(&peer) else {
            return;
        };

        let channel = SignalingChannel::open(peer.clone(), protocol, stream, self.inbound_tx.clone());
        channel.send(SignalingMessage::register_wave(self.local_peer_id.clone()));
        self.channel_index.insert(channel.id(), peer.clone());

        tracing::info!(prism = %peer, channel_id = channel.id(), "Registered with prism");
        prism.channel = Some(channel);
        prism.state = PrismState::Registered;
    }

    async fn handle_inbound(&mut self, inbound: InboundEvent) {
        let Some(prism_id) = self.channel_index.get(&inbound.channel_id).cloned() else {
            return;
        };

        let msg = match inbound.event {
            ChannelEvent::Message(msg) => msg,
            ChannelEvent::Closed => {
                tracing::info!(prism = %prism_id, "Prism channel closed");
                self.remove_prism(&prism_id).await;
                return;
            }
        };

        let topic = msg.topic();
        match msg {
            SignalingMessage::SendChannelsList { channels } => {
                let Some(prism) = self.prisms.get_mut(&prism_id) else {
                    return;
                };
                let added = prism
                    .directory
                    .upsert_many(channels.iter().map(|(k, v)| (k.clone(), v.clone())));
                for peer_id in channels.keys() {
                    self.owners.insert(peer_id.clone(), prism_id.clone());
                }

                tracing::info!(
                    prism = %prism_id,
                    channels = channels.len(),
                    added = added,
                    "Channel list received"
                );
                self.events.emit(LifecycleEvent::ChannelsListUpdated {
                    prism_peer_id: prism_id,
                    channels,
                });
            }
            SignalingMessage::UpdateChannelInfo {
                kind,
                peer_id,
                info,
            } => match ChannelUpdateKind::parse(&kind) {
                ChannelUpdateKind::Added => {
                    let Some(prism) = self.prisms.get_mut(&prism_id) else {
                        return;
                    };
                    prism.directory.mark_added(peer_id.clone(), info.clone());
                    self.owners.insert(peer_id.clone(), prism_id.clone());
                    self.events.emit(LifecycleEvent::ChannelAdded {
                        peer_id,
                        prism_peer_id: prism_id,
                        info,
                    });
                }
                ChannelUpdateKind::Removed => {
                    let removed = match self.prisms.get_mut(&prism_id) {
                        Some(prism) => {
                            if prism.active.as_ref() == Some(&peer_id) {
                                prism.active = None;
                            }
                            prism.directory.remove(&peer_id)
                        }
                        None => None,
                    };
                    if let Some(channel) = removed {
                        self.discard_channel(channel).await;
                    }
                }
                ChannelUpdateKind::Other(other) => {
                    tracing::debug!(prism = %prism_id, kind = %other, "Ignoring channel update");
                }
            },
            SignalingMessage::UpdateWaves { waves } => {
                self.events.emit(LifecycleEvent::WavesUpdated {
                    prism_peer_id: prism_id,
                    waves,
                });
            }
            SignalingMessage::SendCreatedOffer { sdp, peer_id } => {
                self.handle_offer(&prism_id, sdp, peer_id).await;
            }
            SignalingMessage::SendTrickleCandidate { ice, peer_id } => {
                self.handle_remote_candidate(&prism_id, ice, peer_id).await;
            }
            SignalingMessage::UpdateStreamerInfo { .. }
            | SignalingMessage::RequestStreamerInfo { .. }
            | SignalingMessage::SetupStreamInfo {}
            | SignalingMessage::DeniedStreamInfo {}
            | SignalingMessage::DeniedSetupStreamInfo {}
            | SignalingMessage::ReadyToCast {}
            | SignalingMessage::SendCreatedAnswer { .. }
            | SignalingMessage::RegisterWaveInfo { .. }
            | SignalingMessage::RequestCreateOffer { .. }
            | SignalingMessage::ConnectedPrismPeerId { .. } => {
                tracing::debug!(prism = %prism_id, topic = topic, "Unexpected message for viewer");
            }
        }
    }

    /// Answer an offer relayed by a prism, replacing any earlier session
    async fn handle_offer(
        &mut self,
        prism_id: &PeerId,
        offer: SessionDescription,
        peer_id: Option<PeerId>,
    ) {
        let Some(broadcaster) = peer_id.or_else(|| {
            self.prisms
                .get(prism_id)
                .and_then(|prism| prism.active.clone())
        }) else {
            tracing::warn!(prism = %prism_id, "Offer for no channel");
            return;
        };

        // Tear down the previous session for this channel
        let previous = self
            .prisms
            .get_mut(prism_id)
            .and_then(|prism| prism.directory.get_mut(&broadcaster))
            .and_then(|channel| channel.take_session());
        if let Some(mut session) = previous {
            tracing::debug!(channel = %broadcaster, session_id = session.id(), "Replacing session");
            self.sessions.remove(&session.id());
            session.close().await;
        }

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
                self.events.emit(LifecycleEvent::Closed {
                    remote: Some(broadcaster),
                });
                return;
            }
        };

        let mut session = Session::new(session_id, broadcaster.clone(), transport);
        let answer = match session.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(channel = %broadcaster, error = %e, "Answering offer failed");
                session.close().await;
                self.events.emit(LifecycleEvent::Closed {
                    remote: Some(broadcaster),
                });
                return;
            }
        };

        let Some(prism) = self.prisms.get_mut(prism_id) else {
            session.close().await;
            return;
        };

        prism.directory.mark_added(broadcaster.clone(), None);
        self.owners.insert(broadcaster.clone(), prism_id.clone());
        prism.send(SignalingMessage::answer(answer, Some(broadcaster.clone())));

        tracing::info!(
            channel = %broadcaster,
            prism = %prism_id,
            session_id = session_id,
            "Answer sent"
        );

        if let Some(channel) = prism.directory.get_mut(&broadcaster) {
            channel.session = Some(session);
        }
        self.sessions
            .insert(session_id, (prism_id.clone(), broadcaster));
    }

    async fn handle_remote_candidate(
        &mut self,
        prism_id: &PeerId,
        ice: IceCandidate,
        peer_id: Option<PeerId>,
    ) {
        let Some(prism) = self.prisms.get_mut(prism_id) else {
            return;
        };
        let Some(broadcaster) = peer_id.or_else(|| prism.active.clone()) else {
            tracing::debug!(prism = %prism_id, "Candidate for no channel");
            return;
        };

        let session = prism
            .directory
            .get_mut(&broadcaster)
            .and_then(|channel| channel.session.as_mut());
        match session {
            Some(session) => {
                if let Err(e) = session.add_remote_candidate(ice).await {
                    tracing::warn!(channel = %broadcaster, error = %e, "Remote candidate rejected");
                }
            }
            None => tracing::debug!(channel = %broadcaster, "Candidate without a session"),
        }
    }

    async fn handle_transport_event(&mut self, session_id: u64, event: TransportEvent) {
        let Some((prism_id, broadcaster)) = self.sessions.get(&session_id).cloned() else {
            return;
        };
        let Some(prism) = self.prisms.get_mut(&prism_id) else {
            return;
        };
        let Some(session) = prism
            .directory
            .get_mut(&broadcaster)
            .and_then(|channel| channel.session.as_mut())
            .filter(|session| session.id() == session_id)
        else {
            return;
        };

        match event {
            TransportEvent::IceCandidate(ice) => {
                session.record_local_candidate();
                prism.send(SignalingMessage::candidate(ice, Some(broadcaster)));
            }
            TransportEvent::Track(track) => {
                if self.watching.as_ref() == Some(&broadcaster) {
                    tracing::debug!(channel = %broadcaster, track = %track.id, kind = track.kind.as_str(), "Track attached");
                    self.media.add_track(track);
                }
            }
            TransportEvent::IceConnectionState(state) => match state {
                IceConnectionState::Completed => {
                    if session.mark_connected() {
                        tracing::info!(
                            channel = %broadcaster,
                            negotiation_ms = ?session.stats().negotiation_time().map(|d| d.as_millis()),
                            "Channel connected"
                        );
                        self.events.emit(LifecycleEvent::Completed {
                            remote: broadcaster,
                        });
                    }
                }
                IceConnectionState::Connected => {
                    tracing::debug!(channel = %broadcaster, "ICE connected");
                }
                IceConnectionState::Disconnected
                | IceConnectionState::Failed
                | IceConnectionState::Closed => {
                    tracing::info!(channel = %broadcaster, state = ?state, "Session ended");
                    self.close_session(&prism_id, &broadcaster).await;
                }
                IceConnectionState::New | IceConnectionState::Checking => {
                    tracing::trace!(state = ?state, "ICE state");
                }
            },
        }
    }

    /// Close the session of one channel and emit `Closed`
    async fn close_session(&mut self, prism_id: &PeerId, broadcaster: &PeerId) {
        let session = self
            .prisms
            .get_mut(prism_id)
            .and_then(|prism| prism.directory.get_mut(broadcaster))
            .and_then(|channel| channel.take_session());

        if let Some(mut session) = session {
            self.sessions.remove(&session.id());
            session.close().await;
            self.events.emit(LifecycleEvent::Closed {
                remote: Some(broadcaster.clone()),
            });
        }
    }

    /// Close a removed channel's session and emit `ChannelRemoved`
    async fn discard_channel(&mut self, mut channel: Channel<Session<E::Transport>>) {
        if let Some(mut session) = channel.take_session() {
            self.sessions.remove(&session.id());
            session.close().await;
        }
        if self.owners.get(&channel.peer_id) == Some(&channel.prism_peer_id) {
            self.owners.remove(&channel.peer_id);
        }
        if self.watching.as_ref() == Some(&channel.peer_id) {
            self.watching = None;
            self.media.clear();
        }

        tracing::info!(
            channel = %channel.peer_id,
            prism = %channel.prism_peer_id.short(),
            listed_ms = channel.added_at.elapsed().as_millis() as u64,
            "Channel removed"
        );
        self.events.emit(LifecycleEvent::ChannelRemoved {
            peer_id: channel.peer_id,
            prism_peer_id: channel.prism_peer_id,
        });
    }

    /// Forget a prism and everything announced through it
    async fn remove_prism(&mut self, prism_id: &PeerId) {
        let Some(mut prism) = self.prisms.remove(prism_id) else {
            return;
        };

        if let Some(channel) = prism.channel.take() {
            self.channel_index.remove(&channel.id());
            channel.close();
        }

        let removed = prism.directory.remove_all();
        tracing::info!(prism = %prism_id, channels = removed.len(), "Prism removed");
        for channel in removed {
            self.discard_channel(channel).await;
        }
    }

    async fn check_timeouts(&mut self) {
        let timeout = self.config.negotiation_timeout;
        let expired: Vec<SessionOwner> = self
            .prisms
            .values()
            .flat_map(|prism| prism.directory.iter())
            .filter(|channel| {
                channel
                    .session
                    .as_ref()
                    .map(|s| s.is_expired(timeout))
                    .unwrap_or(false)
            })
            .map(|channel| (channel.prism_peer_id.clone(), channel.peer_id.clone()))
            .collect();

        for (prism_id, broadcaster) in expired {
            let e = Error::NegotiationFailure("timed out".into());
            tracing::warn!(channel = %broadcaster, error = %e, "Negotiation stalled");
            self.close_session(&prism_id, &broadcaster).await;
        }
    }

    async fn shutdown(&mut self) {
        for (_, mut prism) in self.prisms.drain() {
            if let Some(channel) = prism.channel.take() {
                channel.close();
            }
            for channel in prism.directory.iter_mut() {
                if let Some(mut session) = channel.take_session() {
                    session.close().await;
                }
            }
        }
        self.channel_index.clear();
        self.sessions.clear();
        self.owners.clear();
        self.network.stop().await;
        tracing::info!(peer = %self.local_peer_id, "Viewer stopped");
    }
}
