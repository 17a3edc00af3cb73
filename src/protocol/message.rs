//! Typed signaling messages
//!
//! One variant per topic. On the wire each message is a flat JSON object
//! whose `topic` field names the variant and whose remaining fields are the
//! payload, e.g. `{"topic":"requestCreateOffer","peerId":"Qm..."}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::constants::topics;
use crate::media::{IceCandidate, SessionDescription};
use crate::network::PeerId;

/// Metadata a prism keeps about a broadcaster's channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,

    /// Fields this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChannelInfo {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }
}

/// Interpretation of `updateChannelInfo.type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelUpdateKind {
    Added,
    Removed,
    Other(String),
}

impl ChannelUpdateKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "added" => ChannelUpdateKind::Added,
            "removed" => ChannelUpdateKind::Removed,
            other => ChannelUpdateKind::Other(other.to_string()),
        }
    }
}

/// All signaling messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum SignalingMessage {
    /// Streamer announces its presence to a prism
    #[serde(rename = "updateStreamerInfo")]
    UpdateStreamerInfo {
        #[serde(default)]
        profile: Value,
        #[serde(default)]
        title: String,
    },

    /// Prism asks the streamer to bind a remote
    #[serde(rename = "requestStreamerInfo")]
    RequestStreamerInfo {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "setupStreamInfo")]
    SetupStreamInfo {},

    #[serde(rename = "deniedStreamInfo")]
    DeniedStreamInfo {},

    /// Prism refused the streamer's setup
    #[serde(rename = "deniedSetupStreamInfo")]
    DeniedSetupStreamInfo {},

    #[serde(rename = "readyToCast")]
    ReadyToCast {},

    #[serde(rename = "sendCreatedOffer")]
    SendCreatedOffer {
        sdp: SessionDescription,
        #[serde(rename = "peerId", default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
    },

    #[serde(rename = "sendCreatedAnswer")]
    SendCreatedAnswer {
        sdp: SessionDescription,
        #[serde(rename = "peerId", default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
    },

    /// Trickled ICE candidate; older streamers name the field `candidate`
    #[serde(rename = "sendTrickleCandidate")]
    SendTrickleCandidate {
        #[serde(alias = "candidate")]
        ice: IceCandidate,
        #[serde(rename = "peerId", default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<PeerId>,
    },

    /// Viewer registers ("waves") with a prism
    #[serde(rename = "registerWaveInfo")]
    RegisterWaveInfo {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    #[serde(rename = "sendChannelsList")]
    SendChannelsList {
        #[serde(default)]
        channels: BTreeMap<PeerId, ChannelInfo>,
    },

    #[serde(rename = "updateChannelInfo")]
    UpdateChannelInfo {
        #[serde(rename = "type")]
        kind: String,
        #[serde(rename = "peerId")]
        peer_id: PeerId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<ChannelInfo>,
    },

    #[serde(rename = "updateWaves")]
    UpdateWaves {
        #[serde(default)]
        waves: Value,
    },

    #[serde(rename = "requestCreateOffer")]
    RequestCreateOffer {
        #[serde(rename = "peerId")]
        peer_id: PeerId,
    },

    /// Reply on the streamer info protocol
    #[serde(rename = "connectedPrismPeerId")]
    ConnectedPrismPeerId {
        #[serde(rename = "prismPeerId")]
        prism_peer_id: PeerId,
    },
}

impl SignalingMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            SignalingMessage::UpdateStreamerInfo { .. } => topics::UPDATE_STREAMER_INFO,
            SignalingMessage::RequestStreamerInfo { .. } => topics::REQUEST_STREAMER_INFO,
            SignalingMessage::SetupStreamInfo {} => topics::SETUP_STREAM_INFO,
            SignalingMessage::DeniedStreamInfo {} => topics::DENIED_STREAM_INFO,
            SignalingMessage::DeniedSetupStreamInfo {} => topics::DENIED_SETUP_STREAM_INFO,
            SignalingMessage::ReadyToCast {} => topics::READY_TO_CAST,
            SignalingMessage::SendCreatedOffer { .. } => topics::SEND_CREATED_OFFER,
            SignalingMessage::SendCreatedAnswer { .. } => topics::SEND_CREATED_ANSWER,
            SignalingMessage::SendTrickleCandidate { .. } => topics::SEND_TRICKLE_CANDIDATE,
            SignalingMessage::RegisterWaveInfo { .. } => topics::REGISTER_WAVE_INFO,
            SignalingMessage::SendChannelsList { .. } => topics::SEND_CHANNELS_LIST,
            SignalingMessage::UpdateChannelInfo { .. } => topics::UPDATE_CHANNEL_INFO,
            SignalingMessage::UpdateWaves { .. } => topics::UPDATE_WAVES,
            SignalingMessage::RequestCreateOffer { .. } => topics::REQUEST_CREATE_OFFER,
            SignalingMessage::ConnectedPrismPeerId { .. } => topics::CONNECTED_PRISM_PEER_ID,
        }
    }

    pub fn update_streamer_info(profile: Value, title: impl Into<String>) -> Self {
        SignalingMessage::UpdateStreamerInfo {
            profile,
            title: title.into(),
        }
    }

    pub fn request_streamer_info(peer_id: impl Into<PeerId>) -> Self {
        SignalingMessage::RequestStreamerInfo {
            peer_id: peer_id.into(),
        }
    }

    pub fn offer(sdp: SessionDescription, peer_id: Option<PeerId>) -> Self {
        SignalingMessage::SendCreatedOffer { sdp, peer_id }
    }

    pub fn answer(sdp: SessionDescription, peer_id: Option<PeerId>) -> Self {
        SignalingMessage::SendCreatedAnswer { sdp, peer_id }
    }

    pub fn candidate(ice: IceCandidate, peer_id: Option<PeerId>) -> Self {
        SignalingMessage::SendTrickleCandidate { ice, peer_id }
    }

    pub fn register_wave(peer_id: impl Into<PeerId>) -> Self {
        SignalingMessage::RegisterWaveInfo {
            peer_id: peer_id.into(),
        }
    }

    pub fn channels_list(channels: impl IntoIterator<Item = (PeerId, ChannelInfo)>) -> Self {
        SignalingMessage::SendChannelsList {
            channels: channels.into_iter().collect(),
        }
    }

    pub fn channel_update(
        kind: impl Into<String>,
        peer_id: impl Into<PeerId>,
        info: Option<ChannelInfo>,
    ) -> Self {
        SignalingMessage::UpdateChannelInfo {
            kind: kind.into(),
            peer_id: peer_id.into(),
            info,
        }
    }

    pub fn request_create_offer(peer_id: impl Into<PeerId>) -> Self {
        SignalingMessage::RequestCreateOffer {
            peer_id: peer_id.into(),
        }
    }
}
