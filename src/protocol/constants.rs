//! Protocol constants

/// Service id used when none is configured
pub const DEFAULT_SERVICE_ID: &str = "TESTO";

/// Codec the streamer moves to the front of its video offer
pub const DEFAULT_PREFERRED_CODEC: &str = "h264";

/// STUN server handed to transports by default
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Frame delimiter on signaling streams
pub const FRAME_DELIMITER: u8 = b'\n';

/// Largest accepted signaling frame (SDP blobs included)
pub const MAX_FRAME_SIZE: usize = 256 * 1024;

/// Streamer-side media negotiation channel, dialed by a prism
pub fn streamer_protocol(service_id: &str) -> String {
    format!("/streamer/{}/unified-plan", service_id)
}

/// Streamer-side peer-info lookup
pub fn streamer_info_protocol(service_id: &str) -> String {
    format!("/streamer/{}/info", service_id)
}

/// Prism-side controller channel, dialed by streamers and viewers
pub fn controller_protocol(service_id: &str) -> String {
    format!("/controller/{}", service_id)
}

/// Message topics
pub mod topics {
    pub const UPDATE_STREAMER_INFO: &str = "updateStreamerInfo";
    pub const REQUEST_STREAMER_INFO: &str = "requestStreamerInfo";
    pub const SETUP_STREAM_INFO: &str = "setupStreamInfo";
    pub const DENIED_STREAM_INFO: &str = "deniedStreamInfo";
    pub const DENIED_SETUP_STREAM_INFO: &str = "deniedSetupStreamInfo";
    pub const READY_TO_CAST: &str = "readyToCast";
    pub const SEND_CREATED_OFFER: &str = "sendCreatedOffer";
    pub const SEND_CREATED_ANSWER: &str = "sendCreatedAnswer";
    pub const SEND_TRICKLE_CANDIDATE: &str = "sendTrickleCandidate";
    pub const REGISTER_WAVE_INFO: &str = "registerWaveInfo";
    pub const SEND_CHANNELS_LIST: &str = "sendChannelsList";
    pub const UPDATE_CHANNEL_INFO: &str = "updateChannelInfo";
    pub const UPDATE_WAVES: &str = "updateWaves";
    pub const REQUEST_CREATE_OFFER: &str = "requestCreateOffer";
    pub const CONNECTED_PRISM_PEER_ID: &str = "connectedPrismPeerId";

    /// Every topic this crate understands
    pub const ALL: &[&str] = &[
        UPDATE_STREAMER_INFO,
        REQUEST_STREAMER_INFO,
        SETUP_STREAM_INFO,
        DENIED_STREAM_INFO,
        DENIED_SETUP_STREAM_INFO,
        READY_TO_CAST,
        SEND_CREATED_OFFER,
        SEND_CREATED_ANSWER,
        SEND_TRICKLE_CANDIDATE,
        REGISTER_WAVE_INFO,
        SEND_CHANNELS_LIST,
        UPDATE_CHANNEL_INFO,
        UPDATE_WAVES,
        REQUEST_CREATE_OFFER,
        CONNECTED_PRISM_PEER_ID,
    ];

    pub fn is_known(topic: &str) -> bool {
        ALL.contains(&topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names() {
        assert_eq!(streamer_protocol("TESTO"), "/streamer/TESTO/unified-plan");
        assert_eq!(streamer_info_protocol("TESTO"), "/streamer/TESTO/info");
        assert_eq!(controller_protocol("TESTO"), "/controller/TESTO");
    }

    #[test]
    fn test_known_topics() {
        assert!(topics::is_known("readyToCast"));
        assert!(!topics::is_known("ready_to_cast"));
        assert!(!topics::is_known(""));
    }
}
