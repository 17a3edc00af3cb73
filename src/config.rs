//! Role configuration
//!
//! Plain structs with defaults and chained builder methods. `NodeConfig`
//! selects which role [`crate::create_node`] builds.

use std::time::Duration;

use serde_json::Value;

use crate::network::PeerId;
use crate::protocol::constants::{DEFAULT_PREFERRED_CODEC, DEFAULT_SERVICE_ID, DEFAULT_STUN_SERVER};

/// Options handed to the media engine when a transport is created
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConnectionConfig {
    /// ICE server URLs (STUN/TURN)
    pub ice_servers: Vec<String>,

    /// SDP semantics requested from the engine
    pub sdp_semantics: String,
}

impl Default for PeerConnectionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            sdp_semantics: "unified-plan".to_string(),
        }
    }
}

/// Bounded retry policy for dialing peers
#[derive(Debug, Clone, PartialEq)]
pub struct DialPolicy {
    /// Total dial attempts (at least 1)
    pub attempts: u32,

    /// Delay before the second attempt; doubled after each failure
    pub initial_backoff: Duration,

    /// Upper bound on the delay between attempts
    pub max_backoff: Duration,
}

impl Default for DialPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

/// Streamer configuration
#[derive(Debug, Clone)]
pub struct StreamerConfig {
    /// Service id used to build sub-protocol names
    pub service_id: String,

    /// Broadcast title announced in `updateStreamerInfo`
    pub title: String,

    /// Free-form profile announced in `updateStreamerInfo`
    pub profile: Value,

    /// Codec moved to the front of the offered video formats
    pub preferred_codec: String,

    /// Prism to dial as controller; when unset, discovered peers are tried
    pub prism: Option<PeerId>,

    /// Transport options
    pub peer_connection: PeerConnectionConfig,

    /// Upper bound for `NegotiatingOffer`/`Offered` before the session is closed
    pub negotiation_timeout: Duration,

    /// How often stalled negotiations are checked
    pub timeout_check_interval: Duration,

    /// Retry policy for controller dials
    pub dial: DialPolicy,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_SERVICE_ID.to_string(),
            title: "anonymous".to_string(),
            profile: Value::Object(Default::default()),
            preferred_codec: DEFAULT_PREFERRED_CODEC.to_string(),
            prism: None,
            peer_connection: PeerConnectionConfig::default(),
            negotiation_timeout: Duration::from_secs(30),
            timeout_check_interval: Duration::from_secs(1),
            dial: DialPolicy::default(),
        }
    }
}

impl StreamerConfig {
    pub fn service_id(mut self, id: impl Into<String>) -> Self {
        self.service_id = id.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn profile(mut self, profile: Value) -> Self {
        self.profile = profile;
        self
    }

    pub fn preferred_codec(mut self, codec: impl Into<String>) -> Self {
        self.preferred_codec = codec.into();
        self
    }

    /// Dial this prism as controller on start
    pub fn prism(mut self, prism: impl Into<PeerId>) -> Self {
        self.prism = Some(prism.into());
        self
    }

    pub fn peer_connection(mut self, config: PeerConnectionConfig) -> Self {
        self.peer_connection = config;
        self
    }

    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self
    }

    pub fn dial_policy(mut self, policy: DialPolicy) -> Self {
        self.dial = policy;
        self
    }
}

/// Viewer configuration
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Service id used to build sub-protocol names
    pub service_id: String,

    /// Streamer to resolve through its info protocol on start
    pub streamer_peer_id: Option<PeerId>,

    /// Transport options
    pub peer_connection: PeerConnectionConfig,

    /// Upper bound for a session to reach `Connected`
    pub negotiation_timeout: Duration,

    /// How often stalled negotiations are checked
    pub timeout_check_interval: Duration,

    /// Retry policy for prism dials
    pub dial: DialPolicy,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_SERVICE_ID.to_string(),
            streamer_peer_id: None,
            peer_connection: PeerConnectionConfig::default(),
            negotiation_timeout: Duration::from_secs(30),
            timeout_check_interval: Duration::from_secs(1),
            dial: DialPolicy::default(),
        }
    }
}

impl ViewerConfig {
    pub fn service_id(mut self, id: impl Into<String>) -> Self {
        self.service_id = id.into();
        self
    }

    /// Resolve and dial the prism this streamer is connected to
    pub fn streamer_peer_id(mut self, peer: impl Into<PeerId>) -> Self {
        self.streamer_peer_id = Some(peer.into());
        self
    }

    pub fn peer_connection(mut self, config: PeerConnectionConfig) -> Self {
        self.peer_connection = config;
        self
    }

    pub fn negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    pub fn timeout_check_interval(mut self, interval: Duration) -> Self {
        self.timeout_check_interval = interval;
        self
    }

    pub fn dial_policy(mut self, policy: DialPolicy) -> Self {
        self.dial = policy;
        self
    }
}

/// Role selection for [`crate::create_node`]
#[derive(Debug, Clone)]
pub enum NodeConfig {
    Streamer(StreamerConfig),
    Viewer(ViewerConfig),
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig::Viewer(ViewerConfig::default())
    }
}
