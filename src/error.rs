//! Error types
//!
//! A single error enum covers the signaling codec, the peer network, and
//! media negotiation. None of these cross into lifecycle event handlers;
//! the role loops log them or turn them into `Closed` events.

use thiserror::Error;

use crate::network::PeerId;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Frame is not a JSON object, lacks a `topic`, or has an ill-shaped payload
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Topic not known to this version of the protocol
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// SDP has no `m=video` section to rewrite
    #[error("SDP has no video section")]
    NoVideoSection,

    #[error("Failed to dial {peer} on {protocol}: {reason}")]
    DialFailure {
        peer: PeerId,
        protocol: String,
        reason: String,
    },

    /// Description set, offer/answer creation, or candidate add failed
    #[error("Negotiation failed: {0}")]
    NegotiationFailure(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(PeerId),

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("Node is not running")]
    NotRunning,

    #[error("Node already started")]
    AlreadyStarted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::MalformedMessage(e.to_string())
    }
}
