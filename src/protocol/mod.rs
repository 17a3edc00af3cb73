//! Signaling protocol
//!
//! Sub-protocol names, the topic set, typed messages, and the
//! newline-delimited envelope codec.

pub mod constants;
pub mod envelope;
pub mod message;

pub use envelope::{decode, encode, Envelope};
pub use message::{ChannelInfo, ChannelUpdateKind, SignalingMessage};
