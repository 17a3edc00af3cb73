//! Negotiation sessions
//!
//! A [`Session`] is the negotiation context with one remote peer. It owns
//! the media transport for that peer and buffers remote ICE candidates until
//! a remote description has been applied.

pub mod state;

pub use state::{NegotiationState, Session};
