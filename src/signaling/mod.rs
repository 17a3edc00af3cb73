//! Signaling channels
//!
//! A [`SignalingChannel`] wraps one dialed or accepted stream. Outbound
//! messages go through an ordered queue; inbound messages are decoded and
//! forwarded, tagged with the channel id and peer, to the owning role's
//! single inbound queue where they are dispatched with an exhaustive match.
//!
//! ```text
//!   role loop ── send() ──► [queue] ──► writer task ──► stream
//!       ▲                                                  │
//!       └──── InboundEvent ◄── reader task ◄───────────────┘
//! ```

pub mod channel;

pub use channel::{read_message, write_message, ChannelEvent, InboundEvent, SignalingChannel};
