//! Statistics for signaling channels and negotiation sessions

pub mod metrics;

pub use metrics::{ChannelStats, ChannelStatsSnapshot, SessionStats};
