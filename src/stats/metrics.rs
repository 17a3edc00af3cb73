//! Statistics and metrics for signaling

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for one signaling channel
///
/// Shared between the channel handle and its reader/writer tasks.
#[derive(Debug, Default)]
pub struct ChannelStats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    malformed_frames: AtomicU64,
    unknown_topics: AtomicU64,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown(&self) {
        self.unknown_topics.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unknown_topics: self.unknown_topics.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`ChannelStats`] counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    /// Frames written
    pub messages_sent: u64,
    /// Frames decoded into known messages
    pub messages_received: u64,
    /// Encoded bytes written
    pub bytes_sent: u64,
    /// Bytes read, delimiters included
    pub bytes_received: u64,
    /// Frames dropped as malformed
    pub malformed_frames: u64,
    /// Frames ignored for an unknown topic
    pub unknown_topics: u64,
}

/// Per-session negotiation statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// When the session was created
    pub created_at: Instant,
    /// When ICE completed
    pub connected_at: Option<Instant>,
    /// Local candidates trickled to the remote
    pub candidates_sent: u64,
    /// Remote candidates received
    pub candidates_received: u64,
    /// Remote candidates that arrived before the remote description
    pub candidates_buffered: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            connected_at: None,
            candidates_sent: 0,
            candidates_received: 0,
            candidates_buffered: 0,
        }
    }

    /// Time from creation until ICE completed
    pub fn negotiation_time(&self) -> Option<Duration> {
        self.connected_at
            .map(|at| at.saturating_duration_since(self.created_at))
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_stats_new() {
        let stats = ChannelStats::new();
        assert_eq!(stats.snapshot(), ChannelStatsSnapshot::default());
    }

    #[test]
    fn test_channel_stats_counters() {
        let stats = ChannelStats::new();

        stats.record_sent(100);
        stats.record_sent(20);
        stats.record_received(50);
        stats.record_malformed();
        stats.record_unknown();
        stats.record_unknown();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.bytes_sent, 120);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.bytes_received, 50);
        assert_eq!(snapshot.malformed_frames, 1);
        assert_eq!(snapshot.unknown_topics, 2);
    }

    #[test]
    fn test_session_stats_new() {
        let stats = SessionStats::new();
        assert_eq!(stats.candidates_sent, 0);
        assert_eq!(stats.candidates_received, 0);
        assert_eq!(stats.candidates_buffered, 0);
        assert!(stats.negotiation_time().is_none());
    }

    #[test]
    fn test_session_stats_negotiation_time() {
        let mut stats = SessionStats::new();
        stats.connected_at = Some(stats.created_at + Duration::from_millis(250));

        assert_eq!(stats.negotiation_time(), Some(Duration::from_millis(250)));
    }
}
