//! Channel directory implementation

use std::collections::HashMap;

use super::entry::Channel;
use crate::network::PeerId;
use crate::protocol::ChannelInfo;

/// Broadcaster id to channel map for one prism
#[derive(Debug)]
pub struct ChannelDirectory<S> {
    prism: PeerId,
    channels: HashMap<PeerId, Channel<S>>,
}

impl<S> ChannelDirectory<S> {
    pub fn new(prism: PeerId) -> Self {
        Self {
            prism,
            channels: HashMap::new(),
        }
    }

    /// Prism that owns this directory
    pub fn prism(&self) -> &PeerId {
        &self.prism
    }

    /// Merge a channel list
    ///
    /// Info for keys already present is replaced; their sessions are kept.
    /// Returns the number of channels that were not known before.
    pub fn upsert_many(&mut self, channels: impl IntoIterator<Item = (PeerId, ChannelInfo)>) -> usize {
        let mut added = 0;
        for (peer_id, info) in channels {
            if self.upsert(peer_id, Some(info)) {
                added += 1;
            }
        }

        tracing::debug!(
            prism = %self.prism,
            added = added,
            total = self.channels.len(),
            "Channel list merged"
        );
        added
    }

    /// Insert or refresh one channel; returns true if it was new
    pub fn mark_added(&mut self, peer_id: PeerId, info: Option<ChannelInfo>) -> bool {
        let added = self.upsert(peer_id.clone(), info);
        tracing::debug!(prism = %self.prism, channel = %peer_id, new = added, "Channel added");
        added
    }

    fn upsert(&mut self, peer_id: PeerId, info: Option<ChannelInfo>) -> bool {
        match self.channels.get_mut(&peer_id) {
            Some(channel) => {
                if info.is_some() {
                    channel.info = info;
                }
                false
            }
            None => {
                let channel = Channel::new(peer_id.clone(), self.prism.clone(), info);
                self.channels.insert(peer_id, channel);
                true
            }
        }
    }

    /// Remove one channel, returning it so its session can be closed
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Channel<S>> {
        self.channels.remove(peer_id)
    }

    /// Remove every channel
    pub fn remove_all(&mut self) -> Vec<Channel<S>> {
        let removed: Vec<_> = self.channels.drain().map(|(_, channel)| channel).collect();
        if !removed.is_empty() {
            tracing::debug!(prism = %self.prism, count = removed.len(), "Directory cleared");
        }
        removed
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&Channel<S>> {
        self.channels.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut Channel<S>> {
        self.channels.get_mut(peer_id)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.channels.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel<S>> {
        self.channels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel<S>> {
        self.channels.values_mut()
    }
}
