// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `channel_key -> Channel` registry plus the auxiliary
//! `caller_source_id -> channel_key` index, behind one coarse lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::Channel;
use crate::model::ChannelKey;

#[derive(Default)]
struct Inner {
    channels: HashMap<ChannelKey, Arc<Channel>>,
    source_index: HashMap<String, ChannelKey>,
}

#[derive(Default)]
pub struct ChannelRegistry {
    inner: Mutex<Inner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ChannelKey) -> Option<Arc<Channel>> {
        self.inner.lock().channels.get(key).cloned()
    }

    /// Looks up a channel by its canonical string key (spec.md §6 format).
    /// Channel counts are small (one per live camera source), so a linear
    /// scan beats keeping a second string-keyed index in sync.
    pub fn get_by_str(&self, key_str: &str) -> Option<Arc<Channel>> {
        self.inner
            .lock()
            .channels
            .values()
            .find(|c| c.key.to_string() == key_str)
            .cloned()
    }

    pub fn insert(&self, channel: Arc<Channel>) {
        self.inner.lock().channels.insert(channel.key.clone(), channel);
    }

    /// Removes the channel from the registry and drops every source-id
    /// mapping pointing at it. Returns the removed channel, if any.
    pub fn remove(&self, key: &ChannelKey) -> Option<Arc<Channel>> {
        let mut guard = self.inner.lock();
        let removed = guard.channels.remove(key);
        guard.source_index.retain(|_, v| v != key);
        removed
    }

    pub fn map_source(&self, caller_source_id: String, key: ChannelKey) {
        self.inner.lock().source_index.insert(caller_source_id, key);
    }

    /// Removes only the `caller_source_id -> key` mapping; the channel
    /// itself is left untouched (spec.md §4.5 `Stop` semantics).
    pub fn unmap_source(&self, caller_source_id: &str) {
        self.inner.lock().source_index.remove(caller_source_id);
    }

    pub fn lookup_by_source(&self, caller_source_id: &str) -> Option<Arc<Channel>> {
        let guard = self.inner.lock();
        let key = guard.source_index.get(caller_source_id)?;
        guard.channels.get(key).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.inner.lock().channels.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source_index_len(&self) -> usize {
        self.inner.lock().source_index.len()
    }
}
