//! Per-path channel registry and group index.
//!
//! One registry exists per bound path. It tracks the currently-open
//! channels plus a group-name index used for selective broadcast. The
//! channel set and group index live behind a single lock so removing a
//! channel purges its group memberships in the same atomic step; a group
//! entry can never outlive its channel.

use axum::body::Bytes;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::channel::{Channel, ChannelId};
use crate::error::{Error, Result};
use crate::event::{encode_json, EventFrame};

struct RegistryInner<E> {
    channels: HashMap<ChannelId, Arc<Channel<E>>>,
    groups: HashMap<String, HashSet<ChannelId>>,
}

/// The set of open channels for one path, with a group index for
/// selective broadcast.
pub struct ChannelRegistry<E> {
    inner: Mutex<RegistryInner<E>>,
}

impl<E> ChannelRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                channels: HashMap::new(),
                groups: HashMap::new(),
            }),
        }
    }

    // Critical sections are short and never call user code, so a poisoned
    // lock only means a panic between map edits; the maps stay usable.
    fn lock(&self) -> MutexGuard<'_, RegistryInner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a newly-opened channel.
    pub fn add(&self, channel: Arc<Channel<E>>) {
        let mut inner = self.lock();
        inner.channels.insert(channel.id(), channel);
    }

    /// Remove a channel and purge it from every group it belonged to.
    ///
    /// Idempotent; returns whether the channel was present.
    pub fn remove(&self, id: &ChannelId) -> bool {
        let mut inner = self.lock();
        let removed = inner.channels.remove(id).is_some();
        inner.groups.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
        removed
    }

    /// Join a registered channel to a group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotRegistered`] if the channel is not in
    /// this registry (it was never added, or has already closed).
    pub fn join(&self, id: &ChannelId, group: &str) -> Result<()> {
        let mut inner = self.lock();
        if !inner.channels.contains_key(id) {
            return Err(Error::ChannelNotRegistered(*id));
        }
        inner.groups.entry(group.to_string()).or_default().insert(*id);
        Ok(())
    }

    /// Remove a channel from a group. No-op if not a member.
    pub fn leave(&self, id: &ChannelId, group: &str) {
        let mut inner = self.lock();
        if let Some(members) = inner.groups.get_mut(group) {
            members.remove(id);
            if members.is_empty() {
                inner.groups.remove(group);
            }
        }
    }

    /// Groups the given channel currently belongs to, sorted by name.
    #[must_use]
    pub fn groups_of(&self, id: &ChannelId) -> Vec<String> {
        let inner = self.lock();
        let mut groups: Vec<String> = inner
            .groups
            .iter()
            .filter(|(_, members)| members.contains(id))
            .map(|(name, _)| name.clone())
            .collect();
        groups.sort();
        groups
    }

    /// Number of members currently in a group.
    #[must_use]
    pub fn group_len(&self, group: &str) -> usize {
        self.lock().groups.get(group).map_or(0, HashSet::len)
    }

    /// Snapshot of all currently-open channels.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Channel<E>>> {
        self.lock().channels.values().cloned().collect()
    }

    /// Number of currently-open channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().channels.len()
    }

    /// Whether the registry holds no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().channels.is_empty()
    }

    fn group_snapshot(&self, group: &str) -> Vec<Arc<Channel<E>>> {
        let inner = self.lock();
        match inner.groups.get(group) {
            Some(members) => members
                .iter()
                .filter_map(|id| inner.channels.get(id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Send a pre-built frame to every channel currently in the group.
    ///
    /// Membership is read once at call time; channels joining mid-broadcast
    /// may or may not receive the frame, and channels closed mid-broadcast
    /// are skipped. Returns the number of channels the frame was queued to.
    pub async fn broadcast_frame(&self, group: &str, frame: EventFrame) -> usize {
        self.deliver(self.group_snapshot(group), frame.encode()).await
    }

    async fn deliver(&self, targets: Vec<Arc<Channel<E>>>, frame: Bytes) -> usize {
        let mut sent = 0;
        for channel in targets {
            if channel.send(frame.clone()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

impl<E: Serialize> ChannelRegistry<E> {
    /// Serialize a typed event once and send it to every channel currently
    /// in the group.
    ///
    /// # Errors
    ///
    /// Returns a serialization error; delivery itself never fails the
    /// broadcaster.
    pub async fn broadcast(&self, group: &str, event: &E) -> Result<usize> {
        let frame = encode_json(event, None)?;
        Ok(self.deliver(self.group_snapshot(group), frame).await)
    }

    /// Serialize a typed event once and send it to every open channel.
    ///
    /// # Errors
    ///
    /// Returns a serialization error; delivery itself never fails the
    /// broadcaster.
    pub async fn broadcast_all(&self, event: &E) -> Result<usize> {
        let frame = encode_json(event, None)?;
        Ok(self.deliver(self.all(), frame).await)
    }
}

impl<E> Default for ChannelRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use tokio::sync::mpsc;

    fn open_channel(
        registry: &Arc<ChannelRegistry<String>>,
    ) -> (Arc<Channel<String>>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(8);
        let channel = Arc::new(Channel::new("/events", tx, Arc::downgrade(registry)));
        registry.add(channel.clone());
        (channel, rx)
    }

    #[tokio::test]
    async fn test_add_remove() {
        let registry = Arc::new(ChannelRegistry::new());
        let (channel, _rx) = open_channel(&registry);
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(&channel.id()));
        assert!(!registry.remove(&channel.id()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_join_unregistered_channel_fails() {
        let registry: Arc<ChannelRegistry<String>> = Arc::new(ChannelRegistry::new());
        let other: Arc<ChannelRegistry<String>> = Arc::new(ChannelRegistry::new());
        let (channel, _rx) = open_channel(&other);

        let err = registry.join(&channel.id(), "g").unwrap_err();
        assert!(matches!(err, Error::ChannelNotRegistered(_)));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_group_members() {
        let registry = Arc::new(ChannelRegistry::new());
        let (member, mut member_rx) = open_channel(&registry);
        let (outsider, mut outsider_rx) = open_channel(&registry);

        registry.join(&member.id(), "g").unwrap();
        let sent = registry.broadcast("g", &"hi".to_string()).await.unwrap();

        assert_eq!(sent, 1);
        assert_eq!(
            member_rx.recv().await.unwrap(),
            Bytes::from_static(b"data:\"hi\"\n\n")
        );
        assert!(outsider_rx.try_recv().is_err());
        drop(outsider);
    }

    #[tokio::test]
    async fn test_leave_stops_delivery() {
        let registry = Arc::new(ChannelRegistry::new());
        let (channel, mut rx) = open_channel(&registry);
        registry.join(&channel.id(), "g").unwrap();

        registry.leave(&channel.id(), "g");
        let sent = registry.broadcast("g", &"hi".to_string()).await.unwrap();

        assert_eq!(sent, 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.group_len("g"), 0);
    }

    #[tokio::test]
    async fn test_remove_purges_group_membership() {
        let registry = Arc::new(ChannelRegistry::new());
        let (channel, mut rx) = open_channel(&registry);
        registry.join(&channel.id(), "g").unwrap();
        registry.join(&channel.id(), "h").unwrap();

        registry.remove(&channel.id());

        assert_eq!(registry.group_len("g"), 0);
        assert_eq!(registry.group_len("h"), 0);
        assert_eq!(registry.broadcast("g", &"hi".to_string()).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_all() {
        let registry = Arc::new(ChannelRegistry::new());
        let (_a, mut a_rx) = open_channel(&registry);
        let (_b, mut b_rx) = open_channel(&registry);

        let sent = registry.broadcast_all(&"hi".to_string()).await.unwrap();

        assert_eq!(sent, 2);
        assert!(a_rx.recv().await.is_some());
        assert!(b_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_frame_verbatim() {
        let registry = Arc::new(ChannelRegistry::new());
        let (channel, mut rx) = open_channel(&registry);
        registry.join(&channel.id(), "all").unwrap();

        registry
            .broadcast_frame("all", EventFrame::new("hello"))
            .await;

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"data:hello\n\n"));
    }

    #[tokio::test]
    async fn test_broadcast_skips_closed_channels() {
        let registry = Arc::new(ChannelRegistry::new());
        let (open, mut open_rx) = open_channel(&registry);
        let (closed, _closed_rx) = open_channel(&registry);
        registry.join(&open.id(), "g").unwrap();
        registry.join(&closed.id(), "g").unwrap();

        closed.close();
        let sent = registry.broadcast("g", &"hi".to_string()).await.unwrap();

        assert_eq!(sent, 1);
        assert!(open_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_adds_and_closes() {
        let registry: Arc<ChannelRegistry<String>> = Arc::new(ChannelRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (tx, rx) = mpsc::channel(8);
                let channel = Arc::new(Channel::new("/events", tx, Arc::downgrade(&registry)));
                registry.add(channel.clone());
                (channel, rx)
            }));
        }
        let mut channels = Vec::new();
        for handle in handles {
            channels.push(handle.await.unwrap());
        }
        assert_eq!(registry.len(), 32);

        let mut closers = Vec::new();
        for (channel, _rx) in &channels {
            let channel = channel.clone();
            closers.push(tokio::spawn(async move { channel.close() }));
        }
        for closer in closers {
            closer.await.unwrap();
        }
        assert_eq!(registry.len(), 0);
    }
}
