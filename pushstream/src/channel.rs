//! Streaming channel: one open server-push connection.
//!
//! A channel owns the outbound write path for a single connection. Frames
//! are queued into a bounded buffer drained by the HTTP response body, so a
//! slow client applies backpressure to senders instead of being dropped or
//! blocking a worker. Close is a single atomic state transition: whichever
//! trigger arrives first (transport completion, application close, shutdown)
//! releases the resources, and later triggers no-op.

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event::{encode_json, EventFrame};
use crate::metrics::ActiveGuard;
use crate::registry::ChannelRegistry;

/// Unique identifier for a streaming channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Create a new unique channel ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Write-path state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// Accepting writes
    Open = 0,
    /// A closer won the state race and is releasing resources
    Closing = 1,
    /// Fully released
    Closed = 2,
}

const STATE_OPEN: u8 = ChannelState::Open as u8;
const STATE_CLOSING: u8 = ChannelState::Closing as u8;
const STATE_CLOSED: u8 = ChannelState::Closed as u8;

/// One open server-push connection.
///
/// Created by the dispatcher after a successful handshake and admission
/// check; handed to the application's `on_connect` callback, which may keep
/// it for later sends or join it to broadcast groups.
#[derive(Debug)]
pub struct Channel<E> {
    id: ChannelId,
    path: Arc<str>,
    opened_at: DateTime<Utc>,
    state: AtomicU8,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    registry: Weak<ChannelRegistry<E>>,
}

impl<E> Channel<E> {
    /// Create a channel writing into the given frame queue.
    #[must_use]
    pub fn new(
        path: impl Into<Arc<str>>,
        sender: mpsc::Sender<Bytes>,
        registry: Weak<ChannelRegistry<E>>,
    ) -> Self {
        Self {
            id: ChannelId::new(),
            path: path.into(),
            opened_at: Utc::now(),
            state: AtomicU8::new(STATE_OPEN),
            sender,
            cancel: CancellationToken::new(),
            registry,
        }
    }

    /// Unique identifier of this channel
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Path this channel was opened on
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// When the connection was established
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Current write-path state
    #[must_use]
    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => ChannelState::Open,
            STATE_CLOSING => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    /// Whether the channel still accepts writes
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Queue pre-encoded frame bytes for delivery.
    ///
    /// Frames are delivered in send order. When the outbound buffer is
    /// full the call waits for capacity, so a slow consumer backpressures
    /// the producer rather than dropping frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] once the channel has been closed.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed(self.id));
        }
        self.sender
            .send(frame)
            .await
            .map_err(|_| Error::ChannelClosed(self.id))
    }

    /// Queue an event frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] once the channel has been closed.
    pub async fn send_frame(&self, frame: EventFrame) -> Result<()> {
        self.send(frame.encode()).await
    }

    /// Join a broadcast group on this channel's path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelNotRegistered`] if the channel has already
    /// been removed from its registry.
    pub fn join(&self, group: &str) -> Result<()> {
        match self.registry.upgrade() {
            Some(registry) => registry.join(&self.id, group),
            None => Err(Error::ChannelNotRegistered(self.id)),
        }
    }

    /// Leave a broadcast group. No-op if not a member.
    pub fn leave(&self, group: &str) {
        if let Some(registry) = self.registry.upgrade() {
            registry.leave(&self.id, group);
        }
    }

    /// Groups this channel currently belongs to
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.registry
            .upgrade()
            .map(|registry| registry.groups_of(&self.id))
            .unwrap_or_default()
    }

    /// Close the channel: detach from the registry and groups, terminate
    /// the transport, and reject further sends.
    ///
    /// Idempotent and safe to call from the transport completion hook,
    /// application code, and shutdown in any combination; exactly one
    /// caller performs the release.
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.cancel.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
        self.state.store(STATE_CLOSED, Ordering::Release);

        tracing::debug!(channel = %self.id, path = %self.path, "sse channel closed");
    }
}

impl<E: Serialize> Channel<E> {
    /// Serialize a typed event payload and queue it for delivery.
    ///
    /// # Errors
    ///
    /// Returns a serialization error or [`Error::ChannelClosed`].
    pub async fn send_event(&self, event: &E) -> Result<()> {
        self.send(encode_json(event, None)?).await
    }
}

/// Ties transport termination to channel cleanup: whatever ends the
/// response body (client disconnect, write error, server close) closes the
/// channel and releases the active-connection count exactly once.
pub(crate) struct ChannelGuard<E> {
    channel: Arc<Channel<E>>,
    _active: ActiveGuard,
}

impl<E> Drop for ChannelGuard<E> {
    fn drop(&mut self) {
        self.channel.close();
    }
}

/// Response body stream for one channel.
///
/// Yields queued frames until the channel is closed or the frame queue's
/// senders are gone.
pub(crate) struct ChannelStream<E> {
    frames: ReceiverStream<Bytes>,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
    // held for its drop side effect: closes the channel when the body ends
    _guard: ChannelGuard<E>,
}

impl<E> ChannelStream<E> {
    pub(crate) fn new(
        frames: mpsc::Receiver<Bytes>,
        channel: Arc<Channel<E>>,
        active: ActiveGuard,
    ) -> Self {
        let closed = Box::pin(channel.cancel.clone().cancelled_owned());
        Self {
            frames: ReceiverStream::new(frames),
            closed,
            _guard: ChannelGuard {
                channel,
                _active: active,
            },
        }
    }
}

impl<E> Stream for ChannelStream<E> {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        match Pin::new(&mut this.frames).poll_next(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::StreamMetrics;
    use futures::StreamExt;

    fn open_channel() -> (
        Arc<ChannelRegistry<String>>,
        Arc<Channel<String>>,
        mpsc::Receiver<Bytes>,
    ) {
        let registry = Arc::new(ChannelRegistry::new());
        let (tx, rx) = mpsc::channel(8);
        let channel = Arc::new(Channel::new("/events", tx, Arc::downgrade(&registry)));
        registry.add(channel.clone());
        (registry, channel, rx)
    }

    #[test]
    fn test_channel_id_uniqueness() {
        assert_ne!(ChannelId::new(), ChannelId::new());
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let (_registry, channel, mut rx) = open_channel();

        channel.send(Bytes::from_static(b"a")).await.unwrap();
        channel.send(Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_send_event_serializes_payload() {
        let (_registry, channel, mut rx) = open_channel();

        channel.send_event(&"hello".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"data:\"hello\"\n\n"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (registry, channel, _rx) = open_channel();
        assert_eq!(registry.len(), 1);

        channel.close();
        channel.close();

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (_registry, channel, _rx) = open_channel();
        channel.close();

        let err = channel.send(Bytes::from_static(b"late")).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn test_join_after_remove_fails() {
        let (registry, channel, _rx) = open_channel();
        registry.remove(&channel.id());

        let err = channel.join("g").unwrap_err();
        assert!(matches!(err, Error::ChannelNotRegistered(_)));
    }

    #[tokio::test]
    async fn test_stream_ends_on_close() {
        let (_registry, channel, rx) = open_channel();
        let metrics = Arc::new(StreamMetrics::new());
        let mut stream = ChannelStream::new(rx, channel.clone(), metrics.clone().begin_connection());

        channel.send(Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"one"));

        channel.close();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_channel_and_releases_count() {
        let (registry, channel, rx) = open_channel();
        let metrics = Arc::new(StreamMetrics::new());
        let stream = ChannelStream::new(rx, channel.clone(), metrics.clone().begin_connection());
        assert_eq!(metrics.active(), 1);

        drop(stream);

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(registry.len(), 0);
        assert_eq!(metrics.active(), 0);
    }
}
