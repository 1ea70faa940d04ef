//! Application callback invoked when a streaming connection opens.

use async_trait::async_trait;
use std::sync::Arc;

use crate::channel::Channel;
use crate::request::StreamRequest;

/// Application callback bound to a path at startup.
///
/// `on_connect` runs once per accepted connection, after the handshake and
/// admission checks succeed and the reconnection-hint frame has been
/// queued. The callback may send events immediately, keep the channel for
/// later sends, or join it to broadcast groups.
///
/// # Example
///
/// ```rust,ignore
/// struct Notifications;
///
/// #[async_trait]
/// impl StreamListener<Notification> for Notifications {
///     async fn on_connect(
///         &self,
///         request: &StreamRequest,
///         channel: Arc<Channel<Notification>>,
///         last_event_id: Option<String>,
///     ) -> anyhow::Result<()> {
///         channel.join("all")?;
///         if let Some(id) = last_event_id {
///             tracing::debug!(%id, "client resuming");
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait StreamListener<E>: Send + Sync {
    /// Handle a newly-opened channel.
    ///
    /// # Errors
    ///
    /// An error terminates the connection; it is logged with full request
    /// context and never affects other open channels.
    async fn on_connect(
        &self,
        request: &StreamRequest,
        channel: Arc<Channel<E>>,
        last_event_id: Option<String>,
    ) -> anyhow::Result<()>;
}
