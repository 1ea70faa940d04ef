//! # pushstream
//!
//! Server-push event streaming: upgrade qualifying HTTP requests into
//! long-lived server-sent-event connections, track them per path, and
//! broadcast to arbitrary subsets of connected clients.
//!
//! ## Features
//!
//! - **Handshake negotiation**: `check` gates on GET + `Accept: text/event-stream`;
//!   `handle` runs admission checks and materializes the stream
//! - **Backpressure-aware writes**: bounded per-channel frame queues, so slow
//!   clients backpressure producers instead of dropping frames
//! - **Group broadcast**: per-path registries with a group index for
//!   selective, local-process fan-out
//! - **Exactly-once teardown**: transport completion, application close, and
//!   process shutdown race safely; whichever fires first releases the channel
//! - **Reconnection hinting**: `retry:` frame sent before application code
//!   runs; `Last-Event-ID` surfaced to the connect callback
//! - **Collaborator seams**: IP access control, connect rate control, and
//!   session lookup are consumed through narrow traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pushstream::prelude::*;
//!
//! struct Notifications;
//!
//! #[async_trait]
//! impl StreamListener<Notification> for Notifications {
//!     async fn on_connect(
//!         &self,
//!         _request: &StreamRequest,
//!         channel: Arc<Channel<Notification>>,
//!         _last_event_id: Option<String>,
//!     ) -> anyhow::Result<()> {
//!         channel.join("all")?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     init_tracing("info");
//!
//!     let registry = Arc::new(ChannelRegistry::new());
//!     let dispatcher = Arc::new(
//!         Dispatcher::builder()
//!             .config(StreamConfig::default())
//!             .bind("/events", Notifications, registry.clone())?
//!             .build(),
//!     );
//!
//!     // elsewhere: push to everyone in a group
//!     registry.broadcast("all", &Notification { .. }).await?;
//!
//!     let app = dispatcher.router();
//!     // serve `app`, and wire ShutdownCoordinator into the signal handler
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod listener;
pub mod metrics;
pub mod observability;
pub mod registry;
pub mod request;
pub mod shutdown;

pub mod prelude {
    //! Common imports for applications using the streaming subsystem.
    pub use crate::channel::{Channel, ChannelId, ChannelState};
    pub use crate::config::StreamConfig;
    pub use crate::dispatch::{Dispatcher, DispatcherBuilder, EVENT_STREAM_MEDIA_TYPE};
    pub use crate::error::{Error, ErrorResponse, Result};
    pub use crate::event::EventFrame;
    pub use crate::listener::StreamListener;
    pub use crate::metrics::StreamMetrics;
    pub use crate::observability::init_tracing;
    pub use crate::registry::ChannelRegistry;
    pub use crate::request::{
        IpAccessControl, RateControl, ReadOnlySession, SessionStore, StreamRequest,
    };
    pub use crate::shutdown::ShutdownCoordinator;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
