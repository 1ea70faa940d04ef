//! Connection dispatcher: handshake negotiation, admission checks, and
//! channel lifecycle wiring.
//!
//! The dispatcher is the entry point the transport layer hands qualifying
//! requests to. `check` decides whether a request belongs to this
//! subsystem at all; `handle` runs the full connect sequence and returns
//! the streaming response. Path bindings are frozen at build time, so the
//! path table is read-only at runtime.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

use crate::channel::{Channel, ChannelStream};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::event::{comment_frame, retry_frame};
use crate::listener::StreamListener;
use crate::metrics::{ActiveGuard, StreamMetrics};
use crate::registry::ChannelRegistry;
use crate::request::{IpAccessControl, RateControl, SessionStore, StreamRequest};

/// Media type negotiated by the streaming handshake.
pub const EVENT_STREAM_MEDIA_TYPE: &str = "text/event-stream";

/// Path-erased listener binding stored in the dispatcher's table.
#[async_trait]
trait Binding: Send + Sync {
    async fn connect(
        &self,
        request: StreamRequest,
        active: ActiveGuard,
        config: &StreamConfig,
    ) -> Result<Body>;

    fn close_all(&self) -> usize;

    fn open_channels(&self) -> usize;
}

/// Typed binding: listener + registry for one path.
struct ListenerBinding<E> {
    listener: Arc<dyn StreamListener<E>>,
    registry: Arc<ChannelRegistry<E>>,
}

#[async_trait]
impl<E: Serialize + Send + Sync + 'static> Binding for ListenerBinding<E> {
    async fn connect(
        &self,
        request: StreamRequest,
        active: ActiveGuard,
        config: &StreamConfig,
    ) -> Result<Body> {
        let (tx, rx) = tokio::sync::mpsc::channel(config.send_buffer.max(1));
        let channel = Arc::new(Channel::new(
            request.path.as_str(),
            tx,
            Arc::downgrade(&self.registry),
        ));
        self.registry.add(channel.clone());
        tracing::Span::current().record("channel", tracing::field::display(channel.id()));

        // The client must have a reconnection policy before application
        // code runs, even if the connection dies immediately after.
        if let Err(err) = channel.send(retry_frame(config.retry())).await {
            channel.close();
            return Err(err);
        }

        let last_event_id = request.last_event_id.clone();
        if let Err(err) = self
            .listener
            .on_connect(&request, channel.clone(), last_event_id)
            .await
        {
            channel.close();
            return Err(Error::Listener(err));
        }

        // Groups joined during on_connect, recorded for correlation
        let groups = self.registry.groups_of(&channel.id());
        if !groups.is_empty() {
            tracing::Span::current().record("group", tracing::field::debug(&groups));
        }

        if let Some(interval) = config.keep_alive_interval() {
            spawn_keep_alive(channel.clone(), interval);
        }

        Ok(Body::from_stream(ChannelStream::new(rx, channel, active)))
    }

    fn close_all(&self) -> usize {
        let channels = self.registry.all();
        let count = channels.len();
        for channel in channels {
            channel.close();
        }
        count
    }

    fn open_channels(&self) -> usize {
        self.registry.len()
    }
}

fn spawn_keep_alive<E: Send + Sync + 'static>(
    channel: Arc<Channel<E>>,
    interval: std::time::Duration,
) {
    let closed = channel.cancel_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick completes immediately
        loop {
            tokio::select! {
                () = closed.cancelled() => break,
                _ = ticker.tick() => {
                    if channel.send(comment_frame("keep-alive")).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Builder for [`Dispatcher`]; binds paths and collaborators at startup.
#[derive(Default)]
pub struct DispatcherBuilder {
    bindings: HashMap<String, Arc<dyn Binding>>,
    config: StreamConfig,
    access_control: Option<Arc<dyn IpAccessControl>>,
    rate_control: Option<Arc<dyn RateControl>>,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl DispatcherBuilder {
    /// Create a builder with default configuration and no collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the streaming configuration.
    #[must_use]
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the IP access-control collaborator.
    #[must_use]
    pub fn access_control(mut self, access_control: Arc<dyn IpAccessControl>) -> Self {
        self.access_control = Some(access_control);
        self
    }

    /// Set the connect admission collaborator.
    #[must_use]
    pub fn rate_control(mut self, rate_control: Arc<dyn RateControl>) -> Self {
        self.rate_control = Some(rate_control);
        self
    }

    /// Set the session-store collaborator.
    #[must_use]
    pub fn session_store(mut self, session_store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(session_store);
        self
    }

    /// Bind a path to a listener and its channel registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicatePath`] if the path is already bound;
    /// registration is a startup-time operation and duplicates are a
    /// configuration error.
    pub fn bind<E, L>(
        mut self,
        path: impl Into<String>,
        listener: L,
        registry: Arc<ChannelRegistry<E>>,
    ) -> Result<Self>
    where
        E: Serialize + Send + Sync + 'static,
        L: StreamListener<E> + 'static,
    {
        let path = path.into();
        if self.bindings.contains_key(&path) {
            return Err(Error::DuplicatePath(path));
        }
        self.bindings.insert(
            path,
            Arc::new(ListenerBinding {
                listener: Arc::new(listener),
                registry,
            }),
        );
        Ok(self)
    }

    /// Freeze the path table and produce the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            bindings: self.bindings,
            config: self.config,
            metrics: Arc::new(StreamMetrics::new()),
            access_control: self.access_control,
            rate_control: self.rate_control,
            session_store: self.session_store,
        }
    }
}

/// Gates and materializes streaming connections.
pub struct Dispatcher {
    bindings: HashMap<String, Arc<dyn Binding>>,
    config: StreamConfig,
    metrics: Arc<StreamMetrics>,
    access_control: Option<Arc<dyn IpAccessControl>>,
    rate_control: Option<Arc<dyn RateControl>>,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl Dispatcher {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Whether a request belongs to this subsystem: GET with an `Accept`
    /// header of exactly `text/event-stream`. No side effects.
    #[must_use]
    pub fn check(method: &Method, headers: &HeaderMap) -> bool {
        *method == Method::GET
            && headers.get(header::ACCEPT).and_then(|v| v.to_str().ok())
                == Some(EVENT_STREAM_MEDIA_TYPE)
    }

    /// Streaming metrics owned by this dispatcher.
    #[must_use]
    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Paths with a registered listener.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Total open channels across all paths.
    #[must_use]
    pub fn open_channels(&self) -> usize {
        self.bindings.values().map(|b| b.open_channels()).sum()
    }

    /// Run the full connect sequence for an inbound request.
    ///
    /// Every failure is logged with connection context and converted to
    /// an error response; nothing propagates to the caller. The
    /// active-connection count is balanced on every exit path.
    pub async fn handle(&self, req: Request) -> Response {
        let active = self.metrics.clone().begin_connection();
        let span = tracing::info_span!(
            "sse_connect",
            path = tracing::field::Empty,
            client_ip = tracing::field::Empty,
            channel = tracing::field::Empty,
            last_event_id = tracing::field::Empty,
            group = tracing::field::Empty,
        );

        let result = self.connect(req, active).instrument(span).await;
        match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, code = err.code(), "sse connect failed");
                err.into_response()
            }
        }
    }

    async fn connect(&self, req: Request, active: ActiveGuard) -> Result<Response> {
        let mut request = StreamRequest::parse(&req)?;
        let span = tracing::Span::current();
        span.record("path", request.path.as_str());
        if let Some(ip) = request.client_ip {
            span.record("client_ip", tracing::field::display(ip));
        }
        if let Some(id) = &request.last_event_id {
            span.record("last_event_id", id.as_str());
        }

        // IP check before routing lookup, to reject forbidden clients
        // as early as possible
        if let (Some(access_control), Some(ip)) = (&self.access_control, request.client_ip) {
            access_control.validate(ip)?;
        }

        let binding = self
            .bindings
            .get(&request.path)
            .ok_or_else(|| Error::PathNotFound(request.path.clone()))?;

        if let Some(rate_control) = &self.rate_control {
            rate_control.validate_rate(&self.config.connect_group, request.client_ip)?;
        }

        if let Some(store) = &self.session_store {
            request.session = store.load(&request).await;
        }

        let body = binding.connect(request, active, &self.config).await?;

        // A push stream owns its socket for its whole life: mark the
        // transport non-reusable.
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                format!("{EVENT_STREAM_MEDIA_TYPE}; charset=utf-8"),
            )
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "close")
            .body(body)?;
        Ok(response)
    }

    /// Close every open channel across every binding. Best-effort; used
    /// by the shutdown coordinator.
    pub fn shutdown(&self) {
        tracing::info!("closing sse connections");
        for (path, binding) in &self.bindings {
            let closed = binding.close_all();
            if closed > 0 {
                tracing::debug!(path, closed, "sse channels closed");
            }
        }
    }

    /// Router glue: one GET route per bound path, answering
    /// `406 Not Acceptable` for requests that fail [`Dispatcher::check`].
    #[must_use]
    pub fn router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();
        for path in self.bindings.keys() {
            let dispatcher = self.clone();
            router = router.route(
                path,
                get(move |req: Request| {
                    let dispatcher = dispatcher.clone();
                    async move {
                        if !Dispatcher::check(req.method(), req.headers()) {
                            return StatusCode::NOT_ACCEPTABLE.into_response();
                        }
                        dispatcher.handle(req).await
                    }
                }),
            );
        }
        router
    }
}
