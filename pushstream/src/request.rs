//! Typed streaming request and the collaborator seams consumed by the
//! dispatcher: IP access control, connect admission, and session lookup.

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use http::{header, HeaderMap, Method, Request};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

const LAST_EVENT_ID: &str = "last-event-id";

/// A request parsed into the form the streaming subsystem works with.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    /// Request path, used for listener-binding lookup.
    pub path: String,
    /// Request method.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
    /// Client IP, from forwarding headers or the socket address.
    pub client_ip: Option<IpAddr>,
    /// Opaque resumption hint from the `Last-Event-ID` header.
    pub last_event_id: Option<String>,
    /// Read-only session, populated by the dispatcher when a session
    /// store is configured.
    pub session: Option<ReadOnlySession>,
}

impl StreamRequest {
    /// Parse an inbound HTTP request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] if a forwarding header carries a
    /// malformed IP address.
    pub fn parse<B>(req: &Request<B>) -> Result<Self> {
        let client_ip = client_ip(req)?;
        let last_event_id = req
            .headers()
            .get(LAST_EVENT_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self {
            path: req.uri().path().to_string(),
            method: req.method().clone(),
            headers: req.headers().clone(),
            client_ip,
            last_event_id,
            session: None,
        })
    }

    /// Convenience accessor for a request header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Accept` header, if present.
    #[must_use]
    pub fn accept(&self) -> Option<&str> {
        self.headers.get(header::ACCEPT).and_then(|v| v.to_str().ok())
    }
}

/// Extract the client IP: X-Forwarded-For (first entry) for proxied
/// requests, then X-Real-IP, then the peer socket address.
fn client_ip<B>(req: &Request<B>) -> Result<Option<IpAddr>> {
    let headers = req.headers();

    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        let first = xff.split(',').next().unwrap_or(xff).trim();
        let ip = first
            .parse::<IpAddr>()
            .map_err(|_| Error::BadRequest(format!("malformed client ip: {first}")))?;
        return Ok(Some(ip));
    }

    if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let ip = xri
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| Error::BadRequest(format!("malformed client ip: {xri}")))?;
        return Ok(Some(ip));
    }

    Ok(req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip()))
}

/// Immutable view of a client session.
#[derive(Debug, Clone, Default)]
pub struct ReadOnlySession {
    values: HashMap<String, String>,
}

impl ReadOnlySession {
    /// Create a session view over the given values.
    #[must_use]
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Look up a session value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether the session holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// IP allow/deny checking, applied before routing.
pub trait IpAccessControl: Send + Sync {
    /// Validate the client IP.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Forbidden`] for denied addresses.
    fn validate(&self, ip: IpAddr) -> Result<()>;
}

/// Connect admission control, scoped to a named client group.
pub trait RateControl: Send + Sync {
    /// Validate that this client may open another connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] when the group's quota is exhausted.
    fn validate_rate(&self, group: &str, ip: Option<IpAddr>) -> Result<()>;
}

/// Read-only session lookup.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session for a request, if one exists.
    async fn load(&self, request: &StreamRequest) -> Option<ReadOnlySession>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(builder: http::request::Builder) -> Request<Body> {
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_parse_path_and_last_event_id() {
        let req = request(
            Request::builder()
                .uri("/events?x=1")
                .header("Last-Event-ID", "42"),
        );
        let parsed = StreamRequest::parse(&req).unwrap();

        assert_eq!(parsed.path, "/events");
        assert_eq!(parsed.last_event_id.as_deref(), Some("42"));
        assert!(parsed.client_ip.is_none());
    }

    #[test]
    fn test_forwarded_ip_takes_first_entry() {
        let req = request(
            Request::builder()
                .uri("/events")
                .header("x-forwarded-for", "10.1.2.3, 172.16.0.1"),
        );
        let parsed = StreamRequest::parse(&req).unwrap();
        assert_eq!(parsed.client_ip, Some("10.1.2.3".parse().unwrap()));
    }

    #[test]
    fn test_malformed_forwarded_ip_is_rejected() {
        let req = request(
            Request::builder()
                .uri("/events")
                .header("x-forwarded-for", "not-an-ip"),
        );
        let err = StreamRequest::parse(&req).unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn test_connect_info_fallback() {
        let mut req = request(Request::builder().uri("/events"));
        let addr: SocketAddr = "192.168.1.9:55000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));

        let parsed = StreamRequest::parse(&req).unwrap();
        assert_eq!(parsed.client_ip, Some("192.168.1.9".parse().unwrap()));
    }

    #[test]
    fn test_session_lookup() {
        let mut values = HashMap::new();
        values.insert("user_id".to_string(), "u-7".to_string());
        let session = ReadOnlySession::new(values);

        assert_eq!(session.get("user_id"), Some("u-7"));
        assert!(session.get("missing").is_none());
    }
}
