//! Event frame construction and wire encoding.
//!
//! Frames follow the line-oriented server-sent-event format: optional
//! `id:` and `event:` fields, one `data:` line per payload line, and a
//! blank line terminating the frame.

use axum::body::Bytes;
use serde::Serialize;
use std::time::Duration;

use crate::error::Result;

/// A single outbound event frame.
///
/// # Example
///
/// ```rust,ignore
/// use pushstream::event::EventFrame;
///
/// let frame = EventFrame::new("{\"status\":\"ok\"}")
///     .event("status")
///     .id("42");
/// channel.send_frame(frame).await?;
/// ```
#[derive(Debug, Clone)]
pub struct EventFrame {
    /// Event ID for client-side resumption (optional).
    pub id: Option<String>,
    /// Event type name (optional).
    pub event: Option<String>,
    /// Event payload; may span multiple lines.
    pub data: String,
}

impl EventFrame {
    /// Create a frame carrying the given payload.
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }

    /// Set the event ID.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the event type name.
    #[must_use]
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    /// Encode the frame into wire bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(id) = &self.id {
            out.push_str("id:");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event:");
            out.push_str(event);
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data:");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

/// Encode the reconnection-hint frame sent once at connect.
#[must_use]
pub fn retry_frame(retry: Duration) -> Bytes {
    Bytes::from(format!("retry:{}\n\n", retry.as_millis()))
}

/// Encode a comment frame, used as a keep-alive no-op.
#[must_use]
pub fn comment_frame(text: &str) -> Bytes {
    Bytes::from(format!(":{text}\n\n"))
}

/// Serialize a payload to JSON and encode it as a data frame.
pub fn encode_json<E: Serialize>(payload: &E, id: Option<&str>) -> Result<Bytes> {
    let json = serde_json::to_string(payload)?;
    let mut frame = EventFrame::new(json);
    if let Some(id) = id {
        frame = frame.id(id);
    }
    Ok(frame.encode())
}
