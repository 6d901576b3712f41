//! Backend connection: a status state machine over a pluggable [`Link`].
//!
//! The [`TransportManager`] is plain synchronous state owned by the event loop.
//! The I/O lives behind [`Link`]: [`WsLink`] drives a real WebSocket from a
//! spawned task and reports back through [`LinkEvent`]s, tests use a fake.
//! Every event is stamped with the generation of the connection that produced
//! it so that events from a torn-down connection are recognisably stale.

mod state;
mod ws_link;

pub use state::{ConnectionState, TransportManager, TransportOutput};
pub use ws_link::{ReconnectPolicy, WsLink};

use crate::error::TransportError;

/// The raw connection driver behind a [`TransportManager`].
pub trait Link {
    /// Start connecting to `url`. Progress arrives later as [`LinkEvent`]s
    /// tagged with `generation`.
    fn open(&mut self, url: &str, generation: u64);

    /// Queue one text frame on the open connection. A frame the link accepted
    /// but could not deliver comes back in [`LinkEventKind::GaveUp`].
    fn send(&mut self, frame: LinkFrame) -> Result<(), TransportError>;

    /// Tear the connection down. Safe to call repeatedly.
    fn close(&mut self);
}

/// An encoded outgoing frame tagged with the id of the message it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFrame {
    pub message_id: String,
    pub text: String,
}

impl LinkFrame {
    pub fn new(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub generation: u64,
    pub kind: LinkEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    /// A connection attempt started (1-based, reset after every successful open)
    Connecting { attempt: u32 },
    Opened,
    /// One inbound text frame, unparsed
    Frame(String),
    /// The connection dropped or an attempt failed; a retry follows
    Closed { error: String },
    /// Retries are exhausted or the error is permanent. `undelivered` holds
    /// every accepted frame that never reached the socket, oldest first.
    GaveUp {
        error: String,
        undelivered: Vec<LinkFrame>,
    },
}

impl LinkEvent {
    pub fn new(generation: u64, kind: LinkEventKind) -> Self {
        Self { generation, kind }
    }
}

/// Where to connect: an opaque URL plus an optional credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub token: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        let token = token.filter(|t| !t.is_empty());
        Self {
            url: url.into(),
            token,
        }
    }

    /// URL to dial, with the token appended as a `token` query parameter.
    pub fn connect_url(&self) -> Result<String, TransportError> {
        let url = self.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint(url.to_string()));
        }
        let Some(token) = &self.token else {
            return Ok(url.to_string());
        };
        let sep = if url.contains('?') { '&' } else { '?' };
        Ok(format!("{url}{sep}token={}", encode_query_value(token)))
    }
}

fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
