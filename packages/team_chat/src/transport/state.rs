use std::fmt;

use tracing::{debug, error, info, warn};

use super::{Endpoint, Link, LinkEvent, LinkEventKind, LinkFrame};
use crate::error::TransportError;
use crate::models::ConnectionStatus;
use crate::protocol::{InboundFrame, OutgoingFrame};

/// Lifecycle of the single logical backend connection.
///
/// ```text
/// Idle -> Connecting -> Connected -> Disconnected -> Connecting (retry)
///                                 \-> Errored      (retries exhausted)
/// any -> Idle (disconnect)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    Disconnected,
    Errored,
}

impl ConnectionState {
    /// Whether a link is open or being (re)opened.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting { .. } | Self::Connected | Self::Disconnected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting { attempt } => write!(f, "connecting (attempt {attempt})"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// What a link event changed.
#[derive(Debug, Default)]
pub struct TransportOutput {
    /// New user-visible status, if it differs from the last one reported
    pub status: Option<ConnectionStatus>,
    /// A parsed frame to hand to the reconciler
    pub frame: Option<InboundFrame>,
    /// The link just (re)opened
    pub opened: bool,
    /// Ids of messages the link accepted but never delivered
    pub undelivered: Vec<String>,
}

pub struct TransportManager<L> {
    link: L,
    state: ConnectionState,
    generation: u64,
    last_error: Option<String>,
    reported: ConnectionStatus,
}

impl<L: Link> TransportManager<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            state: ConnectionState::Idle,
            generation: 0,
            last_error: None,
            reported: ConnectionStatus::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Status derived from the current state.
    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::connected()
        } else {
            ConnectionStatus::disconnected(self.last_error.clone())
        }
    }

    /// Open a fresh connection to `endpoint`, replacing any existing one.
    pub fn connect(&mut self, endpoint: &Endpoint) -> Option<ConnectionStatus> {
        if self.state.is_active() {
            self.link.close();
        }
        self.generation += 1;

        match endpoint.connect_url() {
            Ok(url) => {
                info!(url = %endpoint.url, generation = self.generation, "connecting");
                self.state = ConnectionState::Connecting { attempt: 1 };
                self.last_error = None;
                self.link.open(&url, self.generation);
            }
            Err(e) => {
                error!(error = %e, "cannot connect");
                self.state = ConnectionState::Errored;
                self.last_error = Some(e.to_string());
            }
        }
        self.status_change()
    }

    /// Send the frame carrying message `message_id`. Only valid while
    /// connected; otherwise logs and returns [`TransportError::NotConnected`].
    pub fn send(&mut self, message_id: &str, frame: &OutgoingFrame) -> Result<(), TransportError> {
        if !self.is_connected() {
            warn!(state = %self.state, session_id = %frame.session_id, "send while not connected");
            return Err(TransportError::NotConnected);
        }
        let text = frame.encode()?;
        self.link.send(LinkFrame::new(message_id, text)).inspect_err(|e| {
            warn!(error = %e, code = e.error_code(), "link rejected frame");
        })
    }

    /// Close the connection. Idempotent; reports nothing and leaves every
    /// in-flight event of the old connection stale.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Idle {
            return;
        }
        self.generation += 1;
        self.link.close();
        self.state = ConnectionState::Idle;
        self.last_error = None;
        self.reported = self.status();
        info!(generation = self.generation, "disconnected");
    }

    /// Apply one link event. Events from older generations are ignored.
    pub fn handle_event(&mut self, event: LinkEvent) -> TransportOutput {
        if event.generation != self.generation || self.state == ConnectionState::Idle {
            debug!(
                event_generation = event.generation,
                generation = self.generation,
                "stale link event ignored"
            );
            return TransportOutput::default();
        }

        let mut out = TransportOutput::default();
        match event.kind {
            LinkEventKind::Connecting { attempt } => {
                debug!(attempt, "connection attempt");
                self.state = ConnectionState::Connecting { attempt };
            }
            LinkEventKind::Opened => {
                info!(generation = self.generation, "connected");
                self.state = ConnectionState::Connected;
                self.last_error = None;
                out.opened = true;
            }
            LinkEventKind::Frame(text) => out.frame = self.parse_frame(&text),
            LinkEventKind::Closed { error } => {
                warn!(error = %error, "connection lost, retrying");
                self.state = ConnectionState::Disconnected;
                self.last_error = Some(error);
            }
            LinkEventKind::GaveUp { error, undelivered } => {
                error!(error = %error, undelivered = undelivered.len(), "giving up on connection");
                self.state = ConnectionState::Errored;
                self.last_error = Some(error);
                out.undelivered = undelivered.into_iter().map(|f| f.message_id).collect();
            }
        }
        out.status = self.status_change();
        out
    }

    fn parse_frame(&self, text: &str) -> Option<InboundFrame> {
        match InboundFrame::parse(text) {
            Ok(InboundFrame::Unknown) => {
                debug!(frame = %truncate(text), "ignoring frame of unknown type");
                None
            }
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, frame = %truncate(text), "dropping malformed frame");
                None
            }
        }
    }

    fn status_change(&mut self) -> Option<ConnectionStatus> {
        let status = self.status();
        if status == self.reported {
            return None;
        }
        self.reported = status.clone();
        Some(status)
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
