//! Wire protocol types.
//!
//! Frames are JSON objects. Outgoing frames carry the originating session id;
//! inbound frames are discriminated by `type`, and any type this client does
//! not know lands in [`InboundFrame::Unknown`] instead of failing.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Client → backend: one user task for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingFrame {
    pub task: String,
    pub session_id: String,
    /// ISO-8601 with millisecond precision, e.g. `2025-01-01T12:00:00.000Z`
    pub timestamp: String,
}

impl OutgoingFrame {
    pub fn new(task: impl Into<String>, session_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            task: task.into(),
            session_id: session_id.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Backend → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A reply produced by one of the backend agents
    #[serde(rename_all = "camelCase")]
    AgentMessage {
        #[serde(default)]
        agent: Option<String>,
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// An agent started composing a reply
    #[serde(rename_all = "camelCase")]
    Typing {
        #[serde(default)]
        agent: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// The backend failed to handle a task
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Reserved: backend-side connection notice
    #[serde(rename_all = "camelCase")]
    ConnectionStatus {
        #[serde(default)]
        content: Option<String>,
    },

    /// Reserved: server-held history for a session
    #[serde(rename_all = "camelCase")]
    ChatHistory {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        messages: Vec<serde_json::Value>,
    },

    /// Any `type` this client does not understand
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Session the frame is tagged with, if any.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::AgentMessage { session_id, .. }
            | Self::Typing { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::ChatHistory { session_id, .. } => session_id.as_deref(),
            Self::ConnectionStatus { .. } | Self::Unknown => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentMessage { .. } => "agent_message",
            Self::Typing { .. } => "typing",
            Self::Error { .. } => "error",
            Self::ConnectionStatus { .. } => "connection_status",
            Self::ChatHistory { .. } => "chat_history",
            Self::Unknown => "unknown",
        }
    }
}

/// Parse an optional ISO-8601 timestamp from a frame, ignoring garbage.
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
