use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};

/// Author label used for locally composed messages.
pub const USER_AUTHOR: &str = "user";

/// One entry in a session's message stream.
///
/// `pending` is the only field that changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// `"user"` or the name of the agent that produced the reply
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub pending: bool,
}

impl Message {
    pub fn user(content: impl Into<String>, created_at: DateTime<Utc>, pending: bool) -> Self {
        Self {
            id: new_id(),
            author: USER_AUTHOR.to_string(),
            content: content.into(),
            created_at,
            pending,
        }
    }

    pub fn agent(
        author: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_id(),
            author: author.into(),
            content: content.into(),
            created_at,
            pending: false,
        }
    }

    pub fn is_user(&self) -> bool {
        self.author == USER_AUTHOR
    }
}

/// One conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: default_title(now),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Move `updated_at` forward. It never stays put and never goes backwards.
    pub fn touch(&mut self) {
        self.updated_at = later_than(self.updated_at, Utc::now());
    }

    /// Append keeping `created_at` non-decreasing across the stream.
    pub fn push_message(&mut self, mut message: Message) {
        if let Some(last) = self.messages.last() {
            if message.created_at < last.created_at {
                message.created_at = last.created_at;
            }
        }
        self.messages.push(message);
        self.touch();
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn summary(&self, preview_chars: usize) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            updated_at: self.updated_at,
            message_count: self.messages.len(),
            preview_text: self
                .last_message()
                .map(|m| preview(&m.content, preview_chars))
                .unwrap_or_default(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Partial update for [`crate::SessionRepository::update_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub messages: Option<Vec<Message>>,
}

impl SessionPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.messages.is_none()
    }
}

/// Row of the session list handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub preview_text: String,
}

/// The current session as the presentation layer renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub awaiting_reply: bool,
    pub typing: bool,
}

/// Connection state as seen by the user. Derived from the transport, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            error: None,
        }
    }

    pub fn disconnected(error: Option<String>) -> Self {
        Self {
            connected: false,
            error,
        }
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub(crate) fn default_title(at: DateTime<Utc>) -> String {
    format!("Chat {}", at.with_timezone(&Local).format("%H:%M:%S"))
}

/// `candidate` if it is after `previous`, otherwise one microsecond past `previous`.
pub(crate) fn later_than(previous: DateTime<Utc>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    if candidate > previous {
        candidate
    } else {
        previous + Duration::microseconds(1)
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    let line = content.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
