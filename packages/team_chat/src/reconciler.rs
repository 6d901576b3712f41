//! Merges local sends and inbound frames into per-session message streams.
//!
//! The reconciler owns the transient per-session state that is never
//! persisted: which sessions await a reply, which have a typing agent, and
//! the outbox of messages composed while the connection was down. Message
//! lists themselves live in the [`SessionRepository`].

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::models::Message;
use crate::protocol::{InboundFrame, OutgoingFrame, parse_timestamp};
use crate::sessions::SessionRepository;

pub const DEFAULT_AGENT: &str = "AI Assistant";
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(5);

/// A user message waiting for the link to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub session_id: String,
    pub message_id: String,
    pub frame: OutgoingFrame,
}

impl PendingSend {
    /// Rebuild the frame for a stored user message.
    pub fn for_message(session_id: &str, message: &Message) -> Self {
        Self {
            session_id: session_id.to_string(),
            message_id: message.id.clone(),
            frame: OutgoingFrame::new(message.content.as_str(), session_id, message.created_at),
        }
    }
}

/// Outcome of applying one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// A reply was appended to this session
    Appended { session_id: String },
    /// An agent started typing in this session
    Typing {
        session_id: String,
        agent: Option<String>,
    },
    /// The backend reported a failure
    Failed {
        session_id: Option<String>,
        message: String,
    },
    /// Nothing changed
    Ignored,
}

#[derive(Debug)]
pub struct MessageReconciler {
    default_agent: String,
    typing_timeout: Duration,
    /// Sessions with an outstanding reply, oldest submit first
    outstanding: VecDeque<String>,
    typing: HashMap<String, Instant>,
    outbox: VecDeque<PendingSend>,
}

impl Default for MessageReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT, DEFAULT_TYPING_TIMEOUT)
    }
}

impl MessageReconciler {
    pub fn new(default_agent: impl Into<String>, typing_timeout: Duration) -> Self {
        Self {
            default_agent: default_agent.into(),
            typing_timeout,
            outstanding: VecDeque::new(),
            typing: HashMap::new(),
            outbox: VecDeque::new(),
        }
    }

    pub fn awaiting_reply(&self, session_id: &str) -> bool {
        self.outstanding.iter().any(|id| id == session_id)
    }

    pub fn is_typing(&self, session_id: &str, now: Instant) -> bool {
        self.typing
            .get(session_id)
            .is_some_and(|since| now.saturating_duration_since(*since) < self.typing_timeout)
    }

    /// Append the user's message to `session_id` and mark the session as
    /// awaiting a reply. `pending` is set when the message cannot be sent yet.
    pub fn record_submit(
        &mut self,
        repo: &mut SessionRepository,
        session_id: &str,
        text: &str,
        at: DateTime<Utc>,
        pending: bool,
    ) -> Option<Message> {
        let message = Message::user(text, at, pending);
        if !repo.append_message(session_id, message.clone()) {
            return None;
        }
        self.outstanding.push_back(session_id.to_string());
        debug!(session_id = %session_id, message_id = %message.id, pending, "user message appended");
        Some(message)
    }

    pub fn queue(&mut self, pending: PendingSend) {
        info!(session_id = %pending.session_id, queued = self.outbox.len() + 1, "message queued until connected");
        self.outbox.push_back(pending);
    }

    /// Queue a send recovered from storage; its session awaits the reply again.
    pub fn restore(&mut self, pending: PendingSend) {
        if !self.awaiting_reply(&pending.session_id) {
            self.outstanding.push_back(pending.session_id.clone());
        }
        debug!(session_id = %pending.session_id, message_id = %pending.message_id, "restored queued message");
        self.outbox.push_back(pending);
    }

    pub fn next_pending(&mut self) -> Option<PendingSend> {
        self.outbox.pop_front()
    }

    /// Put a send back at the front after a failed flush.
    pub fn requeue(&mut self, pending: PendingSend) {
        self.outbox.push_front(pending);
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Apply one inbound frame to the repository.
    pub fn apply(
        &mut self,
        repo: &mut SessionRepository,
        frame: InboundFrame,
        now: DateTime<Utc>,
        instant: Instant,
    ) -> Reconciled {
        match frame {
            InboundFrame::AgentMessage {
                agent,
                content,
                timestamp,
                session_id,
            } => {
                let Some(target) = self.route(repo, session_id.as_deref()) else {
                    return Reconciled::Ignored;
                };
                let author = agent
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| self.default_agent.clone());
                let created_at = parse_timestamp(timestamp.as_deref()).unwrap_or(now);

                repo.append_message(&target, Message::agent(author, content, created_at));
                self.clear(&target);
                Reconciled::Appended { session_id: target }
            }

            InboundFrame::Typing { agent, session_id } => {
                let Some(target) = self.route(repo, session_id.as_deref()) else {
                    return Reconciled::Ignored;
                };
                self.typing.insert(target.clone(), instant);
                Reconciled::Typing {
                    session_id: target,
                    agent,
                }
            }

            InboundFrame::Error {
                content,
                session_id,
            } => {
                let target = self.route(repo, session_id.as_deref());
                if let Some(target) = &target {
                    self.clear(target);
                }
                let message = content
                    .filter(|c| !c.trim().is_empty())
                    .unwrap_or_else(|| "backend reported an error".to_string());
                warn!(session_id = ?target, error = %message, "backend error");
                Reconciled::Failed {
                    session_id: target,
                    message,
                }
            }

            other @ (InboundFrame::ConnectionStatus { .. } | InboundFrame::ChatHistory { .. }) => {
                debug!(kind = other.kind(), "reserved frame ignored");
                Reconciled::Ignored
            }

            InboundFrame::Unknown => Reconciled::Ignored,
        }
    }

    /// Drop expired typing indicators and return the sessions they belonged to.
    pub fn tick(&mut self, now: Instant) -> Vec<String> {
        let timeout = self.typing_timeout;
        let mut expired = Vec::new();
        self.typing.retain(|id, since| {
            let live = now.saturating_duration_since(*since) < timeout;
            if !live {
                expired.push(id.clone());
            }
            live
        });
        expired
    }

    /// Forget all transient state for a deleted session.
    pub fn forget_session(&mut self, session_id: &str) {
        self.clear(session_id);
        let before = self.outbox.len();
        self.outbox.retain(|p| p.session_id != session_id);
        if self.outbox.len() != before {
            debug!(session_id = %session_id, dropped = before - self.outbox.len(), "dropped queued sends");
        }
    }

    fn clear(&mut self, session_id: &str) {
        self.outstanding.retain(|id| id != session_id);
        self.typing.remove(session_id);
    }

    /// Session an inbound frame belongs to. Tagged frames go to their session;
    /// untagged ones to the oldest session awaiting a reply, else the current one.
    fn route(&self, repo: &SessionRepository, tagged: Option<&str>) -> Option<String> {
        if let Some(id) = tagged {
            if repo.contains(id) {
                return Some(id.to_string());
            }
            warn!(session_id = %id, "frame for unknown session dropped");
            return None;
        }

        let target = self
            .outstanding
            .iter()
            .find(|id| repo.contains(id))
            .map(String::as_str)
            .or_else(|| repo.current_id());
        if target.is_none() {
            warn!("untagged frame with no session to route to dropped");
        }
        target.map(str::to_string)
    }
}
