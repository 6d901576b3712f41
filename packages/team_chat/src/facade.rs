//! The facade the presentation layer talks to.
//!
//! [`ChatCore`] is owned by one event loop and mutated through `&mut self`.
//! Calls return immediately; transport progress arrives later through
//! [`ChatCore::handle_link_event`] and is observable via [`ChatCore::subscribe`].

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::{ConnectionStatus, Session, SessionPatch, SessionSummary, SessionView};
use crate::protocol::OutgoingFrame;
use crate::reconciler::{
    DEFAULT_AGENT, DEFAULT_TYPING_TIMEOUT, MessageReconciler, PendingSend, Reconciled,
};
use crate::sessions::SessionRepository;
use crate::store::Storage;
use crate::transport::{ConnectionState, Endpoint, Link, LinkEvent, TransportManager};

#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Author used for replies whose frame names no agent
    pub default_agent: String,
    pub typing_timeout: Duration,
    /// Max characters of the last message shown in the session list
    pub preview_chars: usize,
    pub update_capacity: usize,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            default_agent: DEFAULT_AGENT.to_string(),
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            preview_chars: 80,
            update_capacity: 256,
        }
    }
}

/// Change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreUpdate {
    StatusChanged(ConnectionStatus),
    /// Messages or per-session flags of this session changed
    SessionUpdated { session_id: String },
    /// Sessions were created, deleted, renamed or reordered
    SessionsChanged,
    Typing {
        session_id: String,
        agent: Option<String>,
        typing: bool,
    },
    /// Something the user should know about that is not a status change
    Warning(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input; nothing happened
    Ignored,
    Sent {
        session_id: String,
        message_id: String,
    },
    /// Appended as pending; sent when the connection opens
    Queued {
        session_id: String,
        message_id: String,
    },
}

pub struct ChatCore<L> {
    sessions: SessionRepository,
    transport: TransportManager<L>,
    reconciler: MessageReconciler,
    updates: broadcast::Sender<CoreUpdate>,
    preview_chars: usize,
    shut_down: bool,
}

impl<L: Link> ChatCore<L> {
    /// Load sessions from `storage`. Messages persisted as pending are queued
    /// again and go out on the first open.
    pub fn new(storage: Storage, link: L, options: CoreOptions) -> Self {
        let (updates, _) = broadcast::channel(options.update_capacity.max(1));
        let mut core = Self {
            sessions: SessionRepository::load(storage),
            transport: TransportManager::new(link),
            reconciler: MessageReconciler::new(options.default_agent, options.typing_timeout),
            updates,
            preview_chars: options.preview_chars,
            shut_down: false,
        };
        core.restore_outbox();
        core
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreUpdate> {
        self.updates.subscribe()
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn transport(&self) -> &TransportManager<L> {
        &self.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn connect(&mut self, endpoint: Endpoint) {
        if self.shut_down {
            return;
        }
        if let Some(status) = self.transport.connect(&endpoint) {
            self.publish(CoreUpdate::StatusChanged(status));
        }
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Submit user text to the current session, creating one if needed.
    ///
    /// Blank input is ignored. While disconnected the message is appended as
    /// pending and sent once the link opens.
    pub fn submit(&mut self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() || self.shut_down {
            return SubmitOutcome::Ignored;
        }

        let session_id = match self.sessions.current_id() {
            Some(id) => id.to_string(),
            None => {
                let session = self.sessions.create_session();
                self.publish(CoreUpdate::SessionsChanged);
                session.id
            }
        };

        let now = Utc::now();
        let connected = self.transport.is_connected();
        let Some(message) =
            self.reconciler
                .record_submit(&mut self.sessions, &session_id, text, now, !connected)
        else {
            return SubmitOutcome::Ignored;
        };
        let frame = OutgoingFrame::new(text, session_id.as_str(), now);

        let outcome = if connected {
            match self.transport.send(&message.id, &frame) {
                Ok(()) => SubmitOutcome::Sent {
                    session_id: session_id.clone(),
                    message_id: message.id,
                },
                Err(e) => {
                    self.sessions
                        .set_message_pending(&session_id, &message.id, true);
                    self.publish(CoreUpdate::Warning(format!(
                        "send failed ({e}); message queued"
                    )));
                    self.enqueue(session_id.clone(), message.id, frame)
                }
            }
        } else {
            self.publish(CoreUpdate::Warning(
                "not connected; message will be sent when the connection opens".to_string(),
            ));
            self.enqueue(session_id.clone(), message.id, frame)
        };

        self.publish(CoreUpdate::SessionUpdated { session_id });
        outcome
    }

    pub fn new_session(&mut self) -> Session {
        let session = self.sessions.create_session();
        self.publish(CoreUpdate::SessionsChanged);
        session
    }

    pub fn select_session(&mut self, id: &str) -> bool {
        let changed = self.sessions.select_session(id);
        if changed {
            self.publish(CoreUpdate::SessionsChanged);
        }
        changed
    }

    pub fn delete_session(&mut self, id: &str) -> bool {
        let deleted = self.sessions.delete_session(id);
        if deleted {
            self.reconciler.forget_session(id);
            self.publish(CoreUpdate::SessionsChanged);
        }
        deleted
    }

    pub fn rename_session(&mut self, id: &str, title: &str) -> bool {
        let renamed = self.sessions.update_session(id, SessionPatch::title(title));
        if renamed {
            self.publish(CoreUpdate::SessionsChanged);
        }
        renamed
    }

    pub fn current_session_view(&self) -> Option<SessionView> {
        self.sessions
            .current_session()
            .map(|session| self.view_of(session))
    }

    pub fn session_view(&self, id: &str) -> Option<SessionView> {
        self.sessions.get(id).map(|session| self.view_of(session))
    }

    pub fn session_list_view(&self) -> Vec<SessionSummary> {
        self.sessions.summaries(self.preview_chars)
    }

    pub fn connection_status_view(&self) -> ConnectionStatus {
        self.transport.status()
    }

    /// Apply one event from the link.
    pub fn handle_link_event(&mut self, event: LinkEvent) {
        if self.shut_down {
            return;
        }
        let out = self.transport.handle_event(event);

        if let Some(status) = out.status {
            self.publish(CoreUpdate::StatusChanged(status));
        }
        if !out.undelivered.is_empty() {
            self.requeue_undelivered(&out.undelivered);
        }
        if out.opened {
            self.flush_outbox();
        }
        let Some(frame) = out.frame else {
            return;
        };

        match self
            .reconciler
            .apply(&mut self.sessions, frame, Utc::now(), Instant::now())
        {
            Reconciled::Appended { session_id } => {
                self.publish(CoreUpdate::SessionUpdated { session_id });
            }
            Reconciled::Typing { session_id, agent } => {
                self.publish(CoreUpdate::Typing {
                    session_id,
                    agent,
                    typing: true,
                });
            }
            Reconciled::Failed {
                session_id,
                message,
            } => {
                if let Some(session_id) = session_id {
                    self.publish(CoreUpdate::SessionUpdated { session_id });
                }
                self.publish(CoreUpdate::Warning(message));
            }
            Reconciled::Ignored => {}
        }
    }

    /// Expire stale typing indicators.
    pub fn tick(&mut self) {
        if self.shut_down {
            return;
        }
        for session_id in self.reconciler.tick(Instant::now()) {
            self.publish(CoreUpdate::Typing {
                session_id,
                agent: None,
                typing: false,
            });
        }
    }

    /// Disconnect and stop publishing. Later calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.transport.disconnect();
        self.shut_down = true;
        info!("chat core shut down");
    }

    fn view_of(&self, session: &Session) -> SessionView {
        SessionView {
            id: session.id.clone(),
            title: session.title.clone(),
            messages: session.messages.clone(),
            awaiting_reply: self.reconciler.awaiting_reply(&session.id),
            typing: self.reconciler.is_typing(&session.id, Instant::now()),
        }
    }

    fn enqueue(&mut self, session_id: String, message_id: String, frame: OutgoingFrame) -> SubmitOutcome {
        self.reconciler.queue(PendingSend {
            session_id: session_id.clone(),
            message_id: message_id.clone(),
            frame,
        });
        SubmitOutcome::Queued {
            session_id,
            message_id,
        }
    }

    fn restore_outbox(&mut self) {
        let restored: Vec<PendingSend> = self
            .sessions
            .pending_messages()
            .into_iter()
            .map(|(session_id, message)| PendingSend::for_message(session_id, message))
            .collect();
        if restored.is_empty() {
            return;
        }
        info!(queued = restored.len(), "restored unsent messages");
        for pending in restored {
            self.reconciler.restore(pending);
        }
    }

    /// Mark messages the link never delivered as pending and put them at the
    /// front of the outbox, keeping their order.
    fn requeue_undelivered(&mut self, message_ids: &[String]) {
        let mut requeued = 0usize;
        for message_id in message_ids.iter().rev() {
            let Some((session_id, message)) = self.sessions.find_message(message_id) else {
                debug!(message_id = %message_id, "undelivered message no longer stored");
                continue;
            };
            let pending = PendingSend::for_message(session_id, message);
            self.sessions
                .set_message_pending(&pending.session_id, message_id, true);
            self.publish(CoreUpdate::SessionUpdated {
                session_id: pending.session_id.clone(),
            });
            self.reconciler.requeue(pending);
            requeued += 1;
        }
        if requeued > 0 {
            warn!(requeued, "undelivered messages queued again");
            self.publish(CoreUpdate::Warning(format!(
                "connection lost before {requeued} message(s) were delivered; they will be sent when the connection opens"
            )));
        }
    }

    /// Send everything composed while disconnected, oldest first.
    fn flush_outbox(&mut self) {
        let mut flushed = 0usize;
        while let Some(pending) = self.reconciler.next_pending() {
            if !self.sessions.contains(&pending.session_id) {
                continue;
            }
            if let Err(e) = self.transport.send(&pending.message_id, &pending.frame) {
                warn!(error = %e, remaining = self.reconciler.outbox_len() + 1, "outbox flush interrupted");
                self.reconciler.requeue(pending);
                break;
            }
            if self
                .sessions
                .set_message_pending(&pending.session_id, &pending.message_id, false)
            {
                self.publish(CoreUpdate::SessionUpdated {
                    session_id: pending.session_id,
                });
            }
            flushed += 1;
        }
        if flushed > 0 {
            info!(flushed, "sent queued messages");
        }
    }

    fn publish(&self, update: CoreUpdate) {
        if self.shut_down {
            return;
        }
        // No receivers is fine.
        if self.updates.send(update).is_err() {
            debug!("no update subscribers");
        }
    }
}
