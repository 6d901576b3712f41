//! Session repository: the only write path to the persisted session collection.
//!
//! Sessions are kept most-recent-first. Creating or selecting a session moves
//! it to the head. The current pointer is either empty or names a session in
//! the collection; every operation that changes the collection's shape repairs
//! it before persisting.

use tracing::{debug, info, warn};

use crate::models::{Message, Session, SessionPatch, SessionSummary};
use crate::store::{CURRENT_SESSION_KEY, SESSIONS_KEY, Storage};

#[derive(Debug)]
pub struct SessionRepository {
    storage: Storage,
    sessions: Vec<Session>,
    current: Option<String>,
}

impl SessionRepository {
    /// Load the collection and pointer from `storage`, repairing a missing or
    /// dangling pointer.
    pub fn load(storage: Storage) -> Self {
        let sessions: Vec<Session> = storage.read_or_default(SESSIONS_KEY);
        let stored: String = storage.read_or_default(CURRENT_SESSION_KEY);
        let stored = (!stored.is_empty()).then_some(stored);

        let mut repo = Self {
            storage,
            sessions,
            current: stored.clone(),
        };
        repo.repair_pointer();

        if repo.current != stored {
            if stored.is_some() {
                warn!(
                    stored = ?stored,
                    repaired = ?repo.current,
                    "current session pointer was dangling"
                );
            }
            repo.persist_pointer();
        }

        info!(
            sessions = repo.sessions.len(),
            current = ?repo.current,
            "loaded session repository"
        );
        repo
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn summaries(&self, preview_chars: usize) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|s| s.summary(preview_chars))
            .collect()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Session id and message for `message_id`, wherever it lives.
    pub fn find_message(&self, message_id: &str) -> Option<(&str, &Message)> {
        self.sessions.iter().find_map(|s| {
            s.messages
                .iter()
                .find(|m| m.id == message_id)
                .map(|m| (s.id.as_str(), m))
        })
    }

    /// Every message still marked pending, oldest first.
    pub fn pending_messages(&self) -> Vec<(&str, &Message)> {
        let mut pending: Vec<(&str, &Message)> = self
            .sessions
            .iter()
            .flat_map(|s| {
                s.messages
                    .iter()
                    .filter(|m| m.pending)
                    .map(move |m| (s.id.as_str(), m))
            })
            .collect();
        pending.sort_by_key(|(_, m)| m.created_at);
        pending
    }

    /// Create a session at the head of the collection and make it current.
    pub fn create_session(&mut self) -> Session {
        let session = Session::new();
        info!(session_id = %session.id, title = %session.title, "created session");
        self.sessions.insert(0, session.clone());
        self.current = Some(session.id.clone());
        self.persist_all();
        session
    }

    /// Merge `patch` into session `id`. Returns false (and changes nothing)
    /// when the session does not exist or the patch is empty.
    pub fn update_session(&mut self, id: &str, patch: SessionPatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        let Some(session) = self.get_mut(id) else {
            debug!(session_id = %id, "update for unknown session ignored");
            return false;
        };

        if let Some(title) = patch.title {
            let title = title.trim();
            if !title.is_empty() {
                session.title = title.to_string();
            }
        }
        if let Some(messages) = patch.messages {
            session.messages = messages;
        }
        session.touch();
        self.persist_sessions();
        true
    }

    /// Append `message` to session `id`, keeping `created_at` ordered.
    pub fn append_message(&mut self, id: &str, message: Message) -> bool {
        let Some(session) = self.get_mut(id) else {
            debug!(session_id = %id, "append to unknown session ignored");
            return false;
        };
        session.push_message(message);
        self.persist_sessions();
        true
    }

    /// Flip the `pending` flag of one message. Returns false if nothing changed.
    pub fn set_message_pending(&mut self, session_id: &str, message_id: &str, pending: bool) -> bool {
        let Some(session) = self.get_mut(session_id) else {
            return false;
        };
        let Some(message) = session.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };
        if message.pending == pending {
            return false;
        }
        message.pending = pending;
        session.touch();
        self.persist_sessions();
        true
    }

    /// Remove session `id`. If it was current the next most-recent session
    /// becomes current, or the pointer is cleared when none remain. The
    /// collection and the pointer are persisted together.
    pub fn delete_session(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            debug!(session_id = %id, "delete of unknown session ignored");
            return false;
        };
        self.sessions.remove(index);
        self.repair_pointer();
        info!(
            session_id = %id,
            remaining = self.sessions.len(),
            current = ?self.current,
            "deleted session"
        );
        self.persist_all();
        true
    }

    /// Make `id` current and move it to the head. Unknown ids are a no-op.
    pub fn select_session(&mut self, id: &str) -> bool {
        let Some(index) = self.position(id) else {
            warn!(session_id = %id, "select of unknown session ignored");
            return false;
        };
        if index > 0 {
            let session = self.sessions.remove(index);
            self.sessions.insert(0, session);
        }
        self.current = Some(id.to_string());
        debug!(session_id = %id, "selected session");
        self.persist_all();
        true
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Point at the head session when the pointer is empty or dangling.
    fn repair_pointer(&mut self) {
        let valid = self
            .current
            .as_deref()
            .is_some_and(|id| self.position(id).is_some());
        if !valid {
            self.current = self.sessions.first().map(|s| s.id.clone());
        }
    }

    fn persist_sessions(&self) {
        self.storage.write(SESSIONS_KEY, &self.sessions);
    }

    fn persist_pointer(&self) {
        self.storage
            .write(CURRENT_SESSION_KEY, self.current.as_deref().unwrap_or_default());
    }

    fn persist_all(&self) {
        let sessions = match serde_json::to_value(&self.sessions) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "failed to encode sessions");
                return;
            }
        };
        let current = serde_json::Value::String(self.current.clone().unwrap_or_default());
        self.storage
            .write_batch(&[(SESSIONS_KEY, sessions), (CURRENT_SESSION_KEY, current)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use chrono::Utc;
    use std::sync::Arc;

    fn repo() -> SessionRepository {
        SessionRepository::load(Storage::in_memory())
    }

    #[test]
    fn create_inserts_at_head_and_selects() {
        let mut repo = repo();
        let first = repo.create_session();
        let second = repo.create_session();

        assert_eq!(repo.len(), 2);
        assert_eq!(repo.sessions()[0].id, second.id);
        assert_eq!(repo.sessions()[1].id, first.id);
        assert_eq!(repo.current_id(), Some(second.id.as_str()));
    }

    #[test]
    fn update_unknown_session_is_noop() {
        let mut repo = repo();
        repo.create_session();
        let before = repo.sessions().to_vec();
        assert!(!repo.update_session("missing", SessionPatch::title("x")));
        assert_eq!(repo.sessions(), before.as_slice());
    }

    #[test]
    fn update_merges_and_bumps() {
        let mut repo = repo();
        let session = repo.create_session();
        assert!(repo.update_session(&session.id, SessionPatch::title("  Sprint planning ")));

        let updated = repo.get(&session.id).unwrap();
        assert_eq!(updated.title, "Sprint planning");
        assert!(updated.updated_at > session.updated_at);
        assert!(updated.messages.is_empty());
    }

    #[test]
    fn blank_title_keeps_old_title() {
        let mut repo = repo();
        let session = repo.create_session();
        repo.update_session(&session.id, SessionPatch::title("   "));
        assert_eq!(repo.get(&session.id).unwrap().title, session.title);
    }

    #[test]
    fn delete_current_of_two_selects_remaining() {
        let mut repo = repo();
        let a = repo.create_session();
        let b = repo.create_session();
        assert_eq!(repo.current_id(), Some(b.id.as_str()));

        assert!(repo.delete_session(&b.id));
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.current_id(), Some(a.id.as_str()));
    }

    #[test]
    fn delete_only_session_clears_pointer() {
        let mut repo = repo();
        let a = repo.create_session();
        repo.delete_session(&a.id);
        assert!(repo.is_empty());
        assert_eq!(repo.current_id(), None);
        assert!(repo.current_session().is_none());
    }

    #[test]
    fn delete_non_current_keeps_pointer() {
        let mut repo = repo();
        let a = repo.create_session();
        let b = repo.create_session();
        repo.delete_session(&a.id);
        assert_eq!(repo.current_id(), Some(b.id.as_str()));
    }

    #[test]
    fn delete_persists_collection_and_pointer_together() {
        let backend = Arc::new(MemoryStore::new());
        let mut repo = SessionRepository::load(Storage::new(backend.clone()));
        let a = repo.create_session();
        let b = repo.create_session();
        repo.delete_session(&b.id);

        let reloaded = SessionRepository::load(Storage::new(backend));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.current_id(), Some(a.id.as_str()));
    }

    #[test]
    fn select_moves_to_head() {
        let mut repo = repo();
        let a = repo.create_session();
        let b = repo.create_session();
        assert!(repo.select_session(&a.id));

        assert_eq!(repo.current_id(), Some(a.id.as_str()));
        assert_eq!(repo.sessions()[0].id, a.id);
        assert_eq!(repo.sessions()[1].id, b.id);
    }

    #[test]
    fn select_unknown_is_noop() {
        let mut repo = repo();
        let a = repo.create_session();
        assert!(!repo.select_session("nope"));
        assert_eq!(repo.current_id(), Some(a.id.as_str()));
    }

    #[test]
    fn load_defaults_pointer_to_head() {
        let backend = Arc::new(MemoryStore::new());
        let storage = Storage::new(backend.clone());
        let sessions = vec![Session::new(), Session::new()];
        storage.write(SESSIONS_KEY, &sessions);

        let repo = SessionRepository::load(Storage::new(backend.clone()));
        assert_eq!(repo.current_id(), Some(sessions[0].id.as_str()));

        let persisted: String = storage.read_or_default(CURRENT_SESSION_KEY);
        assert_eq!(persisted, sessions[0].id);
    }

    #[test]
    fn load_repairs_dangling_pointer() {
        let storage = Storage::in_memory();
        let sessions = vec![Session::new()];
        storage.write(SESSIONS_KEY, &sessions);
        storage.write(CURRENT_SESSION_KEY, "deleted-elsewhere");

        let repo = SessionRepository::load(storage);
        assert_eq!(repo.current_id(), Some(sessions[0].id.as_str()));
    }

    #[test]
    fn load_dangling_pointer_with_no_sessions_clears() {
        let storage = Storage::in_memory();
        storage.write(CURRENT_SESSION_KEY, "ghost");
        let repo = SessionRepository::load(storage);
        assert_eq!(repo.current_id(), None);
    }

    #[test]
    fn works_without_backend() {
        let mut repo = SessionRepository::load(Storage::unavailable());
        let a = repo.create_session();
        repo.append_message(&a.id, Message::user("hi", Utc::now(), false));
        assert_eq!(repo.current_session().unwrap().messages.len(), 1);
    }

    #[test]
    fn set_message_pending_only_reports_changes() {
        let mut repo = repo();
        let a = repo.create_session();
        let msg = Message::user("queued", Utc::now(), true);
        let msg_id = msg.id.clone();
        repo.append_message(&a.id, msg);

        assert!(repo.set_message_pending(&a.id, &msg_id, false));
        assert!(!repo.set_message_pending(&a.id, &msg_id, false));
        assert!(!repo.set_message_pending(&a.id, "other", true));
        assert!(!repo.get(&a.id).unwrap().messages[0].pending);
    }

    #[test]
    fn pending_messages_span_sessions_oldest_first() {
        let mut repo = repo();
        let a = repo.create_session();
        let b = repo.create_session();
        let t0 = Utc::now();
        let later = Message::user("second", t0 + chrono::Duration::seconds(1), true);
        let earlier = Message::user("first", t0, true);
        repo.append_message(&a.id, later.clone());
        repo.append_message(&b.id, Message::user("sent", t0, false));
        repo.append_message(&b.id, earlier.clone());

        let pending: Vec<(&str, &str)> = repo
            .pending_messages()
            .into_iter()
            .map(|(sid, m)| (sid, m.content.as_str()))
            .collect();
        assert_eq!(pending, vec![(b.id.as_str(), "first"), (a.id.as_str(), "second")]);

        let (sid, found) = repo.find_message(&later.id).unwrap();
        assert_eq!(sid, a.id);
        assert_eq!(found.content, "second");
        assert!(repo.find_message("missing").is_none());
    }

    #[test]
    fn file_backed_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let open = || Storage::new(Arc::new(FileStore::open(tmp.path()).unwrap()));

        let mut repo = SessionRepository::load(open());
        let a = repo.create_session();
        repo.append_message(&a.id, Message::user("plan the sprint", Utc::now(), false));
        repo.append_message(&a.id, Message::agent("Planner", "Here is a plan", Utc::now()));
        repo.update_session(&a.id, SessionPatch::title("Sprint"));
        let snapshot = repo.sessions().to_vec();

        let reloaded = SessionRepository::load(open());
        assert_eq!(reloaded.sessions(), snapshot.as_slice());
        assert_eq!(reloaded.current_id(), Some(a.id.as_str()));
    }
}
