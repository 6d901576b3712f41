pub mod chat;
pub mod sessions;
pub mod theme;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;

use team_chat::{FileStore, SessionSummary, Storage};

use crate::config::ChatConfig;

/// File-backed storage under the data directory.
pub fn open_storage(config: &ChatConfig) -> Result<Storage> {
    let store = FileStore::open(&config.store_dir)
        .with_context(|| format!("Failed to open store: {:?}", config.store_dir))?;
    Ok(Storage::new(Arc::new(store)))
}

/// Resolve a session by list position (1-based), full id, id prefix, or title.
pub fn resolve_session(sessions: &[SessionSummary], target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        bail!("No session given");
    }

    if let Ok(n) = target.parse::<usize>() {
        if (1..=sessions.len()).contains(&n) {
            return Ok(sessions[n - 1].id.clone());
        }
    }

    if let Some(s) = sessions.iter().find(|s| s.id == target) {
        return Ok(s.id.clone());
    }

    let by_prefix: Vec<&SessionSummary> =
        sessions.iter().filter(|s| s.id.starts_with(target)).collect();
    match by_prefix.as_slice() {
        [one] => return Ok(one.id.clone()),
        [] => {}
        many => bail!("'{}' matches {} sessions; use more characters", target, many.len()),
    }

    let by_title: Vec<&SessionSummary> = sessions
        .iter()
        .filter(|s| s.title.eq_ignore_ascii_case(target))
        .collect();
    match by_title.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => bail!("No session matching '{}'", target),
        many => bail!("'{}' matches {} sessions by title", target, many.len()),
    }
}

pub fn local_time(at: DateTime<Utc>) -> String {
    let local = at.with_timezone(&Local);
    if local.date_naive() == Local::now().date_naive() {
        local.format("%H:%M").to_string()
    } else {
        local.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, title: &str) -> SessionSummary {
        SessionSummary {
            id: id.to_string(),
            title: title.to_string(),
            updated_at: Utc::now(),
            message_count: 0,
            preview_text: String::new(),
        }
    }

    fn sessions() -> Vec<SessionSummary> {
        vec![
            summary("0190a1b2-aaaa", "Sprint"),
            summary("0190a1b2-bbbb", "Roadmap"),
            summary("0190ffff-cccc", "Chat 10:00:00"),
        ]
    }

    #[test]
    fn test_resolve_by_position() {
        assert_eq!(resolve_session(&sessions(), "2").unwrap(), "0190a1b2-bbbb");
    }

    #[test]
    fn test_resolve_by_id_and_prefix() {
        let list = sessions();
        assert_eq!(resolve_session(&list, "0190a1b2-aaaa").unwrap(), "0190a1b2-aaaa");
        assert_eq!(resolve_session(&list, "0190ff").unwrap(), "0190ffff-cccc");
        let err = resolve_session(&list, "0190a1b2").unwrap_err();
        assert!(err.to_string().contains("matches 2 sessions"));
    }

    #[test]
    fn test_resolve_by_title() {
        assert_eq!(resolve_session(&sessions(), "roadmap").unwrap(), "0190a1b2-bbbb");
    }

    #[test]
    fn test_resolve_failures() {
        assert!(resolve_session(&sessions(), "").is_err());
        assert!(resolve_session(&sessions(), "nothing").is_err());
        // Out-of-range positions fall through to id / title matching.
        assert!(resolve_session(&sessions(), "9").is_err());
    }

    #[test]
    fn test_open_storage_creates_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ChatConfig::new(Some(tmp.path().to_path_buf())).unwrap();
        let storage = open_storage(&config).unwrap();
        storage.write("theme", &serde_json::json!({"mode": "light"}));
        assert!(config.store_dir.join("theme.json").exists());
    }
}
