use anyhow::Result;

use team_chat::SessionRepository;

use super::{local_time, open_storage};
use crate::config::ChatConfig;

pub fn sessions_command(config: &ChatConfig, json: bool) -> Result<()> {
    let fc = config.file_config()?;
    let repo = SessionRepository::load(open_storage(config)?);
    let sessions = repo.summaries(fc.chat.preview_chars);

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
    } else if sessions.is_empty() {
        println!("No sessions.");
    } else {
        println!(
            "{:<4} {:<24} {:<17} {:>5}  {}",
            "#", "TITLE", "UPDATED", "MSGS", "LAST MESSAGE"
        );
        println!("{}", "-".repeat(100));
        for (i, s) in sessions.iter().enumerate() {
            let marker = if repo.current_id() == Some(s.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{:<4} {:<24} {:<17} {:>5}  {}",
                format!("{}{}", i + 1, marker),
                s.title,
                local_time(s.updated_at),
                s.message_count,
                s.preview_text
            );
        }
        println!("\n{} session(s)", sessions.len());
    }

    Ok(())
}
