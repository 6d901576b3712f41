//! Interactive chat loop: one task owns the [`ChatCore`] and reacts to typed
//! lines, link events, core updates and a one-second tick.

use anyhow::Result;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use team_chat::{
    ChatCore, ConnectionState, CoreUpdate, Endpoint, Link, SessionView, SubmitOutcome, WsLink,
};

use super::{local_time, open_storage, resolve_session};
use crate::config::ChatConfig;

const HELP: &str = "\
Type a message and press enter to send it to the current session.

  /new               start a new session
  /list              list sessions (* = current)
  /switch <session>  switch by number, id prefix or title
  /delete <session>  delete a session
  /rename <title>    rename the current session
  /status            show the connection status
  /reconnect         connect again after giving up
  /help              show this help
  /quit              leave";

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Say(&'a str),
    New,
    List,
    Switch(&'a str),
    Delete(&'a str),
    Rename(&'a str),
    Status,
    Reconnect,
    Help,
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line);
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "new" => Command::New,
        "list" | "ls" => Command::List,
        "switch" | "s" => Command::Switch(arg),
        "delete" | "rm" => Command::Delete(arg),
        "rename" => Command::Rename(arg),
        "status" => Command::Status,
        "reconnect" => Command::Reconnect,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(name),
    }
}

pub async fn chat_command(
    config: &ChatConfig,
    url: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let fc = config.file_config()?;
    let endpoint = fc.backend.endpoint(url.as_deref(), token.as_deref());

    let (link, mut link_events) = WsLink::channel(fc.reconnect.policy());
    let mut core = ChatCore::new(open_storage(config)?, link, fc.chat.core_options());
    let mut updates = core.subscribe();
    let mut screen = Screen::default();

    println!("team-chat: connecting to {} (/help for commands)", endpoint.url);
    if let Some(view) = core.current_session_view() {
        screen.show_session(&view);
    }
    core.connect(endpoint.clone());

    // Blocking reader thread; the channel closes on EOF.
    let (line_tx, mut lines) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if line_tx.blocking_send(line.clone()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    screen.prompt();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if !handle_line(&mut core, &mut screen, &endpoint, &line) {
                    break;
                }
                screen.prompt();
            }

            Some(event) = link_events.recv() => core.handle_link_event(event),

            update = updates.recv() => match update {
                Ok(update) => {
                    if screen.render(&core, update) {
                        screen.prompt();
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "update receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = tick.tick() => core.tick(),
        }
    }

    core.shutdown();
    println!();
    Ok(())
}

/// Returns false when the user asked to leave.
fn handle_line<L: Link>(
    core: &mut ChatCore<L>,
    screen: &mut Screen,
    endpoint: &Endpoint,
    line: &str,
) -> bool {
    match parse_command(line) {
        Command::Empty => {}
        // Queued sends are announced through a warning update.
        Command::Say(text) => {
            if let SubmitOutcome::Sent { session_id, .. } = core.submit(text) {
                debug!(session_id = %session_id, "submitted");
            }
        }
        Command::New => {
            let session = core.new_session();
            println!("Started {}", session.title);
        }
        Command::List => print_list(core),
        Command::Switch(target) => {
            match resolve_session(&core.session_list_view(), target) {
                Ok(id) => {
                    core.select_session(&id);
                    if let Some(view) = core.current_session_view() {
                        screen.show_session(&view);
                    }
                }
                Err(e) => println!("{e}"),
            }
        }
        Command::Delete(target) => {
            match resolve_session(&core.session_list_view(), target) {
                Ok(id) => {
                    let title = core.session_view(&id).map(|v| v.title).unwrap_or_default();
                    core.delete_session(&id);
                    println!("Deleted {title}");
                    match core.current_session_view() {
                        Some(view) => screen.show_session(&view),
                        None => println!("No sessions left; your next message starts one."),
                    }
                }
                Err(e) => println!("{e}"),
            }
        }
        Command::Rename(title) => {
            let current = core.sessions().current_id().map(str::to_string);
            match current {
                Some(id) if !title.is_empty() => {
                    core.rename_session(&id, title);
                    println!("Renamed to {title}");
                }
                Some(_) => println!("Usage: /rename <title>"),
                None => println!("No current session"),
            }
        }
        Command::Status => {
            let status = core.connection_status_view();
            let state = core.connection_state();
            match status.error {
                Some(error) if !status.connected => println!("{state}: {error}"),
                _ => println!("{state}"),
            }
        }
        Command::Reconnect => {
            if core.connection_state() == ConnectionState::Connected {
                println!("Already connected");
            } else {
                core.connect(endpoint.clone());
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
        Command::Unknown(name) => println!("Unknown command /{name} (try /help)"),
    }
    true
}

fn print_list<L: Link>(core: &ChatCore<L>) {
    let sessions = core.session_list_view();
    if sessions.is_empty() {
        println!("No sessions.");
        return;
    }
    let current = core.sessions().current_id();
    for (i, s) in sessions.iter().enumerate() {
        let marker = if current == Some(s.id.as_str()) { '*' } else { ' ' };
        println!(
            "{marker}{:>3}  {:<24} {:>6}  {:>3} msg  {}",
            i + 1,
            s.title,
            local_time(s.updated_at),
            s.message_count,
            s.preview_text
        );
    }
}

/// Tracks how much of each session has been printed.
#[derive(Default)]
struct Screen {
    printed: HashMap<String, usize>,
}

impl Screen {
    fn prompt(&self) {
        print!("> ");
        let _ = std::io::stdout().flush();
    }

    fn show_session(&mut self, view: &SessionView) {
        println!("── {} ──", view.title);
        for message in &view.messages {
            print_message(message);
        }
        self.printed.insert(view.id.clone(), view.messages.len());
    }

    /// Print what changed. Returns whether anything was printed.
    fn render<L: Link>(&mut self, core: &ChatCore<L>, update: CoreUpdate) -> bool {
        match update {
            CoreUpdate::StatusChanged(status) => match status.error {
                _ if status.connected => println!("\r[connected]"),
                Some(error) => println!("\r[disconnected: {error}]"),
                None => println!("\r[disconnected]"),
            },
            CoreUpdate::SessionUpdated { session_id } => {
                let Some(view) = core.session_view(&session_id) else {
                    return false;
                };
                let seen = self.printed.get(&session_id).copied().unwrap_or(0);
                let fresh: Vec<_> = view
                    .messages
                    .iter()
                    .skip(seen)
                    .filter(|m| !m.is_user())
                    .collect();
                if fresh.is_empty() {
                    return false;
                }
                if core.sessions().current_id() == Some(session_id.as_str()) {
                    for message in fresh {
                        print!("\r");
                        print_message(message);
                    }
                    self.printed.insert(session_id, view.messages.len());
                } else {
                    println!("\r(new reply in {})", view.title);
                }
            }
            CoreUpdate::Typing {
                session_id,
                agent,
                typing: true,
            } if core.sessions().current_id() == Some(session_id.as_str()) => {
                let who = agent.as_deref().unwrap_or("agent");
                println!("\r({who} is typing…)");
            }
            CoreUpdate::Warning(message) => println!("\r! {message}"),
            CoreUpdate::Typing { .. } | CoreUpdate::SessionsChanged => return false,
        }
        true
    }
}

fn print_message(message: &team_chat::Message) {
    let pending = if message.pending { " (pending)" } else { "" };
    println!(
        "[{}] {}{}: {}",
        local_time(message.created_at),
        message.author,
        pending,
        message.content
    );
}
