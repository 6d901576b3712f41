use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use team_chat::{CoreOptions, Endpoint, ReconnectPolicy};

// =============================================================================
// Tunable config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [backend]
//                    url = "wss://agents.example.com/ws/agent-team"
//
//   env var:         TEAM_CHAT_BACKEND__URL=wss://...   (double underscore = nesting)

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Where the agent backend lives (`[backend]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// Appended to the URL as `?token=...` when set
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            token: None,
        }
    }
}

impl BackendFileConfig {
    /// Endpoint with command-line overrides applied on top.
    pub fn endpoint(&self, url: Option<&str>, token: Option<&str>) -> Endpoint {
        Endpoint::new(
            url.unwrap_or(&self.url),
            token.map(str::to_string).or_else(|| self.token.clone()),
        )
    }
}

/// Automatic reconnection (`[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectFileConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        let initial_delay = Duration::from_millis(self.initial_delay_ms);
        ReconnectPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_millis(self.max_delay_ms).max(initial_delay),
        }
    }
}

/// Chat behaviour (`[chat]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_typing_timeout_secs")]
    pub typing_timeout_secs: u64,
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            typing_timeout_secs: default_typing_timeout_secs(),
            default_agent: default_agent(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl ChatFileConfig {
    pub fn core_options(&self) -> CoreOptions {
        CoreOptions {
            default_agent: self.default_agent.clone(),
            typing_timeout: Duration::from_secs(self.typing_timeout_secs),
            preview_chars: self.preview_chars.max(1),
            ..Default::default()
        }
    }
}

fn default_backend_url() -> String {
    "ws://localhost:8000/ws/agent-team".to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_typing_timeout_secs() -> u64 {
    5
}
fn default_agent() -> String {
    "AI Assistant".to_string()
}
fn default_preview_chars() -> usize {
    80
}

/// Build a figment that layers: defaults → config.toml → TEAM_CHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `TEAM_CHAT_BACKEND__TOKEN=abc`  →  `backend.token = "abc"`
///   `TEAM_CHAT_RECONNECT__MAX_ATTEMPTS=10`  →  `reconnect.max_attempts = 10`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("TEAM_CHAT_").split("__"))
}

// =============================================================================
// Directory layout (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub data_dir: PathBuf,
    /// One JSON document per persisted key
    pub store_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ChatConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".team-chat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let store_dir = data_dir.join("store");
        std::fs::create_dir_all(&store_dir)
            .with_context(|| format!("Failed to create store directory: {:?}", store_dir))?;

        let logs_dir = data_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            store_dir,
            logs_dir,
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs_dir.join("team-chat.log")
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    pub fn file_config(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_toml_path()))
    }
}
