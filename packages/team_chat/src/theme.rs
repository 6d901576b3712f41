//! Persisted theme preferences.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{Storage, THEME_KEY};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    Light,
    #[default]
    Dark,
}

impl ThemeMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl fmt::Display for ThemeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Dark => write!(f, "dark"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Theme {
    pub mode: ThemeMode,
    pub primary_color: String,
    pub secondary_color: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            mode: ThemeMode::Dark,
            primary_color: "#4a6fa5".to_string(),
            secondary_color: "#6c757d".to_string(),
        }
    }
}

/// The theme plus the storage it is written back to on every change.
#[derive(Debug)]
pub struct ThemeSettings {
    storage: Storage,
    theme: Theme,
}

impl ThemeSettings {
    pub fn load(storage: Storage) -> Self {
        let theme = storage.read_or_default(THEME_KEY);
        Self { storage, theme }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn toggle_mode(&mut self) -> ThemeMode {
        self.theme.mode = self.theme.mode.toggled();
        debug!(mode = %self.theme.mode, "theme mode toggled");
        self.persist();
        self.theme.mode
    }

    /// Set the primary colour. Returns false for anything but `#rgb` / `#rrggbb`.
    pub fn set_primary_color(&mut self, color: &str) -> bool {
        let Some(color) = normalize_color(color) else {
            warn!(color, "rejected primary color");
            return false;
        };
        self.theme.primary_color = color;
        self.persist();
        true
    }

    pub fn set_secondary_color(&mut self, color: &str) -> bool {
        let Some(color) = normalize_color(color) else {
            warn!(color, "rejected secondary color");
            return false;
        };
        self.theme.secondary_color = color;
        self.persist();
        true
    }

    fn persist(&self) {
        self.storage.write(THEME_KEY, &self.theme);
    }
}

fn normalize_color(color: &str) -> Option<String> {
    let hex = color.trim().strip_prefix('#')?;
    let valid = matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
    valid.then(|| format!("#{}", hex.to_ascii_lowercase()))
}
