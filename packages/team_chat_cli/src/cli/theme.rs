use anyhow::{Result, bail};
use clap::Subcommand;

use team_chat::{Theme, ThemeSettings};

use super::open_storage;
use crate::config::ChatConfig;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ThemeAction {
    /// Switch between light and dark
    Toggle,
    /// Set the primary colour (#rgb or #rrggbb)
    Primary { color: String },
    /// Set the secondary colour (#rgb or #rrggbb)
    Secondary { color: String },
}

pub fn theme_command(config: &ChatConfig, action: Option<ThemeAction>) -> Result<()> {
    let mut settings = ThemeSettings::load(open_storage(config)?);
    apply(&mut settings, action)?;
    print_theme(settings.theme());
    Ok(())
}

fn apply(settings: &mut ThemeSettings, action: Option<ThemeAction>) -> Result<()> {
    match action {
        None => {}
        Some(ThemeAction::Toggle) => {
            settings.toggle_mode();
        }
        Some(ThemeAction::Primary { color }) => {
            if !settings.set_primary_color(&color) {
                bail!("Invalid colour '{}': expected #rgb or #rrggbb", color);
            }
        }
        Some(ThemeAction::Secondary { color }) => {
            if !settings.set_secondary_color(&color) {
                bail!("Invalid colour '{}': expected #rgb or #rrggbb", color);
            }
        }
    }
    Ok(())
}

fn print_theme(theme: &Theme) {
    println!("mode:      {}", theme.mode);
    println!("primary:   {}", theme.primary_color);
    println!("secondary: {}", theme.secondary_color);
}
