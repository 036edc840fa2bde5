use std::time::Duration;

use clap::Subcommand;
use focusline_core::Config;

use super::print_json;
use crate::app::App;

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g. "principal", "timer.focus_minutes")
        key: String,
    },
    /// Set a config value ("" clears an optional value)
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },
    /// List all config values
    List,
    /// Reset config to defaults
    Reset,
}

pub fn run(action: ConfigAction, app: App) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = app.config.clone();
    match action {
        ConfigAction::Get { key } => {
            println!("{}", config.get(&key)?.unwrap_or_default());
        }
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            if key.starts_with("timer.") {
                // Saved timer settings take precedence over the file; keep them in step.
                let updated = App { config, ..app };
                updated.settings().set(updated.config.timer)?;
                updated
                    .timer(Duration::from_secs(1))?
                    .apply_settings(&updated.config.timer)?;
            }
            println!("ok");
        }
        ConfigAction::List => {
            print_json(&config)?;
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("config reset to defaults");
        }
    }
    Ok(())
}
