//! TOML-based application configuration.
//!
//! Stores:
//! - default timer settings (`[timer]`)
//! - the remote store endpoint and credentials (`[remote]`)
//! - the signed-in principal, if any
//! - the auto-start policy
//!
//! Configuration is stored at `<data_dir>/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;
use crate::principal::PrincipalId;
use crate::timer::TimerSettings;

/// Remote store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// REST base URL. Unset means offline: every record stays local-only.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sent as a bearer token.
    #[serde(default)]
    pub api_token: Option<String>,
}

fn default_stale_after_secs() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    10
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            stale_after_secs: default_stale_after_secs(),
            timeout_secs: default_timeout_secs(),
            api_token: None,
        }
    }
}

impl RemoteConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data_dir>/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Signed-in principal. Unset is the anonymous, local-only mode.
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(default)]
    pub auto_start_next: bool,
    /// Settings used until per-principal settings are saved.
    #[serde(default)]
    pub timer: TimerSettings,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        let n = value
                            .parse::<u64>()
                            .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?;
                        serde_json::Value::Number(n.into())
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Optional strings: empty clears.
                    serde_json::Value::String(_) | serde_json::Value::Null if value.is_empty() => {
                        serde_json::Value::Null
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location, `<data_dir>/config.toml`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from the default location, writing defaults if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "using default configuration");
            Self::default()
        })
    }

    /// Get a config value as string by dot-separated key. `Ok(None)` for
    /// an unset optional value.
    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let json = serde_json::to_value(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        let val = Self::get_json_value_by_path(&json, key)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        Ok(match val {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    /// Set a config value by dot-separated key, in memory. The result is
    /// validated; on error `self` is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed
    /// or is out of range.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let next: Config = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Every settable key with its current value.
    pub fn entries(&self) -> Vec<(String, Option<String>)> {
        let json = serde_json::to_value(self).unwrap_or_default();
        let mut out = Vec::new();
        flatten_keys(&json, String::new(), &mut out);
        out
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timer
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                key: "timer".to_string(),
                message: e.to_string(),
            })
    }

    /// The configured principal, if any.
    pub fn principal_id(&self) -> Option<PrincipalId> {
        self.principal
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PrincipalId::new)
    }
}

fn flatten_keys(value: &serde_json::Value, prefix: String, out: &mut Vec<(String, Option<String>)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_keys(child, path, out);
            }
        }
        serde_json::Value::Null => out.push((prefix, None)),
        serde_json::Value::String(s) => out.push((prefix, Some(s.clone()))),
        other => out.push((prefix, Some(other.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.timer.focus_minutes, 25);
        assert_eq!(parsed.remote.timeout_secs, 10);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("timer.focus_minutes").unwrap().as_deref(), Some("25"));
        assert_eq!(cfg.get("auto_start_next").unwrap().as_deref(), Some("false"));
        assert_eq!(cfg.get("remote.base_url").unwrap(), None);
        assert!(matches!(
            cfg.get("timer.missing_key"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn set_json_value_by_path_updates_nested_number() {
        let mut json = serde_json::to_value(Config::default()).unwrap();
        Config::set_json_value_by_path(&mut json, "timer.focus_minutes", "50").unwrap();
        assert_eq!(
            Config::get_json_value_by_path(&json, "timer.focus_minutes").unwrap(),
            &serde_json::Value::Number(50.into())
        );
    }

    #[test]
    fn set_optional_string_and_clear_it() {
        let mut cfg = Config::default();
        cfg.set("remote.base_url", "https://api.example.com/v1").unwrap();
        assert_eq!(cfg.remote.base_url.as_deref(), Some("https://api.example.com/v1"));
        cfg.set("remote.base_url", "").unwrap();
        assert_eq!(cfg.remote.base_url, None);

        cfg.set("principal", "u1").unwrap();
        assert_eq!(cfg.principal_id(), Some(PrincipalId::new("u1")));
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("timer.nonexistent_key", "1"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(cfg.set("", "1"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn set_rejects_invalid_type_and_range() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("auto_start_next", "sometimes"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            cfg.set("timer.focus_minutes", "0"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn load_from_writes_defaults_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert!(path.exists());

        let mut changed = cfg.clone();
        changed.set("timer.sessions_until_long_break", "3").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().timer.sessions_until_long_break, 3);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "auto_start_next = true\n[timer]\nfocus_minutes = 50\n").unwrap();

        let cfg = Config::load_from(&path).unwrap();
        assert!(cfg.auto_start_next);
        assert_eq!(cfg.timer.focus_minutes, 50);
        assert_eq!(cfg.timer.short_break_minutes, 5);
        assert_eq!(cfg.remote, RemoteConfig::default());
    }

    #[test]
    fn entries_list_every_key() {
        let keys: Vec<String> = Config::default().entries().into_iter().map(|(k, _)| k).collect();
        assert!(keys.contains(&"timer.focus_minutes".to_string()));
        assert!(keys.contains(&"remote.base_url".to_string()));
        assert!(keys.contains(&"principal".to_string()));
    }
}
