//! Layered pipeline configuration
//!
//! A [`Config`] resolves keys against up to three TOML layers, in order:
//! an optional named profile (a top-level table of the base document),
//! the base document itself, then an optional defaults document loaded
//! from an explicit path or from the `VEGA_DEFAULTS_PATH` environment
//! variable. A lookup only fails once all three layers miss.
//!
//! The active profile is an explicit field rather than hidden state, and
//! `set` always writes into the base document, so values a task sets
//! survive later profile switches. Tasks observe each other's writes
//! because the orchestrator threads one `Config` through the whole run.

use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Environment variable consulted for a defaults document when no
/// explicit defaults path is given.
pub const DEFAULTS_ENV_KEY: &str = "VEGA_DEFAULTS_PATH";

/// Layered key/value configuration backed by TOML documents.
#[derive(Debug, Clone)]
pub struct Config {
    base: toml::Table,
    defaults: Option<toml::Table>,
    active_profile: Option<String>,
    filepath: Option<PathBuf>,
    defaults_path: Option<PathBuf>,
}

impl Config {
    /// Load a config from a TOML file. If `VEGA_DEFAULTS_PATH` is set,
    /// a defaults document is loaded from there as the fallback layer;
    /// a defaults file that fails to load is skipped with a warning
    /// rather than aborting startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self {
            base: read_document(path)?,
            defaults: None,
            active_profile: None,
            filepath: Some(path.to_path_buf()),
            defaults_path: None,
        };

        if let Ok(defaults_path) = std::env::var(DEFAULTS_ENV_KEY) {
            match config.load_defaults(&defaults_path) {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(
                        "Failed to load defaults from {}: {}. Proceeding without defaults.",
                        defaults_path,
                        e
                    );
                }
            }
        }

        Ok(config)
    }

    /// Load a config plus an explicit defaults document.
    pub fn load_with_defaults(
        path: impl AsRef<Path>,
        defaults_path: impl AsRef<Path>,
    ) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.load_defaults(defaults_path.as_ref())?;
        Ok(config)
    }

    /// Build a config directly from a parsed table. Used by tests and by
    /// callers that assemble configuration programmatically.
    pub fn from_table(base: toml::Table) -> Self {
        Self {
            base,
            defaults: None,
            active_profile: None,
            filepath: None,
            defaults_path: None,
        }
    }

    /// Attach (or replace) the defaults layer.
    pub fn load_defaults(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.defaults = Some(read_document(path)?);
        self.defaults_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Select a profile by name. The profile must exist as a table in
    /// the base document.
    pub fn set_active_profile(&mut self, profile: Option<&str>) -> Result<()> {
        match profile {
            None => {
                self.active_profile = None;
                Ok(())
            }
            Some(name) => match self.base.get(name) {
                Some(toml::Value::Table(_)) => {
                    self.active_profile = Some(name.to_string());
                    Ok(())
                }
                Some(_) => Err(EngineError::Config(format!(
                    "config key '{name}' is not a table and cannot be used as a profile"
                ))),
                None => Err(EngineError::not_found(format!("config profile '{name}'"))),
            },
        }
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.active_profile.as_deref()
    }

    fn profile_table(&self) -> Option<&toml::Table> {
        let name = self.active_profile.as_deref()?;
        match self.base.get(name) {
            Some(toml::Value::Table(table)) => Some(table),
            _ => None,
        }
    }

    /// Resolve a key through profile, base, then defaults.
    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        if let Some(profile) = self.profile_table()
            && let Some(value) = profile.get(key)
        {
            return Some(value);
        }
        if let Some(value) = self.base.get(key) {
            return Some(value);
        }
        self.defaults.as_ref()?.get(key)
    }

    /// Like [`Config::get`], but an absent key is an error.
    pub fn require(&self, key: &str) -> Result<&toml::Value> {
        self.get(key)
            .ok_or_else(|| EngineError::MissingKey(key.to_string()))
    }

    /// String-typed convenience over [`Config::require`].
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| EngineError::Config(format!("config key '{key}' is not a string")))
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Resolve a key against the defaults layer only. Some keys (notably
    /// the database path) are deliberately restricted to the defaults
    /// document so per-target configs cannot redirect the store.
    pub fn get_default(&self, key: &str) -> Option<&toml::Value> {
        self.defaults.as_ref()?.get(key)
    }

    /// Like [`Config::get_default`], but absence of the defaults layer or
    /// of the key is an error.
    pub fn require_default(&self, key: &str) -> Result<&toml::Value> {
        let defaults = self
            .defaults
            .as_ref()
            .ok_or_else(|| EngineError::Config("no default configuration loaded".to_string()))?;
        defaults
            .get(key)
            .ok_or_else(|| EngineError::MissingKey(key.to_string()))
    }

    pub fn has_defaults(&self) -> bool {
        self.defaults.is_some()
    }

    /// Set a key in the base document. Writes land outside any profile
    /// so they stay visible after the profile changes.
    pub fn set(&mut self, key: &str, value: impl Into<toml::Value>) {
        self.base.insert(key.to_string(), value.into());
    }

    /// Set a key inside the active profile, or in the base document when
    /// no profile is selected.
    pub fn set_in_profile(&mut self, key: &str, value: impl Into<toml::Value>) {
        if let Some(name) = self.active_profile.clone()
            && let Some(toml::Value::Table(table)) = self.base.get_mut(&name)
        {
            table.insert(key.to_string(), value.into());
            return;
        }
        self.set(key, value);
    }

    /// Serialize the full layered state for the run record.
    pub fn snapshot_json(&self) -> String {
        let snapshot = serde_json::json!({
            "config": &self.base,
            "defaults": &self.defaults,
            "profile": &self.active_profile,
        });
        snapshot.to_string()
    }

    /// Write the base document (not the defaults) to a file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let rendered = toml::to_string_pretty(&self.base)
            .map_err(|e| EngineError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, rendered)?;
        Ok(())
    }

    /// Write the base document back to the file it was loaded from.
    pub fn save(&self) -> Result<()> {
        let path = self
            .filepath
            .as_ref()
            .ok_or_else(|| EngineError::Config("config was not loaded from a file".to_string()))?;
        self.write_to(path)
    }
}

fn read_document(path: &Path) -> Result<toml::Table> {
    if !path.exists() {
        return Err(EngineError::not_found(format!(
            "config file {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path)?;
    raw.parse::<toml::Table>()
        .map_err(|e| EngineError::Config(format!("failed to parse {}: {e}", path.display())))
}
