use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Preferences {
    pub sidebar_pin: bool,
}

/// UI preferences, read once when the store is opened and written back on
/// every change.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    prefs: Preferences,
}

impl PreferenceStore {
    pub fn default_path() -> Option<PathBuf> {
        Some(crate::app::project_dirs()?.config_dir().join("preferences.toml"))
    }

    pub fn open_default() -> Result<Self, StoreError> {
        let path = Self::default_path().ok_or(StoreError::NoDataDir)?;
        Ok(Self::load(path))
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let prefs = match fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|e| {
                warn!("Resetting unreadable preferences {}: {e}", path.display());
                Preferences::default()
            }),
            Err(_) => Preferences::default(),
        };
        Self { path, prefs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preferences(&self) -> Preferences {
        self.prefs
    }

    pub fn sidebar_pinned(&self) -> bool {
        self.prefs.sidebar_pin
    }

    /// Flips the pin and persists it. Returns the new value.
    pub fn toggle_sidebar_pin(&mut self) -> Result<bool, StoreError> {
        self.prefs.sidebar_pin = !self.prefs.sidebar_pin;
        self.save()?;
        Ok(self.prefs.sidebar_pin)
    }

    pub fn set_sidebar_pin(&mut self, pinned: bool) -> Result<(), StoreError> {
        if self.prefs.sidebar_pin == pinned {
            return Ok(());
        }
        self.prefs.sidebar_pin = pinned;
        self.save()
    }

    fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, toml::to_string_pretty(&self.prefs)?)?;
        Ok(())
    }
}
