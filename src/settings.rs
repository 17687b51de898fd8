//! Per-user settings store.
//!
//! Persists the active profile and per-application feedback levels to
//! `<config>/feedbackd/settings.json`. External edits are picked up
//! through a file watcher so profile switches made by other tools take
//! effect without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::theme::ProfileLevel;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile: Option<String>,
    /// Per-app profile levels, keyed by munged app id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    applications: HashMap<String, String>,
}

/// Settings file with load/save and typed accessors.
pub struct Settings {
    path: PathBuf,
    data: SettingsData,
}

/// Normalize an application id for use as a settings key: ASCII
/// alphanumerics and `-` survive, everything else becomes `-`, the
/// result is lowercased.
pub fn munge_app_id(app_id: &str) -> String {
    app_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("feedbackd/settings.json"))
    }

    /// Load settings, treating a missing file as defaults.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Ignoring malformed settings {}: {e}", path.display());
                    SettingsData::default()
                }
            },
            Err(_) => SettingsData::default(),
        };
        Self {
            path: path.to_path_buf(),
            data,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file in place.
    pub fn reload(&mut self) {
        self.data = Self::load(&self.path).data;
    }

    pub fn profile(&self) -> Option<ProfileLevel> {
        self.data
            .profile
            .as_deref()
            .and_then(ProfileLevel::from_name)
    }

    /// Persist a new profile level.
    pub fn set_profile(&mut self, level: ProfileLevel) -> Result<()> {
        self.data.profile = Some(level.as_str().to_string());
        self.save()
    }

    /// Per-app level, if the user configured one for this app.
    pub fn app_level(&self, app_id: &str) -> Option<ProfileLevel> {
        let munged = munge_app_id(app_id);
        let level = self
            .data
            .applications
            .get(&munged)
            .and_then(|name| ProfileLevel::from_name(name));
        if let Some(level) = level {
            debug!("{app_id} uses app profile {}", level.as_str());
        }
        level
    }

    pub fn set_app_level(&mut self, app_id: &str, level: ProfileLevel) -> Result<()> {
        self.data
            .applications
            .insert(munge_app_id(app_id), level.as_str().to_string());
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Settings(format!("create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(&self.data)
            .map_err(|e| Error::Settings(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::Settings(format!("write {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Watch the settings file for external modifications. Events are
/// collapsed into pings on `tx`; the returned watcher must be kept
/// alive.
pub fn spawn_watcher(path: &Path, tx: UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let file = path.to_path_buf();
    let parent = path.parent()?.to_path_buf();
    if !parent.exists() {
        if let Err(e) = std::fs::create_dir_all(&parent) {
            warn!("Can't watch settings dir {}: {e}", parent.display());
            return None;
        }
    }

    let mut watcher = match notify::recommended_watcher(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if event.paths.iter().any(|p| p == &file) {
                    let _ = tx.send(());
                }
            }
            Err(e) => warn!("Settings watcher error: {e}"),
        },
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("Failed to create settings watcher: {e}");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&parent, RecursiveMode::NonRecursive) {
        warn!("Failed to watch {}: {e}", parent.display());
        return None;
    }
    Some(watcher)
}
