//! Runtime player settings (`settings.json`)
//!
//! Unlike the bootstrap TOML, these are edited from the control surface
//! while the service runs. Each field falls back to its default on its
//! own, so one bad value does not discard the rest of the document.

use crate::error::{Error, Result};
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent};
use jukebox_common::persist::{load_json_or_default, write_json_atomic};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// What to do once the jukebox has been idle for a while
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleMode {
    #[default]
    DoNothing,
    /// Random track from the music directory
    PlayRandom,
    /// Random track from `select_tracks`
    PlaySelect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Restart a token-started track when it finishes normally
    pub loop_token_track: bool,
    pub idle_mode: IdleMode,
    pub select_tracks: Vec<PathBuf>,
    /// Continuous idle time before idle mode kicks in
    pub idle_after_secs: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            loop_token_track: false,
            idle_mode: IdleMode::DoNothing,
            select_tracks: Vec::new(),
            idle_after_secs: 30,
        }
    }
}

impl PlayerSettings {
    /// Build from a loosely-typed document, defaulting field by field
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        Self {
            loop_token_track: field(value, "loop_token_track", defaults.loop_token_track),
            idle_mode: field(value, "idle_mode", defaults.idle_mode),
            select_tracks: field(value, "select_tracks", defaults.select_tracks),
            idle_after_secs: field(value, "idle_after_secs", defaults.idle_after_secs),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.idle_after_secs == 0 {
            return Err(Error::BadRequest(
                "idle_after_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn field<T: DeserializeOwned>(value: &Value, key: &str, default: T) -> T {
    match value.get(key) {
        None | Some(Value::Null) => default,
        Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|e| {
            warn!("Invalid setting {}: {} (using default)", key, e);
            default
        }),
    }
}

pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<PlayerSettings>,
    events: EventBus,
}

impl SettingsStore {
    pub fn load(path: impl Into<PathBuf>, events: EventBus) -> Self {
        let path = path.into();
        let (doc, _): (Value, _) = load_json_or_default(&path, "player settings");
        let settings = PlayerSettings::from_value(&doc);
        info!(
            loop_token_track = settings.loop_token_track,
            idle_mode = ?settings.idle_mode,
            "Loaded player settings"
        );

        Self {
            path,
            current: RwLock::new(settings),
            events,
        }
    }

    pub async fn get(&self) -> PlayerSettings {
        self.current.read().await.clone()
    }

    /// Replace the settings; persisted before they take effect
    pub async fn update(&self, settings: PlayerSettings) -> Result<PlayerSettings> {
        settings.validate()?;

        let mut current = self.current.write().await;
        write_json_atomic(&self.path, &settings)?;
        *current = settings.clone();
        drop(current);

        info!("Player settings updated");
        self.events.emit_lossy(JukeboxEvent::SettingsChanged {
            timestamp: Utc::now(),
        });
        Ok(settings)
    }

    /// Drop `select_tracks` entries whose file no longer exists
    ///
    /// Returns the settings after pruning.
    pub async fn prune_select_tracks(&self) -> Result<PlayerSettings> {
        let mut current = self.current.write().await;
        let mut pruned = current.clone();
        pruned.select_tracks.retain(|track| track.is_file());

        if pruned.select_tracks.len() != current.select_tracks.len() {
            info!(
                removed = current.select_tracks.len() - pruned.select_tracks.len(),
                "Pruned missing idle tracks"
            );
            write_json_atomic(&self.path, &pruned)?;
            *current = pruned.clone();
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_per_field() {
        let settings = PlayerSettings::from_value(&json!({
            "loop_token_track": true,
            "idle_mode": "shuffle_everything",
            "idle_after_secs": "soon"
        }));

        assert!(settings.loop_token_track);
        assert_eq!(settings.idle_mode, IdleMode::DoNothing);
        assert_eq!(settings.idle_after_secs, 30);
        assert!(settings.select_tracks.is_empty());
    }

    #[test]
    fn test_missing_document_uses_defaults() {
        let settings = PlayerSettings::from_value(&Value::Null);
        assert_eq!(settings, PlayerSettings::default());
    }

    #[tokio::test]
    async fn test_update_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::load(&path, EventBus::default());

        let next = PlayerSettings {
            loop_token_track: true,
            idle_mode: IdleMode::PlayRandom,
            ..PlayerSettings::default()
        };
        store.update(next.clone()).await.unwrap();

        let reloaded = SettingsStore::load(&path, EventBus::default());
        assert_eq!(reloaded.get().await, next);

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["idle_mode"], "play_random");
    }

    #[tokio::test]
    async fn test_update_rejects_zero_idle_delay() {
        let dir = TempDir::new().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json"), EventBus::default());

        let result = store
            .update(PlayerSettings {
                idle_after_secs: 0,
                ..PlayerSettings::default()
            })
            .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_prune_select_tracks() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.mp3");
        std::fs::write(&kept, b"").unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json"), EventBus::default());
        store
            .update(PlayerSettings {
                idle_mode: IdleMode::PlaySelect,
                select_tracks: vec![kept.clone(), dir.path().join("gone.mp3")],
                ..PlayerSettings::default()
            })
            .await
            .unwrap();

        let pruned = store.prune_select_tracks().await.unwrap();
        assert_eq!(pruned.select_tracks, vec![kept]);
        assert_eq!(store.get().await.select_tracks.len(), 1);
    }
}
