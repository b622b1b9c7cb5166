//! Tag registry
//!
//! Persistent uid → media path bindings. The whole map is rewritten
//! atomically on every mutation, so a crash leaves either the old or the
//! new document on disk.
//!
//! On-disk format (`tags.json`):
//!
//! ```json
//! { "04A1B2C3": "/music/calm.mp3" }
//! ```

use crate::error::{Error, Result};
use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent};
use jukebox_common::persist::{load_json_or_default, write_json_atomic, LoadOutcome};
use jukebox_common::TagUid;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

/// One binding, as listed by the control surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagEntry {
    pub uid: TagUid,
    pub media_path: PathBuf,
}

pub struct TagRegistry {
    path: PathBuf,
    entries: RwLock<BTreeMap<TagUid, PathBuf>>,
    events: EventBus,
}

impl TagRegistry {
    /// Load the registry; a missing or corrupt file yields an empty registry
    pub fn load(path: impl Into<PathBuf>, events: EventBus) -> Self {
        let path = path.into();
        let (entries, outcome): (BTreeMap<TagUid, PathBuf>, _) =
            load_json_or_default(&path, "tag registry");
        if outcome == LoadOutcome::Loaded {
            info!("Loaded {} tag bindings from {}", entries.len(), path.display());
        }

        Self {
            path,
            entries: RwLock::new(entries),
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn lookup(&self, uid: &TagUid) -> Option<PathBuf> {
        self.entries.read().await.get(uid).cloned()
    }

    /// Bind `uid` to `media_path`, replacing any previous binding
    ///
    /// The new map is persisted before it becomes visible; on a write
    /// failure the registry is unchanged.
    pub async fn register(&self, uid: TagUid, media_path: PathBuf) -> Result<()> {
        if media_path.as_os_str().is_empty() {
            return Err(Error::BadRequest("media path cannot be empty".to_string()));
        }

        let mut entries = self.entries.write().await;
        let mut updated = entries.clone();
        updated.insert(uid.clone(), media_path.clone());
        write_json_atomic(&self.path, &updated)?;
        *entries = updated;
        drop(entries);

        info!("Registered tag {} → {}", uid, media_path.display());
        self.events.emit_lossy(JukeboxEvent::TagRegistered {
            uid,
            media_path,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Remove a binding; returns false (and writes nothing) if absent
    pub async fn unregister(&self, uid: &TagUid) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(uid) {
            return Ok(false);
        }
        let mut updated = entries.clone();
        updated.remove(uid);
        write_json_atomic(&self.path, &updated)?;
        *entries = updated;
        drop(entries);

        info!("Unregistered tag {}", uid);
        self.events.emit_lossy(JukeboxEvent::TagUnregistered {
            uid: uid.clone(),
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    /// All bindings ordered by uid
    pub async fn all(&self) -> Vec<TagEntry> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(uid, media_path)| TagEntry {
                uid: uid.clone(),
                media_path: media_path.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn uid(hex: &str) -> TagUid {
        hex.parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let dir = TempDir::new().unwrap();
        let registry = TagRegistry::load(dir.path().join("tags.json"), EventBus::default());

        registry
            .register(uid("04A1B2C3"), PathBuf::from("/music/calm.mp3"))
            .await
            .unwrap();

        assert_eq!(
            registry.lookup(&uid("04A1B2C3")).await,
            Some(PathBuf::from("/music/calm.mp3"))
        );
        assert_eq!(registry.lookup(&uid("FFFF")).await, None);
    }

    #[tokio::test]
    async fn test_bindings_survive_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tags.json");
        {
            let registry = TagRegistry::load(&path, EventBus::default());
            registry
                .register(uid("01020304"), PathBuf::from("/music/a.mp3"))
                .await
                .unwrap();
            registry
                .register(uid("05060708"), PathBuf::from("/music/b.mp3"))
                .await
                .unwrap();
            registry.unregister(&uid("01020304")).await.unwrap();
        }

        let reloaded = TagRegistry::load(&path, EventBus::default());
        assert_eq!(reloaded.len().await, 1);
        assert_eq!(
            reloaded.lookup(&uid("05060708")).await,
            Some(PathBuf::from("/music/b.mp3"))
        );
        assert!(!dir.path().join("tags.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_register_replaces_binding() {
        let dir = TempDir::new().unwrap();
        let registry = TagRegistry::load(dir.path().join("tags.json"), EventBus::default());

        registry
            .register(uid("0A"), PathBuf::from("/music/old.mp3"))
            .await
            .unwrap();
        registry
            .register(uid("0A"), PathBuf::from("/music/new.mp3"))
            .await
            .unwrap();

        assert_eq!(registry.len().await, 1);
        assert_eq!(
            registry.lookup(&uid("0A")).await,
            Some(PathBuf::from("/music/new.mp3"))
        );
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tags.json");
        let registry = TagRegistry::load(&path, EventBus::default());

        assert!(!registry.unregister(&uid("0A")).await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tags.json");
        std::fs::write(&path, "{ not json").unwrap();

        let registry = TagRegistry::load(&path, EventBus::default());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_persisted_format_is_flat_map() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tags.json");
        let registry = TagRegistry::load(&path, EventBus::default());
        registry
            .register(uid("04a1b2c3"), PathBuf::from("/music/calm.mp3"))
            .await
            .unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["04A1B2C3"], "/music/calm.mp3");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_registry_unchanged() {
        let dir = TempDir::new().unwrap();
        // parent is a regular file, so the write cannot succeed
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let registry = TagRegistry::load(blocker.join("tags.json"), EventBus::default());

        assert!(registry
            .register(uid("0A"), PathBuf::from("/music/a.mp3"))
            .await
            .is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_emits_event() {
        let dir = TempDir::new().unwrap();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let registry = TagRegistry::load(dir.path().join("tags.json"), events);

        registry
            .register(uid("0A"), PathBuf::from("/music/a.mp3"))
            .await
            .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            JukeboxEvent::TagRegistered { .. }
        ));
    }
}
