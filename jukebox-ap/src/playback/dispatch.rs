//! Bridges debounced reader events into the playback controller

use super::controller::{PlaybackController, TriggerOutcome};
use crate::reader::ReaderEvent;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consume reader events until the poller drops its sender
///
/// With `stop_on_removal`, lifting the token that started the current
/// session stops it.
pub async fn run_token_dispatch(
    mut rx: mpsc::Receiver<ReaderEvent>,
    controller: PlaybackController,
    stop_on_removal: bool,
) {
    while let Some(event) = rx.recv().await {
        match event {
            ReaderEvent::Presented(token) => match controller.trigger(&token.uid).await {
                Ok(TriggerOutcome::Started) => info!(uid = %token.uid, "Token started playback"),
                Ok(outcome) => debug!(uid = %token.uid, ?outcome, "Token trigger"),
                Err(e) => warn!(uid = %token.uid, error = %e, "Token trigger failed"),
            },
            ReaderEvent::Removed { uid, .. } => {
                if stop_on_removal && controller.stop_if_started_by(&uid).await {
                    info!(uid = %uid, "Token removed, playback stopped");
                }
            }
        }
    }
    debug!("Token dispatch finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkConfig;
    use crate::playback::mock::MockPlayerBackend;
    use crate::playback::settings::SettingsStore;
    use crate::reader::TokenEvent;
    use crate::registry::TagRegistry;
    use crate::sink::{LinkStore, MockAdapter, SinkManager};
    use chrono::Utc;
    use jukebox_common::events::{EventBus, PlaybackState};
    use jukebox_common::{MacAddress, TagUid};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn controller(dir: &TempDir, backend: &MockPlayerBackend) -> PlaybackController {
        let events = EventBus::default();
        let speaker: MacAddress = "11:22:33:44:55:66".parse().unwrap();
        let adapter = MockAdapter::new();
        adapter.add_device(speaker, "Speaker");
        adapter.set_paired(speaker);
        let sink = SinkManager::start(
            Box::new(adapter),
            LinkStore::new(dir.path().join("link_state.json")),
            SinkConfig::default(),
            events.clone(),
        );
        sink.connect(speaker).await.unwrap();

        let registry = Arc::new(TagRegistry::load(dir.path().join("tags.json"), events.clone()));
        registry
            .register("04A1B2".parse().unwrap(), PathBuf::from("/music/a.mp3"))
            .await
            .unwrap();

        PlaybackController::new(
            registry,
            sink,
            Arc::new(backend.clone()),
            Arc::new(SettingsStore::load(dir.path().join("settings.json"), events.clone())),
            events,
        )
    }

    fn presented(uid: &TagUid) -> ReaderEvent {
        ReaderEvent::Presented(TokenEvent {
            uid: uid.clone(),
            observed_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_removal_stops_when_enabled() {
        let dir = TempDir::new().unwrap();
        let backend = MockPlayerBackend::new();
        let controller = controller(&dir, &backend).await;
        let uid: TagUid = "04A1B2".parse().unwrap();

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_token_dispatch(rx, controller.clone(), true));
        tx.send(presented(&uid)).await.unwrap();
        tx.send(ReaderEvent::Removed {
            uid: uid.clone(),
            observed_at: Utc::now(),
        })
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(backend.launches().len(), 1);
        assert_eq!(controller.status().await.state, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_removal_ignored_by_default() {
        let dir = TempDir::new().unwrap();
        let backend = MockPlayerBackend::new();
        let controller = controller(&dir, &backend).await;
        let uid: TagUid = "04A1B2".parse().unwrap();

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run_token_dispatch(rx, controller.clone(), false));
        tx.send(presented(&uid)).await.unwrap();
        tx.send(ReaderEvent::Removed {
            uid,
            observed_at: Utc::now(),
        })
        .await
        .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(controller.status().await.state, PlaybackState::Playing);
    }
}
