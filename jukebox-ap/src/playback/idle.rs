//! Idle-mode playback
//!
//! Once the controller has sat in `Idle` for `idle_after_secs`, start a
//! random track from the library (`play_random`) or from the curated list
//! (`play_select`). Idle-started sessions never loop, so when one finishes
//! the idle timer starts over. Nothing starts while no sink is connected,
//! and a session that begins between the check and the start always wins.

use super::controller::PlaybackController;
use super::library::list_tracks;
use super::settings::{IdleMode, SettingsStore};
use chrono::Utc;
use jukebox_common::events::{PlaybackSource, PlaybackState};
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct IdleManager {
    controller: PlaybackController,
    settings: Arc<SettingsStore>,
    music_dir: PathBuf,
    check_interval: Duration,
}

impl IdleManager {
    pub fn new(
        controller: PlaybackController,
        settings: Arc<SettingsStore>,
        music_dir: PathBuf,
    ) -> Self {
        Self {
            controller,
            settings,
            music_dir,
            check_interval: Duration::from_secs(2),
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// One check; returns the track started, if any
    pub async fn tick(&self) -> Option<PathBuf> {
        let settings = self.settings.get().await;
        if settings.idle_mode == IdleMode::DoNothing {
            return None;
        }

        let status = self.controller.status().await;
        if status.state != PlaybackState::Idle {
            return None;
        }
        let idle_for = status
            .idle_since
            .map(|since| Utc::now().signed_duration_since(since).num_seconds())
            .unwrap_or(0);
        if idle_for < settings.idle_after_secs as i64 {
            return None;
        }

        let candidates = match settings.idle_mode {
            IdleMode::PlayRandom => match list_tracks(&self.music_dir) {
                Ok(tracks) => tracks,
                Err(e) => {
                    warn!(error = %e, "Cannot list music directory");
                    return None;
                }
            },
            IdleMode::PlaySelect => match self.settings.prune_select_tracks().await {
                Ok(pruned) => pruned.select_tracks,
                Err(e) => {
                    warn!(error = %e, "Cannot prune idle track list");
                    return None;
                }
            },
            IdleMode::DoNothing => return None,
        };

        let track = candidates.choose(&mut rand::thread_rng()).cloned();
        let Some(track) = track else {
            debug!(mode = ?settings.idle_mode, "No idle tracks available");
            return None;
        };

        match self
            .controller
            .play_if_idle(track.clone(), PlaybackSource::Idle)
            .await
        {
            Ok(true) => {
                info!(track = %track.display(), "Idle playback started");
                Some(track)
            }
            Ok(false) => None,
            Err(e) => {
                warn!(track = %track.display(), error = %e, "Idle playback failed");
                None
            }
        }
    }

    /// Check forever; abort the task to stop
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
