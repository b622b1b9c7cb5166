//! Playback Controller
//!
//! **Purpose:** Single authority over what is playing.
//!
//! **Architecture:**
//! - Every transition goes through one `tokio::sync::Mutex` guarding the
//!   optional active session; token triggers, control-surface requests,
//!   the idle manager and process exits all serialize on it.
//! - A published [`PlaybackStatus`] snapshot is rewritten on each
//!   transition so status reads never wait behind a transition.
//! - Each player process is owned by a supervisor task. The supervisor
//!   kills and reaps it when asked (or when the session handle is dropped)
//!   and reports natural exits back into the controller.
//!
//! **State machine:** `Idle → Starting → Playing → Stopping → Idle`. At
//! most one session exists outside `Idle`: starting a new one first tears
//! down the current one and waits until its process has been reaped.

use super::player::{ExitOutcome, PlayerBackend, PlayerProcess};
use super::settings::SettingsStore;
use crate::error::{Error, Result};
use crate::registry::TagRegistry;
use crate::sink::SinkManager;
use chrono::{DateTime, Utc};
use jukebox_common::events::{EventBus, JukeboxEvent, PlaybackSource, PlaybackState};
use jukebox_common::TagUid;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ========================================
// Status
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackErrorKind {
    NoSinkAvailable,
    PlayerExited,
    LaunchFailed,
}

/// Most recent playback failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackError {
    pub kind: PlaybackErrorKind,
    pub detail: String,
    pub media_path: PathBuf,
    pub at: DateTime<Utc>,
}

/// Read-only snapshot for polling clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub media_path: Option<PathBuf>,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub source: Option<PlaybackSource>,
    /// Token that started the session
    pub token: Option<TagUid>,
    pub last_error: Option<PlaybackError>,
    /// When the controller last entered Idle
    pub idle_since: Option<DateTime<Utc>>,
}

impl PlaybackStatus {
    fn idle() -> Self {
        Self {
            state: PlaybackState::Idle,
            media_path: None,
            session_id: None,
            started_at: None,
            source: None,
            token: None,
            last_error: None,
            idle_since: Some(Utc::now()),
        }
    }
}

/// Result of feeding a token into the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Token not in the registry; nothing changed
    Unknown,
    /// Token's track is already the current session
    AlreadyPlaying,
    Started,
}

// ========================================
// Controller
// ========================================

struct ActiveSession {
    id: Uuid,
    media_path: PathBuf,
    source: PlaybackSource,
    token: Option<TagUid>,
    /// Dropping or firing this makes the supervisor kill the process
    kill_tx: oneshot::Sender<()>,
    /// Fires once the process has been reaped
    reaped_rx: oneshot::Receiver<()>,
}

struct ControllerInner {
    registry: Arc<TagRegistry>,
    sink: SinkManager,
    backend: Arc<dyn PlayerBackend>,
    settings: Arc<SettingsStore>,
    events: EventBus,
    session: Mutex<Option<ActiveSession>>,
    status: RwLock<PlaybackStatus>,
}

#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<ControllerInner>,
}

impl PlaybackController {
    pub fn new(
        registry: Arc<TagRegistry>,
        sink: SinkManager,
        backend: Arc<dyn PlayerBackend>,
        settings: Arc<SettingsStore>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                registry,
                sink,
                backend,
                settings,
                events,
                session: Mutex::new(None),
                status: RwLock::new(PlaybackStatus::idle()),
            }),
        }
    }

    pub async fn status(&self) -> PlaybackStatus {
        self.inner.status.read().await.clone()
    }

    /// Handle one token presentation
    ///
    /// Unknown tokens and the token of the track already playing change
    /// nothing. Anything else behaves like [`Self::play`].
    pub async fn trigger(&self, uid: &TagUid) -> Result<TriggerOutcome> {
        let Some(media_path) = self.inner.registry.lookup(uid).await else {
            debug!(uid = %uid, "Unknown token ignored");
            return Ok(TriggerOutcome::Unknown);
        };

        let mut slot = self.inner.session.lock().await;
        if slot.as_ref().is_some_and(|s| s.media_path == media_path) {
            debug!(uid = %uid, "Token re-presented for current track");
            return Ok(TriggerOutcome::AlreadyPlaying);
        }

        self.start_locked(&mut slot, media_path, PlaybackSource::Token, Some(uid.clone()))
            .await?;
        Ok(TriggerOutcome::Started)
    }

    /// Explicit play request from the control surface
    pub async fn play(&self, media_path: PathBuf) -> Result<()> {
        let mut slot = self.inner.session.lock().await;
        self.start_locked(&mut slot, media_path, PlaybackSource::Manual, None)
            .await
    }

    /// Start `media_path` only if no session exists and a sink is connected
    ///
    /// Both conditions are checked under the session lock, so a token or
    /// manual request that got there first is never replaced. Returns false
    /// when nothing was started.
    pub(crate) async fn play_if_idle(
        &self,
        media_path: PathBuf,
        source: PlaybackSource,
    ) -> Result<bool> {
        let mut slot = self.inner.session.lock().await;
        if slot.is_some() {
            debug!(media = %media_path.display(), "Session already active; idle start skipped");
            return Ok(false);
        }
        if self.inner.sink.connected().await.is_none() {
            debug!(media = %media_path.display(), "No sink connected; idle start skipped");
            return Ok(false);
        }

        self.start_locked(&mut slot, media_path, source, None).await?;
        Ok(true)
    }

    /// Stop the current session; returns false if there was none
    pub async fn stop(&self) -> bool {
        let mut slot = self.inner.session.lock().await;
        match slot.take() {
            Some(active) => {
                self.teardown(active).await;
                true
            }
            None => false,
        }
    }

    /// Stop only if the current session was started by `uid`
    pub async fn stop_if_started_by(&self, uid: &TagUid) -> bool {
        let mut slot = self.inner.session.lock().await;
        if slot.as_ref().and_then(|s| s.token.as_ref()) != Some(uid) {
            return false;
        }
        match slot.take() {
            Some(active) => {
                self.teardown(active).await;
                true
            }
            None => false,
        }
    }

    /// Terminate any player process; used on service shutdown
    pub async fn shutdown(&self) {
        if self.stop().await {
            info!("Playback stopped for shutdown");
        }
    }

    // ----------------------------------------
    // Transitions (session lock held)
    // ----------------------------------------

    async fn start_locked(
        &self,
        slot: &mut Option<ActiveSession>,
        media_path: PathBuf,
        source: PlaybackSource,
        token: Option<TagUid>,
    ) -> Result<()> {
        if let Some(active) = slot.take() {
            self.teardown(active).await;
        }

        let Some(sink) = self.inner.sink.connected().await else {
            warn!(media = %media_path.display(), "Play requested with no sink connected");
            self.fail(
                PlaybackErrorKind::NoSinkAvailable,
                "no sink available".to_string(),
                &media_path,
            )
            .await;
            return Err(Error::NoSinkAvailable);
        };

        let session_id = Uuid::new_v4();
        self.transition(PlaybackState::Starting, |status| {
            status.media_path = Some(media_path.clone());
            status.session_id = Some(session_id);
            status.source = Some(source);
            status.token = token.clone();
        })
        .await;

        let process = match self.inner.backend.launch(&media_path, sink) {
            Ok(process) => process,
            Err(e) => {
                error!(media = %media_path.display(), error = %e, "Player launch failed");
                self.fail(PlaybackErrorKind::LaunchFailed, e.to_string(), &media_path)
                    .await;
                return Err(e);
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        let (reaped_tx, reaped_rx) = oneshot::channel();
        tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            session_id,
            process,
            kill_rx,
            reaped_tx,
        ));

        *slot = Some(ActiveSession {
            id: session_id,
            media_path: media_path.clone(),
            source,
            token,
            kill_tx,
            reaped_rx,
        });

        self.transition(PlaybackState::Playing, |status| {
            status.started_at = Some(Utc::now());
        })
        .await;
        info!(
            media = %media_path.display(),
            sink = %sink,
            source = ?source,
            session = %session_id,
            "Playback started"
        );
        Ok(())
    }

    /// Playing/Starting → Stopping → Idle, waiting until the process is reaped
    async fn teardown(&self, active: ActiveSession) {
        self.transition(PlaybackState::Stopping, |_| {}).await;

        let ActiveSession {
            id,
            media_path,
            kill_tx,
            reaped_rx,
            ..
        } = active;
        let _ = kill_tx.send(());
        if reaped_rx.await.is_err() {
            debug!(session = %id, "Supervisor already gone");
        }

        self.transition(PlaybackState::Idle, |_| {}).await;
        info!(media = %media_path.display(), session = %id, "Playback stopped");
    }

    /// Called by the supervisor with the session lock held after a natural exit
    ///
    /// Returns the replacement process when the track loops.
    async fn after_exit(
        &self,
        slot: &mut Option<ActiveSession>,
        outcome: Result<ExitOutcome>,
    ) -> Option<Box<dyn PlayerProcess>> {
        let active = slot.take()?;

        match outcome {
            Ok(exit) if exit.success => {
                let looping = active.source == PlaybackSource::Token
                    && self.inner.settings.get().await.loop_token_track;
                if !looping {
                    self.transition(PlaybackState::Idle, |_| {}).await;
                    info!(media = %active.media_path.display(), "Track finished");
                    return None;
                }

                let Some(sink) = self.inner.sink.connected().await else {
                    self.fail(
                        PlaybackErrorKind::NoSinkAvailable,
                        "sink lost before loop restart".to_string(),
                        &active.media_path,
                    )
                    .await;
                    return None;
                };
                match self.inner.backend.launch(&active.media_path, sink) {
                    Ok(process) => {
                        info!(media = %active.media_path.display(), "Looping track");
                        *slot = Some(active);
                        Some(process)
                    }
                    Err(e) => {
                        error!(media = %active.media_path.display(), error = %e, "Loop restart failed");
                        self.fail(PlaybackErrorKind::LaunchFailed, e.to_string(), &active.media_path)
                            .await;
                        None
                    }
                }
            }
            Ok(exit) => {
                let detail = match exit.code {
                    Some(code) => format!("player exited with status {}", code),
                    None => "player terminated by signal".to_string(),
                };
                error!(media = %active.media_path.display(), "{}", detail);
                self.fail(PlaybackErrorKind::PlayerExited, detail, &active.media_path)
                    .await;
                None
            }
            Err(e) => {
                error!(media = %active.media_path.display(), error = %e, "Lost track of player process");
                self.fail(PlaybackErrorKind::PlayerExited, e.to_string(), &active.media_path)
                    .await;
                None
            }
        }
    }

    /// Record a failure and settle in Idle
    async fn fail(&self, kind: PlaybackErrorKind, detail: String, media_path: &Path) {
        let now = Utc::now();
        let failure = PlaybackError {
            kind,
            detail: detail.clone(),
            media_path: media_path.to_path_buf(),
            at: now,
        };
        self.transition(PlaybackState::Idle, |status| {
            status.last_error = Some(failure);
        })
        .await;

        self.inner.events.emit_lossy(JukeboxEvent::PlaybackFailed {
            media_path: media_path.to_path_buf(),
            reason: detail,
            timestamp: now,
        });
    }

    /// Publish a new state; entering Idle clears the session fields
    async fn transition(&self, new_state: PlaybackState, update: impl FnOnce(&mut PlaybackStatus)) {
        let (old_state, media_path) = {
            let mut status = self.inner.status.write().await;
            let old_state = status.state;
            let media_path = status.media_path.clone();

            update(&mut status);
            status.state = new_state;
            if new_state == PlaybackState::Idle {
                status.media_path = None;
                status.session_id = None;
                status.started_at = None;
                status.source = None;
                status.token = None;
                status.idle_since = Some(Utc::now());
            }
            (old_state, status.media_path.clone().or(media_path))
        };

        if old_state != new_state {
            debug!(from = %old_state, to = %new_state, "Playback state changed");
            self.inner.events.emit_lossy(JukeboxEvent::PlaybackStateChanged {
                old_state,
                new_state,
                media_path,
                timestamp: Utc::now(),
            });
        }
    }
}

// ========================================
// Supervisor
// ========================================

/// Own one session's player process until it is killed or ends for good
///
/// `reaped_tx` fires only after the process is gone, and always before the
/// supervisor would wait on the session lock, so a teardown holding the
/// lock never deadlocks against it.
async fn supervise(
    controller: Weak<ControllerInner>,
    session_id: Uuid,
    mut process: Box<dyn PlayerProcess>,
    mut kill_rx: oneshot::Receiver<()>,
    reaped_tx: oneshot::Sender<()>,
) {
    loop {
        let outcome = tokio::select! {
            outcome = process.wait() => outcome,
            _ = &mut kill_rx => {
                if let Err(e) = process.kill().await {
                    warn!(session = %session_id, error = %e, "Failed to kill player");
                }
                drop(process);
                let _ = reaped_tx.send(());
                return;
            }
        };

        // exited on its own; gone before any loop restart launches another
        drop(process);

        let Some(inner) = controller.upgrade() else {
            let _ = reaped_tx.send(());
            return;
        };
        let controller_handle = PlaybackController { inner };

        let mut slot = tokio::select! {
            guard = controller_handle.inner.session.lock() => guard,
            _ = &mut kill_rx => {
                let _ = reaped_tx.send(());
                return;
            }
        };

        if slot.as_ref().map(|s| s.id) != Some(session_id) {
            drop(slot);
            let _ = reaped_tx.send(());
            return;
        }

        match controller_handle.after_exit(&mut slot, outcome).await {
            Some(next) => process = next,
            None => {
                drop(slot);
                let _ = reaped_tx.send(());
                return;
            }
        }
    }
}
