//! In-memory player backend for tests and bench runs

use super::player::{ExitOutcome, PlayerBackend, PlayerProcess};
use crate::error::{Error, Result};
use async_trait::async_trait;
use jukebox_common::MacAddress;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

#[derive(Default)]
struct MockPlayerState {
    next_id: u32,
    launches: Vec<(PathBuf, MacAddress)>,
    /// Exit triggers of processes still running, by id
    running: HashMap<u32, oneshot::Sender<ExitOutcome>>,
    live: usize,
    max_live: usize,
    killed: usize,
    fail_next: Option<String>,
}

/// In-memory player for tests
///
/// Processes run until the test finishes them with
/// [`MockPlayerBackend::finish_latest`] or the controller kills them.
/// A process counts as live from launch until it is dropped.
#[derive(Clone, Default)]
pub struct MockPlayerBackend {
    state: Arc<Mutex<MockPlayerState>>,
}

impl MockPlayerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockPlayerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn launches(&self) -> Vec<PathBuf> {
        self.lock().launches.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn last_sink(&self) -> Option<MacAddress> {
        self.lock().launches.last().map(|(_, sink)| *sink)
    }

    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    pub fn killed(&self) -> usize {
        self.lock().killed
    }

    /// The next launch fails with `message`
    pub fn fail_next_launch(&self, message: &str) {
        self.lock().fail_next = Some(message.to_string());
    }

    /// End the most recently launched running process; false if none
    pub fn finish_latest(&self, outcome: ExitOutcome) -> bool {
        let mut state = self.lock();
        let Some(id) = state.running.keys().max().copied() else {
            return false;
        };
        match state.running.remove(&id) {
            Some(trigger) => trigger.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl PlayerBackend for MockPlayerBackend {
    fn launch(&self, media_path: &Path, sink: MacAddress) -> Result<Box<dyn PlayerProcess>> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(Error::Playback(message));
        }

        state.next_id += 1;
        let id = state.next_id;
        let (exit_tx, exit_rx) = oneshot::channel();
        state.running.insert(id, exit_tx);
        state.launches.push((media_path.to_path_buf(), sink));
        state.live += 1;
        state.max_live = state.max_live.max(state.live);

        Ok(Box::new(MockProcess {
            id,
            exit_rx,
            backend: self.clone(),
        }))
    }
}

struct MockProcess {
    id: u32,
    exit_rx: oneshot::Receiver<ExitOutcome>,
    backend: MockPlayerBackend,
}

#[async_trait]
impl PlayerProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        Some(self.id)
    }

    async fn wait(&mut self) -> Result<ExitOutcome> {
        match (&mut self.exit_rx).await {
            Ok(outcome) => Ok(outcome),
            Err(_) => std::future::pending().await,
        }
    }

    async fn kill(&mut self) -> Result<()> {
        let mut state = self.backend.lock();
        if state.running.remove(&self.id).is_some() {
            state.killed += 1;
        }
        Ok(())
    }
}

impl Drop for MockProcess {
    fn drop(&mut self) {
        let mut state = self.backend.lock();
        state.running.remove(&self.id);
        state.live = state.live.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> MacAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[tokio::test]
    async fn test_mock_tracks_live_processes() {
        let backend = MockPlayerBackend::new();
        let mut first = backend.launch(Path::new("/music/a.mp3"), sink()).unwrap();
        let second = backend.launch(Path::new("/music/b.mp3"), sink()).unwrap();
        assert_eq!(backend.live(), 2);

        assert!(backend.finish_latest(ExitOutcome::failure(1)));
        drop(second);
        assert_eq!(backend.live(), 1);

        first.kill().await.unwrap();
        drop(first);
        assert_eq!(backend.live(), 0);
        assert_eq!(backend.killed(), 1);
        assert_eq!(backend.max_live(), 2);
    }
}
