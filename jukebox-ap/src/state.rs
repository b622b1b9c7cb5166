//! Shared service state
//!
//! Thread-safe state shared between the reader thread, the async
//! components and the HTTP handlers.

use chrono::Utc;
use jukebox_common::events::{EventBus, JukeboxEvent};
use jukebox_common::TagUid;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Point-in-time view of reader health
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderHealthSnapshot {
    /// Reader hardware is attached and polled
    pub attached: bool,
    pub degraded: bool,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

/// Reader health, written by the blocking poller thread
///
/// Atomics plus a std mutex so the poller never touches the async runtime.
#[derive(Debug, Default)]
pub struct ReaderHealth {
    attached: AtomicBool,
    degraded: AtomicBool,
    consecutive_errors: AtomicU32,
    last_error: Mutex<Option<String>>,
}

impl ReaderHealth {
    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    /// Record a failed read; returns the new consecutive error count
    pub fn record_error(&self, message: String) -> u32 {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record a successful read; returns the error count it replaced
    pub fn record_success(&self) -> u32 {
        self.consecutive_errors.swap(0, Ordering::SeqCst)
    }

    /// Set the degraded flag; returns the previous value
    pub fn set_degraded(&self, degraded: bool) -> bool {
        self.degraded.swap(degraded, Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ReaderHealthSnapshot {
        ReaderHealthSnapshot {
            attached: self.attached.load(Ordering::SeqCst),
            degraded: self.degraded.load(Ordering::SeqCst),
            consecutive_errors: self.consecutive_errors.load(Ordering::SeqCst),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE and in-process listeners
    pub events: EventBus,

    /// NFC reader health
    pub reader: ReaderHealth,
}

impl SharedState {
    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            reader: ReaderHealth::default(),
        }
    }

    /// Broadcast an event; no receivers is OK
    pub fn broadcast_event(&self, event: JukeboxEvent) {
        self.events.emit_lossy(event);
    }

    /// Uid of the next token presented within `timeout`
    ///
    /// Used to learn the uid of a fresh token before registering it. Only
    /// presentations after the call count.
    pub async fn await_next_token(&self, timeout: Duration) -> Option<TagUid> {
        let mut rx = self.events.subscribe();
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(JukeboxEvent::TokenPresented { uid, .. }) => return Some(uid),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    pub(crate) fn broadcast_reader_health(&self) {
        let health = self.reader.snapshot();
        self.broadcast_event(JukeboxEvent::ReaderHealthChanged {
            degraded: health.degraded,
            consecutive_errors: health.consecutive_errors,
            last_error: health.last_error,
            timestamp: Utc::now(),
        });
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_counting() {
        let health = ReaderHealth::default();
        assert_eq!(health.record_error("timeout".to_string()), 1);
        assert_eq!(health.record_error("checksum".to_string()), 2);

        let snap = health.snapshot();
        assert_eq!(snap.consecutive_errors, 2);
        assert_eq!(snap.last_error.as_deref(), Some("checksum"));

        assert_eq!(health.record_success(), 2);
        assert_eq!(health.snapshot().consecutive_errors, 0);
    }

    #[tokio::test]
    async fn test_await_next_token() {
        let state = std::sync::Arc::new(SharedState::default());
        let uid: TagUid = "04A1B2".parse().unwrap();

        let waiter = {
            let state = std::sync::Arc::clone(&state);
            tokio::spawn(async move { state.await_next_token(Duration::from_secs(5)).await })
        };
        while state.events.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }
        state.broadcast_event(JukeboxEvent::SettingsChanged {
            timestamp: Utc::now(),
        });
        state.broadcast_event(JukeboxEvent::TokenPresented {
            uid: uid.clone(),
            timestamp: Utc::now(),
        });

        assert_eq!(waiter.await.unwrap(), Some(uid));
    }

    #[tokio::test]
    async fn test_await_next_token_times_out() {
        let state = SharedState::default();
        assert_eq!(state.await_next_token(Duration::from_millis(50)).await, None);
    }

    #[test]
    fn test_degraded_flag_swap() {
        let health = ReaderHealth::default();
        assert!(!health.set_degraded(true));
        assert!(health.is_degraded());
        assert!(health.set_degraded(false));
        assert!(!health.is_degraded());
    }
}
