//! Event types for the jukebox event system
//!
//! Provides shared event definitions and the EventBus used by every
//! component to publish state changes. The control surface forwards the
//! bus to browsers as Server-Sent Events.
//!
//! Communication inside the service is hybrid:
//! - **EventBus** (tokio::broadcast): one-to-many notifications
//! - **Command channels** (tokio::mpsc): token events and adapter operations
//! - **Shared state** (Arc<RwLock<T>>): read-heavy status snapshots

use crate::ids::{MacAddress, TagUid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Playback session state
///
/// `Idle → Starting → Playing → Stopping → Idle`; at most one session is
/// ever outside `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    Stopping,
}

impl PlaybackState {
    /// True for every state that owns a player process
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackState::Idle)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "idle"),
            PlaybackState::Starting => write!(f, "starting"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Stopping => write!(f, "stopping"),
        }
    }
}

/// What asked for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackSource {
    /// A token presented to the reader
    Token,
    /// Explicit play from the control surface
    Manual,
    /// Idle mode picked a track
    Idle,
}

/// Jukebox event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JukeboxEvent {
    /// A new token presentation passed debouncing
    TokenPresented {
        uid: TagUid,
        timestamp: DateTime<Utc>,
    },

    /// The token that was present left the reader field
    TokenRemoved {
        uid: TagUid,
        timestamp: DateTime<Utc>,
    },

    /// Reader crossed the degraded threshold or recovered
    ReaderHealthChanged {
        degraded: bool,
        consecutive_errors: u32,
        last_error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Playback session changed state
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        media_path: Option<PathBuf>,
        timestamp: DateTime<Utc>,
    },

    /// Playback could not start or ended abnormally
    PlaybackFailed {
        media_path: PathBuf,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Connected sink changed
    LinkStateChanged {
        connected: Option<MacAddress>,
        timestamp: DateTime<Utc>,
    },

    /// Startup reconnection exhausted its budget
    LinkDegraded {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Device scan finished
    ScanCompleted {
        device_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Tag bound to a track
    TagRegistered {
        uid: TagUid,
        media_path: PathBuf,
        timestamp: DateTime<Utc>,
    },

    /// Tag binding removed
    TagUnregistered {
        uid: TagUid,
        timestamp: DateTime<Utc>,
    },

    /// Player settings updated
    SettingsChanged { timestamp: DateTime<Utc> },
}

impl JukeboxEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            JukeboxEvent::TokenPresented { .. } => "TokenPresented",
            JukeboxEvent::TokenRemoved { .. } => "TokenRemoved",
            JukeboxEvent::ReaderHealthChanged { .. } => "ReaderHealthChanged",
            JukeboxEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            JukeboxEvent::PlaybackFailed { .. } => "PlaybackFailed",
            JukeboxEvent::LinkStateChanged { .. } => "LinkStateChanged",
            JukeboxEvent::LinkDegraded { .. } => "LinkDegraded",
            JukeboxEvent::ScanCompleted { .. } => "ScanCompleted",
            JukeboxEvent::TagRegistered { .. } => "TagRegistered",
            JukeboxEvent::TagUnregistered { .. } => "TagUnregistered",
            JukeboxEvent::SettingsChanged { .. } => "SettingsChanged",
        }
    }
}

/// Central event bus
///
/// Cheap to clone; every clone publishes to the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JukeboxEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: JukeboxEvent,
    ) -> Result<usize, broadcast::error::SendError<JukeboxEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JukeboxEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_state_is_active() {
        assert!(!PlaybackState::Idle.is_active());
        assert!(PlaybackState::Starting.is_active());
        assert!(PlaybackState::Playing.is_active());
        assert!(PlaybackState::Stopping.is_active());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = JukeboxEvent::TokenPresented {
            uid: "04A1B2".parse().unwrap(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TokenPresented");
        assert_eq!(json["uid"], "04A1B2");
        assert_eq!(event.event_type(), "TokenPresented");
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(JukeboxEvent::SettingsChanged {
            timestamp: Utc::now(),
        })
        .unwrap();

        assert!(matches!(rx1.recv().await.unwrap(), JukeboxEvent::SettingsChanged { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), JukeboxEvent::SettingsChanged { .. }));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        let event = JukeboxEvent::SettingsChanged {
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        // Lossy variant never fails
        bus.emit_lossy(event);
        assert_eq!(bus.capacity(), 4);
    }
}
