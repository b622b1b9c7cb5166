//! Playback
//!
//! - [`controller`]: the session state machine
//! - [`player`]: external player processes
//! - `mock`: in-memory player (`test-util` feature)
//! - [`dispatch`]: reader events into the controller
//! - [`idle`]: automatic playback after an idle period
//! - [`settings`], [`library`]: runtime settings and track listing

pub mod controller;
pub mod dispatch;
pub mod idle;
pub mod library;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod player;
pub mod settings;

pub use controller::{
    PlaybackController, PlaybackError, PlaybackErrorKind, PlaybackStatus, TriggerOutcome,
};
pub use dispatch::run_token_dispatch;
pub use idle::IdleManager;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockPlayerBackend;
pub use player::{CommandPlayer, ExitOutcome, PlayerBackend, PlayerProcess};
pub use settings::{IdleMode, PlayerSettings, SettingsStore};
