//! # NFC Jukebox Service (jukebox-ap)
//!
//! **Purpose:** Start a song when an NFC token is placed on the reader and
//! play it through a wireless (Bluetooth) audio sink.
//!
//! **Architecture:**
//! - [`reader`]: blocking PN532 polling thread producing debounced token events
//! - [`registry`]: persisted uid → media path map
//! - [`sink`]: single-worker queue owning the Bluetooth adapter
//! - [`playback`]: session state machine supervising one player process
//! - [`api`]: HTTP/JSON control surface with an SSE event stream

pub mod api;
pub mod config;
pub mod error;
pub mod playback;
pub mod reader;
pub mod registry;
pub mod sink;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;
