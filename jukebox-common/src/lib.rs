//! # Jukebox Common Library
//!
//! Shared code for the jukebox service crates including:
//! - Identifier types (tag UIDs, Bluetooth MAC addresses)
//! - Event types (JukeboxEvent enum) and the EventBus
//! - Bootstrap configuration loading and root folder resolution
//! - Atomic persistence helpers for JSON/TOML documents

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod persist;

pub use error::{Error, Result};
pub use ids::{MacAddress, TagUid};
