//! NFC token reader
//!
//! **Purpose:** Own the reader hardware and turn raw reads into a
//! de-duplicated stream of token events.
//!
//! - [`pn532`]: PN532 driver over a UART byte stream (framing, checksums)
//! - [`poller`]: debouncing and the blocking polling loop
//!
//! The poller never calls into playback. It only pushes [`ReaderEvent`]s
//! onto a bounded channel whose single consumer is the token dispatcher.

pub mod pn532;
pub mod poller;

use crate::error::ReaderError;
use chrono::{DateTime, Utc};
use jukebox_common::TagUid;

pub use pn532::Pn532;
pub use poller::{Debouncer, TokenPoller};

/// One presentation of a token that passed debouncing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    pub uid: TagUid,
    pub observed_at: DateTime<Utc>,
}

/// Events produced by the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// A token was newly presented
    Presented(TokenEvent),
    /// The token that was present is gone
    Removed { uid: TagUid, observed_at: DateTime<Utc> },
}

/// Hardware abstraction for one passive-target read
pub trait TagReader: Send {
    /// Perform one read bounded by the reader's per-attempt timeout
    ///
    /// `Ok(None)` means no token is in the field.
    fn read_uid(&mut self) -> Result<Option<TagUid>, ReaderError>;

    /// Re-initialize after a failed read
    fn recover(&mut self) -> Result<(), ReaderError> {
        Ok(())
    }
}

impl<R: TagReader + ?Sized> TagReader for Box<R> {
    fn read_uid(&mut self) -> Result<Option<TagUid>, ReaderError> {
        (**self).read_uid()
    }

    fn recover(&mut self) -> Result<(), ReaderError> {
        (**self).recover()
    }
}
