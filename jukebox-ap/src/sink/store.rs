//! Persisted link preferences (`link_state.json`)
//!
//! ```json
//! { "autoConnect": ["00:1A:7D:DA:71:13"], "preferredDevice": "00:1A:7D:DA:71:13" }
//! ```

use crate::error::Result;
use jukebox_common::persist::{load_json_or_default, write_json_atomic};
use jukebox_common::MacAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedLinkState {
    #[serde(default)]
    pub auto_connect: BTreeSet<MacAddress>,
    #[serde(default)]
    pub preferred_device: Option<MacAddress>,
}

pub struct LinkStore {
    path: PathBuf,
}

impl LinkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing or corrupt file yields empty preferences
    pub fn load(&self) -> PersistedLinkState {
        load_json_or_default(&self.path, "link state").0
    }

    pub fn save(&self, state: &PersistedLinkState) -> Result<()> {
        write_json_atomic(&self.path, state)?;
        Ok(())
    }
}
