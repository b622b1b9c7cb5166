//! External player processes
//!
//! A [`PlayerBackend`] launches one process per track; the returned
//! [`PlayerProcess`] is owned by the controller's session supervisor,
//! which guarantees it is killed and reaped on every exit path.

use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use jukebox_common::MacAddress;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// How a player process ended on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub success: bool,
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            code: Some(0),
        }
    }

    pub fn failure(code: i32) -> Self {
        Self {
            success: false,
            code: Some(code),
        }
    }
}

#[async_trait]
pub trait PlayerProcess: Send {
    /// OS process id, when there is one
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit by itself
    async fn wait(&mut self) -> Result<ExitOutcome>;

    /// Terminate and reap; succeeds if the process already exited
    async fn kill(&mut self) -> Result<()>;
}

pub trait PlayerBackend: Send + Sync {
    /// Start playing `media_path` on `sink`
    fn launch(&self, media_path: &Path, sink: MacAddress) -> Result<Box<dyn PlayerProcess>>;
}

// ========================================
// CommandPlayer
// ========================================

/// Runs the configured player command (ffplay by default)
pub struct CommandPlayer {
    config: PlayerConfig,
}

impl CommandPlayer {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    /// Arguments with `{path}` and `{sink}` substituted
    pub fn build_args(&self, media_path: &Path, sink: MacAddress) -> Vec<String> {
        let path = media_path.to_string_lossy();
        let sink = sink.to_string();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{path}", &path).replace("{sink}", &sink))
            .collect()
    }
}

impl PlayerBackend for CommandPlayer {
    fn launch(&self, media_path: &Path, sink: MacAddress) -> Result<Box<dyn PlayerProcess>> {
        if !media_path.is_file() {
            return Err(Error::MediaNotFound(media_path.to_path_buf()));
        }

        let args = self.build_args(media_path, sink);
        debug!(command = %self.config.command, ?args, "Launching player");

        let child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Playback(format!("cannot launch {}: {}", self.config.command, e))
            })?;

        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl PlayerProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> Result<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(ExitOutcome {
            success: status.success(),
            code: status.code(),
        })
    }

    async fn kill(&mut self) -> Result<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
