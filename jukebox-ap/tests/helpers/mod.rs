//! Shared fixtures for jukebox-ap integration tests
//!
//! Builds the full service stack on in-memory fakes: `MockAdapter` for the
//! Bluetooth adapter, `MockPlayerBackend` for the player and a scripted
//! tag reader. Nothing here needs hardware or a player binary.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use jukebox_ap::api::{build_router, AppContext};
use jukebox_ap::config::SinkConfig;
use jukebox_ap::error::ReaderError;
use jukebox_ap::playback::{MockPlayerBackend, PlaybackController, SettingsStore};
use jukebox_ap::reader::TagReader;
use jukebox_ap::registry::TagRegistry;
use jukebox_ap::sink::{LinkStore, MockAdapter, SinkManager};
use jukebox_ap::SharedState;
use jukebox_common::events::{EventBus, PlaybackState};
use jukebox_common::{MacAddress, TagUid};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SPEAKER: &str = "AA:BB:CC:DD:EE:FF";
pub const HEADPHONES: &str = "11:22:33:44:55:66";

pub fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

pub fn uid(s: &str) -> TagUid {
    s.parse().unwrap()
}

/// Full stack rooted in a temp directory
pub struct Harness {
    pub dir: TempDir,
    pub events: EventBus,
    pub state: Arc<SharedState>,
    pub registry: Arc<TagRegistry>,
    pub settings: Arc<SettingsStore>,
    pub adapter: MockAdapter,
    pub sink: SinkManager,
    pub backend: MockPlayerBackend,
    pub controller: PlaybackController,
}

impl Harness {
    /// Two paired devices in range, none connected
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("music")).unwrap();

        let adapter = MockAdapter::new();
        adapter.add_device(mac(SPEAKER), "Living Room Speaker");
        adapter.add_device(mac(HEADPHONES), "Headphones");
        adapter.set_paired(mac(SPEAKER));
        adapter.set_paired(mac(HEADPHONES));

        Self::with_adapter(dir, adapter)
    }

    /// Same as [`Harness::new`] with `SPEAKER` connected
    pub async fn connected() -> Self {
        let harness = Self::new().await;
        harness.sink.connect(mac(SPEAKER)).await.unwrap();
        harness
    }

    /// Build on an existing root folder and adapter (service restart)
    pub fn with_adapter(dir: TempDir, adapter: MockAdapter) -> Self {
        let events = EventBus::default();
        let state = Arc::new(SharedState::new(events.clone()));
        let registry = Arc::new(TagRegistry::load(dir.path().join("tags.json"), events.clone()));
        let settings = Arc::new(SettingsStore::load(
            dir.path().join("settings.json"),
            events.clone(),
        ));
        let sink = SinkManager::start(
            Box::new(adapter.clone()),
            LinkStore::new(dir.path().join("link_state.json")),
            fast_sink_config(),
            events.clone(),
        );
        let backend = MockPlayerBackend::new();
        let controller = PlaybackController::new(
            Arc::clone(&registry),
            sink.clone(),
            Arc::new(backend.clone()),
            Arc::clone(&settings),
            events.clone(),
        );

        Self {
            dir,
            events,
            state,
            registry,
            settings,
            adapter,
            sink,
            backend,
            controller,
        }
    }

    /// Drop every component and start again on the same root and adapter
    pub async fn restart(self) -> Self {
        self.controller.shutdown().await;
        let Harness { dir, adapter, .. } = self;
        Self::with_adapter(dir, adapter)
    }

    pub fn music_dir(&self) -> PathBuf {
        self.dir.path().join("music")
    }

    pub fn context(&self) -> AppContext {
        AppContext {
            state: Arc::clone(&self.state),
            registry: Arc::clone(&self.registry),
            sink: self.sink.clone(),
            controller: self.controller.clone(),
            settings: Arc::clone(&self.settings),
            music_dir: self.music_dir(),
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.context())
    }
}

pub fn fast_sink_config() -> SinkConfig {
    SinkConfig {
        scan_duration_secs: 1,
        reconnect_attempts: 3,
        reconnect_initial_backoff_ms: 5,
        reconnect_max_backoff_ms: 20,
        ..SinkConfig::default()
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll the controller until it reports `state` or two seconds pass
pub async fn wait_for_state(controller: &PlaybackController, state: PlaybackState) -> bool {
    for _ in 0..200 {
        if controller.status().await.state == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ============================================================================
// Scripted reader
// ============================================================================

/// Replays a fixed sequence of reads, then reports an empty field forever
pub struct ScriptedReader {
    script: VecDeque<Result<Option<TagUid>, ReaderError>>,
}

impl ScriptedReader {
    pub fn new(script: Vec<Option<&str>>) -> Self {
        Self {
            script: script.into_iter().map(|s| Ok(s.map(uid))).collect(),
        }
    }

    pub fn then_fail(mut self, times: usize) -> Self {
        for _ in 0..times {
            self.script.push_back(Err(ReaderError::Timeout));
        }
        self
    }

    pub fn then_read(mut self, reads: Vec<Option<&str>>) -> Self {
        self.script
            .extend(reads.into_iter().map(|s| Ok(s.map(uid))));
        self
    }
}

impl TagReader for ScriptedReader {
    fn read_uid(&mut self) -> Result<Option<TagUid>, ReaderError> {
        self.script.pop_front().unwrap_or(Ok(None))
    }
}

// ============================================================================
// HTTP helpers
// ============================================================================

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}
