//! Concurrency invariants
//!
//! Tests cover:
//! - At most one player process alive under interleaved play/stop/trigger
//! - Status and process agree once the dust settles
//! - Concurrent connects leave exactly one connected device
//! - A link already up when the service starts is released on switch
//! - Adapter operations never overlap

mod helpers;

use helpers::*;
use jukebox_ap::playback::ExitOutcome;
use jukebox_ap::sink::{MockAdapter, ReconcileOutcome};
use jukebox_common::events::PlaybackState;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_active_session_under_contention() {
    let h = Harness::connected().await;
    for (tag, track) in [("0A", "a.mp3"), ("0B", "b.mp3"), ("0C", "c.mp3")] {
        h.registry
            .register(uid(tag), PathBuf::from("/music").join(track))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..30u32 {
        let controller = h.controller.clone();
        tasks.push(tokio::spawn(async move {
            match i % 5 {
                0 => {
                    let _ = controller.trigger(&uid("0A")).await;
                }
                1 => {
                    let _ = controller.trigger(&uid("0B")).await;
                }
                2 => {
                    controller.stop().await;
                }
                3 => {
                    let _ = controller.play(PathBuf::from("/music/manual.mp3")).await;
                }
                _ => {
                    let _ = controller.trigger(&uid("0C")).await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(h.backend.max_live() <= 1, "two player processes overlapped");

    let status = h.controller.status().await;
    match status.state {
        PlaybackState::Playing => assert_eq!(h.backend.live(), 1),
        PlaybackState::Idle => assert_eq!(h.backend.live(), 0),
        other => panic!("settled in transient state {}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exit_racing_stop() {
    let h = Harness::connected().await;

    for _ in 0..20 {
        h.controller
            .play(PathBuf::from("/music/a.mp3"))
            .await
            .unwrap();

        let backend = h.backend.clone();
        let finisher = tokio::spawn(async move { backend.finish_latest(ExitOutcome::failure(1)) });
        h.controller.stop().await;
        finisher.await.unwrap();

        assert!(wait_for_state(&h.controller, PlaybackState::Idle).await);
        assert!(wait_until(|| h.backend.live() == 0).await);
    }
    assert_eq!(h.backend.max_live(), 1);
}

#[tokio::test]
async fn test_stop_after_natural_exit_is_noop() {
    let h = Harness::connected().await;
    h.controller
        .play(PathBuf::from("/music/a.mp3"))
        .await
        .unwrap();

    h.backend.finish_latest(ExitOutcome::success());
    assert!(wait_for_state(&h.controller, PlaybackState::Idle).await);
    assert!(!h.controller.stop().await);
}

#[tokio::test]
async fn test_concurrent_connects_leave_one_link() {
    let h = Harness::new().await;
    h.adapter.set_latency(Duration::from_millis(5));

    let a = h.sink.clone();
    let b = h.sink.clone();
    let (first, second) = tokio::join!(a.connect(mac(SPEAKER)), b.connect(mac(HEADPHONES)));
    first.unwrap();
    second.unwrap();

    assert_eq!(h.adapter.connected().len(), 1);
    let connected = h.sink.connected().await.unwrap();
    assert_eq!(h.adapter.connected(), vec![connected]);
    assert_eq!(h.adapter.max_in_flight(), 1);
}

#[tokio::test]
async fn test_switching_sink_disconnects_previous() {
    let h = Harness::connected().await;
    h.sink.connect(mac(HEADPHONES)).await.unwrap();

    assert_eq!(h.adapter.connected(), vec![mac(HEADPHONES)]);
    assert_eq!(h.sink.connected().await, Some(mac(HEADPHONES)));
    assert!(h
        .adapter
        .calls()
        .contains(&format!("disconnect {}", mac(SPEAKER))));
}

#[tokio::test]
async fn test_link_present_at_startup_counts_toward_single_link() {
    let adapter = MockAdapter::new();
    for device in [SPEAKER, HEADPHONES] {
        adapter.add_device(mac(device), device);
        adapter.set_paired(mac(device));
    }
    adapter.set_connected(mac(SPEAKER));
    let h = Harness::with_adapter(TempDir::new().unwrap(), adapter);

    assert_eq!(
        h.sink.reconcile().await,
        ReconcileOutcome::AlreadyConnected(mac(SPEAKER))
    );
    h.sink.connect(mac(HEADPHONES)).await.unwrap();

    assert_eq!(h.adapter.connected(), vec![mac(HEADPHONES)]);
    assert_eq!(h.sink.connected().await, Some(mac(HEADPHONES)));
}
