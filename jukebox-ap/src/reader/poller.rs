//! Token polling loop
//!
//! Runs on a dedicated blocking thread: each iteration performs one
//! bounded hardware read, feeds the result through the [`Debouncer`], and
//! pushes the resulting [`ReaderEvent`]s onto a bounded channel.
//!
//! Read failures never stop the loop. They are counted, logged, followed
//! by a fixed backoff and a reader re-initialization. Once the consecutive
//! failure count reaches the configured threshold the reader is reported
//! degraded; the next successful read clears it.

use super::{ReaderEvent, TagReader, TokenEvent};
use crate::config::ReaderConfig;
use crate::state::SharedState;
use chrono::Utc;
use jukebox_common::events::JukeboxEvent;
use jukebox_common::TagUid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ========================================
// Debouncer
// ========================================

/// Outcome of feeding one read into the debouncer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Debounced {
    /// Newly presented token
    Presented(TagUid),
    /// The previously present token is gone
    Removed(TagUid),
    /// Nothing to report
    Quiet,
}

/// Suppresses repeated reads of a token that stays on the reader
///
/// A token is reported once per presentation. It may be reported again
/// only after `grace` consecutive reads without any token. Read errors are
/// not absences and leave the state untouched.
#[derive(Debug)]
pub struct Debouncer {
    last_uid: Option<TagUid>,
    absent_reads: u32,
    grace: u32,
}

impl Debouncer {
    pub fn new(grace: u32) -> Self {
        Self {
            last_uid: None,
            absent_reads: 0,
            grace: grace.max(1),
        }
    }

    pub fn last_uid(&self) -> Option<&TagUid> {
        self.last_uid.as_ref()
    }

    pub fn on_read(&mut self, read: Option<TagUid>) -> Debounced {
        match read {
            Some(uid) => {
                self.absent_reads = 0;
                if self.last_uid.as_ref() == Some(&uid) {
                    return Debounced::Quiet;
                }
                self.last_uid = Some(uid.clone());
                Debounced::Presented(uid)
            }
            None => {
                if self.last_uid.is_none() {
                    return Debounced::Quiet;
                }
                self.absent_reads += 1;
                if self.absent_reads < self.grace {
                    return Debounced::Quiet;
                }
                self.absent_reads = 0;
                match self.last_uid.take() {
                    Some(uid) => Debounced::Removed(uid),
                    None => Debounced::Quiet,
                }
            }
        }
    }
}

// ========================================
// TokenPoller
// ========================================

/// Owns the reader and drives the polling loop
pub struct TokenPoller<R: TagReader> {
    reader: R,
    debouncer: Debouncer,
    config: ReaderConfig,
    state: Arc<SharedState>,
    tx: mpsc::Sender<ReaderEvent>,
}

impl<R: TagReader> TokenPoller<R> {
    pub fn new(
        reader: R,
        config: ReaderConfig,
        state: Arc<SharedState>,
        tx: mpsc::Sender<ReaderEvent>,
    ) -> Self {
        state.reader.set_attached(true);
        Self {
            reader,
            debouncer: Debouncer::new(config.removal_grace_reads),
            config,
            state,
            tx,
        }
    }

    /// One bounded hardware read, no debouncing
    pub fn poll_once(&mut self) -> Result<Option<TagUid>, crate::error::ReaderError> {
        self.reader.read_uid()
    }

    /// One loop iteration
    ///
    /// Returns the delay before the next iteration, or `None` once the
    /// consumer side of the channel is gone.
    pub fn step(&mut self) -> Option<Duration> {
        match self.poll_once() {
            Ok(read) => {
                self.on_success();
                let event = match self.debouncer.on_read(read) {
                    Debounced::Presented(uid) => {
                        info!("Token presented: {}", uid);
                        let observed_at = Utc::now();
                        self.state.broadcast_event(JukeboxEvent::TokenPresented {
                            uid: uid.clone(),
                            timestamp: observed_at,
                        });
                        Some(ReaderEvent::Presented(TokenEvent { uid, observed_at }))
                    }
                    Debounced::Removed(uid) => {
                        debug!("Token removed: {}", uid);
                        let observed_at = Utc::now();
                        self.state.broadcast_event(JukeboxEvent::TokenRemoved {
                            uid: uid.clone(),
                            timestamp: observed_at,
                        });
                        Some(ReaderEvent::Removed { uid, observed_at })
                    }
                    Debounced::Quiet => None,
                };

                if let Some(event) = event {
                    if self.tx.blocking_send(event).is_err() {
                        info!("Token consumer gone, stopping poller");
                        return None;
                    }
                }
                Some(self.config.poll_interval())
            }
            Err(e) => {
                self.on_error(e.to_string());
                if let Err(e) = self.reader.recover() {
                    debug!("Reader re-initialization failed: {}", e);
                }
                Some(self.config.error_backoff())
            }
        }
    }

    fn on_success(&mut self) {
        let previous_errors = self.state.reader.record_success();
        if previous_errors > 0 {
            debug!("Reader recovered after {} failed reads", previous_errors);
        }
        if self.state.reader.set_degraded(false) {
            info!("Reader no longer degraded");
            self.state.broadcast_reader_health();
        }
    }

    fn on_error(&mut self, message: String) {
        let errors = self.state.reader.record_error(message.clone());
        warn!("Reader read failed ({} consecutive): {}", errors, message);

        if errors >= self.config.degraded_after_errors && !self.state.reader.set_degraded(true) {
            error!(
                "Reader degraded after {} consecutive failures: {}",
                errors, message
            );
            self.state.broadcast_reader_health();
        }
    }

    /// Blocking loop; returns when `shutdown` is set or the consumer is gone
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!("Token poller started");
        while !shutdown.load(Ordering::SeqCst) {
            match self.step() {
                Some(delay) => std::thread::sleep(delay),
                None => break,
            }
        }
        self.state.reader.set_attached(false);
        info!("Token poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReaderError;
    use std::collections::VecDeque;

    fn uid(hex: &str) -> TagUid {
        hex.parse().unwrap()
    }

    enum Scripted {
        Token(&'static str),
        Empty,
        Fail,
    }

    struct ScriptedReader {
        script: VecDeque<Scripted>,
        recoveries: Arc<std::sync::atomic::AtomicU32>,
    }

    impl TagReader for ScriptedReader {
        fn read_uid(&mut self) -> Result<Option<TagUid>, ReaderError> {
            match self.script.pop_front() {
                Some(Scripted::Token(hex)) => Ok(Some(uid(hex))),
                Some(Scripted::Empty) | None => Ok(None),
                Some(Scripted::Fail) => Err(ReaderError::Timeout),
            }
        }

        fn recover(&mut self) -> Result<(), ReaderError> {
            self.recoveries.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn poller(
        script: Vec<Scripted>,
        config: ReaderConfig,
    ) -> (
        TokenPoller<ScriptedReader>,
        mpsc::Receiver<ReaderEvent>,
        Arc<SharedState>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let state = Arc::new(SharedState::default());
        let reader = ScriptedReader {
            script: script.into(),
            recoveries: Arc::new(Default::default()),
        };
        (
            TokenPoller::new(reader, config, state.clone(), tx),
            rx,
            state,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ReaderEvent>) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_debouncer_single_presentation() {
        let mut d = Debouncer::new(1);
        assert_eq!(d.on_read(Some(uid("0A"))), Debounced::Presented(uid("0A")));
        for _ in 0..10 {
            assert_eq!(d.on_read(Some(uid("0A"))), Debounced::Quiet);
        }
        assert_eq!(d.on_read(None), Debounced::Removed(uid("0A")));
        assert_eq!(d.on_read(None), Debounced::Quiet);
        assert_eq!(d.on_read(Some(uid("0A"))), Debounced::Presented(uid("0A")));
    }

    #[test]
    fn test_debouncer_token_swap() {
        let mut d = Debouncer::new(1);
        assert_eq!(d.on_read(Some(uid("0A"))), Debounced::Presented(uid("0A")));
        assert_eq!(d.on_read(Some(uid("0B"))), Debounced::Presented(uid("0B")));
        assert_eq!(d.last_uid(), Some(&uid("0B")));
    }

    #[test]
    fn test_debouncer_grace_period() {
        let mut d = Debouncer::new(3);
        d.on_read(Some(uid("0A")));
        assert_eq!(d.on_read(None), Debounced::Quiet);
        assert_eq!(d.on_read(None), Debounced::Quiet);
        // token flickered back before grace ran out
        assert_eq!(d.on_read(Some(uid("0A"))), Debounced::Quiet);
        assert_eq!(d.on_read(None), Debounced::Quiet);
        assert_eq!(d.on_read(None), Debounced::Quiet);
        assert_eq!(d.on_read(None), Debounced::Removed(uid("0A")));
    }

    #[test]
    fn test_continuous_presence_emits_once() {
        let script = (0..20).map(|_| Scripted::Token("04A1B2")).collect();
        let (mut poller, mut rx, _state) = poller(script, ReaderConfig::default());

        for _ in 0..20 {
            assert!(poller.step().is_some());
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ReaderEvent::Presented(e) if e.uid == uid("04A1B2")));
    }

    #[test]
    fn test_remove_and_represent_emits_twice() {
        let script = vec![
            Scripted::Token("04A1B2"),
            Scripted::Token("04A1B2"),
            Scripted::Empty,
            Scripted::Token("04A1B2"),
        ];
        let (mut poller, mut rx, _state) = poller(script, ReaderConfig::default());
        for _ in 0..4 {
            poller.step();
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ReaderEvent::Presented(_)));
        assert!(matches!(events[1], ReaderEvent::Removed { .. }));
        assert!(matches!(events[2], ReaderEvent::Presented(_)));
    }

    #[test]
    fn test_errors_do_not_rearm_token() {
        let script = vec![
            Scripted::Token("04A1B2"),
            Scripted::Fail,
            Scripted::Token("04A1B2"),
        ];
        let (mut poller, mut rx, _state) = poller(script, ReaderConfig::default());
        for _ in 0..3 {
            poller.step();
        }

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_error_backoff_and_recovery() {
        let config = ReaderConfig {
            error_backoff_ms: 250,
            poll_interval_ms: 10,
            ..ReaderConfig::default()
        };
        let (mut poller, _rx, state) = poller(vec![Scripted::Fail, Scripted::Empty], config);
        let recoveries = poller.reader.recoveries.clone();

        assert_eq!(poller.step(), Some(Duration::from_millis(250)));
        assert_eq!(recoveries.load(Ordering::SeqCst), 1);
        assert_eq!(state.reader.snapshot().consecutive_errors, 1);

        assert_eq!(poller.step(), Some(Duration::from_millis(10)));
        assert_eq!(state.reader.snapshot().consecutive_errors, 0);
    }

    #[test]
    fn test_degraded_after_threshold_then_cleared() {
        let config = ReaderConfig {
            degraded_after_errors: 3,
            ..ReaderConfig::default()
        };
        let script = vec![
            Scripted::Fail,
            Scripted::Fail,
            Scripted::Fail,
            Scripted::Fail,
            Scripted::Empty,
        ];
        let (mut poller, _rx, state) = poller(script, config);
        let mut bus = state.events.subscribe();

        poller.step();
        poller.step();
        assert!(!state.reader.is_degraded());

        poller.step();
        assert!(state.reader.is_degraded());
        poller.step();

        poller.step();
        assert!(!state.reader.is_degraded());

        let mut health_events = Vec::new();
        while let Ok(event) = bus.try_recv() {
            if let JukeboxEvent::ReaderHealthChanged { degraded, .. } = event {
                health_events.push(degraded);
            }
        }
        assert_eq!(health_events, vec![true, false]);
    }

    #[test]
    fn test_poller_stops_when_consumer_dropped() {
        let (mut poller, rx, _state) = poller(vec![Scripted::Token("01")], ReaderConfig::default());
        drop(rx);
        assert_eq!(poller.step(), None);
    }

    #[test]
    fn test_run_honours_shutdown_flag() {
        let (poller, _rx, state) = poller(vec![], ReaderConfig::default());
        let shutdown = Arc::new(AtomicBool::new(true));
        poller.run(shutdown);
        assert!(!state.reader.snapshot().attached);
    }
}
