//! Playback Integration Tests
//!
//! Tests for:
//! - Grouped dispatch timing from the start of a score
//! - Seek without stale notes
//! - Pause/resume timing and frozen transport
//! - Natural completion and state reset
//! - Stop idempotence and callback delivery
//! - Failure containment at the actuator boundary
//! - Bounded note executor under dense chords
//! - Session controller indicator and lifecycle events

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serial_test::serial;
use sk_core::{KeyMapping, PlaybackConfig, RawNote, Score};
use sk_engine::{
    ActuatorError, NoteActuator, PlaybackSession, RecordingActuator, SessionController,
    SessionEvent, SessionState, TransportClock,
};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Timing tolerance for dispatch assertions
const TOLERANCE_MS: u128 = 50;

struct Harness {
    session: PlaybackSession,
    actuator: Arc<RecordingActuator>,
    finished: Arc<AtomicUsize>,
    terminated: Arc<AtomicUsize>,
}

fn notes(entries: &[(u64, &str)]) -> Vec<RawNote> {
    entries.iter().map(|&(t, k)| RawNote::new(t, k)).collect()
}

/// Every key maps to itself
fn identity(raw: &[RawNote]) -> Arc<KeyMapping> {
    Arc::new(raw.iter().map(|n| (n.key.clone(), n.key.clone())).collect())
}

fn harness(raw: &[RawNote], config: PlaybackConfig) -> Harness {
    let finished = Arc::new(AtomicUsize::new(0));
    let terminated = Arc::new(AtomicUsize::new(0));
    let score = Arc::new(Score::from_raw(raw).expect("valid score"));

    let session = {
        let finished = Arc::clone(&finished);
        let terminated = Arc::clone(&terminated);
        PlaybackSession::builder(score, Arc::new(TransportClock::new()))
            .config(config)
            .on_finished(move || {
                finished.fetch_add(1, Ordering::SeqCst);
            })
            .on_terminated(move || {
                terminated.fetch_add(1, Ordering::SeqCst);
            })
            .build()
    };

    Harness {
        session,
        actuator: Arc::new(RecordingActuator::new()),
        finished,
        terminated,
    }
}

fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn offset_ms(start: Instant, at: Instant) -> u128 {
    at.saturating_duration_since(start).as_millis()
}

fn assert_near(actual: u128, expected: u128, what: &str) {
    assert!(
        actual.abs_diff(expected) <= TOLERANCE_MS,
        "{what}: expected ~{expected}ms, got {actual}ms"
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISPATCH TIMING
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
#[serial]
fn test_grouped_events_dispatch_on_time() {
    let raw = notes(&[(0, "A"), (0, "B"), (500, "C")]);
    let h = harness(&raw, PlaybackConfig::default());

    let start = Instant::now();
    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();

    assert!(wait_for(Duration::from_secs(2), || h.actuator.count() == 3));
    let actions = h.actuator.actions();

    let mut first_group: Vec<&str> = actions[..2].iter().map(|a| a.action.as_str()).collect();
    first_group.sort_unstable();
    assert_eq!(first_group, vec!["A", "B"]);
    assert_eq!(actions[2].action, "C");

    for action in &actions[..2] {
        assert_near(offset_ms(start, action.at), 0, "first group");
    }
    assert_near(offset_ms(start, actions[2].at), 500, "second group");

    h.session.stop();
}

#[test]
#[serial]
fn test_dispatch_order_is_non_decreasing() {
    let raw: Vec<RawNote> = (0..20)
        .map(|i| RawNote::new(i * 30, format!("N{:03}", i * 30)))
        .collect();
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(3), || h.finished.load(Ordering::SeqCst) == 1));

    let mut actions = h.actuator.actions();
    actions.sort_by_key(|a| a.at);
    let times: Vec<u64> = actions
        .iter()
        .map(|a| a.action[1..].parse().unwrap())
        .collect();

    assert!(!times.is_empty());
    assert!(times.windows(2).all(|w| w[0] <= w[1]), "out of order: {times:?}");
    assert_eq!(times.last(), Some(&570));
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEEK
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
#[serial]
fn test_seek_skips_everything_before_position() {
    let raw: Vec<RawNote> = (0..=10)
        .map(|i| RawNote::new(i * 1000, format!("K{}", i * 1000)))
        .collect();
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(1), || h.actuator.count() == 1));

    let seek_at = Instant::now();
    h.session.seek(7000).unwrap();

    let position = h.session.clock().current_time();
    assert!(
        (7000..=7050).contains(&position),
        "clock should sit at the seek target, got {position}"
    );

    assert!(wait_for(Duration::from_secs(3), || {
        h.actuator.action_names().iter().any(|a| a == "K8000")
    }));
    h.session.stop();

    for action in h.actuator.actions().iter().filter(|a| a.at >= seek_at) {
        let time: u64 = action.action[1..].parse().unwrap();
        assert!(time >= 7000, "stale note {} fired after seek", action.action);
    }
    assert_eq!(h.actuator.action_names()[0], "K0");
    assert!(h.actuator.action_names().contains(&"K7000".to_string()));
}

#[test]
#[serial]
fn test_seek_while_paused_stays_paused() {
    let raw = notes(&[(0, "A"), (1000, "B"), (2000, "C")]);
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(1), || h.actuator.count() == 1));
    h.session.pause();

    h.session.seek(1500).unwrap();
    thread::sleep(Duration::from_millis(700));

    assert_eq!(h.session.state(), SessionState::Paused);
    assert_eq!(h.session.clock().current_time(), 1500);
    assert_eq!(h.actuator.action_names(), vec!["A"]);

    h.session.continue_play();
    assert!(wait_for(Duration::from_secs(2), || h.actuator.count() == 2));
    assert_eq!(h.actuator.action_names(), vec!["A", "C"]);
    h.session.stop();
}

#[test]
#[serial]
fn test_pause_during_seek_is_not_lost() {
    let raw: Vec<RawNote> = (0..20)
        .map(|i| RawNote::new(i * 1000, format!("K{}", i * 1000)))
        .collect();
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(1), || h.actuator.count() == 1));

    thread::scope(|s| {
        s.spawn(|| h.session.seek(3000).unwrap());
        thread::sleep(Duration::from_millis(20));
        h.session.pause();
    });

    assert_eq!(h.session.state(), SessionState::Paused);
    assert!(!h.session.is_playing());
    assert!(!h.session.clock().is_playing());

    let frozen = h.session.clock().current_time();
    assert!((3000..=3050).contains(&frozen), "clock left the seek target: {frozen}");
    thread::sleep(Duration::from_millis(300));
    assert_eq!(h.session.clock().current_time(), frozen);

    // The note at the target may beat the pause; nothing after it may.
    let fired = h.actuator.action_names();
    assert!(fired.iter().all(|a| a == "K0" || a == "K3000"), "fired {fired:?}");

    h.session.stop();
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAUSE / RESUME
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
#[serial]
fn test_pause_freezes_and_resume_continues() {
    let raw = notes(&[(0, "A"), (300, "B")]);
    let h = harness(&raw, PlaybackConfig::default().with_wait_slice(10));

    let start = Instant::now();
    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();

    thread::sleep(Duration::from_millis(100));
    h.session.pause();
    let frozen = h.session.clock().current_time();

    thread::sleep(Duration::from_millis(400));
    assert_eq!(h.session.clock().current_time(), frozen);
    assert_eq!(h.actuator.action_names(), vec!["A"]);
    assert_eq!(h.session.state(), SessionState::Paused);

    h.session.continue_play();
    assert!(wait_for(Duration::from_secs(2), || h.actuator.count() == 2));

    // 300ms of playing time plus 400ms paused
    assert_near(offset_ms(start, h.actuator.actions()[1].at), 700, "resumed note");
    h.session.stop();
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPLETION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
#[serial]
fn test_unmapped_keys_finish_silently() {
    let raw = notes(&[(0, "Z")]);
    let h = harness(&raw, PlaybackConfig::default());

    h.session
        .play(h.actuator.clone(), Arc::new(KeyMapping::sky_default()), None)
        .unwrap();

    assert!(wait_for(Duration::from_secs(1), || h.finished.load(Ordering::SeqCst) == 1));
    assert_eq!(h.actuator.count(), 0);
}

#[test]
#[serial]
fn test_completion_resets_state() {
    let raw = notes(&[(0, "A"), (200, "B")]);
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(2), || h.finished.load(Ordering::SeqCst) == 1));

    assert_eq!(h.session.state(), SessionState::Finished);
    assert!(h.session.is_finished());
    assert!(!h.session.is_playing());
    assert!(!h.session.clock().is_playing());
    assert_eq!(h.session.clock().current_time(), 0);
    assert_eq!(h.actuator.count(), 2);

    thread::sleep(Duration::from_millis(300));
    assert_eq!(h.finished.load(Ordering::SeqCst), 1);
    assert_eq!(h.terminated.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn test_continue_after_finish_rewinds() {
    let raw = notes(&[(0, "A"), (100, "B")]);
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(2), || h.finished.load(Ordering::SeqCst) == 1));

    h.session.continue_play();
    assert!(wait_for(Duration::from_secs(2), || h.finished.load(Ordering::SeqCst) == 2));
    assert_eq!(h.actuator.action_names(), vec!["A", "B", "A", "B"]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// STOP
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
#[serial]
fn test_stop_right_after_play_terminates_once() {
    let raw = notes(&[(200, "A"), (400, "B")]);
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    h.session.stop();
    h.session.stop();

    thread::sleep(Duration::from_millis(500));
    assert_eq!(h.terminated.load(Ordering::SeqCst), 1);
    assert_eq!(h.finished.load(Ordering::SeqCst), 0);
    assert_eq!(h.actuator.count(), 0);
    assert_eq!(h.session.state(), SessionState::Stopped);
    assert!(!h.session.clock().is_playing());
}

#[test]
#[serial]
fn test_stop_after_finish_fires_nothing() {
    let raw = notes(&[(0, "A")]);
    let h = harness(&raw, PlaybackConfig::default());

    h.session.play(h.actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(1), || h.finished.load(Ordering::SeqCst) == 1));

    h.session.stop();
    h.session.stop();

    assert_eq!(h.finished.load(Ordering::SeqCst), 1);
    assert_eq!(h.terminated.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn test_stop_from_finished_callback_does_not_deadlock() {
    let raw = notes(&[(0, "A")]);
    let score = Arc::new(Score::from_raw(&raw).unwrap());
    let done = Arc::new(AtomicUsize::new(0));

    let session = Arc::new_cyclic(|weak: &std::sync::Weak<PlaybackSession>| {
        let weak = weak.clone();
        let done = Arc::clone(&done);
        PlaybackSession::builder(score, Arc::new(TransportClock::new()))
            .on_finished(move || {
                if let Some(session) = weak.upgrade() {
                    session.stop();
                }
                done.fetch_add(1, Ordering::SeqCst);
            })
            .build()
    });

    session
        .play(Arc::new(RecordingActuator::new()), identity(&raw), None)
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || done.load(Ordering::SeqCst) == 1));
    assert_eq!(session.state(), SessionState::Stopped);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURE CONTAINMENT
// ═══════════════════════════════════════════════════════════════════════════════

struct UnreliableActuator {
    inner: RecordingActuator,
}

impl NoteActuator for UnreliableActuator {
    fn perform(&self, action: &str) -> Result<(), ActuatorError> {
        match action {
            "B" => Err(ActuatorError::Device("key stuck".into())),
            "C" => panic!("driver crashed"),
            _ => self.inner.perform(action),
        }
    }
}

#[test]
#[serial]
fn test_actuator_failures_do_not_stop_playback() {
    let raw = notes(&[(0, "A"), (50, "B"), (100, "C"), (150, "D")]);
    let h = harness(&raw, PlaybackConfig::default());
    let actuator = Arc::new(UnreliableActuator {
        inner: RecordingActuator::new(),
    });

    h.session.play(actuator.clone(), identity(&raw), None).unwrap();

    assert!(wait_for(Duration::from_secs(2), || h.finished.load(Ordering::SeqCst) == 1));
    assert_eq!(actuator.inner.action_names(), vec!["A", "D"]);
}

// ═══════════════════════════════════════════════════════════════════════════════
// BOUNDED EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Slow actuator that tracks how many actions run at once
struct ConcurrencyActuator {
    inner: RecordingActuator,
    busy: AtomicUsize,
    peak: AtomicUsize,
    hold: Duration,
}

impl NoteActuator for ConcurrencyActuator {
    fn perform(&self, action: &str) -> Result<(), ActuatorError> {
        let now = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.inner.perform(action);
        thread::sleep(self.hold);
        self.busy.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[test]
#[serial]
fn test_dense_chord_respects_worker_limit() {
    let mut raw: Vec<RawNote> = (0..40).map(|i| RawNote::new(0, format!("C{i:02}"))).collect();
    raw.push(RawNote::new(400, "LATE"));
    let h = harness(&raw, PlaybackConfig::default().with_workers(4));
    let actuator = Arc::new(ConcurrencyActuator {
        inner: RecordingActuator::new(),
        busy: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        hold: Duration::from_millis(10),
    });

    let start = Instant::now();
    h.session.play(actuator.clone(), identity(&raw), None).unwrap();
    assert!(wait_for(Duration::from_secs(3), || h.finished.load(Ordering::SeqCst) == 1));
    assert!(wait_for(Duration::from_secs(1), || actuator.inner.count() == 41));

    let peak = actuator.peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "{peak} actions ran at once with 4 workers");
    assert!(peak > 1, "chord was serialized on one thread");

    // 40 chord keys at 10ms each over 4 threads clear in ~100ms
    let actions = actuator.inner.actions();
    let late = actions
        .iter()
        .find(|a| a.action == "LATE")
        .expect("late note dispatched");
    assert_near(offset_ms(start, late.at), 400, "note after the chord");
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════════

fn next_event(rx: &crossbeam_channel::Receiver<SessionEvent>) -> SessionEvent {
    rx.recv_timeout(Duration::from_secs(3))
        .expect("session event within timeout")
}

#[test]
#[serial]
fn test_controller_indicator_follows_sessions() {
    let actuator = Arc::new(RecordingActuator::new());
    let controller = SessionController::new(
        actuator.clone(),
        KeyMapping::sky_default(),
        PlaybackConfig::default(),
    );
    let events = controller.subscribe();
    let song = notes(&[(0, "1Key0"), (100, "1Key2")]);
    let long = notes(&[(0, "2Key0"), (5_000, "2Key1")]);

    controller.play("song", &song, None).unwrap();
    assert!(controller.is_playing());
    assert_eq!(next_event(&events), SessionEvent::Started { song: "song".into() });
    assert_eq!(next_event(&events), SessionEvent::Finished { song: "song".into() });
    assert!(!controller.is_playing());
    assert_eq!(actuator.action_names(), vec!["C4", "E4"]);

    // Same song again resumes (and rewinds) the existing session.
    controller.play("song", &song, None).unwrap();
    assert_eq!(next_event(&events), SessionEvent::Resumed);
    assert!(controller.is_playing());

    // A different song replaces it; the old session's end leaves the indicator alone.
    controller.play("long", &long, None).unwrap();
    let mut seen = vec![next_event(&events), next_event(&events)];
    seen.retain(|e| !matches!(e, SessionEvent::Finished { .. }));
    assert!(seen.contains(&SessionEvent::Started { song: "long".into() }));
    assert!(controller.is_playing());
    assert_eq!(controller.current_song().as_deref(), Some("long"));
    assert!(!actuator.was_cleaned_up());

    controller.stop();
    assert!(!controller.is_playing());
    assert!(wait_for(Duration::from_secs(1), || {
        events
            .try_iter()
            .any(|e| e == SessionEvent::Terminated { song: "long".into() })
    }));

    controller.shutdown();
    assert!(actuator.was_cleaned_up());
}

#[test]
#[serial]
fn test_controller_commands_over_channel() {
    let controller = SessionController::new(
        Arc::new(RecordingActuator::new()),
        KeyMapping::sky_default(),
        PlaybackConfig::default(),
    );
    let tx = controller.command_sender();
    controller
        .play("song", &notes(&[(0, "1Key0"), (10_000, "1Key1")]), None)
        .unwrap();

    tx.send("p".parse().unwrap()).unwrap();
    assert_eq!(controller.pump_commands(), 1);
    assert!(!controller.is_playing());
    assert_eq!(
        controller.session().map(|s| s.state()),
        Some(SessionState::Paused)
    );

    tx.send("seek 4000".parse().unwrap()).unwrap();
    tx.send("p".parse().unwrap()).unwrap();
    assert_eq!(controller.pump_commands(), 2);
    assert!(controller.is_playing());
    assert!(controller.position() >= 4000);

    tx.send("q".parse().unwrap()).unwrap();
    controller.pump_commands();
    assert!(!controller.is_playing());
}

/// Device that refuses keys once released
struct ReleasableActuator {
    inner: RecordingActuator,
    released: AtomicBool,
}

impl NoteActuator for ReleasableActuator {
    fn perform(&self, action: &str) -> Result<(), ActuatorError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(ActuatorError::Device("device released".into()));
        }
        self.inner.perform(action)
    }

    fn cleanup(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[test]
#[serial]
fn test_replacing_song_keeps_shared_actuator() {
    let actuator = Arc::new(ReleasableActuator {
        inner: RecordingActuator::new(),
        released: AtomicBool::new(false),
    });
    let controller = SessionController::new(
        actuator.clone(),
        KeyMapping::sky_default(),
        PlaybackConfig::default(),
    );
    let events = controller.subscribe();

    controller
        .play("a", &notes(&[(0, "1Key0"), (5_000, "1Key1")]), None)
        .unwrap();
    assert!(wait_for(Duration::from_secs(1), || actuator.inner.count() == 1));

    controller
        .play("b", &notes(&[(0, "1Key2"), (100, "1Key3")]), None)
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        events
            .try_iter()
            .any(|e| e == SessionEvent::Finished { song: "b".into() })
    }));

    assert_eq!(actuator.inner.action_names(), vec!["C4", "E4", "F4"]);
    assert!(!actuator.released.load(Ordering::SeqCst));

    controller.shutdown();
    assert!(actuator.released.load(Ordering::SeqCst));
}

#[test]
#[serial]
fn test_controller_play_from_start_position() {
    let actuator = Arc::new(RecordingActuator::new());
    let controller = SessionController::new(
        actuator.clone(),
        KeyMapping::sky_default(),
        PlaybackConfig::default(),
    );
    let song = notes(&[(0, "1Key0"), (500, "1Key1"), (800, "1Key2")]);

    let start = Instant::now();
    controller.play("song", &song, Some(500)).unwrap();
    assert!(wait_for(Duration::from_secs(2), || actuator.count() == 2));

    assert_eq!(actuator.action_names(), vec!["D4", "E4"]);
    let actions = actuator.actions();
    assert_near(offset_ms(start, actions[0].at), 0, "note at the start position");
    assert_near(offset_ms(start, actions[1].at), 300, "following note");

    // Same song with a position seeks before resuming.
    controller.pause().unwrap();
    controller.play("song", &song, Some(800)).unwrap();
    assert!(wait_for(Duration::from_secs(1), || actuator.count() == 3));
    assert_eq!(actuator.action_names(), vec!["D4", "E4", "E4"]);
}
