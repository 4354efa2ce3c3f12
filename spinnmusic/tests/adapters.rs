//! Main-loop behavior of both adapters against the in-process coupling.
//!
//! Deterministic tests drive the clock from a [`StepSource`]; the handshake
//! tests run on the real monotonic clock with a second thread playing the
//! remote device.
//!
//! ```bash
//! RUST_LOG=spinnmusic=debug cargo test --test adapters -- --nocapture
//! ```

use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use spinnmusic::adapter::input::InputListener;
use spinnmusic::adapter::output::OutputListener;
use spinnmusic::clock::{StepSource, TimePoint};
use spinnmusic::coupling::memory::{Journal, MemoryCoupling, MemoryOutputPort, MemoryRuntime, Record};
use spinnmusic::link::LiveSpikesListener;
use spinnmusic::link::memory::RecordingConnection;
use spinnmusic::queue::UnitId;
use spinnmusic::rendezvous::Phase;
use spinnmusic::{ExitReason, InputAdapter, InputConfig, OutputAdapter, OutputConfig, Pacing};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        spinnmusic::init_tracing();
    });
}

fn step_source() -> StepSource {
    StepSource::new(TimePoint::from_millis(1_000), TimePoint::from_micros(100))
}

fn sent(label: &str, id: u32) -> Record {
    Record::Sent {
        label: label.into(),
        id: UnitId::new(id),
    }
}

/// Polls `phase` until it reports `want`.
fn wait_for_phase(phase: impl Fn() -> Phase, want: Phase) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while phase() != want {
        assert!(Instant::now() < deadline, "never reached {want:?}");
        thread::sleep(Duration::from_micros(200));
    }
}

#[test]
fn input_sends_due_events_before_each_tick() {
    init_test_tracing();
    let journal = Journal::new();
    let coupling = MemoryCoupling::new(journal.clone());
    let injector = coupling.clone();
    let config = InputConfig::new("pop", 8)
        .with_timestep(Duration::from_millis(5))
        .with_stop_time(0.010)
        .with_pacing(Pacing::Spin);
    let adapter = InputAdapter::with_source(coupling, config, step_source()).unwrap();

    for (t, id) in [(0.007, 7), (0.001, 1), (0.003, 3)] {
        assert!(injector.deliver(t, UnitId::new(id)));
    }
    adapter
        .listener()
        .spikes_start("pop", Arc::new(RecordingConnection::new(journal.clone())));
    let summary = adapter.main_loop().unwrap();

    assert_eq!(summary.exit, ExitReason::StopTime);
    assert_eq!(summary.ticks, 2);
    assert_eq!(summary.events, 3);
    let records: Vec<Record> = journal
        .snapshot()
        .into_iter()
        .filter(|r| !matches!(r, Record::Mapped { .. }))
        .collect();
    assert_eq!(
        records,
        vec![
            sent("pop", 1),
            sent("pop", 3),
            Record::TickBegin(0),
            Record::TickEnd(0),
            sent("pop", 7),
            Record::TickBegin(1),
            Record::TickEnd(1),
            Record::Finalized,
        ]
    );
}

#[test]
fn input_stop_is_acknowledged_and_ends_the_run() {
    init_test_tracing();
    let journal = Journal::new();
    let config = InputConfig::new("pop", 8)
        .with_timestep(Duration::from_millis(5))
        .with_stop_time(100.0);
    let adapter = InputAdapter::new(MemoryCoupling::new(journal.clone()), config).unwrap();
    let listener: InputListener = adapter.listener();
    let main = thread::spawn(move || adapter.main_loop());

    listener.spikes_start("pop", Arc::new(RecordingConnection::new(journal.clone())));
    wait_for_phase(|| listener.phase(), Phase::Running);
    thread::sleep(Duration::from_millis(20));
    listener.spikes_stop("pop");
    assert_ne!(listener.phase(), Phase::Stopping);

    let summary = main.join().unwrap().unwrap();
    assert_eq!(summary.exit, ExitReason::Stopped);
    assert_eq!(listener.phase(), Phase::Finished);
    assert_eq!(journal.count(|r| *r == Record::Finalized), 1);

    // A late start is ignored once the loop has finished.
    listener.spikes_start("pop", Arc::new(RecordingConnection::default()));
    assert_eq!(listener.phase(), Phase::Finished);
}

#[test]
fn input_close_releases_waiting_loop() {
    init_test_tracing();
    let journal = Journal::new();
    let adapter = InputAdapter::new(
        MemoryCoupling::new(journal.clone()),
        InputConfig::new("pop", 1).with_stop_time(1.0),
    )
    .unwrap();
    let listener = adapter.listener();
    let main = thread::spawn(move || adapter.main_loop());

    wait_for_phase(|| listener.phase(), Phase::Waiting);
    listener.close();
    let summary = main.join().unwrap().unwrap();
    assert_eq!(summary.exit, ExitReason::Closed);
    assert_eq!(journal.ticks(), 0);
    assert_eq!(journal.count(|r| *r == Record::Finalized), 1);
}

#[test]
fn output_inserts_never_land_inside_a_tick() {
    init_test_tracing();
    let journal = Journal::new();
    let coupling = MemoryCoupling::new(journal.clone()).with_tick_hold(Duration::from_millis(2));
    let config = OutputConfig::new("pop", 8)
        .with_timestep(Duration::from_millis(5))
        .with_stop_time(0.1);
    let adapter = OutputAdapter::new(coupling, config).unwrap();
    let listener: OutputListener<MemoryRuntime, MemoryOutputPort> = adapter.listener();
    let main = thread::spawn(move || adapter.main_loop());

    listener.spikes_start("pop", Arc::new(RecordingConnection::default()));
    let started = Instant::now();
    let mut batches = 0u32;
    while listener.phase() != Phase::Finished {
        let time_ms = i32::try_from(started.elapsed().as_millis()).unwrap();
        listener.receive_spikes("pop", time_ms, &[UnitId::new(batches % 8), UnitId::new(7)]);
        batches += 1;
        thread::sleep(Duration::from_micros(300));
    }
    let summary = main.join().unwrap().unwrap();

    assert_eq!(summary.exit, ExitReason::StopTime);
    assert!(summary.ticks > 0);
    assert!(summary.events > 0);

    let mut inside = false;
    let mut inserted = 0;
    for record in journal.snapshot() {
        match record {
            Record::TickBegin(_) => inside = true,
            Record::TickEnd(_) => inside = false,
            Record::Inserted { .. } => {
                assert!(!inside, "event inserted during a tick");
                inserted += 1;
            }
            _ => {}
        }
    }
    assert_eq!(inserted, batches * 2);
}

#[test]
fn output_pause_resumes_without_losing_a_tick() {
    init_test_tracing();
    let journal = Journal::new();
    let coupling = MemoryCoupling::new(journal.clone()).with_tick_hold(Duration::from_millis(1));
    let config = OutputConfig::new("pop", 8)
        .with_timestep(Duration::from_millis(5))
        .with_stop_time(0.5)
        .with_pacing(Pacing::Spin);
    let source = step_source();
    let adapter = OutputAdapter::with_source(coupling, config, source.clone()).unwrap();
    let listener = adapter.listener();
    let main = thread::spawn(move || adapter.main_loop());

    listener.spikes_start("pop", Arc::new(RecordingConnection::default()));
    wait_for_phase(|| listener.phase(), Phase::Running);
    thread::sleep(Duration::from_millis(5));
    listener.spikes_stop("pop");

    // Paused: neither ticks nor clock readings advance.
    let ticks = journal.ticks();
    let reading = source.peek();
    thread::sleep(Duration::from_millis(10));
    assert_eq!(journal.ticks(), ticks);
    assert_eq!(source.peek(), reading);

    listener.spikes_start("pop", Arc::new(RecordingConnection::default()));
    let summary = main.join().unwrap().unwrap();

    assert_eq!(summary.exit, ExitReason::StopTime);
    assert_eq!(summary.pauses, 1);
    assert_eq!(summary.ticks, 100);
    assert_eq!(journal.ticks(), 100);
}

#[test]
fn output_resume_raised_while_stop_is_pending() {
    init_test_tracing();
    let journal = Journal::new();
    let coupling = MemoryCoupling::new(journal.clone()).with_tick_hold(Duration::from_millis(50));
    let config = OutputConfig::new("pop", 8)
        .with_timestep(Duration::from_millis(5))
        .with_stop_time(0.2);
    let adapter = OutputAdapter::new(coupling, config).unwrap();
    let listener = adapter.listener();
    let main = thread::spawn(move || adapter.main_loop());

    listener.spikes_start("pop", Arc::new(RecordingConnection::default()));
    wait_for_phase(|| listener.phase(), Phase::Running);

    // Stop and resume arrive on different notification threads.
    let stopper = {
        let listener = listener.clone();
        thread::spawn(move || listener.spikes_stop("pop"))
    };
    wait_for_phase(|| listener.phase(), Phase::Stopping);
    listener.spikes_start("pop", Arc::new(RecordingConnection::default()));
    stopper.join().unwrap();

    let summary = main.join().unwrap().unwrap();
    assert_eq!(summary.exit, ExitReason::StopTime);
    assert_eq!(summary.pauses, 1);
    assert_eq!(listener.phase(), Phase::Finished);
}

#[test]
fn input_wakes_parked_loop_for_late_event() {
    init_test_tracing();
    let journal = Journal::new();
    let coupling = MemoryCoupling::new(journal.clone());
    let injector = coupling.clone();
    let config = InputConfig::new("pop", 8)
        .with_timestep(Duration::from_secs(2))
        .with_stop_time(100.0);
    let adapter = InputAdapter::new(coupling, config).unwrap();
    let listener = adapter.listener();
    let main = thread::spawn(move || adapter.main_loop());

    listener.spikes_start("pop", Arc::new(RecordingConnection::new(journal.clone())));
    wait_for_phase(|| listener.phase(), Phase::Running);
    thread::sleep(Duration::from_millis(50));

    let pushed = Instant::now();
    assert!(injector.deliver(0.0, UnitId::new(5)));
    while journal.count(|r| *r == sent("pop", 5)) == 0 {
        assert!(
            pushed.elapsed() < Duration::from_secs(1),
            "event waited for the tick"
        );
        thread::sleep(Duration::from_micros(200));
    }
    assert_eq!(journal.ticks(), 0);

    listener.spikes_stop("pop");
    let summary = main.join().unwrap().unwrap();
    assert_eq!(summary.exit, ExitReason::Stopped);
    assert_eq!(summary.events, 1);
}
