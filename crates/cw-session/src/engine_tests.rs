use super::*;
use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::time::timeout;

use cw_core::CompletionRecord;

const TEST_WAIT: Duration = Duration::from_secs(5);

fn fast_tunables() -> EngineTunables {
    EngineTunables {
        quiet: Duration::from_millis(40),
        waiting: Duration::from_millis(120),
        stuck: Duration::from_millis(320),
        timeout: None,
        idle_poll: Duration::from_millis(25),
    }
}

struct Harness {
    session: Arc<Session>,
    events: UnboundedSender<AdapterEvent>,
    progress: Arc<Mutex<Vec<ProgressUpdate>>>,
    completions: tokio::sync::mpsc::UnboundedReceiver<CompletionRecord>,
}

/// Engine wired to a synthetic event stream: tests feed adapter events by
/// hand instead of spawning real processes.
fn start_engine(tunables: EngineTunables) -> Harness {
    let session = Session::new("synthetic", "bash", None, 1 << 20);
    session.lock_state().status = SessionStatus::Running;

    let (events_tx, events_rx) = unbounded_channel();
    let (completion_tx, completion_rx) = unbounded_channel();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let hooks = Hooks {
        progress: Some(Arc::new(move |update| {
            sink.lock().expect("progress sink lock").push(update);
        })),
        completion: Some(completion_tx),
    };

    spawn_engine(Arc::clone(&session), events_rx, tunables, hooks);

    Harness {
        session,
        events: events_tx,
        progress,
        completions: completion_rx,
    }
}

fn data(harness: &Harness, bytes: &[u8]) {
    harness
        .events
        .send(AdapterEvent::Data(bytes.to_vec()))
        .expect("engine alive");
}

fn exit(harness: &Harness, code: i32) {
    harness
        .events
        .send(AdapterEvent::Exit(ExitInfo {
            code: Some(code),
            signal: None,
        }))
        .expect("engine alive");
}

async fn await_done(session: &Arc<Session>) {
    let mut done = session.subscribe_done();
    timeout(TEST_WAIT, async {
        while !*done.borrow_and_update() {
            done.changed().await.expect("done sender alive");
        }
    })
    .await
    .expect("session did not reach a terminal state in time");
}

async fn wait_for_status(session: &Arc<Session>, expected: SessionStatus, within: Duration) {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let current = session.status();
        if current == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for status {expected}; still {current}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn exit_plus_quiet_window_completes() {
    let mut harness = start_engine(fast_tunables());
    data(&harness, b"hello\n");
    exit(&harness, 0);
    await_done(&harness.session).await;

    let brief = harness.session.snapshot();
    assert_eq!(brief.status, SessionStatus::Completed);
    assert_eq!(brief.exit_code, Some(0));
    assert_eq!(harness.session.joined_output(), "hello\n");

    let record = harness.completions.recv().await.expect("one record");
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(record.stdout, "hello\n");
    assert!(
        harness.completions.try_recv().is_err(),
        "exactly one completion record"
    );
}

#[tokio::test]
async fn prompt_then_exit_coalesce_into_one_completion() {
    let mut harness = start_engine(fast_tunables());
    // Prompt re-appearance arms the quiet window; the exit 20 ms later
    // rearms it. Only one completed transition may result.
    data(&harness, b"user@host:~$ ");
    tokio::time::sleep(Duration::from_millis(20)).await;
    exit(&harness, 0);
    await_done(&harness.session).await;

    assert_eq!(harness.session.status(), SessionStatus::Completed);
    assert!(harness.completions.recv().await.is_some());
    assert!(
        harness.completions.try_recv().is_err(),
        "quiet rearm must not double-complete"
    );
}

#[tokio::test]
async fn prompt_match_completes_without_exit() {
    let harness = start_engine(fast_tunables());
    data(&harness, b"doing things\n");
    data(&harness, b"user@host:~$ ");
    await_done(&harness.session).await;

    let brief = harness.session.snapshot();
    assert_eq!(brief.status, SessionStatus::Completed);
    // No exit was ever reported.
    assert_eq!(brief.exit_code, None);
    assert_eq!(brief.exit_signal, None);
}

#[tokio::test]
async fn late_output_slides_the_quiet_window_and_is_retained() {
    let harness = start_engine(fast_tunables());
    exit(&harness, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    data(&harness, b"late bytes\n");
    await_done(&harness.session).await;

    assert_eq!(harness.session.status(), SessionStatus::Completed);
    assert!(
        harness.session.joined_output().contains("late bytes"),
        "bytes arriving inside the quiet window must land in the buffer"
    );
}

#[tokio::test]
async fn pure_spinner_chunks_do_not_slide_the_quiet_window() {
    let mut tunables = fast_tunables();
    tunables.quiet = Duration::from_millis(250);
    let harness = start_engine(tunables);

    data(&harness, b"work |");
    tokio::time::sleep(Duration::from_millis(20)).await;
    exit(&harness, 0);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let armed_at = harness
        .session
        .lock_state()
        .quiet_deadline
        .expect("exit armed the quiet window");

    // A repaint arriving inside the window must leave the deadline alone:
    // completion lands exactly when it would have without the repaint.
    data(&harness, b"work /");
    tokio::time::sleep(Duration::from_millis(30)).await;
    {
        let state = harness.session.lock_state();
        assert_eq!(
            state.quiet_deadline,
            Some(armed_at),
            "a spinner repaint must not push completion out"
        );
    }

    await_done(&harness.session).await;
    assert_eq!(harness.session.status(), SessionStatus::Completed);
    assert!(
        harness.session.joined_output().contains("work /"),
        "raw repaint bytes are still retained"
    );
}

#[tokio::test]
async fn prompt_pattern_is_monotonic() {
    let mut tunables = fast_tunables();
    tunables.quiet = Duration::from_millis(250);
    let harness = start_engine(tunables);

    data(&harness, b"user@host:~$ ");
    tokio::time::sleep(Duration::from_millis(30)).await;
    {
        let state = harness.session.lock_state();
        assert_eq!(state.prompt.expect("prompt calibrated").name(), "posix");
    }

    // A different prompt shape later must not replace the calibration.
    data(&harness, b"PS C:\\Users\\dev> ");
    tokio::time::sleep(Duration::from_millis(30)).await;
    {
        let state = harness.session.lock_state();
        assert_eq!(state.prompt.expect("prompt still set").name(), "posix");
    }
}

#[tokio::test]
async fn spinner_frames_are_suppressed_but_buffered() {
    let harness = start_engine(fast_tunables());
    data(&harness, b"work |");
    data(&harness, b"work /");
    data(&harness, b"work -");
    data(&harness, b"work \\");
    tokio::time::sleep(Duration::from_millis(30)).await;

    {
        let state = harness.session.lock_state();
        // Repaints were skipped for classification...
        assert_eq!(state.last_line, "work |");
        assert!(
            state.quiet_deadline.is_none(),
            "no prompt, no exit: nothing should arm the quiet window"
        );
    }

    data(&harness, b"done\n");
    exit(&harness, 0);
    await_done(&harness.session).await;

    // ...but every raw byte is retained.
    let output = harness.session.joined_output();
    for frame in ["work |", "work /", "work -", "work \\", "done"] {
        assert!(output.contains(frame), "missing {frame:?} in buffer");
    }
}

#[tokio::test]
async fn idle_promotes_waiting_then_stuck_then_demotes_to_waiting() {
    let harness = start_engine(fast_tunables());
    data(&harness, b"one byte");

    wait_for_status(&harness.session, SessionStatus::Waiting, Duration::from_millis(800)).await;
    wait_for_status(
        &harness.session,
        SessionStatus::PossiblyStuck,
        Duration::from_millis(800),
    )
    .await;

    // New output updates the idle clock; the next tick demotes to waiting,
    // never straight back to running.
    data(&harness, b"more\n");
    wait_for_status(&harness.session, SessionStatus::Waiting, Duration::from_millis(800)).await;

    exit(&harness, 0);
    await_done(&harness.session).await;
    assert_eq!(harness.session.status(), SessionStatus::Completed);

    let progress = harness.progress.lock().expect("progress lock");
    let messages: Vec<&str> = progress
        .iter()
        .filter_map(|u| u.message.as_deref())
        .collect();
    assert!(
        messages.iter().any(|m| m.contains("waiting threshold 120ms")),
        "waiting transition must reference its threshold: {messages:?}"
    );
    assert!(
        messages.iter().any(|m| m.contains("stuck threshold 320ms")),
        "stuck transition must reference its threshold: {messages:?}"
    );
}

#[tokio::test]
async fn timeout_kill_resolves_to_error_on_exit() {
    let mut tunables = fast_tunables();
    tunables.timeout = Some(Duration::from_millis(50));
    let harness = start_engine(tunables);

    // No adapter is installed, so the SIGTERM is a no-op; the adapter's
    // exit event is simulated by hand.
    tokio::time::sleep(Duration::from_millis(120)).await;
    harness
        .events
        .send(AdapterEvent::Exit(ExitInfo {
            code: None,
            signal: Some("SIGTERM".to_string()),
        }))
        .expect("engine alive");
    await_done(&harness.session).await;

    let brief = harness.session.snapshot();
    assert_eq!(brief.status, SessionStatus::Error);
    assert_eq!(brief.error_reason.as_deref(), Some("Command timed out"));
    assert_eq!(brief.exit_signal.as_deref(), Some("SIGTERM"));
}

#[tokio::test]
async fn stream_closing_without_exit_is_an_adapter_fault() {
    let harness = start_engine(fast_tunables());
    data(&harness, b"partial");
    drop(harness.events);
    await_done(&harness.session).await;

    let brief = harness.session.snapshot();
    assert_eq!(brief.status, SessionStatus::Error);
    assert!(
        brief
            .error_reason
            .as_deref()
            .is_some_and(|r| r.contains("closed")),
        "reason should mention the closed stream"
    );
}

#[tokio::test]
async fn snapshots_are_idempotent_without_new_events() {
    let harness = start_engine(fast_tunables());
    data(&harness, b"some output\n");
    exit(&harness, 0);
    await_done(&harness.session).await;

    let first = harness.session.snapshot();
    let second = harness.session.snapshot();
    assert_eq!(first, second);
}

#[tokio::test]
async fn terminal_state_disarms_timers_and_is_absorbing() {
    let harness = start_engine(fast_tunables());
    data(&harness, b"user@host:~$ ");
    await_done(&harness.session).await;
    assert_eq!(harness.session.status(), SessionStatus::Completed);

    // Events after the terminal transition change nothing.
    let _ = harness.events.send(AdapterEvent::Data(b"zombie\n".to_vec()));
    tokio::time::sleep(Duration::from_millis(60)).await;
    let state = harness.session.lock_state();
    assert_eq!(state.status, SessionStatus::Completed);
    assert!(state.quiet_deadline.is_none());
    assert!(!state.buffer.joined_lossy().contains("zombie"));
}
