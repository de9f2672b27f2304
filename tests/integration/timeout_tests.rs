//! Idle and session deadlines, and the cleanup hook they trigger.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use agent_runner::{Engine, ErrorKind, ExecutionEvent};

use super::test_helpers::{framed, read_trimmed, run_to_end, text_count, Workspace};

const TICKER: &str = concat!(
    "echo \"$AGENT_PROTOCOL_START\"\n",
    "echo '{\"type\":\"init\",\"session_id\":\"tick\"}'\n",
    "while true; do\n",
    "  echo '{\"type\":\"text\",\"content\":\"tick\"}'\n",
    "  sleep 0.2\n",
    "done\n",
);

const SILENT: &str = concat!(
    "echo \"$AGENT_PROTOCOL_START\"\n",
    "echo '{\"type\":\"init\",\"session_id\":\"quiet\"}'\n",
    "sleep 30\n",
);

fn counter_hook(calls: &Arc<AtomicUsize>) -> impl FnOnce() -> agent_runner::Result<()> + Send {
    let calls = Arc::clone(calls);
    move || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn session_timeout_fires_despite_steady_output() {
    let ws = Workspace::create();
    let mut config = ws.config(TICKER);
    config.timeouts.session_seconds = 1;
    config.timeouts.message_seconds = 30;
    let engine = Engine::new(config);
    let calls = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let events = run_to_end(&engine, ws.request().on_cleanup(counter_hook(&calls))).await;
    let elapsed = started.elapsed();

    assert!(text_count(&events) >= 2, "output kept flowing: {events:?}");
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::Error { kind: ErrorKind::Timeout, message })
            if message.contains("session timeout")
    ));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn session_timeout_signals_terminate_before_killing() {
    let ws = Workspace::create();
    let signals = ws.base.join("signals.txt");
    let script = format!("trap 'echo term >> \"{}\"' TERM\n{TICKER}", signals.display());
    let mut config = ws.config(&script);
    config.timeouts.session_seconds = 1;
    config.timeouts.message_seconds = 30;
    config.timeouts.grace_seconds = 1;
    let engine = Engine::new(config);

    let started = Instant::now();
    let events = run_to_end(&engine, ws.request()).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::Error { kind: ErrorKind::Timeout, message })
            if message.contains("session timeout")
    ));
    assert_eq!(read_trimmed(&signals), "term");
    assert!(elapsed >= Duration::from_secs(2), "grace period skipped: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "took {elapsed:?}");
}

#[tokio::test]
async fn timeout_also_stops_the_workers_children() {
    let ws = Workspace::create();
    let survivor = ws.base.join("survived");
    let script = format!("(sleep 2; touch \"{}\") &\n{SILENT}", survivor.display());
    let mut config = ws.config(&script);
    config.timeouts.message_seconds = 1;
    let engine = Engine::new(config);

    let events = run_to_end(&engine, ws.request()).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::Error {
            kind: ErrorKind::Timeout,
            ..
        })
    ));
    assert!(!survivor.exists(), "background child outlived the timeout");
}

#[tokio::test]
async fn effectively_unlimited_timeouts_do_not_break_a_run() {
    let ws = Workspace::create();
    let mut config = ws.config(&framed(&[
        r#"{"type":"init","session_id":"long"}"#,
        r#"{"type":"done","stats":{}}"#,
    ]));
    config.timeouts.session_seconds = i64::MAX as u64;
    config.timeouts.message_seconds = u64::MAX;
    let engine = Engine::new(config);

    let events = run_to_end(&engine, ws.request()).await;

    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::Done {
            session_id: Some("long".into()),
            stats: serde_json::json!({}),
        })
    );
}

#[tokio::test]
async fn idle_timeout_fires_when_worker_goes_quiet() {
    let ws = Workspace::create();
    let mut config = ws.config(SILENT);
    config.timeouts.message_seconds = 1;
    let engine = Engine::new(config);
    let calls = Arc::new(AtomicUsize::new(0));

    let started = Instant::now();
    let events = run_to_end(&engine, ws.request().on_cleanup(counter_hook(&calls))).await;

    assert_eq!(events.len(), 2, "{events:?}");
    assert_eq!(
        events[0],
        ExecutionEvent::Init {
            session_id: "quiet".into()
        }
    );
    assert!(matches!(
        &events[1],
        ExecutionEvent::Error { kind: ErrorKind::Timeout, message }
            if message.contains("no output for 1s")
    ));
    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_cleanup_hook_does_not_change_the_outcome() {
    let ws = Workspace::create();
    let mut config = ws.config(SILENT);
    config.timeouts.message_seconds = 1;
    let engine = Engine::new(config);

    let request = ws
        .request()
        .on_cleanup(|| Err(agent_runner::AppError::Io("workspace already removed".into())));
    let events = run_to_end(&engine, request).await;

    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::Error {
            kind: ErrorKind::Timeout,
            ..
        })
    ));
}

#[tokio::test]
async fn panicking_cleanup_hook_is_contained() {
    let ws = Workspace::create();
    let mut config = ws.config(SILENT);
    config.timeouts.message_seconds = 1;
    let engine = Engine::new(config);

    let request = ws.request().on_cleanup(|| panic!("cleanup exploded"));
    let events = run_to_end(&engine, request).await;

    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::Error {
            kind: ErrorKind::Timeout,
            ..
        })
    ));
}

#[tokio::test]
async fn successful_run_does_not_invoke_cleanup() {
    let ws = Workspace::create();
    let engine = ws.engine(&framed(&[r#"{"type":"done","stats":{}}"#]));
    let calls = Arc::new(AtomicUsize::new(0));

    let events = run_to_end(&engine, ws.request().on_cleanup(counter_hook(&calls))).await;

    assert!(matches!(events.as_slice(), [ExecutionEvent::Done { .. }]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
