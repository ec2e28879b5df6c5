//! Coalescer flush semantics against instrumented sinks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use claude_relay::cli::{RunEvent, RunResult};
use claude_relay::relay::{ProgressSink, RenderOptions, SinkError, UpdateCoalescer};

fn text_event(text: &str) -> RunEvent {
    RunEvent::TextDelta {
        fragment: text.to_string(),
        accumulated: text.to_string(),
    }
}

fn complete_event() -> RunEvent {
    RunEvent::Complete(RunResult::spawn_failure("done", Utc::now()))
}

/// Records `(start, end, body)` per push, with a configurable push
/// duration and scripted failures.
struct InstrumentedSink {
    push_duration: Duration,
    fail_first: Mutex<usize>,
    pushes: Mutex<Vec<(Instant, Instant, String)>>,
}

impl InstrumentedSink {
    fn new(push_duration: Duration) -> Self {
        Self {
            push_duration,
            fail_first: Mutex::new(0),
            pushes: Mutex::new(Vec::new()),
        }
    }

    fn failing_first(self, n: usize) -> Self {
        *self.fail_first.lock().unwrap() = n;
        self
    }

    fn recorded(&self) -> Vec<(Instant, Instant, String)> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for InstrumentedSink {
    async fn push(&self, body: &str) -> Result<(), SinkError> {
        let start = Instant::now();
        time::sleep(self.push_duration).await;

        {
            let mut fail = self.fail_first.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(SinkError::Rejected { status: 502 });
            }
        }

        self.pushes
            .lock()
            .unwrap()
            .push((start, Instant::now(), body.to_string()));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn pushes_never_overlap() {
    // Each push takes five cadence periods; ticks in between must skip.
    let sink = Arc::new(InstrumentedSink::new(Duration::from_secs(10)));
    let (tx, rx) = mpsc::channel(32);
    let handle = UpdateCoalescer::new(Arc::clone(&sink) as Arc<dyn ProgressSink>).spawn(rx);

    tx.send(text_event("one")).await.unwrap();
    time::sleep(Duration::from_secs(3)).await;
    tx.send(text_event("one two")).await.unwrap();
    time::sleep(Duration::from_secs(30)).await;

    tx.send(complete_event()).await.unwrap();
    handle.await.unwrap();

    let pushes = sink.recorded();
    assert_eq!(pushes.len(), 2);
    for window in pushes.windows(2) {
        let (_, prev_end, _) = window[0];
        let (next_start, _, _) = window[1];
        assert!(next_start >= prev_end, "pushes overlapped");
    }
}

#[tokio::test(start_paused = true)]
async fn failed_push_is_retried_on_next_tick() {
    let sink = Arc::new(InstrumentedSink::new(Duration::from_millis(10)).failing_first(1));
    let (tx, rx) = mpsc::channel(32);
    let handle = UpdateCoalescer::new(Arc::clone(&sink) as Arc<dyn ProgressSink>).spawn(rx);

    tx.send(text_event("important")).await.unwrap();
    // First tick pushes and fails; a later tick retries with no new event.
    time::sleep(Duration::from_secs(10)).await;

    let pushes = sink.recorded();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].2.contains("important"));

    tx.send(complete_event()).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn coalesces_many_events_into_few_pushes() {
    let sink = Arc::new(InstrumentedSink::new(Duration::from_millis(1)));
    let (tx, rx) = mpsc::channel(256);
    let handle = UpdateCoalescer::new(Arc::clone(&sink) as Arc<dyn ProgressSink>).spawn(rx);

    // A burst of deltas well inside one cadence period.
    let mut accumulated = String::new();
    for i in 0..50 {
        accumulated.push_str(&format!("word{i} "));
        tx.send(RunEvent::TextDelta {
            fragment: format!("word{i} "),
            accumulated: accumulated.clone(),
        })
        .await
        .unwrap();
    }
    time::sleep(Duration::from_secs(3)).await;

    let pushes = sink.recorded();
    assert_eq!(pushes.len(), 1);
    // The one push reflects the latest state, not the first.
    assert!(pushes[0].2.contains("word49"));

    tx.send(complete_event()).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn body_respects_configured_ceiling() {
    let sink = Arc::new(InstrumentedSink::new(Duration::from_millis(1)));
    let (tx, rx) = mpsc::channel(32);
    let handle = UpdateCoalescer::new(Arc::clone(&sink) as Arc<dyn ProgressSink>)
        .with_render_options(RenderOptions {
            preview_chars: 100,
            max_body_chars: 120,
        })
        .spawn(rx);

    tx.send(text_event(&"x".repeat(5000))).await.unwrap();
    time::sleep(Duration::from_secs(3)).await;

    let pushes = sink.recorded();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].2.chars().count() <= 120);

    tx.send(complete_event()).await.unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_loop() {
    let sink = Arc::new(InstrumentedSink::new(Duration::from_millis(1)));
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(32);
    let handle = UpdateCoalescer::new(Arc::clone(&sink) as Arc<dyn ProgressSink>)
        .with_cancellation(cancel.clone())
        .spawn(rx);

    cancel.cancel();
    handle.await.unwrap();

    // Sender still alive, loop already gone.
    drop(tx);
    assert!(sink.recorded().is_empty());
}
