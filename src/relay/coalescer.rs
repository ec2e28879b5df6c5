//! Cadence-driven update coalescer.
//!
//! Consumes the event sequence of one run and pushes a rendered summary
//! to the sink on a fixed cadence, but only when state changed since the
//! last push and no push is already in flight. Contention is a no-op
//! skip, never a queue, so writes to the same remote resource can never
//! interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::cli::RunEvent;
use crate::relay::render::{clamp_chars, RenderOptions, RenderState};
use crate::relay::sink::{ProgressSink, SinkError, MAX_PUSH_CHARS};

/// Default flush cadence.
pub const DEFAULT_FLUSH_CADENCE: Duration = Duration::from_secs(2);

/// Coalesces run events into throttled sink pushes.
pub struct UpdateCoalescer {
    sink: Arc<dyn ProgressSink>,
    cadence: Duration,
    options: RenderOptions,
    cancel: CancellationToken,
}

impl UpdateCoalescer {
    /// Create a coalescer with the default cadence and render options.
    #[must_use]
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            cadence: DEFAULT_FLUSH_CADENCE,
            options: RenderOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Override the flush cadence.
    #[must_use]
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = cadence;
        self
    }

    /// Override the render options.
    #[must_use]
    pub fn with_render_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a cancellation token for caller-side shutdown.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Spawn the coalescer loop onto the runtime.
    #[must_use]
    pub fn spawn(self, events: mpsc::Receiver<RunEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Run the coalescer loop until the terminal event, channel close, or
    /// cancellation. An in-flight push is allowed to finish on its own
    /// task; it is simply never followed by another.
    pub async fn run(self, mut events: mpsc::Receiver<RunEvent>) {
        let mut state = RenderState::new(self.options);
        // First flush opportunity is one cadence period in; an immediate
        // tick would race the first events of the run.
        let mut ticker = time::interval_at(time::Instant::now() + self.cadence, self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Single-slot outcome channel: the loop owns the in-flight flag,
        // the push task reports back through here.
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<Result<(), SinkError>>(1);
        let mut in_flight = false;

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(RunEvent::Complete(_)) => {
                            tracing::debug!("Run complete, coalescer stopping");
                            break;
                        }
                        Some(event) => state.apply(&event),
                        None => {
                            tracing::debug!("Event channel closed, coalescer stopping");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !in_flight && state.take_dirty() {
                        in_flight = true;
                        // Render is already bounded; the sink limit is the
                        // final safety clamp.
                        let body = clamp_chars(&state.render(), MAX_PUSH_CHARS);
                        let sink = Arc::clone(&self.sink);
                        let outcome_tx = outcome_tx.clone();
                        tokio::spawn(async move {
                            let _ = outcome_tx.send(sink.push(&body).await).await;
                        });
                    }
                }
                maybe_outcome = outcome_rx.recv() => {
                    if let Some(outcome) = maybe_outcome {
                        in_flight = false;
                        if let Err(e) = outcome {
                            // Abandon this attempt; the next tick pushes a
                            // fresher render anyway.
                            tracing::warn!(error = %e, "Progress push failed");
                            state.mark_dirty();
                        }
                    }
                }
                () = self.cancel.cancelled() => {
                    tracing::debug!("Coalescer cancelled");
                    break;
                }
            }
        }
    }
}
