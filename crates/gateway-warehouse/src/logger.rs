//! # Adaptive Event Logger (C2)
//!
//! Every mutation in the system is an event write before it is anything
//! else (§2 Two-Object-Store Law). Under light load each event is written
//! with `log_event` as it happens; once the rolling rate crosses a
//! threshold the logger switches to a time/size-bounded buffer flushed with
//! `log_events_batch`, trading per-event latency for warehouse write
//! throughput (§4.2).

use crate::session::WarehouseSession;
use gateway_core::events::EventKind;
use gateway_core::{GatewayError, GatewayResult};
use gateway_mcp::Procedure;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Hard cap on a single batch call regardless of how far buffering has
/// fallen behind (§4.2).
pub const MAX_BATCH_SIZE: usize = 1000;

/// Default time-bounded flush window once batching kicks in.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(5);

/// Default event count that forces an early flush within the window.
pub const DEFAULT_BATCH_EVENT_CAP: usize = 100;

/// Events-per-minute above which the logger switches from single-event to
/// batched writes; below it (with hysteresis) it switches back.
const BATCH_TRIGGER_RATE: usize = 60;
const SINGLE_RESUME_RATE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Single,
    Batched,
}

struct RateCounter {
    window: VecDeque<Instant>,
}

impl RateCounter {
    fn new() -> Self {
        Self { window: VecDeque::new() }
    }

    /// Records one event and returns the rolling one-minute count.
    fn record(&mut self) -> usize {
        let now = Instant::now();
        self.window.push_back(now);
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                self.window.pop_front();
            } else {
                break;
            }
        }
        self.window.len()
    }
}

struct LoggerState {
    mode: Mode,
    rate: RateCounter,
    buffer: Vec<EventKind>,
    buffer_opened_at: Option<Instant>,
}

/// Adaptive logger wrapping a [`WarehouseSession`]. Cheap to clone: internal
/// state is behind an `Arc<Mutex<_>>` so a background flush task and
/// foreground callers share the same buffer.
#[derive(Clone)]
pub struct EventLogger {
    session: Arc<WarehouseSession>,
    state: Arc<Mutex<LoggerState>>,
    batch_window: Duration,
    batch_event_cap: usize,
}

impl EventLogger {
    pub fn new(session: Arc<WarehouseSession>) -> Self {
        Self {
            session,
            state: Arc::new(Mutex::new(LoggerState {
                mode: Mode::Single,
                rate: RateCounter::new(),
                buffer: Vec::new(),
                buffer_opened_at: None,
            })),
            batch_window: DEFAULT_BATCH_WINDOW,
            batch_event_cap: DEFAULT_BATCH_EVENT_CAP,
        }
    }

    /// Spawns the background task that flushes a batched buffer once it has
    /// been open longer than the batch window, even if the event cap never
    /// fires. Returns a handle the caller should keep alive.
    pub fn spawn_flush_task(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                let due = {
                    let state = this.state.lock().await;
                    state.mode == Mode::Batched
                        && state
                            .buffer_opened_at
                            .map(|t| t.elapsed() >= this.batch_window)
                            .unwrap_or(false)
                };
                if due {
                    if let Err(err) = this.flush().await {
                        warn!(error = %err, "scheduled event flush failed");
                    }
                }
            }
        })
    }

    /// `log`: records a single event. Switches the logger into batched mode
    /// once the rolling rate crosses [`BATCH_TRIGGER_RATE`] events/minute.
    pub async fn log(&self, event: EventKind) -> GatewayResult<()> {
        let (mode, should_flush_now) = {
            let mut state = self.state.lock().await;
            let rate = state.rate.record();
            match state.mode {
                Mode::Single if rate >= BATCH_TRIGGER_RATE => {
                    info!(rate, "event rate crossed threshold, switching to batched mode");
                    state.mode = Mode::Batched;
                }
                Mode::Batched if rate <= SINGLE_RESUME_RATE => {
                    info!(rate, "event rate subsided, switching to single-event mode");
                    state.mode = Mode::Single;
                }
                _ => {}
            }

            if state.mode == Mode::Batched {
                if state.buffer.is_empty() {
                    state.buffer_opened_at = Some(Instant::now());
                }
                state.buffer.push(event.clone());
                let flush_now = state.buffer.len() >= self.batch_event_cap
                    || state.buffer.len() >= MAX_BATCH_SIZE;
                (Mode::Batched, flush_now)
            } else {
                (Mode::Single, false)
            }
        };

        if mode == Mode::Single {
            return self.write_single(event).await;
        }
        if should_flush_now {
            self.flush().await?;
        }
        Ok(())
    }

    async fn write_single(&self, event: EventKind) -> GatewayResult<()> {
        debug!(action = event.action(), object = ?event.object(), "logging single event");
        self.session
            .call_procedure(Procedure::LogEvent, vec![serde_json::to_value(&event).map_err(
                |e| GatewayError::Other { message: e.to_string() },
            )?])
            .await?;
        Ok(())
    }

    /// `log_batch`: directly writes a caller-provided batch (used by callers
    /// that already hold a batch, e.g. a bulk import), capped at
    /// [`MAX_BATCH_SIZE`] regardless of the logger's current mode.
    pub async fn log_batch(&self, events: Vec<EventKind>) -> GatewayResult<()> {
        for chunk in events.chunks(MAX_BATCH_SIZE) {
            let payload = serde_json::to_value(chunk)
                .map_err(|e| GatewayError::Other { message: e.to_string() })?;
            self.session
                .call_procedure(Procedure::LogEventsBatch, vec![payload])
                .await?;
        }
        Ok(())
    }

    /// Whether the logger is currently in batched mode (§10.6 metrics gauge).
    pub async fn is_batched(&self) -> bool {
        self.state.lock().await.mode == Mode::Batched
    }

    /// `flush`: drains and writes whatever is currently buffered.
    pub async fn flush(&self) -> GatewayResult<()> {
        let drained = {
            let mut state = self.state.lock().await;
            state.buffer_opened_at = None;
            std::mem::take(&mut state.buffer)
        };
        if drained.is_empty() {
            return Ok(());
        }
        debug!(count = drained.len(), "flushing batched events");
        self.log_batch(drained).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_counter_drops_entries_older_than_one_minute() {
        let mut rc = RateCounter::new();
        for _ in 0..5 {
            rc.record();
        }
        assert_eq!(rc.window.len(), 5);
    }
}
