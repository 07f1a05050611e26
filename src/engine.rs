// =============================================================================
// Signal Engine — Buffer, analyzer, lifecycle controller and timers
// =============================================================================
//
// One engine instance owns:
//   - the tick buffer and the active-signal slot (behind one mutex),
//   - three tokio tasks: detection poll, countdown tick, upstream feed,
//   - the subscriber registry.
//
// Every task mutates state only while holding the core lock, so buffer and
// signal updates are strictly sequential, exactly as on a single-threaded
// event loop.  Subscriber callbacks are invoked under that same lock, which
// gives each subscriber events in transition order; callbacks therefore must
// not call back into the engine.
//
// Lifecycle:
//   start()  spawns the two timers, connects the tick source, then spawns the
//            feed task.  Handles live in a TaskGuard that aborts on drop, so a
//            start that fails midway releases everything it acquired.
//   stop()   aborts the tasks, empties the buffer, clears the active signal
//            (notifying subscribers), all synchronously.
//
// A generation counter tags every run; tasks from an older run that are
// still winding down see a stale generation and do nothing.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::market_data::{DigitStats, TickBuffer, TickFeed, TickSource};
use crate::poll_audit::PollRecord;
use crate::runtime_config::{AnalyzerParams, LifecycleParams, RuntimeConfig};
use crate::signals::lifecycle::{CountdownStep, PollOutcome};
use crate::signals::notify::SubscriberRegistry;
use crate::signals::{
    analyze, ClearReason, DistributionSnapshot, Signal, SignalController, SignalEvent,
    Subscription,
};
use crate::types::{FeedStatus, RawTick, Sample};

/// Maximum number of poll records retained for the audit trail.
const MAX_RECENT_POLLS: usize = 100;

// =============================================================================
// Read-only view
// =============================================================================

/// Point-in-time view of the engine for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct EngineView {
    pub running: bool,
    pub feed_status: FeedStatus,
    pub buffer_len: usize,
    pub buffer_capacity: usize,
    pub last_sample: Option<Sample>,
    pub last_snapshot: Option<DistributionSnapshot>,
    pub active_signal: Option<Signal>,
    pub subscribers: usize,
}

// =============================================================================
// Core state
// =============================================================================

struct EngineCore {
    buffer: TickBuffer,
    controller: SignalController,
    last_snapshot: Option<DistributionSnapshot>,
    recent_polls: VecDeque<PollRecord>,
    status: FeedStatus,
    running: bool,
    generation: u64,
}

impl EngineCore {
    /// `None` accepts any generation (direct calls through the public API).
    fn is_live(&self, generation: Option<u64>) -> bool {
        self.running && generation.map_or(true, |g| g == self.generation)
    }

    fn push_poll(&mut self, record: PollRecord) {
        self.recent_polls.push_back(record);
        while self.recent_polls.len() > MAX_RECENT_POLLS {
            self.recent_polls.pop_front();
        }
    }
}

struct EngineShared {
    analyzer: AnalyzerParams,
    core: Mutex<EngineCore>,
    subscribers: Arc<SubscriberRegistry>,
}

impl EngineShared {
    /// Open a new run: bump the generation and mark the engine live.
    fn begin_run(&self) -> u64 {
        let mut core = self.core.lock();
        core.generation += 1;
        core.running = true;
        core.status = FeedStatus::Connecting;
        core.buffer.clear();
        core.last_snapshot = None;
        core.generation
    }

    fn set_status(&self, generation: u64, status: FeedStatus) {
        let mut core = self.core.lock();
        if core.is_live(Some(generation)) && core.status != status {
            debug!(from = %core.status, to = %status, "feed status changed");
            core.status = status;
        }
    }

    fn ingest(&self, generation: Option<u64>, tick: RawTick) -> bool {
        let mut core = self.core.lock();
        if !core.is_live(generation) {
            debug!("tick dropped: engine not running");
            return false;
        }
        core.buffer.ingest(tick)
    }

    /// Detection poll: analyze the buffer and maybe fire a signal.
    fn run_detection(&self, generation: Option<u64>) {
        let mut core = self.core.lock();
        if !core.is_live(generation) {
            return;
        }

        let values = core.buffer.values();
        let record = match analyze(&values, &self.analyzer) {
            Ok(snapshot) => {
                let outcome = core.controller.on_detection(
                    &snapshot,
                    Instant::now().into_std(),
                    Utc::now(),
                );
                debug!(
                    samples = snapshot.total,
                    bias = %snapshot.bias,
                    confidence = snapshot.confidence,
                    "detection poll"
                );
                if let PollOutcome::Fired(signal) = &outcome {
                    self.subscribers.notify(&SignalEvent::Created {
                        signal: signal.clone(),
                    });
                }
                let record = PollRecord::evaluated(&outcome, snapshot.clone());
                core.last_snapshot = Some(snapshot);
                record
            }
            Err(e) => {
                warn!(error = %e, "analysis failed — skipping detection cycle");
                PollRecord::skipped(e.to_string())
            }
        };
        core.push_poll(record);
    }

    /// Countdown tick: refresh remaining time, expire when it reaches zero.
    fn run_countdown(&self, generation: Option<u64>) {
        let mut core = self.core.lock();
        if !core.is_live(generation) {
            return;
        }

        match core.controller.on_countdown(Instant::now().into_std()) {
            None => {}
            Some(CountdownStep::Running(signal)) => {
                self.subscribers.notify(&SignalEvent::Countdown { signal });
            }
            Some(CountdownStep::Expired(signal)) => {
                let signal_id = signal.id.clone();
                self.subscribers.notify(&SignalEvent::Countdown { signal });
                self.subscribers.notify(&SignalEvent::Cleared {
                    signal_id,
                    reason: ClearReason::Expired,
                });
            }
        }
    }

    /// Close the current run: empty the buffer, drop the active signal.
    fn teardown(&self, status: FeedStatus) {
        let mut core = self.core.lock();
        core.running = false;
        core.status = status;
        if !core.buffer.is_empty() {
            debug!(samples = core.buffer.len(), "discarding buffered samples");
        }
        core.buffer.clear();
        core.last_snapshot = None;
        if let Some(signal) = core.controller.clear() {
            info!(id = %signal.id, remaining_secs = signal.remaining_secs, "active signal cleared by teardown");
            self.subscribers.notify(&SignalEvent::Cleared {
                signal_id: signal.id,
                reason: ClearReason::Stopped,
            });
        }
    }
}

// =============================================================================
// Task handles
// =============================================================================

/// Owns spawned task handles and aborts them when dropped.
#[derive(Default)]
struct TaskGuard {
    handles: Vec<JoinHandle<()>>,
}

impl TaskGuard {
    fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

enum Lifecycle {
    Stopped,
    Starting(u64),
    Running(TaskGuard),
}

// =============================================================================
// SignalEngine
// =============================================================================

pub struct SignalEngine {
    shared: Arc<EngineShared>,
    source: Arc<dyn TickSource>,
    lifecycle_params: LifecycleParams,
    reconnect_backoff: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl SignalEngine {
    pub fn new(config: &RuntimeConfig, source: Arc<dyn TickSource>) -> Self {
        let core = EngineCore {
            buffer: TickBuffer::new(config.buffer_capacity),
            controller: SignalController::new(config.lifecycle.clone(), config.trade.clone()),
            last_snapshot: None,
            recent_polls: VecDeque::with_capacity(MAX_RECENT_POLLS),
            status: FeedStatus::Stopped,
            running: false,
            generation: 0,
        };

        Self {
            shared: Arc::new(EngineShared {
                analyzer: config.analyzer.clone(),
                core: Mutex::new(core),
                subscribers: SubscriberRegistry::new(),
            }),
            source,
            lifecycle_params: config.lifecycle.clone(),
            reconnect_backoff: config.feed.reconnect_backoff(),
            lifecycle: Mutex::new(Lifecycle::Stopped),
        }
    }

    /// Start the timers and subscribe to the tick source.
    ///
    /// A no-op if the engine is already starting or running. Fails with
    /// [`EngineError::UpstreamUnavailable`] if the source cannot be
    /// subscribed; nothing acquired during the attempt is left running.
    pub async fn start(&self) -> Result<(), EngineError> {
        let generation = {
            let mut lifecycle = self.lifecycle.lock();
            if !matches!(*lifecycle, Lifecycle::Stopped) {
                debug!("start ignored: engine already starting or running");
                return Ok(());
            }
            let generation = self.shared.begin_run();
            *lifecycle = Lifecycle::Starting(generation);
            generation
        };
        info!(generation, "engine starting");

        let mut tasks = TaskGuard::default();
        tasks.push(tokio::spawn(run_detection_loop(
            self.shared.clone(),
            generation,
            self.lifecycle_params.detection_interval(),
        )));
        tasks.push(tokio::spawn(run_countdown_loop(
            self.shared.clone(),
            generation,
            self.lifecycle_params.countdown_interval(),
        )));

        let feed = match self.source.connect().await {
            Ok(feed) => feed,
            Err(e) => {
                let reason = format!("{e:#}");
                error!(error = %reason, "engine failed to start");
                drop(tasks);
                let mut lifecycle = self.lifecycle.lock();
                if matches!(*lifecycle, Lifecycle::Starting(g) if g == generation) {
                    *lifecycle = Lifecycle::Stopped;
                    self.shared.teardown(FeedStatus::Disconnected);
                }
                return Err(EngineError::UpstreamUnavailable(reason));
            }
        };

        let mut lifecycle = self.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Starting(g) if g == generation) {
            warn!(generation, "engine stopped while connecting — discarding feed");
            return Err(EngineError::Cancelled);
        }

        self.shared.set_status(generation, FeedStatus::Connected);
        tasks.push(tokio::spawn(run_feed(
            self.shared.clone(),
            self.source.clone(),
            feed,
            generation,
            self.reconnect_backoff,
        )));
        *lifecycle = Lifecycle::Running(tasks);

        info!(generation, "engine running");
        Ok(())
    }

    /// Cancel all timers and the feed, empty the buffer and clear the active
    /// signal. Safe to call repeatedly.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Stopped);
        match previous {
            Lifecycle::Stopped => {
                debug!("stop ignored: engine not running");
                return;
            }
            Lifecycle::Starting(generation) => {
                info!(generation, "engine stopped while starting");
            }
            Lifecycle::Running(tasks) => drop(tasks),
        }
        self.shared.teardown(FeedStatus::Stopped);
        info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.core.lock().running
    }

    /// Push a tick directly into the buffer. Malformed ticks and ticks
    /// arriving while stopped are dropped; returns whether it was kept.
    pub fn ingest(&self, tick: RawTick) -> bool {
        self.shared.ingest(None, tick)
    }

    /// Run one detection poll now, outside the timer schedule.
    #[cfg(test)]
    pub fn detect_now(&self) {
        self.shared.run_detection(None);
    }

    /// Register a callback for signal transitions. Keep the handle alive for
    /// as long as events are wanted.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(callback)
    }

    pub fn view(&self) -> EngineView {
        let view = {
            let core = self.shared.core.lock();
            EngineView {
                running: core.running,
                feed_status: core.status,
                buffer_len: core.buffer.len(),
                buffer_capacity: core.buffer.capacity(),
                last_sample: core.buffer.last().copied(),
                last_snapshot: core.last_snapshot.clone(),
                active_signal: core.controller.active().cloned(),
                subscribers: 0,
            }
        };
        EngineView {
            subscribers: self.shared.subscribers.len(),
            ..view
        }
    }

    pub fn active_signal(&self) -> Option<Signal> {
        self.shared.core.lock().controller.active().cloned()
    }

    pub fn recent_polls(&self) -> Vec<PollRecord> {
        self.shared.core.lock().recent_polls.iter().cloned().collect()
    }

    pub fn digit_stats(&self) -> DigitStats {
        let values = self.shared.core.lock().buffer.values();
        DigitStats::from_values(&values)
    }
}

impl Drop for SignalEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn run_detection_loop(shared: Arc<EngineShared>, generation: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        shared.run_detection(Some(generation));
    }
}

async fn run_countdown_loop(shared: Arc<EngineShared>, generation: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        shared.run_countdown(Some(generation));
    }
}

/// Drain the feed into the buffer; on loss, keep resubscribing every
/// `backoff` until the engine is stopped (which aborts this task).
async fn run_feed(
    shared: Arc<EngineShared>,
    source: Arc<dyn TickSource>,
    mut feed: TickFeed,
    generation: u64,
    backoff: Duration,
) {
    loop {
        while let Some(tick) = feed.recv().await {
            shared.ingest(Some(generation), tick);
        }

        warn!(
            backoff_secs = backoff.as_secs(),
            "tick feed ended — reconnecting"
        );
        shared.set_status(generation, FeedStatus::Disconnected);

        feed = loop {
            tokio::time::sleep(backoff).await;
            match source.connect().await {
                Ok(feed) => {
                    info!("tick feed reconnected");
                    shared.set_status(generation, FeedStatus::Connected);
                    break feed;
                }
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "tick feed reconnect failed");
                }
            }
        };
    }
}

// =============================================================================
// Tests
// =============================================================================
