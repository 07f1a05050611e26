// =============================================================================
// Central Application State — Reversion Engine
// =============================================================================
//
// Ties the signal engine to the presentation layer.  The engine owns its own
// interior mutability; AppState adds what the API needs on top:
//   - a broadcast channel fed by one engine subscription, so every WebSocket
//     client sees the same ordered stream of lifecycle events,
//   - a version counter bumped on every event,
//   - the access list and strategy template,
//   - a capped error log.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::access::AccessList;
use crate::engine::{EngineView, SignalEngine};
use crate::market_data::DigitStats;
use crate::poll_audit::PollRecord;
use crate::runtime_config::RuntimeConfig;
use crate::signals::notify::{SignalEvent, Subscription};
use crate::strategy_template::{StrategyTemplate, TemplateError};

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// Lagging WebSocket clients start dropping events past this backlog.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Bumped on every lifecycle event and control action.
    pub state_version: Arc<AtomicU64>,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub access_list: RwLock<AccessList>,
    pub strategy_template: RwLock<Option<StrategyTemplate>>,

    // ── Engine ──────────────────────────────────────────────────────────
    pub engine: Arc<SignalEngine>,
    events: broadcast::Sender<SignalEvent>,
    /// Engine subscription feeding `events`; taken on shutdown.
    forwarder: Mutex<Option<Subscription>>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        engine: Arc<SignalEngine>,
        access_list: AccessList,
        strategy_template: Option<StrategyTemplate>,
    ) -> Self {
        let state_version = Arc::new(AtomicU64::new(1));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let forwarder = {
            let events = events.clone();
            let version = state_version.clone();
            engine.subscribe(move |event: &SignalEvent| {
                version.fetch_add(1, Ordering::SeqCst);
                // No receivers just means no WebSocket clients right now.
                let _ = events.send(event.clone());
            })
        };

        Self {
            state_version,
            ws_sequence_number: AtomicU64::new(0),
            runtime_config: Arc::new(RwLock::new(config)),
            access_list: RwLock::new(access_list),
            strategy_template: RwLock::new(strategy_template),
            engine,
            events,
            forwarder: Mutex::new(Some(forwarder)),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// A fresh receiver for lifecycle events emitted from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SignalEvent> {
        self.events.subscribe()
    }

    /// Stop forwarding engine events. Receivers already subscribed see the
    /// channel go quiet; call after `engine.stop()` so the final `Cleared`
    /// still reaches them.
    pub fn detach_events(&self) {
        if let Some(subscription) = self.forwarder.lock().take() {
            info!(subscription = subscription.id(), "detaching event forwarder");
            subscription.unsubscribe();
        }
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The log is capped at [`MAX_RECENT_ERRORS`];
    /// oldest entries are evicted first.
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };
        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        self.increment_version();
    }

    // ── Strategy ────────────────────────────────────────────────────────

    /// The configured template with the active signal injected, or `None`
    /// when there is no template or no active signal.
    pub fn injected_strategy(&self) -> Result<Option<StrategyTemplate>, TemplateError> {
        let template = self.strategy_template.read();
        let (Some(template), Some(signal)) = (template.as_ref(), self.engine.active_signal())
        else {
            return Ok(None);
        };
        let bindings = self.runtime_config.read().strategy_bindings.clone();
        template.inject(&signal, &bindings).map(Some)
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Full serialisable state for `GET /api/v1/state` and the initial
    /// WebSocket frame.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let config = self.runtime_config.read();

        let truth = TruthHeader {
            state_version: self.current_state_version(),
            ws_sequence_number: self.ws_sequence_number.load(Ordering::Relaxed),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        };

        StateSnapshot {
            truth,
            symbol: config.feed.symbol.clone(),
            engine: self.engine.view(),
            digit_stats: self.engine.digit_stats(),
            recent_polls: self.engine.recent_polls(),
            recent_errors: self.recent_errors.read().clone(),
            config: RuntimeConfigSummary {
                buffer_capacity: config.buffer_capacity,
                min_samples: config.analyzer.min_samples,
                dominance_threshold_pct: config.analyzer.dominance_threshold_pct,
                min_confidence: config.lifecycle.min_confidence,
                signal_duration_secs: config.lifecycle.signal_duration_secs,
                stake: config.trade.stake,
                repetitions: config.trade.repetitions,
            },
        }
    }
}

// =============================================================================
// Snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub buffer_capacity: usize,
    pub min_samples: usize,
    pub dominance_threshold_pct: f64,
    pub min_confidence: f64,
    pub signal_duration_secs: u64,
    pub stake: f64,
    pub repetitions: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub truth: TruthHeader,
    pub symbol: String,
    pub engine: EngineView,
    pub digit_stats: DigitStats,
    pub recent_polls: Vec<PollRecord>,
    pub recent_errors: Vec<ErrorRecord>,
    pub config: RuntimeConfigSummary,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{TickFeed, TickSource};
    use crate::types::RawTick;
    use tokio::sync::mpsc;

    /// Connects to a feed whose sender is parked here so it never ends.
    struct IdleSource {
        senders: parking_lot::Mutex<Vec<mpsc::Sender<RawTick>>>,
    }

    #[async_trait::async_trait]
    impl TickSource for IdleSource {
        async fn connect(&self) -> anyhow::Result<TickFeed> {
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().push(tx);
            Ok(rx)
        }
    }

    fn state_with(template: Option<StrategyTemplate>) -> AppState {
        let config = RuntimeConfig::default();
        let source = Arc::new(IdleSource {
            senders: parking_lot::Mutex::new(Vec::new()),
        });
        let engine = Arc::new(SignalEngine::new(&config, source));
        let access = AccessList::from_json(r#"{ "CR1": true }"#).unwrap();
        AppState::new(config, engine, access, template)
    }

    fn fire_signal(state: &AppState) {
        for i in 0..50 {
            let value = if i < 31 { 8.0 } else { 1.0 };
            state.engine.ingest(RawTick::new(value, i));
        }
        state.engine.detect_now();
    }

    #[test]
    fn error_log_is_capped() {
        let state = state_with(None);
        for i in 0..60 {
            state.push_error(format!("error {i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "error 10");
    }

    #[test]
    fn membership_comes_from_access_list() {
        let state = state_with(None);
        let caller = crate::api::auth::authorize(&state, None, Some("CR1"));
        assert_eq!(caller, Ok(crate::api::auth::Caller::Member("CR1".into())));
        assert!(crate::api::auth::authorize(&state, None, Some("CR2")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_events_are_broadcast_and_bump_version() {
        let state = state_with(None);
        let mut rx = state.subscribe_events();
        state.engine.start().await.unwrap();
        let before = state.current_state_version();

        fire_signal(&state);

        let event = rx.try_recv().expect("created event broadcast");
        assert!(matches!(event, SignalEvent::Created { .. }));
        assert!(state.current_state_version() > before);

        let snapshot = state.build_snapshot();
        assert_eq!(snapshot.engine.buffer_len, 50);
        assert!(snapshot.engine.active_signal.is_some());
        assert_eq!(snapshot.recent_polls.len(), 1);
        assert_eq!(snapshot.symbol, "R_100");
    }

    #[tokio::test(start_paused = true)]
    async fn detached_forwarder_broadcasts_nothing_further() {
        let state = state_with(None);
        let mut rx = state.subscribe_events();
        state.engine.start().await.unwrap();
        fire_signal(&state);
        state.engine.stop();

        assert!(matches!(rx.try_recv(), Ok(SignalEvent::Created { .. })));
        assert!(matches!(rx.try_recv(), Ok(SignalEvent::Cleared { .. })));

        state.detach_events();
        state.detach_events();
        let version = state.current_state_version();

        state.engine.start().await.unwrap();
        fire_signal(&state);
        assert!(rx.try_recv().is_err());
        assert_eq!(state.current_state_version(), version);
        assert!(state.engine.active_signal().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn strategy_is_injected_only_while_active() {
        let template: StrategyTemplate = serde_json::from_str(
            r#"{ "name": "t", "fields": {
                "CONTRACT_TYPE": "DIGITOVER", "PREDICTION": 0,
                "CONFIDENCE": 0.0, "STAKE": 1.0, "RUNS": 1 } }"#,
        )
        .unwrap();
        let state = state_with(Some(template));
        assert_eq!(state.injected_strategy(), Ok(None));

        state.engine.start().await.unwrap();
        fire_signal(&state);

        let injected = state.injected_strategy().unwrap().expect("active signal");
        assert_eq!(
            injected.fields["CONTRACT_TYPE"],
            crate::strategy_template::FieldValue::Text("DIGITUNDER".into())
        );
    }
}
