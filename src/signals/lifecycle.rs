// =============================================================================
// Signal Lifecycle Controller — Idle / Active state machine
// =============================================================================
//
//   Idle   --detection poll, bias != NEUTRAL, confidence >= min-->  Active
//   Active --countdown reaches 0-->                                 Idle
//   Active --teardown-->                                            Idle
//
// Detection polls while Active are ignored, so at most one signal exists at
// any time.  The controller never reads a clock itself: callers pass `now`,
// which keeps the state machine deterministic under test.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::runtime_config::{LifecycleParams, TradeParams};
use crate::signals::distribution::DistributionSnapshot;
use crate::types::{Bias, Zone};

/// The user-facing recommendation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Signal {
    /// Unique per emission (UUID v4).
    pub id: String,
    /// Zone to bet on: the opposite of the dominant bias.
    pub classification: Zone,
    /// Bias observed when the signal fired.
    pub detected_bias: Bias,
    /// Barrier value for the recommended contract.
    pub target: f64,
    pub confidence: f64,
    /// Recommended stake per contract.
    pub stake: f64,
    /// Recommended number of consecutive contracts.
    pub repetitions: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_secs: u64,
}

/// What a detection poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Fired(Signal),
    InsufficientSamples,
    Neutral,
    BelowThreshold,
    SignalActive,
}

/// What a countdown tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum CountdownStep {
    /// Still active; carries the signal with refreshed `remaining_secs`.
    Running(Signal),
    /// Remaining time hit zero. The signal (with `remaining_secs == 0`) has
    /// been removed and the controller is Idle.
    Expired(Signal),
}

#[derive(Debug)]
struct ActiveSignal {
    signal: Signal,
    deadline: Instant,
}

pub struct SignalController {
    lifecycle: LifecycleParams,
    trade: TradeParams,
    active: Option<ActiveSignal>,
}

impl SignalController {
    pub fn new(lifecycle: LifecycleParams, trade: TradeParams) -> Self {
        Self {
            lifecycle,
            trade,
            active: None,
        }
    }

    pub fn active(&self) -> Option<&Signal> {
        self.active.as_ref().map(|a| &a.signal)
    }

    /// Evaluate a fresh snapshot. Fires at most one signal.
    pub fn on_detection(
        &mut self,
        snapshot: &DistributionSnapshot,
        now: Instant,
        wall_now: DateTime<Utc>,
    ) -> PollOutcome {
        if self.active.is_some() {
            return PollOutcome::SignalActive;
        }
        if !snapshot.sufficient {
            return PollOutcome::InsufficientSamples;
        }
        let Some(classification) = snapshot.bias.reverted() else {
            return PollOutcome::Neutral;
        };
        if snapshot.confidence < self.lifecycle.min_confidence {
            debug!(
                confidence = snapshot.confidence,
                min = self.lifecycle.min_confidence,
                "snapshot below confidence threshold"
            );
            return PollOutcome::BelowThreshold;
        }

        let duration = self.lifecycle.signal_duration();
        let signal = Signal {
            id: uuid::Uuid::new_v4().to_string(),
            classification,
            detected_bias: snapshot.bias,
            target: classification.target(snapshot.midpoint),
            confidence: snapshot.confidence,
            stake: self.trade.stake,
            repetitions: self.trade.repetitions,
            created_at: wall_now,
            expires_at: wall_now
                + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero()),
            remaining_secs: duration.as_secs(),
        };

        info!(
            id = %signal.id,
            classification = %signal.classification,
            bias = %signal.detected_bias,
            confidence = signal.confidence,
            "signal created"
        );

        self.active = Some(ActiveSignal {
            signal: signal.clone(),
            deadline: now + duration,
        });
        PollOutcome::Fired(signal)
    }

    /// Recompute remaining time. Returns `None` while Idle.
    pub fn on_countdown(&mut self, now: Instant) -> Option<CountdownStep> {
        let active = self.active.as_mut()?;

        let remaining = ceil_secs(active.deadline.saturating_duration_since(now));
        // Never let the display tick back up.
        active.signal.remaining_secs = active.signal.remaining_secs.min(remaining);

        if active.signal.remaining_secs == 0 {
            let expired = self.active.take().map(|a| a.signal)?;
            info!(id = %expired.id, "signal expired");
            return Some(CountdownStep::Expired(expired));
        }

        Some(CountdownStep::Running(active.signal.clone()))
    }

    /// Drop the active signal, if any (engine teardown).
    pub fn clear(&mut self) -> Option<Signal> {
        self.active.take().map(|a| a.signal)
    }
}

fn ceil_secs(d: std::time::Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
