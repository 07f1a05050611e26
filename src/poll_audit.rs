// =============================================================================
// Poll Audit — Record of every detection poll and what it decided
// =============================================================================
//
// Every detection poll produces one PollRecord, fired or not, so the
// dashboard can show why no signal appeared ("insufficient samples",
// "neutral", "below threshold", "signal already active", "skipped").
// =============================================================================

use serde::Serialize;

use crate::signals::distribution::DistributionSnapshot;
use crate::signals::lifecycle::PollOutcome;

/// Outcome label of a detection poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollVerdict {
    Fired,
    InsufficientSamples,
    Neutral,
    BelowThreshold,
    SignalActive,
    /// The analyzer failed; the cycle was skipped.
    Skipped,
}

/// Auditable record of one detection poll.
#[derive(Debug, Clone, Serialize)]
pub struct PollRecord {
    /// Unique identifier for this poll (UUID v4).
    pub id: String,

    pub verdict: PollVerdict,

    /// Snapshot the decision was based on (absent when skipped).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<DistributionSnapshot>,

    /// Signal created by this poll, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,

    /// Human-readable reason for a skipped poll.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// ISO 8601 timestamp of the poll.
    pub created_at: String,
}

impl PollRecord {
    /// Record a poll the controller evaluated.
    pub fn evaluated(outcome: &PollOutcome, snapshot: DistributionSnapshot) -> Self {
        let (verdict, signal_id) = match outcome {
            PollOutcome::Fired(signal) => (PollVerdict::Fired, Some(signal.id.clone())),
            PollOutcome::InsufficientSamples => (PollVerdict::InsufficientSamples, None),
            PollOutcome::Neutral => (PollVerdict::Neutral, None),
            PollOutcome::BelowThreshold => (PollVerdict::BelowThreshold, None),
            PollOutcome::SignalActive => (PollVerdict::SignalActive, None),
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            verdict,
            snapshot: Some(snapshot),
            signal_id,
            reason: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Record a poll that was skipped because analysis failed.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            verdict: PollVerdict::Skipped,
            snapshot: None,
            signal_id: None,
            reason: Some(reason.into()),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_poll_has_no_signal() {
        let record = PollRecord::evaluated(
            &PollOutcome::InsufficientSamples,
            DistributionSnapshot::insufficient(49, 4.5),
        );
        assert_eq!(record.verdict, PollVerdict::InsufficientSamples);
        assert!(record.signal_id.is_none());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["verdict"], "INSUFFICIENT_SAMPLES");
        assert!(json.get("reason").is_none());
    }

    #[test]
    fn skipped_poll_carries_reason() {
        let record = PollRecord::skipped("invalid classification domain [9, 0]");
        assert_eq!(record.verdict, PollVerdict::Skipped);
        assert!(record.snapshot.is_none());
        assert_eq!(record.reason.as_deref(), Some("invalid classification domain [9, 0]"));
    }
}
