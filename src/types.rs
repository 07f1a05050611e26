// =============================================================================
// Shared types used across the reversion engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A raw event as delivered by an upstream tick source.
///
/// Nothing about the value is trusted yet; the ingestor validates it before
/// it becomes a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub value: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl RawTick {
    pub fn new(value: f64, timestamp: i64) -> Self {
        Self { value, timestamp }
    }
}

/// One validated observation held in the tick buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub value: f64,
    pub timestamp: i64,
}

impl Sample {
    /// Validate a raw tick. Returns `None` for non-finite values.
    pub fn from_raw(tick: RawTick) -> Option<Self> {
        if tick.value.is_finite() {
            Some(Self {
                value: tick.value,
                timestamp: tick.timestamp,
            })
        } else {
            None
        }
    }
}

/// Side of the classification midpoint a sample (or a recommendation) sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    High,
    Low,
}

impl Zone {
    /// Barrier value for a contract betting on this zone.
    ///
    /// With the digit domain 0..=9 (midpoint 4.5) HIGH maps to "over 4" and
    /// LOW maps to "under 5".
    pub fn target(self, midpoint: f64) -> f64 {
        match self {
            Self::High => midpoint.floor(),
            Self::Low => midpoint.ceil(),
        }
    }

    /// Brokerage contract type that wins when the next sample lands in this
    /// zone.
    pub fn contract_type(self) -> &'static str {
        match self {
            Self::High => "DIGITOVER",
            Self::Low => "DIGITUNDER",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Dominant classification detected in a buffer window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bias {
    High,
    Low,
    Neutral,
}

impl Bias {
    /// The zone a mean-reversion recommendation should bet on, or `None` when
    /// no side dominates.
    pub fn reverted(self) -> Option<Zone> {
        match self {
            Self::High => Some(Zone::Low),
            Self::Low => Some(Zone::High),
            Self::Neutral => None,
        }
    }
}

impl Default for Bias {
    fn default() -> Self {
        Self::Neutral
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Low => write!(f, "LOW"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Connection state of the upstream feed as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedStatus {
    Stopped,
    Connecting,
    Connected,
    Disconnected,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_ticks_are_rejected() {
        assert!(Sample::from_raw(RawTick::new(f64::NAN, 0)).is_none());
        assert!(Sample::from_raw(RawTick::new(f64::INFINITY, 0)).is_none());
        assert_eq!(
            Sample::from_raw(RawTick::new(7.0, 42)),
            Some(Sample { value: 7.0, timestamp: 42 })
        );
    }

    #[test]
    fn bias_reverts_to_opposite_zone() {
        assert_eq!(Bias::High.reverted(), Some(Zone::Low));
        assert_eq!(Bias::Low.reverted(), Some(Zone::High));
        assert_eq!(Bias::Neutral.reverted(), None);
    }

    #[test]
    fn digit_targets_straddle_midpoint() {
        assert_eq!(Zone::High.target(4.5), 4.0);
        assert_eq!(Zone::Low.target(4.5), 5.0);
        assert_eq!(Zone::Low.contract_type(), "DIGITUNDER");
    }

    #[test]
    fn zone_serialises_uppercase() {
        assert_eq!(serde_json::to_string(&Zone::Low).unwrap(), "\"LOW\"");
        assert_eq!(serde_json::to_string(&Bias::Neutral).unwrap(), "\"NEUTRAL\"");
    }
}
