// =============================================================================
// Distribution Analyzer — High/low split of the tick buffer
// =============================================================================
//
// Classifies every buffered sample against the midpoint of the domain
// (value >= midpoint is HIGH) and reports which side dominates.
//
//   bias       = HIGH | LOW   if that side's share > dominance threshold
//              = NEUTRAL      otherwise
//   confidence = min(dominant_pct + bonus, cap)   (0 when NEUTRAL)
//
// The analyzer only reports the dominant side.  Turning it into a
// mean-reversion recommendation is the lifecycle controller's job.

use serde::Serialize;
use thiserror::Error;

use crate::runtime_config::{AnalyzerParams, DomainBounds};
use crate::types::Bias;

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisError {
    #[error("invalid classification domain [{min}, {max}]")]
    InvalidDomain { min: f64, max: f64 },
}

/// Result of one analysis pass. Derived fresh every poll, never stored as
/// engine state beyond "last seen".
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DistributionSnapshot {
    pub total: usize,
    pub high_count: usize,
    pub low_count: usize,
    pub high_pct: f64,
    pub low_pct: f64,
    /// Values at or above this are classified HIGH.
    pub midpoint: f64,
    pub bias: Bias,
    pub confidence: f64,
    /// False when the buffer held fewer than `min_samples`.
    pub sufficient: bool,
}

impl DistributionSnapshot {
    /// Neutral, zero-confidence snapshot for a buffer that is not ready yet.
    pub fn insufficient(total: usize, midpoint: f64) -> Self {
        Self {
            total,
            high_count: 0,
            low_count: 0,
            high_pct: 0.0,
            low_pct: 0.0,
            midpoint,
            bias: Bias::Neutral,
            confidence: 0.0,
            sufficient: false,
        }
    }
}

/// Analyze buffered values (oldest first).
pub fn analyze(values: &[f64], params: &AnalyzerParams) -> Result<DistributionSnapshot, AnalysisError> {
    if values.len() < params.min_samples || values.is_empty() {
        // Bounds are only validated once the window is full.
        let midpoint = bounds(values, params.domain).map_or(0.0, |(min, max)| (min + max) / 2.0);
        return Ok(DistributionSnapshot::insufficient(values.len(), midpoint));
    }

    let (min, max) = bounds(values, params.domain)?;
    let midpoint = (min + max) / 2.0;
    let total = values.len();

    // A flat observed window carries no high/low information.
    if matches!(params.domain, DomainBounds::Observed) && min == max {
        return Ok(DistributionSnapshot {
            sufficient: true,
            ..DistributionSnapshot::insufficient(total, midpoint)
        });
    }

    let high_count = values.iter().filter(|&&v| v >= midpoint).count();
    let low_count = total - high_count;

    let high_pct = high_count as f64 * 100.0 / total as f64;
    let low_pct = low_count as f64 * 100.0 / total as f64;

    let (bias, dominant_pct) = if high_pct > params.dominance_threshold_pct {
        (Bias::High, high_pct)
    } else if low_pct > params.dominance_threshold_pct {
        (Bias::Low, low_pct)
    } else {
        (Bias::Neutral, 0.0)
    };

    let confidence = match bias {
        Bias::Neutral => 0.0,
        _ => (dominant_pct + params.confidence_bonus).min(params.confidence_cap),
    };

    Ok(DistributionSnapshot {
        total,
        high_count,
        low_count,
        high_pct,
        low_pct,
        midpoint,
        bias,
        confidence,
        sufficient: true,
    })
}

fn bounds(values: &[f64], domain: DomainBounds) -> Result<(f64, f64), AnalysisError> {
    let (min, max) = match domain {
        DomainBounds::Fixed { min, max } => (min, max),
        DomainBounds::Observed => {
            if values.is_empty() {
                return Ok((0.0, 0.0));
            }
            values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
        }
    };

    if !min.is_finite() || !max.is_finite() || min > max {
        return Err(AnalysisError::InvalidDomain { min, max });
    }

    Ok((min, max))
}
