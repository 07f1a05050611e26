// =============================================================================
// Runtime Configuration — Engine tuning constants with atomic save
// =============================================================================
//
// Every tunable of the signal lifecycle lives here: buffer size, analyzer
// thresholds, timer periods, recommended trade sizing and the upstream feed.
// None of the analyzer thresholds carry any statistical meaning; they are
// knobs, not behaviour.
//
// Persistence uses an atomic tmp + rename pattern.  All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::strategy_template::StrategyBindings;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_buffer_capacity() -> usize {
    100
}

fn default_min_samples() -> usize {
    50
}

fn default_dominance_threshold_pct() -> f64 {
    60.0
}

fn default_confidence_bonus() -> f64 {
    5.0
}

fn default_confidence_cap() -> f64 {
    95.0
}

fn default_detection_interval_secs() -> u64 {
    5
}

fn default_countdown_interval_secs() -> u64 {
    1
}

fn default_signal_duration_secs() -> u64 {
    120
}

fn default_min_confidence() -> f64 {
    65.0
}

fn default_stake() -> f64 {
    0.35
}

fn default_repetitions() -> u32 {
    1
}

fn default_endpoint() -> String {
    "wss://ws.derivws.com/websockets/v3".to_string()
}

fn default_app_id() -> String {
    "1089".to_string()
}

fn default_symbol() -> String {
    "R_100".to_string()
}

fn default_reconnect_backoff_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

// =============================================================================
// AnalyzerParams
// =============================================================================

/// Range a sample value is classified against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DomainBounds {
    /// Known value range, e.g. the last digit of a quote (0..=9).
    Fixed { min: f64, max: f64 },
    /// Min/max observed in the buffer at analysis time.
    Observed,
}

impl Default for DomainBounds {
    fn default() -> Self {
        Self::Fixed { min: 0.0, max: 9.0 }
    }
}

/// Thresholds for the distribution analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerParams {
    /// Below this many buffered samples the analyzer reports "not ready".
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Share (percent) one side must strictly exceed to declare a bias.
    #[serde(default = "default_dominance_threshold_pct")]
    pub dominance_threshold_pct: f64,

    /// Added to the dominant percentage to form the confidence score.
    #[serde(default = "default_confidence_bonus")]
    pub confidence_bonus: f64,

    /// Upper bound on confidence.
    #[serde(default = "default_confidence_cap")]
    pub confidence_cap: f64,

    #[serde(default)]
    pub domain: DomainBounds,
}

impl Default for AnalyzerParams {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            dominance_threshold_pct: default_dominance_threshold_pct(),
            confidence_bonus: default_confidence_bonus(),
            confidence_cap: default_confidence_cap(),
            domain: DomainBounds::default(),
        }
    }
}

// =============================================================================
// LifecycleParams
// =============================================================================

/// Timer periods and gating for the signal lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleParams {
    #[serde(default = "default_detection_interval_secs")]
    pub detection_interval_secs: u64,

    #[serde(default = "default_countdown_interval_secs")]
    pub countdown_interval_secs: u64,

    /// Lifetime of an emitted signal.
    #[serde(default = "default_signal_duration_secs")]
    pub signal_duration_secs: u64,

    /// Minimum snapshot confidence for Idle -> Active.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl LifecycleParams {
    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_secs.max(1))
    }

    pub fn countdown_interval(&self) -> Duration {
        Duration::from_secs(self.countdown_interval_secs.max(1))
    }

    pub fn signal_duration(&self) -> Duration {
        Duration::from_secs(self.signal_duration_secs)
    }
}

impl Default for LifecycleParams {
    fn default() -> Self {
        Self {
            detection_interval_secs: default_detection_interval_secs(),
            countdown_interval_secs: default_countdown_interval_secs(),
            signal_duration_secs: default_signal_duration_secs(),
            min_confidence: default_min_confidence(),
        }
    }
}

// =============================================================================
// TradeParams
// =============================================================================

/// Recommended sizing attached to every emitted signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeParams {
    #[serde(default = "default_stake")]
    pub stake: f64,

    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
}

impl Default for TradeParams {
    fn default() -> Self {
        Self {
            stake: default_stake(),
            repetitions: default_repetitions(),
        }
    }
}

// =============================================================================
// FeedConfig
// =============================================================================

/// Upstream tick feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Underlying symbol to subscribe to (e.g. `R_100`).
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Delay between reconnect attempts after the feed drops.
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,

    /// How long to wait for the first tick after subscribing.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl FeedConfig {
    pub fn url(&self) -> String {
        format!("{}?app_id={}", self.endpoint, self.app_id)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            app_id: default_app_id(),
            symbol: default_symbol(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum number of samples retained by the tick buffer.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default)]
    pub analyzer: AnalyzerParams,

    #[serde(default)]
    pub lifecycle: LifecycleParams,

    #[serde(default)]
    pub trade: TradeParams,

    #[serde(default)]
    pub feed: FeedConfig,

    /// JSON file of account id -> membership consulted by the API layer.
    #[serde(default)]
    pub access_list_path: Option<String>,

    /// JSON strategy template the active signal is injected into.
    #[serde(default)]
    pub strategy_template_path: Option<String>,

    /// Template field names each signal attribute is written to.
    #[serde(default)]
    pub strategy_bindings: StrategyBindings,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            analyzer: AnalyzerParams::default(),
            lifecycle: LifecycleParams::default(),
            trade: TradeParams::default(),
            feed: FeedConfig::default(),
            access_list_path: None,
            strategy_template_path: None,
            strategy_bindings: StrategyBindings::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.feed.symbol,
            buffer_capacity = config.buffer_capacity,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.buffer_capacity, 100);
        assert_eq!(cfg.analyzer.min_samples, 50);
        assert!((cfg.analyzer.dominance_threshold_pct - 60.0).abs() < f64::EPSILON);
        assert!((cfg.analyzer.confidence_bonus - 5.0).abs() < f64::EPSILON);
        assert!((cfg.analyzer.confidence_cap - 95.0).abs() < f64::EPSILON);
        assert_eq!(cfg.analyzer.domain, DomainBounds::Fixed { min: 0.0, max: 9.0 });
        assert_eq!(cfg.lifecycle.detection_interval(), Duration::from_secs(5));
        assert_eq!(cfg.lifecycle.countdown_interval(), Duration::from_secs(1));
        assert_eq!(cfg.lifecycle.signal_duration(), Duration::from_secs(120));
        assert!((cfg.lifecycle.min_confidence - 65.0).abs() < f64::EPSILON);
        assert_eq!(cfg.feed.reconnect_backoff(), Duration::from_secs(5));
        assert_eq!(cfg.feed.symbol, "R_100");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.buffer_capacity, 100);
        assert_eq!(cfg.trade.repetitions, 1);
        assert!(cfg.access_list_path.is_none());
        assert_eq!(cfg.strategy_bindings.target, "PREDICTION");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "analyzer": { "dominance_threshold_pct": 70.0, "domain": { "mode": "observed" } },
            "feed": { "symbol": "R_50" }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.analyzer.dominance_threshold_pct - 70.0).abs() < f64::EPSILON);
        assert_eq!(cfg.analyzer.domain, DomainBounds::Observed);
        assert_eq!(cfg.analyzer.min_samples, 50);
        assert_eq!(cfg.feed.symbol, "R_50");
        assert_eq!(cfg.feed.app_id, "1089");
    }

    #[test]
    fn zero_periods_are_clamped_to_one_second() {
        let params = LifecycleParams {
            detection_interval_secs: 0,
            countdown_interval_secs: 0,
            ..LifecycleParams::default()
        };
        assert_eq!(params.detection_interval(), Duration::from_secs(1));
        assert_eq!(params.countdown_interval(), Duration::from_secs(1));
    }

    #[test]
    fn feed_url_carries_app_id() {
        let feed = FeedConfig::default();
        assert_eq!(feed.url(), "wss://ws.derivws.com/websockets/v3?app_id=1089");
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = std::env::temp_dir().join(format!("reversion-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.trade.stake = 2.5;
        cfg.feed.symbol = "1HZ100V".to_string();
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert!((loaded.trade.stake - 2.5).abs() < f64::EPSILON);
        assert_eq!(loaded.feed.symbol, "1HZ100V");
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
