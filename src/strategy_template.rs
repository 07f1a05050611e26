// =============================================================================
// Strategy Template — Inject the active signal into a contract template
// =============================================================================
//
// A template is a named bag of typed fields, loaded from JSON:
//
//   { "name": "digit-reversion",
//     "fields": { "CONTRACT_TYPE": "DIGITOVER", "PREDICTION": 4,
//                 "CONFIDENCE": 0.0, "STAKE": 1.0, "RUNS": 1 } }
//
// `StrategyBindings` says which field receives which signal attribute.
// Injection never mutates the loaded template; it returns a patched copy.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::signals::lifecycle::Signal;

fn default_classification_field() -> String {
    "CONTRACT_TYPE".to_string()
}

fn default_target_field() -> String {
    "PREDICTION".to_string()
}

fn default_confidence_field() -> String {
    "CONFIDENCE".to_string()
}

fn default_stake_field() -> String {
    "STAKE".to_string()
}

fn default_repetitions_field() -> String {
    "RUNS".to_string()
}

/// Template field name for each signal attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyBindings {
    #[serde(default = "default_classification_field")]
    pub classification: String,
    #[serde(default = "default_target_field")]
    pub target: String,
    #[serde(default = "default_confidence_field")]
    pub confidence: String,
    #[serde(default = "default_stake_field")]
    pub stake: String,
    #[serde(default = "default_repetitions_field")]
    pub repetitions: String,
}

impl Default for StrategyBindings {
    fn default() -> Self {
        Self {
            classification: default_classification_field(),
            target: default_target_field(),
            confidence: default_confidence_field(),
            stake: default_stake_field(),
            repetitions: default_repetitions_field(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template has no field named {0}")]
    MissingField(String),
}

/// A single template value. Integers are tried before floats so that `4`
/// stays `4` on the way back out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTemplate {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl StrategyTemplate {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strategy template from {}", path.display()))?;
        let template: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse strategy template from {}", path.display()))?;
        info!(
            path = %path.display(),
            name = %template.name,
            fields = template.fields.len(),
            "strategy template loaded"
        );
        Ok(template)
    }

    /// Copy of this template with the signal's attributes written into the
    /// bound fields. Every bound field must already exist.
    pub fn inject(
        &self,
        signal: &Signal,
        bindings: &StrategyBindings,
    ) -> Result<StrategyTemplate, TemplateError> {
        let mut patched = self.clone();

        // Targets are whole digits in the default domain; keep them integral
        // when they are.
        let target = if signal.target.fract() == 0.0 {
            FieldValue::Integer(signal.target as i64)
        } else {
            FieldValue::Number(signal.target)
        };

        let writes = [
            (
                &bindings.classification,
                FieldValue::Text(signal.classification.contract_type().to_string()),
            ),
            (&bindings.target, target),
            (&bindings.confidence, FieldValue::Number(signal.confidence)),
            (&bindings.stake, FieldValue::Number(signal.stake)),
            (
                &bindings.repetitions,
                FieldValue::Integer(i64::from(signal.repetitions)),
            ),
        ];

        for (field, value) in writes {
            let slot = patched
                .fields
                .get_mut(field.as_str())
                .ok_or_else(|| TemplateError::MissingField(field.clone()))?;
            *slot = value;
        }

        Ok(patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bias, Zone};
    use chrono::Utc;

    const TEMPLATE_JSON: &str = r#"{
        "name": "digit-reversion",
        "fields": {
            "CONTRACT_TYPE": "DIGITOVER",
            "PREDICTION": 0,
            "CONFIDENCE": 0.0,
            "STAKE": 1.0,
            "RUNS": 3,
            "DURATION": 1,
            "MARTINGALE": false
        }
    }"#;

    fn signal(classification: Zone, target: f64) -> Signal {
        let now = Utc::now();
        Signal {
            id: "sig-1".to_string(),
            classification,
            detected_bias: Bias::High,
            target,
            confidence: 67.0,
            stake: 0.35,
            repetitions: 1,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(120),
            remaining_secs: 120,
        }
    }

    fn template() -> StrategyTemplate {
        serde_json::from_str(TEMPLATE_JSON).unwrap()
    }

    #[test]
    fn untagged_values_keep_their_types() {
        let t = template();
        assert_eq!(t.fields["PREDICTION"], FieldValue::Integer(0));
        assert_eq!(t.fields["STAKE"], FieldValue::Number(1.0));
        assert_eq!(t.fields["MARTINGALE"], FieldValue::Bool(false));
        assert_eq!(t.fields["CONTRACT_TYPE"], FieldValue::Text("DIGITOVER".into()));
    }

    #[test]
    fn low_signal_becomes_digitunder() {
        let original = template();
        let patched = original
            .inject(&signal(Zone::Low, 5.0), &StrategyBindings::default())
            .unwrap();

        assert_eq!(patched.fields["CONTRACT_TYPE"], FieldValue::Text("DIGITUNDER".into()));
        assert_eq!(patched.fields["PREDICTION"], FieldValue::Integer(5));
        assert_eq!(patched.fields["CONFIDENCE"], FieldValue::Number(67.0));
        assert_eq!(patched.fields["STAKE"], FieldValue::Number(0.35));
        assert_eq!(patched.fields["RUNS"], FieldValue::Integer(1));
        // Unbound fields untouched, source template unchanged.
        assert_eq!(patched.fields["DURATION"], FieldValue::Integer(1));
        assert_eq!(original, template());
    }

    #[test]
    fn fractional_target_stays_a_number() {
        let patched = template()
            .inject(&signal(Zone::High, 110.5), &StrategyBindings::default())
            .unwrap();
        assert_eq!(patched.fields["CONTRACT_TYPE"], FieldValue::Text("DIGITOVER".into()));
        assert_eq!(patched.fields["PREDICTION"], FieldValue::Number(110.5));
    }

    #[test]
    fn missing_bound_field_is_reported() {
        let bindings = StrategyBindings {
            target: "BARRIER".to_string(),
            ..StrategyBindings::default()
        };
        assert_eq!(
            template().inject(&signal(Zone::Low, 5.0), &bindings),
            Err(TemplateError::MissingField("BARRIER".to_string()))
        );
    }

    #[test]
    fn load_reads_template_file() {
        let dir = std::env::temp_dir().join(format!("strategy-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("template.json");
        std::fs::write(&path, TEMPLATE_JSON).unwrap();

        let loaded = StrategyTemplate::load(&path).unwrap();
        assert_eq!(loaded.name, "digit-reversion");
        assert_eq!(loaded.fields.len(), 7);

        assert!(StrategyTemplate::load(dir.join("missing.json")).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
