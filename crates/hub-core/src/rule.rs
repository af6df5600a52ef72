//! Rule definitions
//!
//! A rule is a single-condition trigger: when an event of `trigger_type`
//! carries the condition's measurement and the measurement compares true
//! against the threshold, the rule's `action` is applied to
//! `target_device_id`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::EventType;

/// Rule validation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("rule field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("rule condition must have exactly one measurement, found {0}")]
    ConditionArity(usize),

    #[error("threshold for '{key}' must be a finite number")]
    NonFiniteThreshold { key: String },

    #[error(transparent)]
    UnknownOperator(#[from] UnknownOperator),
}

/// An operator string that is not one of `>`, `<`, `==`, `>=`, `<=`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown comparison operator '{0}'")]
pub struct UnknownOperator(pub String);

/// Comparison operator applied as `measurement <op> threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `==`
    Eq,
    /// `>=`
    Ge,
    /// `<=`
    Le,
}

impl Operator {
    /// All operators, in wire order
    pub const ALL: [Operator; 5] = [
        Operator::Gt,
        Operator::Lt,
        Operator::Eq,
        Operator::Ge,
        Operator::Le,
    ];

    /// Wire symbol for this operator
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "==",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }

    /// Compare `value <op> threshold` with IEEE double semantics.
    ///
    /// `==` is exact equality. Any comparison involving NaN is false.
    #[allow(clippy::float_cmp)]
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Gt => value > threshold,
            Operator::Lt => value < threshold,
            Operator::Eq => value == threshold,
            Operator::Ge => value >= threshold,
            Operator::Le => value <= threshold,
        }
    }
}

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Operator::Gt),
            "<" => Ok(Operator::Lt),
            "==" => Ok(Operator::Eq),
            ">=" => Ok(Operator::Ge),
            "<=" => Ok(Operator::Le),
            other => Err(UnknownOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = UnknownOperator;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single measurement condition of a rule
///
/// Serialized as a one-entry map, e.g. `{"temperature": 28.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, f64>", into = "BTreeMap<String, f64>")]
pub struct RuleCondition {
    /// Measurement name looked up in the event
    pub key: String,
    /// Right-hand side of the comparison
    pub threshold: f64,
}

impl RuleCondition {
    pub fn new(key: impl Into<String>, threshold: f64) -> Self {
        Self {
            key: key.into(),
            threshold,
        }
    }
}

impl TryFrom<BTreeMap<String, f64>> for RuleCondition {
    type Error = RuleError;

    fn try_from(map: BTreeMap<String, f64>) -> Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(RuleError::ConditionArity(map.len()));
        }
        let (key, threshold) = map
            .into_iter()
            .next()
            .ok_or(RuleError::ConditionArity(0))?;
        Ok(Self { key, threshold })
    }
}

impl From<RuleCondition> for BTreeMap<String, f64> {
    fn from(condition: RuleCondition) -> Self {
        BTreeMap::from([(condition.key, condition.threshold)])
    }
}

/// Rule creation payload (administrative API)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub trigger_type: EventType,
    pub condition: RuleCondition,
    pub operator: Operator,
    pub target_device_id: String,
    pub action: String,
}

impl NewRule {
    /// Check field-level invariants
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.trim().is_empty() {
            return Err(RuleError::EmptyField("name"));
        }
        if self.trigger_type.as_str().is_empty() {
            return Err(RuleError::EmptyField("trigger_type"));
        }
        if self.condition.key.is_empty() {
            return Err(RuleError::EmptyField("condition"));
        }
        if !self.condition.threshold.is_finite() {
            return Err(RuleError::NonFiniteThreshold {
                key: self.condition.key.clone(),
            });
        }
        if self.target_device_id.is_empty() {
            return Err(RuleError::EmptyField("target_device_id"));
        }
        if self.action.is_empty() {
            return Err(RuleError::EmptyField("action"));
        }
        Ok(())
    }

    /// Validate and assign an id and creation time
    pub fn into_rule(self) -> Result<Rule, RuleError> {
        self.validate()?;
        Ok(Rule {
            id: crate::new_id(),
            name: self.name,
            trigger_type: self.trigger_type,
            condition: self.condition,
            operator: self.operator,
            target_device_id: self.target_device_id,
            action: self.action,
            created_at: Utc::now(),
        })
    }
}

/// A persisted trigger definition
///
/// Read-only from the pipeline's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier (ULID)
    pub id: String,

    /// Human-readable name, unique across rules
    pub name: String,

    /// Event type this rule reacts to
    pub trigger_type: EventType,

    /// Measurement and threshold
    pub condition: RuleCondition,

    /// How the measurement is compared against the threshold
    pub operator: Operator,

    /// Device the action is applied to
    pub target_device_id: String,

    /// Opaque action tag (e.g. "turn_on_heater")
    pub action: String,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Rule {
    /// Build a rule directly, bypassing validation
    pub fn new(
        name: impl Into<String>,
        trigger_type: impl Into<EventType>,
        condition: RuleCondition,
        operator: Operator,
        target_device_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            name: name.into(),
            trigger_type: trigger_type.into(),
            condition,
            operator,
            target_device_id: target_device_id.into(),
            action: action.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operator_round_trip_symbols() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>(), Ok(op));
        }
    }

    #[test]
    fn test_unknown_operator_is_an_error() {
        assert_eq!(
            "!=".parse::<Operator>(),
            Err(UnknownOperator("!=".to_string()))
        );

        let result: Result<Operator, _> = serde_json::from_value(json!("=>"));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("unknown comparison operator"));
    }

    #[test]
    fn test_operator_apply() {
        assert!(Operator::Gt.apply(29.0, 28.0));
        assert!(!Operator::Gt.apply(28.0, 28.0));
        assert!(Operator::Lt.apply(27.0, 28.0));
        assert!(Operator::Ge.apply(28.0, 28.0));
        assert!(Operator::Le.apply(28.0, 28.0));
        assert!(!Operator::Le.apply(28.5, 28.0));
    }

    #[test]
    fn test_equality_is_exact_not_epsilon() {
        assert!(Operator::Eq.apply(28.0, 28.0));
        assert!(!Operator::Eq.apply(0.1 + 0.2, 0.3));
        assert!(!Operator::Eq.apply(28.0 + f64::EPSILON * 32.0, 28.0));
    }

    #[test]
    fn test_nan_never_compares_true() {
        for op in Operator::ALL {
            assert!(!op.apply(f64::NAN, 1.0));
        }
    }

    #[test]
    fn test_condition_requires_single_entry() {
        let ok: RuleCondition = serde_json::from_value(json!({"temperature": 28.0})).unwrap();
        assert_eq!(ok, RuleCondition::new("temperature", 28.0));

        let empty: Result<RuleCondition, _> = serde_json::from_value(json!({}));
        assert!(empty.is_err());

        let two: Result<RuleCondition, _> =
            serde_json::from_value(json!({"temperature": 28.0, "humidity": 40.0}));
        assert!(two.unwrap_err().to_string().contains("exactly one"));
    }

    #[test]
    fn test_parse_rule_payload() {
        let new_rule: NewRule = serde_json::from_value(json!({
            "name": "Hot temp triggers AC",
            "trigger_type": "temperature_change",
            "condition": {"temperature": 28.0},
            "operator": ">",
            "target_device_id": "device-123",
            "action": "turn_on"
        }))
        .unwrap();

        let rule = new_rule.into_rule().unwrap();
        assert_eq!(rule.operator, Operator::Gt);
        assert_eq!(rule.condition.key, "temperature");
        assert_eq!(rule.trigger_type.as_str(), "temperature_change");

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["operator"], ">");
        assert_eq!(value["condition"]["temperature"], 28.0);
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let new_rule = NewRule {
            name: "  ".to_string(),
            trigger_type: EventType::new("motion_detected"),
            condition: RuleCondition::new("motion", 1.0),
            operator: Operator::Eq,
            target_device_id: "light-1".to_string(),
            action: "turn_on".to_string(),
        };
        assert_eq!(new_rule.validate(), Err(RuleError::EmptyField("name")));

        let new_rule = NewRule {
            name: "Motion".to_string(),
            action: String::new(),
            ..new_rule
        };
        assert_eq!(new_rule.validate(), Err(RuleError::EmptyField("action")));
    }

    #[test]
    fn test_validation_rejects_non_finite_threshold() {
        let new_rule = NewRule {
            name: "Bad".to_string(),
            trigger_type: EventType::new("temperature_change"),
            condition: RuleCondition::new("temperature", f64::INFINITY),
            operator: Operator::Gt,
            target_device_id: "device-1".to_string(),
            action: "turn_on".to_string(),
        };
        assert!(matches!(
            new_rule.into_rule(),
            Err(RuleError::NonFiniteThreshold { .. })
        ));
    }
}
