//! Rule matching
//!
//! A rule matches an event when all of the following hold:
//!
//! 1. `rule.trigger_type == event.event_type` (exact string equality)
//! 2. the rule's condition key is present in `event.measurements`
//! 3. `measurement <operator> threshold` is true
//!
//! Every stored rule is scanned; matches keep the store's insertion order.

use std::sync::Arc;

use hub_core::{Event, Rule};
use hub_registries::{SharedRuleStore, StorageError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Failure to produce a match set for an event
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("failed to read rules: {0}")]
    Store(#[from] StorageError),
}

/// Failure to evaluate a single rule against an event
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("measurement {key} is not a finite number ({value})")]
    NonFiniteMeasurement { key: String, value: f64 },

    #[error("rule threshold for {key} is not a finite number ({value})")]
    NonFiniteThreshold { key: String, value: f64 },
}

/// Evaluates events against the stored rules
#[derive(Clone)]
pub struct RuleMatcher {
    rules: SharedRuleStore,
}

impl RuleMatcher {
    pub fn new(rules: SharedRuleStore) -> Self {
        Self { rules }
    }

    /// Rules matched by `event`, in store order.
    ///
    /// A rule that cannot be evaluated is logged and skipped; the
    /// remaining rules are still considered.
    pub async fn matches(&self, event: &Event) -> Result<Vec<Arc<Rule>>, MatchError> {
        let rules = self.rules.find_all().await?;
        let total = rules.len();

        let matched: Vec<Arc<Rule>> = rules
            .into_iter()
            .filter(|rule| match Self::evaluate(rule, event) {
                Ok(hit) => hit,
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        event_id = %event.id,
                        error = %e,
                        "Skipping rule that failed to evaluate"
                    );
                    false
                }
            })
            .collect();

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            rules = total,
            matched = matched.len(),
            "Matched event against rules"
        );
        Ok(matched)
    }

    /// Evaluate a single rule against an event
    pub fn evaluate(rule: &Rule, event: &Event) -> Result<bool, EvaluationError> {
        if rule.trigger_type != event.event_type {
            return Ok(false);
        }

        let key = &rule.condition.key;
        let Some(value) = event.measurement(key) else {
            trace!(rule_id = %rule.id, key = %key, "Measurement absent");
            return Ok(false);
        };

        if !value.is_finite() {
            return Err(EvaluationError::NonFiniteMeasurement {
                key: key.clone(),
                value,
            });
        }

        let threshold = rule.condition.threshold;
        if !threshold.is_finite() {
            return Err(EvaluationError::NonFiniteThreshold {
                key: key.clone(),
                value: threshold,
            });
        }

        Ok(rule.operator.apply(value, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{EventType, NewRule, Operator, RuleCondition};
    use hub_registries::{RuleRegistry, Storage};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn rule(name: &str, trigger: &str, key: &str, op: Operator, threshold: f64) -> NewRule {
        NewRule {
            name: name.to_string(),
            trigger_type: EventType::new(trigger),
            condition: RuleCondition::new(key, threshold),
            operator: op,
            target_device_id: "device_123".to_string(),
            action: "turn_on_heater".to_string(),
        }
    }

    fn event(event_type: &str, key: &str, value: f64) -> Event {
        Event::new(
            "sensor-1",
            event_type,
            BTreeMap::from([(key.to_string(), value)]),
        )
    }

    fn matcher_with(temp_dir: &TempDir, rules: Vec<NewRule>) -> RuleMatcher {
        let registry = RuleRegistry::new(Arc::new(Storage::new(temp_dir.path())));
        for r in rules {
            registry.create(r).unwrap();
        }
        RuleMatcher::new(Arc::new(registry))
    }

    fn names(rules: &[Arc<Rule>]) -> Vec<&str> {
        rules.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_evaluate_operators() {
        let cases = [
            (Operator::Gt, 29.0, true),
            (Operator::Gt, 28.0, false),
            (Operator::Lt, 27.0, true),
            (Operator::Ge, 28.0, true),
            (Operator::Le, 28.0, true),
            (Operator::Le, 28.5, false),
            (Operator::Eq, 28.0, true),
        ];

        for (op, value, expected) in cases {
            let r = rule("r", "temperature_change", "temperature", op, 28.0)
                .into_rule()
                .unwrap();
            let e = event("temperature_change", "temperature", value);
            assert_eq!(
                RuleMatcher::evaluate(&r, &e),
                Ok(expected),
                "{value} {op} 28.0"
            );
        }
    }

    #[test]
    fn test_equality_is_exact() {
        let r = rule("r", "t", "x", Operator::Eq, 0.3).into_rule().unwrap();
        let e = event("t", "x", 0.1 + 0.2);
        assert_eq!(RuleMatcher::evaluate(&r, &e), Ok(false));
    }

    #[test]
    fn test_non_finite_measurement_is_an_error() {
        let r = rule("r", "t", "x", Operator::Gt, 1.0).into_rule().unwrap();
        let e = event("t", "x", f64::NAN);
        assert!(matches!(
            RuleMatcher::evaluate(&r, &e),
            Err(EvaluationError::NonFiniteMeasurement { .. })
        ));
    }

    #[tokio::test]
    async fn test_type_mismatch_and_missing_key_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let matcher = matcher_with(
            &temp_dir,
            vec![
                rule("temp", "temperature_change", "temperature", Operator::Gt, 28.0),
                rule("humid", "humidity_change", "temperature", Operator::Gt, 28.0),
                rule("other-key", "temperature_change", "celsius", Operator::Gt, 28.0),
            ],
        );

        let matched = matcher
            .matches(&event("temperature_change", "temperature", 29.0))
            .await
            .unwrap();
        assert_eq!(names(&matched), vec!["temp"]);

        let matched = matcher
            .matches(&event("humidity_change", "humidity", 90.0))
            .await
            .unwrap();
        assert!(matched.is_empty());
    }

    #[tokio::test]
    async fn test_matches_keep_store_order() {
        let temp_dir = TempDir::new().unwrap();
        let matcher = matcher_with(
            &temp_dir,
            vec![
                rule("c", "motion_detected", "motion", Operator::Ge, 1.0),
                rule("a", "motion_detected", "motion", Operator::Eq, 1.0),
                rule("miss", "motion_detected", "motion", Operator::Lt, 1.0),
                rule("b", "motion_detected", "motion", Operator::Gt, 0.0),
            ],
        );

        let matched = matcher
            .matches(&event("motion_detected", "motion", 1.0))
            .await
            .unwrap();
        assert_eq!(names(&matched), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_failing_rule_skipped_others_kept() {
        let temp_dir = TempDir::new().unwrap();
        let matcher = matcher_with(
            &temp_dir,
            vec![
                rule("nan", "t", "x", Operator::Gt, 1.0),
                rule("ok", "t", "y", Operator::Gt, 1.0),
            ],
        );

        let e = event("t", "x", f64::NAN).with_measurement("y", 2.0);
        let matched = matcher.matches(&e).await.unwrap();
        assert_eq!(names(&matched), vec!["ok"]);
    }
}
