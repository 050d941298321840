// src/monitoring/tests/alert_tests.rs

use std::collections::BTreeMap;
use std::time::Duration;

use crate::monitoring::{
    Alert, AlertHistory, AlertMetric, AlertRule, AlertSeverity, Comparison, EvaluationContext,
};

fn context(circuit: &str, values: &[(AlertMetric, f64)]) -> EvaluationContext {
    let mut context = EvaluationContext::new(circuit);
    for (metric, value) in values {
        context.insert(metric, *value);
    }
    context
}

fn alert(rule: &AlertRule, circuit: &str, value: f64) -> Alert {
    Alert::new(rule, BTreeMap::from([(circuit.to_string(), value)]))
}

#[test]
fn test_comparisons() {
    assert!(Comparison::Above.holds(0.6, 0.5));
    assert!(!Comparison::Above.holds(0.5, 0.5));
    assert!(Comparison::AtLeast.holds(0.5, 0.5));
    assert!(Comparison::Below.holds(0.1, 0.5));
    assert!(!Comparison::Below.holds(0.5, 0.5));
}

#[test]
fn test_rule_returns_observed_value_when_breached() {
    let rule = AlertRule::new("errors", AlertMetric::FailureRate, 0.4, AlertSeverity::Critical);

    let breached = context("db", &[(AlertMetric::FailureRate, 0.5)]);
    let fine = context("db", &[(AlertMetric::FailureRate, 0.1)]);

    assert_eq!(rule.evaluate(&breached), Some(0.5));
    assert_eq!(rule.evaluate(&fine), None);
}

#[test]
fn test_missing_metric_never_breaches() {
    // Below would hold for an implicit zero
    let rule = AlertRule::new(
        "low_pool",
        AlertMetric::Gauge("pool_idle".to_string()),
        1.0,
        AlertSeverity::Info,
    )
    .comparison(Comparison::Below);

    assert_eq!(rule.evaluate(&EvaluationContext::new("db")), None);
    assert_eq!(
        rule.evaluate(&context("db", &[(AlertMetric::Gauge("pool_idle".to_string()), 0.0)])),
        Some(0.0)
    );
}

#[test]
fn test_circuit_filter() {
    let everywhere = AlertRule::new("open", AlertMetric::CircuitOpen, 1.0, AlertSeverity::Warning);
    let only_cache = everywhere.clone().for_circuit("cache");

    assert!(everywhere.applies_to("cache"));
    assert!(everywhere.applies_to("db"));
    assert!(only_cache.applies_to("cache"));
    assert!(!only_cache.applies_to("db"));
}

#[test]
fn test_metric_keys() {
    assert_eq!(AlertMetric::FailureRate.key(), "failure_rate");
    assert_eq!(AlertMetric::P95ResponseTimeMs.key(), "p95_response_time_ms");
    assert_eq!(
        AlertMetric::ConsecutiveHealthFailures.key(),
        "consecutive_health_failures"
    );
    assert_eq!(AlertMetric::Gauge("queue".to_string()).key(), "gauge.queue");
}

#[test]
fn test_alert_lists_triggering_circuits() {
    let rule = AlertRule::new("errors", AlertMetric::FailureRate, 0.4, AlertSeverity::Critical);
    let observed = BTreeMap::from([("search".to_string(), 0.9), ("billing".to_string(), 0.5)]);

    let alert = Alert::new(&rule, observed);

    assert_eq!(alert.rule_name, "errors");
    assert_eq!(alert.severity, AlertSeverity::Critical);
    assert_eq!(alert.circuits, vec!["billing", "search"]);
    assert_eq!(alert.message, "failure_rate > 0.4 on billing, search");
    assert_eq!(alert.observed["search"], 0.9);
}

#[test]
fn test_default_rules() {
    let rules = AlertRule::default_rules();
    let names: Vec<&str> = rules.iter().map(|rule| rule.name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "high_failure_rate",
            "circuit_open",
            "slow_responses",
            "heavy_fallback_use",
            "health_check_failing",
        ]
    );
    assert!(rules.iter().all(|rule| rule.enabled && rule.circuit.is_none()));

    let slow = &rules[2];
    assert_eq!(slow.min_duration, Duration::from_secs(60));
    assert_eq!(slow.threshold, 1_000.0);
}

#[test]
fn test_rule_from_json_uses_defaults() {
    let rule: AlertRule = serde_json::from_str(
        r#"{
            "name": "pool_exhausted",
            "metric": { "gauge": "pool_in_use" },
            "threshold": 0.9,
            "severity": "critical",
            "min_duration": 1500
        }"#,
    )
    .unwrap();

    assert_eq!(rule.metric, AlertMetric::Gauge("pool_in_use".to_string()));
    assert_eq!(rule.comparison, Comparison::Above);
    assert_eq!(rule.min_duration, Duration::from_millis(1_500));
    assert_eq!(rule.repeat_interval, Duration::from_secs(300));
    assert!(rule.enabled);
    assert!(rule.circuit.is_none());
}

#[test]
fn test_history_evicts_oldest() {
    let rule = AlertRule::new("errors", AlertMetric::FailureRate, 0.4, AlertSeverity::Warning);
    let mut history = AlertHistory::new(3);
    assert!(history.is_empty());

    for i in 0..5 {
        history.push(alert(&rule, &format!("c{}", i), 1.0));
    }

    assert_eq!(history.len(), 3);
    assert_eq!(history.total(), 5);

    let oldest_first: Vec<String> = history.all().into_iter().map(|a| a.circuits[0].clone()).collect();
    assert_eq!(oldest_first, vec!["c2", "c3", "c4"]);

    let newest_first: Vec<String> = history
        .recent(2)
        .into_iter()
        .map(|a| a.circuits[0].clone())
        .collect();
    assert_eq!(newest_first, vec!["c4", "c3"]);
}

#[test]
fn test_zero_capacity_history_only_counts() {
    let rule = AlertRule::new("errors", AlertMetric::FailureRate, 0.4, AlertSeverity::Info);
    let mut history = AlertHistory::new(0);

    history.push(alert(&rule, "db", 1.0));

    assert!(history.is_empty());
    assert_eq!(history.total(), 1);
}
