//! Wire types shared by the local engine and proxied backends.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use alerting_core::{AlertQuery, Condition, ExecErrState, Labels, NoDataState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope of Prometheus HTTP API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromResponse<T> {
    /// `success` or `error`.
    pub status: String,
    /// Payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error class on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AlertingRule {
    /// Returns true for recording rules.
    pub fn is_recording(&self) -> bool {
        self.rule_type == "recording"
    }
}

impl<T> PromResponse<T> {
    /// A success envelope.
    pub fn success(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data: Some(data),
            error_type: None,
            error: None,
        }
    }
}

/// Payload of `GET /api/v1/rules`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDiscovery {
    /// Rule groups.
    pub groups: Vec<RuleGroup>,
}

/// A rule group as listed by the Prometheus API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    /// Group name.
    pub name: String,
    /// Namespace (file) of the group.
    pub file: String,
    /// Alerting rules of the group.
    pub rules: Vec<AlertingRule>,
    /// Evaluation interval in seconds.
    pub interval: f64,
    /// Most recent evaluation of any rule in the group.
    #[serde(default)]
    pub last_evaluation: Option<DateTime<Utc>>,
    /// Summed evaluation time in seconds.
    #[serde(default)]
    pub evaluation_time: f64,
}

/// A rule as listed by the Prometheus API.
///
/// The local engine only lists alerting rules. Remote backends may also
/// return recording rules, which carry no state, duration or alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertingRule {
    /// `firing`, `pending` or `inactive`. Empty for recording rules.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// Rule name.
    pub name: String,
    /// Rule expression.
    pub query: String,
    /// Pending duration in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Rule labels.
    #[serde(default)]
    pub labels: Labels,
    /// Rule annotations.
    #[serde(default)]
    pub annotations: Labels,
    /// Active alerts of the rule.
    #[serde(default)]
    pub alerts: Vec<PromAlert>,
    /// `ok`, `nodata`, `error` or `unknown`.
    #[serde(default)]
    pub health: String,
    /// Last evaluation error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// `alerting` or `recording`.
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Last evaluation.
    #[serde(default)]
    pub last_evaluation: Option<DateTime<Utc>>,
    /// Last evaluation duration in seconds.
    #[serde(default)]
    pub evaluation_time: f64,
}

/// An alert as listed by the Prometheus API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromAlert {
    /// Alert labels.
    pub labels: Labels,
    /// Alert annotations.
    #[serde(default)]
    pub annotations: Labels,
    /// Alert state.
    pub state: String,
    /// When the alert became active.
    #[serde(default)]
    pub active_at: Option<DateTime<Utc>>,
    /// Last reduced value, rendered as a string.
    #[serde(default)]
    pub value: String,
}

/// Payload of `GET /api/v1/alerts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertDiscovery {
    /// Active alerts.
    pub alerts: Vec<PromAlert>,
}

/// Rule groups by namespace, as returned by the ruler API.
pub type NamespaceConfig = BTreeMap<String, Vec<RuleGroupConfig>>;

/// A rule group in ruler configuration form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroupConfig {
    /// Group name.
    pub name: String,
    /// Evaluation interval, e.g. `1m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Rules of the group.
    #[serde(default)]
    pub rules: Vec<RuleNode>,
}

/// A rule in ruler configuration form.
///
/// Remote rulers use `alert`/`expr`; locally managed rules carry
/// `grafana_alert` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleNode {
    /// Alert name of a remote rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    /// Record name of a remote recording rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    /// Expression of a remote rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    /// Pending duration, e.g. `5m`.
    #[serde(default, rename = "for", skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    /// Rule labels.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
    /// Rule annotations.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub annotations: Labels,
    /// Definition of a locally managed rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_alert: Option<GrafanaAlertRule>,
}

/// Definition of a locally managed rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrafanaAlertRule {
    /// Rule UID. Generated when empty.
    #[serde(default)]
    pub uid: String,
    /// Rule title.
    pub title: String,
    /// Firing condition.
    pub condition: Condition,
    /// Queries.
    pub data: Vec<AlertQuery>,
    /// Behaviour on empty results.
    #[serde(default)]
    pub no_data_state: NoDataState,
    /// Behaviour on evaluation errors.
    #[serde(default)]
    pub exec_err_state: ExecErrState,
    /// Stored version the update is based on; 0 for new rules.
    #[serde(default)]
    pub version: i64,
}

/// Plain message response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    /// Message.
    pub message: String,
}

impl ApiMessage {
    /// Creates a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Parses a Prometheus-style duration such as `1h30m`, `90s` or `500ms`.
#[must_use]
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if input == "0" {
        return Some(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(60 * 60),
            "d" => Duration::from_secs(24 * 60 * 60),
            "w" => Duration::from_secs(7 * 24 * 60 * 60),
            "y" => Duration::from_secs(365 * 24 * 60 * 60),
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(unit.checked_mul(u32::try_from(value).ok()?)?)?;
    }
    Some(total)
}

/// Formats a duration in the form accepted by [`parse_duration`].
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    let millis = duration.subsec_millis();
    if secs == 0 && millis == 0 {
        return "0s".to_string();
    }

    let mut out = String::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if secs >= size {
            let _ = write!(out, "{}{unit}", secs / size);
            secs %= size;
        }
    }
    if millis > 0 {
        let _ = write!(out, "{millis}ms");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("30s", 30)]
    #[test_case("1m", 60)]
    #[test_case("1h30m", 5_400)]
    #[test_case("2d", 172_800)]
    #[test_case("1w", 604_800)]
    #[test_case("0", 0)]
    fn parses(input: &str, secs: u64) {
        assert_eq!(parse_duration(input), Some(Duration::from_secs(secs)));
    }

    #[test_case("" ; "empty")]
    #[test_case("5" ; "no unit")]
    #[test_case("m5" ; "unit first")]
    #[test_case("5x" ; "unknown unit")]
    fn rejects(input: &str) {
        assert_eq!(parse_duration(input), None);
    }

    #[test]
    fn formats_compactly() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3_600)), "1h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "1s500ms");
    }

    #[test]
    fn ruler_group_yaml_shape() {
        let yaml = r#"
name: cpu
interval: 1m
rules:
  - alert: HighCPU
    expr: cpu > 80
    for: 5m
    labels:
      severity: critical
"#;
        let group: RuleGroupConfig = serde_yaml::from_str(yaml).expect("decode");
        assert_eq!(group.interval.as_deref(), Some("1m"));
        assert_eq!(group.rules[0].alert.as_deref(), Some("HighCPU"));
        assert_eq!(group.rules[0].for_duration.as_deref(), Some("5m"));
        assert_eq!(group.rules[0].labels.get("severity"), Some("critical"));
        assert!(group.rules[0].grafana_alert.is_none());
    }

    #[test]
    fn prometheus_envelope() {
        let value = serde_json::to_value(PromResponse::success(AlertDiscovery::default()))
            .expect("ser");
        assert_eq!(value, serde_json::json!({"status": "success", "data": {"alerts": []}}));
    }

    #[test]
    fn rule_listing_with_recording_rules() {
        let body = r#"{
  "status": "success",
  "data": {
    "groups": [{
      "name": "node",
      "file": "/etc/prometheus/rules/node.yml",
      "rules": [
        {"name": "instance:cpu:rate5m", "query": "rate(cpu[5m])", "health": "ok", "evaluationTime": 0.0004, "lastEvaluation": "2024-05-01T10:00:00.123456789Z", "type": "recording"},
        {"state": "firing", "name": "HighCPU", "query": "instance:cpu:rate5m > 0.8", "duration": 300, "labels": {"severity": "page"}, "annotations": {}, "alerts": [{"labels": {"alertname": "HighCPU"}, "annotations": {}, "state": "firing", "activeAt": "2024-05-01T09:50:00Z", "value": "9.1e-01"}], "health": "ok", "evaluationTime": 0.0002, "lastEvaluation": "2024-05-01T10:00:00.5Z", "type": "alerting"}
      ],
      "interval": 60,
      "limit": 0,
      "evaluationTime": 0.0006,
      "lastEvaluation": "2024-05-01T10:00:00.1Z"
    }]
  }
}"#;
        let decoded: PromResponse<RuleDiscovery> = serde_json::from_str(body).expect("decode");
        let rules = &decoded.data.expect("data").groups[0].rules;
        assert_eq!(rules.len(), 2);
        assert!(rules[0].is_recording());
        assert!(rules[0].state.is_empty());
        assert!(rules[0].alerts.is_empty());
        assert!(!rules[1].is_recording());
        assert_eq!(rules[1].state, "firing");
        assert_eq!(rules[1].alerts.len(), 1);
    }

    #[test]
    fn recording_rules_serialize_without_state() {
        let body = r#"{"name": "r", "query": "sum(up)", "health": "ok", "type": "recording"}"#;
        let rule: AlertingRule = serde_json::from_str(body).expect("decode");
        let value = serde_json::to_value(&rule).expect("ser");
        assert!(value.get("state").is_none());
        assert_eq!(value["type"], "recording");
    }

    #[test]
    fn error_envelope_without_data() {
        let body = r#"{"status": "error", "errorType": "bad_data", "error": "parse error"}"#;
        let decoded: PromResponse<RuleDiscovery> = serde_json::from_str(body).expect("decode");
        assert!(decoded.data.is_none());
        assert_eq!(decoded.error_type.as_deref(), Some("bad_data"));
    }

    proptest! {
        #[test]
        fn formatted_durations_parse_back(secs in 0u64..10_000_000) {
            let d = Duration::from_secs(secs);
            prop_assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
    }
}
