//! Alertmanager v2 API models.
//!
//! These are the wire shapes shared by the local Alertmanager and remote
//! Alertmanager-compatible backends, so responses from either path decode
//! into the same types.

use std::collections::BTreeMap;

use alerting_core::Labels;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An alert as posted to `/api/v2/alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableAlert {
    /// Identifying labels.
    pub labels: Labels,
    /// Informational annotations.
    #[serde(default)]
    pub annotations: Labels,
    /// When the alert started firing.
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    /// When the alert stops (or stopped) firing.
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the rule that produced the alert.
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
}

/// Processing state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// Not yet processed.
    Unprocessed,
    /// Firing and neither silenced nor inhibited.
    Active,
    /// Silenced or inhibited.
    Suppressed,
}

/// Status of a stored alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    /// Processing state.
    pub state: AlertState,
    /// IDs of silences muting the alert.
    #[serde(default)]
    pub silenced_by: Vec<String>,
    /// Fingerprints of alerts inhibiting this one.
    #[serde(default)]
    pub inhibited_by: Vec<String>,
}

/// A notification receiver reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Receiver {
    /// Receiver name.
    pub name: String,
}

/// An alert as returned by `GET /api/v2/alerts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableAlert {
    /// Identifying labels.
    pub labels: Labels,
    /// Informational annotations.
    pub annotations: Labels,
    /// When the alert started firing.
    pub starts_at: DateTime<Utc>,
    /// When the alert stops firing.
    pub ends_at: DateTime<Utc>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
    /// Fingerprint of the labels.
    pub fingerprint: String,
    /// Receivers the alert routes to.
    pub receivers: Vec<Receiver>,
    /// Silencing and inhibition status.
    pub status: AlertStatus,
    /// Link back to the rule that produced the alert.
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
}

/// Alerts grouped by receiver and group labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertGroup {
    /// Group labels.
    pub labels: Labels,
    /// Receiver of the group.
    pub receiver: Receiver,
    /// Alerts in the group.
    pub alerts: Vec<GettableAlert>,
}

/// A silence matcher as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherSpec {
    /// Label name.
    pub name: String,
    /// Value or pattern.
    pub value: String,
    /// Whether `value` is a regular expression.
    pub is_regex: bool,
    /// Whether the matcher is positive. Negative matchers invert the match.
    #[serde(default = "default_true")]
    pub is_equal: bool,
}

const fn default_true() -> bool {
    true
}

/// A silence as posted to `/api/v2/silences`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableSilence {
    /// Existing silence to update, if any.
    #[serde(default)]
    pub id: Option<String>,
    /// Matchers selecting the muted alerts.
    pub matchers: Vec<MatcherSpec>,
    /// Start of the silence.
    pub starts_at: DateTime<Utc>,
    /// End of the silence.
    pub ends_at: DateTime<Utc>,
    /// Author.
    pub created_by: String,
    /// Reason.
    pub comment: String,
}

/// Lifecycle state of a silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    /// Starts in the future.
    Pending,
    /// Currently muting.
    Active,
    /// Ended.
    Expired,
}

/// Status of a silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceStatus {
    /// Lifecycle state.
    pub state: SilenceState,
}

/// A silence as returned by `GET /api/v2/silences`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GettableSilence {
    /// Silence ID.
    pub id: String,
    /// Lifecycle status.
    pub status: SilenceStatus,
    /// Last update.
    pub updated_at: DateTime<Utc>,
    /// Matchers selecting the muted alerts.
    pub matchers: Vec<MatcherSpec>,
    /// Start of the silence.
    pub starts_at: DateTime<Utc>,
    /// End of the silence.
    pub ends_at: DateTime<Utc>,
    /// Author.
    pub created_by: String,
    /// Reason.
    pub comment: String,
}

/// Response to a silence creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSilenceResponse {
    /// ID of the created or updated silence.
    #[serde(rename = "silenceID")]
    pub silence_id: String,
}

/// A node of the notification routing tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Receiver for alerts matching this route. Inherited when unset.
    #[serde(default)]
    pub receiver: Option<String>,
    /// Labels to group by. `...` groups by all labels. Inherited when empty.
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Matchers in string form, e.g. `severity="critical"`.
    #[serde(default)]
    pub matchers: Vec<String>,
    /// Child routes, tried in order.
    #[serde(default)]
    pub routes: Vec<Route>,
    /// Keep matching siblings after this route matched.
    #[serde(default, rename = "continue")]
    pub continue_matching: bool,
    /// Initial wait before notifying a new group.
    #[serde(default)]
    pub group_wait: Option<String>,
    /// Wait before notifying about new alerts in a group.
    #[serde(default)]
    pub group_interval: Option<String>,
    /// Wait before resending a notification.
    #[serde(default)]
    pub repeat_interval: Option<String>,
}

/// A contact point. Integration settings are opaque to routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Receiver name, referenced by routes.
    pub name: String,
    /// Integration settings, passed through untouched.
    #[serde(flatten)]
    pub integrations: BTreeMap<String, serde_json::Value>,
}

impl ReceiverConfig {
    /// A receiver with no integrations.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            integrations: BTreeMap::new(),
        }
    }
}

/// Mutes target alerts while a matching source alert fires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitRule {
    /// Matchers selecting source alerts.
    #[serde(default)]
    pub source_matchers: Vec<String>,
    /// Matchers selecting target alerts.
    #[serde(default)]
    pub target_matchers: Vec<String>,
    /// Labels whose values must be equal on source and target.
    #[serde(default)]
    pub equal: Vec<String>,
}

/// Routing, receivers and inhibition of one Alertmanager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertmanagerConfig {
    /// Root of the routing tree.
    pub route: Route,
    /// Contact points.
    #[serde(default)]
    pub receivers: Vec<ReceiverConfig>,
    /// Inhibition rules.
    #[serde(default)]
    pub inhibit_rules: Vec<InhibitRule>,
}

/// Alertmanager configuration as exchanged through the config API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Notification templates by file name.
    #[serde(default)]
    pub template_files: BTreeMap<String, String>,
    /// The Alertmanager configuration.
    pub alertmanager_config: AlertmanagerConfig,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            template_files: BTreeMap::new(),
            alertmanager_config: AlertmanagerConfig {
                route: Route {
                    receiver: Some(DEFAULT_RECEIVER.to_string()),
                    group_by: vec![alerting_core::ALERTNAME.to_string()],
                    ..Route::default()
                },
                receivers: vec![ReceiverConfig::named(DEFAULT_RECEIVER)],
                inhibit_rules: Vec::new(),
            },
        }
    }
}

/// Receiver of the default configuration.
pub const DEFAULT_RECEIVER: &str = "default";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn postable_alert_wire_names() {
        let alert = PostableAlert {
            labels: Labels::new().with("alertname", "X"),
            annotations: Labels::new(),
            starts_at: None,
            ends_at: None,
            generator_url: Some("http://g".to_string()),
        };
        let value = serde_json::to_value(&alert).expect("ser");
        assert_eq!(value["generatorURL"], "http://g");
        assert!(value.get("startsAt").is_some());
    }

    #[test]
    fn matcher_spec_defaults_to_equal() {
        let spec: MatcherSpec =
            serde_json::from_value(json!({"name": "a", "value": "b", "isRegex": false}))
                .expect("decode");
        assert!(spec.is_equal);
    }

    #[test]
    fn receiver_integrations_round_trip_untouched() {
        let receiver: ReceiverConfig = serde_json::from_value(json!({
            "name": "ops",
            "webhook_configs": [{"url": "http://hook"}]
        }))
        .expect("decode");
        assert_eq!(receiver.name, "ops");
        let value = serde_json::to_value(&receiver).expect("ser");
        assert_eq!(value["webhook_configs"][0]["url"], "http://hook");
    }

    #[test]
    fn route_continue_keyword() {
        let route: Route = serde_json::from_value(json!({"receiver": "a", "continue": true}))
            .expect("decode");
        assert!(route.continue_matching);
    }

    #[test]
    fn post_silence_response_id_field() {
        let value = serde_json::to_value(PostSilenceResponse {
            silence_id: "s1".to_string(),
        })
        .expect("ser");
        assert_eq!(value, json!({"silenceID": "s1"}));
    }
}
