//! In-process Alertmanager, one per organisation.
//!
//! Holds posted alerts, silences, the routing tree and inhibition rules,
//! and answers the Alertmanager v2 queries from them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use alerting_core::{Fingerprint, Labels};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{NotifyError, Result};
use crate::matcher::Matchers;
use crate::models::{
    AlertGroup, AlertState, AlertStatus, GettableAlert, GettableSilence, PostableAlert,
    PostableSilence, Receiver, Route, SilenceState, UserConfig,
};
use crate::silence::Silence;

/// Group-by value meaning "every label".
const GROUP_BY_ALL: &str = "...";

/// Timing settings of a local Alertmanager.
#[derive(Debug, Clone, Copy)]
pub struct LocalSettings {
    /// End time given to posted alerts that carry none.
    pub resolve_timeout: Duration,
    /// How long resolved alerts and expired silences are kept.
    pub retention: Duration,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(5 * 60),
            retention: Duration::from_secs(5 * 24 * 60 * 60),
        }
    }
}

/// Selects alerts for listing.
#[derive(Debug, Clone)]
pub struct AlertFilter {
    /// Include active alerts.
    pub active: bool,
    /// Include silenced alerts.
    pub silenced: bool,
    /// Include inhibited alerts.
    pub inhibited: bool,
    /// Include unprocessed alerts.
    pub unprocessed: bool,
    /// Label matchers every alert must satisfy.
    pub matchers: Matchers,
    /// Anchored pattern at least one receiver name must match.
    pub receiver: Option<Regex>,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            active: true,
            silenced: true,
            inhibited: true,
            unprocessed: true,
            matchers: Matchers::default(),
            receiver: None,
        }
    }
}

impl AlertFilter {
    /// Sets the label matchers.
    #[must_use]
    pub fn with_matchers(mut self, matchers: Matchers) -> Self {
        self.matchers = matchers;
        self
    }

    /// Restricts results to receivers matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidMatcher` if the pattern does not compile.
    pub fn with_receiver(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| NotifyError::InvalidMatcher {
            matcher: format!("receiver={pattern:?}"),
            reason: e.to_string(),
        })?;
        self.receiver = Some(re);
        Ok(self)
    }

    fn accepts(&self, alert: &GettableAlert) -> bool {
        let status = &alert.status;
        if !self.active && status.state == AlertState::Active {
            return false;
        }
        if !self.unprocessed && status.state == AlertState::Unprocessed {
            return false;
        }
        if !self.silenced && !status.silenced_by.is_empty() {
            return false;
        }
        if !self.inhibited && !status.inhibited_by.is_empty() {
            return false;
        }
        if let Some(re) = &self.receiver {
            if !alert.receivers.iter().any(|r| re.is_match(&r.name)) {
                return false;
            }
        }
        self.matchers.matches(&alert.labels)
    }
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    receiver: String,
    group_by: Vec<String>,
    matchers: Matchers,
    continue_matching: bool,
    routes: Vec<CompiledRoute>,
}

impl CompiledRoute {
    fn compile(route: &Route, parent: Option<&Self>, receivers: &BTreeSet<&str>) -> Result<Self> {
        let receiver = match (&route.receiver, parent) {
            (Some(name), _) => name.clone(),
            (None, Some(parent)) => parent.receiver.clone(),
            (None, None) => return Err(NotifyError::config("root route must have a receiver")),
        };
        if !receivers.contains(receiver.as_str()) {
            return Err(NotifyError::config(format!(
                "route references undefined receiver {receiver:?}"
            )));
        }
        let group_by = match parent {
            Some(parent) if route.group_by.is_empty() => parent.group_by.clone(),
            _ => route.group_by.clone(),
        };
        let mut compiled = Self {
            receiver,
            group_by,
            matchers: Matchers::parse_all(&route.matchers)?,
            continue_matching: route.continue_matching,
            routes: Vec::with_capacity(route.routes.len()),
        };
        for child in &route.routes {
            let child = Self::compile(child, Some(&compiled), receivers)?;
            compiled.routes.push(child);
        }
        Ok(compiled)
    }

    /// Routes matching the labels, depth first.
    fn matching(&self, labels: &Labels) -> Vec<&Self> {
        if !self.matchers.matches(labels) {
            return Vec::new();
        }
        let mut matched = Vec::new();
        for child in &self.routes {
            let found = child.matching(labels);
            let hit = !found.is_empty();
            matched.extend(found);
            if hit && !child.continue_matching {
                break;
            }
        }
        if matched.is_empty() {
            matched.push(self);
        }
        matched
    }

    fn group_labels(&self, labels: &Labels) -> Labels {
        if self.group_by.iter().any(|l| l == GROUP_BY_ALL) {
            return labels.clone();
        }
        self.group_by
            .iter()
            .filter_map(|name| labels.get(name).map(|v| (name.clone(), v.to_string())))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct CompiledInhibit {
    source: Matchers,
    target: Matchers,
    equal: Vec<String>,
}

#[derive(Debug)]
struct AppliedConfig {
    raw: UserConfig,
    route: CompiledRoute,
    inhibit: Vec<CompiledInhibit>,
}

impl AppliedConfig {
    fn compile(raw: UserConfig) -> Result<Self> {
        let am = &raw.alertmanager_config;
        let mut receivers = BTreeSet::new();
        for r in &am.receivers {
            if r.name.is_empty() {
                return Err(NotifyError::config("receiver name cannot be empty"));
            }
            if !receivers.insert(r.name.as_str()) {
                return Err(NotifyError::config(format!("duplicate receiver {:?}", r.name)));
            }
        }
        let route = CompiledRoute::compile(&am.route, None, &receivers)?;
        let inhibit = am
            .inhibit_rules
            .iter()
            .map(|rule| {
                Ok(CompiledInhibit {
                    source: Matchers::parse_all(&rule.source_matchers)?,
                    target: Matchers::parse_all(&rule.target_matchers)?,
                    equal: rule.equal.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            raw,
            route,
            inhibit,
        })
    }
}

#[derive(Debug, Clone)]
struct StoredAlert {
    labels: Labels,
    annotations: Labels,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    generator_url: Option<String>,
}

impl StoredAlert {
    fn firing(&self, now: DateTime<Utc>) -> bool {
        self.ends_at > now
    }
}

/// The Alertmanager of one organisation.
#[derive(Debug)]
pub struct LocalAlertmanager {
    org_id: i64,
    settings: LocalSettings,
    config: RwLock<Arc<AppliedConfig>>,
    alerts: RwLock<HashMap<Fingerprint, StoredAlert>>,
    silences: RwLock<HashMap<String, Silence>>,
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

impl LocalAlertmanager {
    /// Creates an Alertmanager with the default configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the default configuration does not compile.
    pub fn new(org_id: i64, settings: LocalSettings) -> Result<Self> {
        let config = AppliedConfig::compile(UserConfig::default())?;
        Ok(Self {
            org_id,
            settings,
            config: RwLock::new(Arc::new(config)),
            alerts: RwLock::new(HashMap::new()),
            silences: RwLock::new(HashMap::new()),
        })
    }

    /// Owning organisation.
    #[must_use]
    pub const fn org_id(&self) -> i64 {
        self.org_id
    }

    /// The applied configuration.
    #[must_use]
    pub fn config(&self) -> UserConfig {
        self.config.read().raw.clone()
    }

    /// Validates and applies a configuration. The previous one stays in
    /// place if validation fails.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidConfig` or `NotifyError::InvalidMatcher`.
    pub fn apply_config(&self, config: UserConfig) -> Result<()> {
        let compiled = AppliedConfig::compile(config)?;
        *self.config.write() = Arc::new(compiled);
        info!(org_id = self.org_id, "alertmanager configuration applied");
        Ok(())
    }

    /// Stores posted alerts. Returns the number stored.
    pub fn put_alerts(&self, posted: &[PostableAlert], now: DateTime<Utc>) -> usize {
        let resolve_timeout = chrono_duration(self.settings.resolve_timeout);
        let mut alerts = self.alerts.write();
        for alert in posted {
            let fp = alert.labels.fingerprint();
            let mut starts_at = alert.starts_at.unwrap_or(now);
            let ends_at = alert.ends_at.unwrap_or(now + resolve_timeout);
            if let Some(existing) = alerts.get(&fp) {
                if existing.firing(now) {
                    starts_at = starts_at.min(existing.starts_at);
                }
            }
            alerts.insert(
                fp,
                StoredAlert {
                    labels: alert.labels.clone(),
                    annotations: alert.annotations.clone(),
                    starts_at,
                    ends_at,
                    updated_at: now,
                    generator_url: alert.generator_url.clone(),
                },
            );
        }
        debug!(org_id = self.org_id, alerts = posted.len(), "alerts stored");
        posted.len()
    }

    /// IDs of active silences muting the labels.
    #[must_use]
    pub fn silenced_by(&self, labels: &Labels, now: DateTime<Utc>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .silences
            .read()
            .values()
            .filter(|s| s.mutes(labels, now))
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// True if an active silence mutes the labels.
    #[must_use]
    pub fn is_silenced(&self, labels: &Labels, now: DateTime<Utc>) -> bool {
        self.silences.read().values().any(|s| s.mutes(labels, now))
    }

    /// Firing alerts, filtered and ordered by fingerprint.
    #[must_use]
    pub fn get_alerts(&self, filter: &AlertFilter, now: DateTime<Utc>) -> Vec<GettableAlert> {
        let config = Arc::clone(&self.config.read());
        let alerts = self.alerts.read();
        let mut firing: Vec<(&Fingerprint, &StoredAlert)> =
            alerts.iter().filter(|(_, a)| a.firing(now)).collect();
        firing.sort_by_key(|(fp, _)| **fp);

        firing
            .iter()
            .map(|(fp, alert)| self.render(&config, **fp, alert, &alerts, now))
            .filter(|a| filter.accepts(a))
            .collect()
    }

    /// Firing alerts grouped by receiver and group labels.
    #[must_use]
    pub fn get_alert_groups(&self, filter: &AlertFilter, now: DateTime<Utc>) -> Vec<AlertGroup> {
        let config = Arc::clone(&self.config.read());
        let mut groups: BTreeMap<(String, Labels), Vec<GettableAlert>> = BTreeMap::new();
        for alert in self.get_alerts(filter, now) {
            for route in config.route.matching(&alert.labels) {
                if let Some(re) = &filter.receiver {
                    if !re.is_match(&route.receiver) {
                        continue;
                    }
                }
                let key = (route.receiver.clone(), route.group_labels(&alert.labels));
                let group = groups.entry(key).or_default();
                if !group.iter().any(|a| a.fingerprint == alert.fingerprint) {
                    group.push(alert.clone());
                }
            }
        }
        groups
            .into_iter()
            .map(|((receiver, labels), alerts)| AlertGroup {
                labels,
                receiver: Receiver { name: receiver },
                alerts,
            })
            .collect()
    }

    fn render(
        &self,
        config: &AppliedConfig,
        fp: Fingerprint,
        alert: &StoredAlert,
        all: &HashMap<Fingerprint, StoredAlert>,
        now: DateTime<Utc>,
    ) -> GettableAlert {
        let receivers: BTreeSet<Receiver> = config
            .route
            .matching(&alert.labels)
            .into_iter()
            .map(|r| Receiver {
                name: r.receiver.clone(),
            })
            .collect();

        let silenced_by = self.silenced_by(&alert.labels, now);
        let mut inhibited_by = BTreeSet::new();
        for rule in &config.inhibit {
            if !rule.target.matches(&alert.labels) {
                continue;
            }
            for (source_fp, source) in all {
                if *source_fp == fp || !source.firing(now) || !rule.source.matches(&source.labels) {
                    continue;
                }
                let equal = rule
                    .equal
                    .iter()
                    .all(|l| source.labels.get(l) == alert.labels.get(l));
                if equal {
                    inhibited_by.insert(source_fp.to_string());
                }
            }
        }

        let state = if silenced_by.is_empty() && inhibited_by.is_empty() {
            AlertState::Active
        } else {
            AlertState::Suppressed
        };

        GettableAlert {
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
            updated_at: alert.updated_at,
            fingerprint: fp.to_string(),
            receivers: receivers.into_iter().collect(),
            status: AlertStatus {
                state,
                silenced_by,
                inhibited_by: inhibited_by.into_iter().collect(),
            },
            generator_url: alert.generator_url.clone(),
        }
    }

    /// Creates a silence, or updates one when `id` names an unexpired silence.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidSilence` for invalid silences and
    /// `NotifyError::SilenceNotFound` when updating an unknown ID.
    pub fn create_silence(&self, postable: &PostableSilence, now: DateTime<Utc>) -> Result<String> {
        let mut silence = Silence::from_postable(postable, now)?;
        let mut silences = self.silences.write();

        if let Some(id) = &postable.id {
            let existing = silences
                .get(id)
                .ok_or_else(|| NotifyError::SilenceNotFound { id: id.clone() })?;
            if existing.state(now) != SilenceState::Expired {
                silence.id.clone_from(id);
            }
        }

        let id = silence.id.clone();
        info!(
            org_id = self.org_id,
            silence_id = %id,
            created_by = %silence.created_by,
            "silence saved"
        );
        silences.insert(id.clone(), silence);
        Ok(id)
    }

    /// Fetches one silence.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::SilenceNotFound` if absent.
    pub fn get_silence(&self, id: &str, now: DateTime<Utc>) -> Result<GettableSilence> {
        self.silences
            .read()
            .get(id)
            .map(|s| s.to_gettable(now))
            .ok_or_else(|| NotifyError::SilenceNotFound { id: id.to_string() })
    }

    /// Silences whose matchers satisfy `filter`, newest first.
    #[must_use]
    pub fn list_silences(&self, filter: &Matchers, now: DateTime<Utc>) -> Vec<GettableSilence> {
        let mut out: Vec<GettableSilence> = self
            .silences
            .read()
            .values()
            .filter(|s| filter.matches(&s.matcher_labels()))
            .map(|s| s.to_gettable(now))
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Expires a silence.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::SilenceNotFound` if absent and
    /// `NotifyError::InvalidSilence` if already expired.
    pub fn delete_silence(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut silences = self.silences.write();
        let silence = silences
            .get_mut(id)
            .ok_or_else(|| NotifyError::SilenceNotFound { id: id.to_string() })?;
        silence.expire(now)?;
        info!(org_id = self.org_id, silence_id = %id, "silence expired");
        Ok(())
    }

    /// Drops resolved alerts and expired silences older than the retention
    /// window. Returns `(alerts, silences)` removed.
    pub fn gc(&self, now: DateTime<Utc>) -> (usize, usize) {
        let cutoff = now - chrono_duration(self.settings.retention);

        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|_, a| a.ends_at > cutoff);
        let alerts_removed = before - alerts.len();
        drop(alerts);

        let mut silences = self.silences.write();
        let before = silences.len();
        silences.retain(|_, s| s.ends_at > cutoff);
        let silences_removed = before - silences.len();

        if alerts_removed + silences_removed > 0 {
            debug!(
                org_id = self.org_id,
                alerts = alerts_removed,
                silences = silences_removed,
                "local alertmanager garbage collected"
            );
        }
        (alerts_removed, silences_removed)
    }
}

/// Local Alertmanagers of every organisation, created on first use.
#[derive(Debug, Default)]
pub struct MultiOrgAlertmanager {
    settings: LocalSettings,
    orgs: RwLock<HashMap<i64, Arc<LocalAlertmanager>>>,
}

impl MultiOrgAlertmanager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(settings: LocalSettings) -> Self {
        Self {
            settings,
            orgs: RwLock::new(HashMap::new()),
        }
    }

    /// The Alertmanager of an organisation.
    ///
    /// # Errors
    ///
    /// Fails only if the default configuration does not compile.
    pub fn for_org(&self, org_id: i64) -> Result<Arc<LocalAlertmanager>> {
        if let Some(am) = self.orgs.read().get(&org_id) {
            return Ok(Arc::clone(am));
        }
        let mut orgs = self.orgs.write();
        if let Some(am) = orgs.get(&org_id) {
            return Ok(Arc::clone(am));
        }
        let am = Arc::new(LocalAlertmanager::new(org_id, self.settings)?);
        orgs.insert(org_id, Arc::clone(&am));
        Ok(am)
    }

    /// Runs garbage collection on every organisation.
    pub fn gc(&self, now: DateTime<Utc>) -> (usize, usize) {
        let orgs: Vec<_> = self.orgs.read().values().cloned().collect();
        orgs.iter().fold((0, 0), |(a, s), am| {
            let (da, ds) = am.gc(now);
            (a + da, s + ds)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertmanagerConfig, InhibitRule, MatcherSpec, ReceiverConfig};
    use chrono::Duration as ChronoDuration;

    fn am() -> LocalAlertmanager {
        LocalAlertmanager::new(1, LocalSettings::default()).expect("default config")
    }

    fn alert(pairs: &[(&str, &str)]) -> PostableAlert {
        PostableAlert {
            labels: pairs.iter().copied().collect(),
            annotations: Labels::new(),
            starts_at: None,
            ends_at: None,
            generator_url: None,
        }
    }

    fn silence_for(name: &str, value: &str, now: DateTime<Utc>) -> PostableSilence {
        PostableSilence {
            id: None,
            matchers: vec![MatcherSpec {
                name: name.to_string(),
                value: value.to_string(),
                is_regex: false,
                is_equal: true,
            }],
            starts_at: now,
            ends_at: now + ChronoDuration::hours(1),
            created_by: "ops".to_string(),
            comment: "planned".to_string(),
        }
    }

    fn routed_config() -> UserConfig {
        UserConfig {
            template_files: BTreeMap::new(),
            alertmanager_config: AlertmanagerConfig {
                route: Route {
                    receiver: Some("default".to_string()),
                    group_by: vec!["alertname".to_string()],
                    routes: vec![
                        Route {
                            receiver: Some("pager".to_string()),
                            matchers: vec![r#"severity="critical""#.to_string()],
                            continue_matching: true,
                            ..Route::default()
                        },
                        Route {
                            receiver: Some("team-db".to_string()),
                            matchers: vec![r#"team="db""#.to_string()],
                            group_by: vec!["...".to_string()],
                            ..Route::default()
                        },
                    ],
                    ..Route::default()
                },
                receivers: vec![
                    ReceiverConfig::named("default"),
                    ReceiverConfig::named("pager"),
                    ReceiverConfig::named("team-db"),
                ],
                inhibit_rules: vec![InhibitRule {
                    source_matchers: vec![r#"severity="critical""#.to_string()],
                    target_matchers: vec![r#"severity="warning""#.to_string()],
                    equal: vec!["cluster".to_string()],
                }],
            },
        }
    }

    mod alert_tests {
        use super::*;

        #[test]
        fn put_and_list() {
            let am = am();
            let now = Utc::now();
            am.put_alerts(&[alert(&[("alertname", "A")]), alert(&[("alertname", "B")])], now);
            let alerts = am.get_alerts(&AlertFilter::default(), now);
            assert_eq!(alerts.len(), 2);
            assert!(alerts.iter().all(|a| a.status.state == AlertState::Active));
            assert_eq!(alerts[0].receivers, vec![Receiver { name: "default".to_string() }]);
        }

        #[test]
        fn resolved_alerts_are_hidden_and_collected() {
            let am = am();
            let now = Utc::now();
            let mut resolved = alert(&[("alertname", "A")]);
            resolved.ends_at = Some(now - ChronoDuration::seconds(1));
            am.put_alerts(&[resolved], now);
            assert!(am.get_alerts(&AlertFilter::default(), now).is_empty());

            assert_eq!(am.gc(now).0, 0);
            assert_eq!(am.gc(now + ChronoDuration::days(6)).0, 1);
        }

        #[test]
        fn repeated_post_keeps_start_time() {
            let am = am();
            let t0 = Utc::now();
            am.put_alerts(&[alert(&[("alertname", "A")])], t0);
            let t1 = t0 + ChronoDuration::seconds(60);
            am.put_alerts(&[alert(&[("alertname", "A")])], t1);
            let alerts = am.get_alerts(&AlertFilter::default(), t1);
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].starts_at, t0);
            assert_eq!(alerts[0].updated_at, t1);
        }

        #[test]
        fn silence_suppresses_but_keeps_alert() {
            let am = am();
            let now = Utc::now();
            let id = am
                .create_silence(&silence_for("alertname", "A", now), now)
                .expect("silence");
            am.put_alerts(&[alert(&[("alertname", "A")]), alert(&[("alertname", "B")])], now);

            let alerts = am.get_alerts(&AlertFilter::default(), now);
            let a = alerts
                .iter()
                .find(|a| a.labels.get("alertname") == Some("A"))
                .expect("alert A");
            assert_eq!(a.status.state, AlertState::Suppressed);
            assert_eq!(a.status.silenced_by, vec![id]);

            let filter = AlertFilter {
                silenced: false,
                ..AlertFilter::default()
            };
            assert_eq!(am.get_alerts(&filter, now).len(), 1);
        }

        #[test]
        fn filter_by_matchers_and_receiver() {
            let am = am();
            am.apply_config(routed_config()).expect("apply");
            let now = Utc::now();
            am.put_alerts(
                &[
                    alert(&[("alertname", "A"), ("severity", "critical")]),
                    alert(&[("alertname", "B"), ("team", "db")]),
                ],
                now,
            );

            let filter = AlertFilter::default()
                .with_matchers(Matchers::parse_all(&[r#"alertname="B""#]).expect("parse"));
            assert_eq!(am.get_alerts(&filter, now).len(), 1);

            let filter = AlertFilter::default().with_receiver("pag.*").expect("regex");
            let alerts = am.get_alerts(&filter, now);
            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].labels.get("alertname"), Some("A"));
        }
    }

    mod routing_tests {
        use super::*;

        #[test]
        fn continue_routes_to_multiple_receivers() {
            let am = am();
            am.apply_config(routed_config()).expect("apply");
            let now = Utc::now();
            am.put_alerts(
                &[alert(&[("alertname", "A"), ("severity", "critical"), ("team", "db")])],
                now,
            );
            let alerts = am.get_alerts(&AlertFilter::default(), now);
            let names: Vec<_> = alerts[0].receivers.iter().map(|r| r.name.as_str()).collect();
            assert_eq!(names, vec!["pager", "team-db"]);
        }

        #[test]
        fn groups_use_route_group_by() {
            let am = am();
            am.apply_config(routed_config()).expect("apply");
            let now = Utc::now();
            am.put_alerts(
                &[
                    alert(&[("alertname", "A"), ("instance", "1")]),
                    alert(&[("alertname", "A"), ("instance", "2")]),
                    alert(&[("alertname", "B"), ("team", "db")]),
                ],
                now,
            );
            let groups = am.get_alert_groups(&AlertFilter::default(), now);
            assert_eq!(groups.len(), 2);
            let default_group = groups
                .iter()
                .find(|g| g.receiver.name == "default")
                .expect("default group");
            assert_eq!(default_group.labels, Labels::new().with("alertname", "A"));
            assert_eq!(default_group.alerts.len(), 2);

            let db_group = groups
                .iter()
                .find(|g| g.receiver.name == "team-db")
                .expect("db group");
            assert_eq!(db_group.labels.len(), 2);
        }

        #[test]
        fn inhibition_needs_equal_labels() {
            let am = am();
            am.apply_config(routed_config()).expect("apply");
            let now = Utc::now();
            am.put_alerts(
                &[
                    alert(&[("alertname", "Down"), ("severity", "critical"), ("cluster", "eu")]),
                    alert(&[("alertname", "Slow"), ("severity", "warning"), ("cluster", "eu")]),
                    alert(&[("alertname", "Slow"), ("severity", "warning"), ("cluster", "us")]),
                ],
                now,
            );
            let alerts = am.get_alerts(&AlertFilter::default(), now);
            let suppressed: Vec<_> = alerts
                .iter()
                .filter(|a| a.status.state == AlertState::Suppressed)
                .collect();
            assert_eq!(suppressed.len(), 1);
            assert_eq!(suppressed[0].labels.get("cluster"), Some("eu"));
            assert_eq!(suppressed[0].status.inhibited_by.len(), 1);
        }

        #[test]
        fn invalid_config_keeps_previous() {
            let am = am();
            let mut config = routed_config();
            config.alertmanager_config.route.routes[0].receiver = Some("missing".to_string());
            let err = am.apply_config(config).expect_err("unknown receiver");
            assert!(matches!(err, NotifyError::InvalidConfig { .. }));
            assert_eq!(am.config(), UserConfig::default());
        }

        #[test]
        fn duplicate_receivers_rejected() {
            let am = am();
            let mut config = routed_config();
            config
                .alertmanager_config
                .receivers
                .push(ReceiverConfig::named("pager"));
            assert!(am.apply_config(config).is_err());
        }
    }

    mod silence_tests {
        use super::*;

        #[test]
        fn crud() {
            let am = am();
            let now = Utc::now();
            let id = am
                .create_silence(&silence_for("alertname", "A", now), now)
                .expect("create");
            assert_eq!(am.get_silence(&id, now).expect("get").status.state, SilenceState::Active);

            am.delete_silence(&id, now).expect("expire");
            assert_eq!(am.get_silence(&id, now).expect("get").status.state, SilenceState::Expired);
            assert!(am.delete_silence(&id, now).is_err());
            assert!(matches!(
                am.delete_silence("nope", now),
                Err(NotifyError::SilenceNotFound { .. })
            ));
        }

        #[test]
        fn update_keeps_id() {
            let am = am();
            let now = Utc::now();
            let id = am
                .create_silence(&silence_for("alertname", "A", now), now)
                .expect("create");
            let mut update = silence_for("alertname", "B", now);
            update.id = Some(id.clone());
            assert_eq!(am.create_silence(&update, now).expect("update"), id);
            assert_eq!(am.list_silences(&Matchers::default(), now).len(), 1);
        }

        #[test]
        fn list_filters_on_matchers() {
            let am = am();
            let now = Utc::now();
            am.create_silence(&silence_for("alertname", "A", now), now)
                .expect("create");
            am.create_silence(&silence_for("alertname", "B", now), now)
                .expect("create");
            let filter = Matchers::parse_all(&[r#"alertname="B""#]).expect("parse");
            assert_eq!(am.list_silences(&filter, now).len(), 1);
        }
    }

    #[test]
    fn multi_org_isolation() {
        let multi = MultiOrgAlertmanager::new(LocalSettings::default());
        let now = Utc::now();
        multi
            .for_org(1)
            .expect("org 1")
            .put_alerts(&[alert(&[("alertname", "A")])], now);
        assert!(
            multi
                .for_org(2)
                .expect("org 2")
                .get_alerts(&AlertFilter::default(), now)
                .is_empty()
        );
        assert_eq!(multi.for_org(1).expect("org 1").org_id(), 1);
    }
}
