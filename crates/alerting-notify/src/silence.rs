//! Silences: time-bounded label matchers that mute alerts.

use alerting_core::Labels;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{NotifyError, Result};
use crate::matcher::Matchers;
use crate::models::{GettableSilence, PostableSilence, SilenceState, SilenceStatus};

/// A stored silence.
#[derive(Debug, Clone, PartialEq)]
pub struct Silence {
    /// Unique identifier.
    pub id: String,
    /// Matchers selecting the muted alerts.
    pub matchers: Matchers,
    /// Start of the silence.
    pub starts_at: DateTime<Utc>,
    /// End of the silence.
    pub ends_at: DateTime<Utc>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
    /// Author.
    pub created_by: String,
    /// Reason.
    pub comment: String,
}

impl Silence {
    /// Validates a posted silence and builds it with a fresh ID.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidSilence` if the silence has no
    /// matchers, only matchers that match the empty string, or an end time
    /// that is not after its start time or already in the past.
    pub fn from_postable(postable: &PostableSilence, now: DateTime<Utc>) -> Result<Self> {
        let matchers = Matchers::from_specs(&postable.matchers)?;
        if matchers.is_empty() {
            return Err(invalid("at least one matcher is required"));
        }
        if matchers.iter().all(|m| m.matches_value("")) {
            return Err(invalid("at least one matcher must not match the empty string"));
        }
        if postable.ends_at <= postable.starts_at {
            return Err(invalid("end time must be after start time"));
        }
        if postable.ends_at <= now {
            return Err(invalid("end time cannot be in the past"));
        }
        if postable.created_by.trim().is_empty() {
            return Err(invalid("createdBy is required"));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            matchers,
            // Start times in the past are clamped to now.
            starts_at: postable.starts_at.max(now),
            ends_at: postable.ends_at,
            updated_at: now,
            created_by: postable.created_by.clone(),
            comment: postable.comment.clone(),
        })
    }

    /// Lifecycle state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> SilenceState {
        if now < self.starts_at {
            SilenceState::Pending
        } else if now < self.ends_at {
            SilenceState::Active
        } else {
            SilenceState::Expired
        }
    }

    /// True if the silence is active and matches the labels.
    #[must_use]
    pub fn mutes(&self, labels: &Labels, now: DateTime<Utc>) -> bool {
        self.state(now) == SilenceState::Active && self.matchers.matches(labels)
    }

    /// Ends the silence at `now`.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::InvalidSilence` if it already expired.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.state(now) {
            SilenceState::Expired => Err(invalid("silence already expired")),
            SilenceState::Pending => {
                self.starts_at = now;
                self.ends_at = now;
                self.updated_at = now;
                Ok(())
            }
            SilenceState::Active => {
                self.ends_at = now;
                self.updated_at = now;
                Ok(())
            }
        }
    }

    /// The labels a silence's equality matchers describe, used for filtering.
    #[must_use]
    pub fn matcher_labels(&self) -> Labels {
        self.matchers
            .iter()
            .map(|m| (m.name().to_string(), m.value().to_string()))
            .collect()
    }

    /// Wire form at `now`.
    #[must_use]
    pub fn to_gettable(&self, now: DateTime<Utc>) -> GettableSilence {
        GettableSilence {
            id: self.id.clone(),
            status: SilenceStatus {
                state: self.state(now),
            },
            updated_at: self.updated_at,
            matchers: self.matchers.iter().map(crate::matcher::Matcher::to_spec).collect(),
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            created_by: self.created_by.clone(),
            comment: self.comment.clone(),
        }
    }
}

fn invalid(reason: &str) -> NotifyError {
    NotifyError::InvalidSilence {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatcherSpec;
    use chrono::Duration;

    fn spec(name: &str, value: &str, is_regex: bool) -> MatcherSpec {
        MatcherSpec {
            name: name.to_string(),
            value: value.to_string(),
            is_regex,
            is_equal: true,
        }
    }

    fn postable(now: DateTime<Utc>) -> PostableSilence {
        PostableSilence {
            id: None,
            matchers: vec![spec("alertname", "HighCPU", false)],
            starts_at: now,
            ends_at: now + Duration::hours(2),
            created_by: "admin".to_string(),
            comment: "maintenance".to_string(),
        }
    }

    #[test]
    fn lifecycle_states() {
        let now = Utc::now();
        let mut p = postable(now);
        p.starts_at = now + Duration::hours(1);
        let silence = Silence::from_postable(&p, now).expect("valid");
        assert_eq!(silence.state(now), SilenceState::Pending);
        assert_eq!(silence.state(now + Duration::minutes(90)), SilenceState::Active);
        assert_eq!(silence.state(now + Duration::hours(3)), SilenceState::Expired);
    }

    #[test]
    fn mutes_only_matching_active() {
        let now = Utc::now();
        let silence = Silence::from_postable(&postable(now), now).expect("valid");
        let hit = Labels::new().with("alertname", "HighCPU");
        let miss = Labels::new().with("alertname", "DiskFull");
        assert!(silence.mutes(&hit, now));
        assert!(!silence.mutes(&miss, now));
        assert!(!silence.mutes(&hit, now + Duration::hours(3)));
    }

    #[test]
    fn rejects_matchers_matching_everything() {
        let now = Utc::now();
        let mut p = postable(now);
        p.matchers = vec![spec("alertname", ".*", true)];
        assert!(matches!(
            Silence::from_postable(&p, now),
            Err(NotifyError::InvalidSilence { .. })
        ));
    }

    #[test]
    fn rejects_bad_times() {
        let now = Utc::now();
        let mut p = postable(now);
        p.ends_at = p.starts_at;
        assert!(Silence::from_postable(&p, now).is_err());

        let mut p = postable(now - Duration::hours(5));
        p.ends_at = now - Duration::hours(1);
        assert!(Silence::from_postable(&p, now).is_err());
    }

    #[test]
    fn expire_active_and_pending() {
        let now = Utc::now();
        let mut active = Silence::from_postable(&postable(now), now).expect("valid");
        active.expire(now + Duration::minutes(1)).expect("expire");
        assert_eq!(active.state(now + Duration::minutes(1)), SilenceState::Expired);
        assert!(active.expire(now + Duration::minutes(2)).is_err());

        let mut p = postable(now);
        p.starts_at = now + Duration::hours(1);
        let mut pending = Silence::from_postable(&p, now).expect("valid");
        pending.expire(now).expect("expire");
        assert_eq!(pending.state(now), SilenceState::Expired);
    }

    #[test]
    fn gettable_carries_state() {
        let now = Utc::now();
        let silence = Silence::from_postable(&postable(now), now).expect("valid");
        let g = silence.to_gettable(now);
        assert_eq!(g.status.state, SilenceState::Active);
        assert_eq!(g.matchers, vec![spec("alertname", "HighCPU", false)]);
    }
}
