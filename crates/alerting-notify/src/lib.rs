//! Notification routing for alert instances.
//!
//! `alerting-notify` hands committed alert instances to Alertmanagers:
//!
//! - **Local Alertmanager**: per-organisation alert store, silences, routing
//!   tree and inhibition rules, answering the Alertmanager v2 queries
//! - **Remote Alertmanagers**: external backends reached over HTTP
//! - **Router**: chooses backends per organisation, withholds silenced alerts
//!   from external backends, retries delivery and tracks backend health
//!
//! # Example
//!
//! ```rust
//! use alerting_notify::{AlertFilter, NotificationRouter, RouterConfig};
//!
//! let router = NotificationRouter::new(RouterConfig::default());
//! let alerts = router.get_alerts(1, &AlertFilter::default()).unwrap();
//! assert!(alerts.is_empty());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod local;
pub mod matcher;
pub mod models;
pub mod remote;
pub mod router;
pub mod silence;

pub use error::{NotifyError, Result};
pub use local::{AlertFilter, LocalAlertmanager, LocalSettings, MultiOrgAlertmanager};
pub use matcher::{MatchType, Matcher, Matchers};
pub use models::{
    AlertGroup, AlertState, AlertStatus, AlertmanagerConfig, DEFAULT_RECEIVER, GettableAlert,
    GettableSilence, InhibitRule, MatcherSpec, PostSilenceResponse, PostableAlert,
    PostableSilence, Receiver, ReceiverConfig, Route, SilenceState, SilenceStatus, UserConfig,
};
pub use remote::{AlertSender, RemoteAlertmanager};
pub use router::{
    AlertmanagersChoice, BackendHealth, DeliveryReport, NotificationRouter, RouterConfig,
};
pub use silence::Silence;
