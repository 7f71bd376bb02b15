//! Alert rule evaluation and alert instance lifecycle.
//!
//! `alerting-core` evaluates user-defined alert rules against time-series
//! queries on a per-rule schedule and tracks the resulting alert instances
//! through their lifecycle.
//!
//! # Components
//!
//! - **Scheduler**: one evaluation loop per rule, bounded by a global limiter
//! - **Evaluator**: runs a rule's queries and compares the condition
//! - **State Manager**: `Normal → Pending → Alerting` transitions, persisted
//!   before they are handed out for notification
//! - **Stores**: rule and instance store contracts with in-memory implementations
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use alerting_core::{
//!     AlertQuery, AlertRule, ComparisonOperator, Condition, Evaluator, MemoryInstanceStore,
//!     MemoryRuleStore, NoopNotifier, Scheduler, SchedulerConfig, StateManager,
//!     StaticQueryExecutor,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> alerting_core::Result<()> {
//! let rule = AlertRule::builder(
//!     "cpu-high",
//!     "HighCPU",
//!     Condition::new("A", ComparisonOperator::GreaterThan, 80.0),
//! )
//! .query(AlertQuery::new("A", "prometheus", serde_json::json!({"expr": "cpu"})))
//! .interval(Duration::from_secs(10))
//! .for_duration(Duration::from_secs(30))
//! .build()?;
//!
//! let state = Arc::new(StateManager::new(Arc::new(MemoryInstanceStore::new())));
//! let scheduler = Scheduler::new(
//!     SchedulerConfig::default(),
//!     Evaluator::new(Arc::new(StaticQueryExecutor::new())),
//!     state,
//!     Arc::new(NoopNotifier),
//!     Arc::new(MemoryRuleStore::new()),
//! );
//! scheduler.add_or_update_rule(rule)?;
//! assert_eq!(scheduler.scheduled_rules().len(), 1);
//! scheduler.shutdown();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod datasource;
pub mod error;
pub mod eval;
pub mod instance;
pub mod labels;
pub mod quota;
pub mod retry;
pub mod rule;
pub mod scheduler;
pub mod state;
pub mod store;

pub use datasource::{
    BasicAuth, Capabilities, Datasource, DatasourceCache, DatasourceType, MemoryDatasourceCache,
};
pub use error::{AlertingError, CapacityKind, Result};
pub use eval::{
    EvalOutcome, EvaluationResult, Evaluator, QueryExecutor, QueryResponse, QueryResult, Sample,
    Series, StaticQueryExecutor,
};
pub use instance::{AlertInstance, InstanceKey, InstanceState};
pub use labels::{ALERTNAME, Fingerprint, Labels, RULE_UID};
pub use quota::{QuotaResource, QuotaService, RuleCountQuota, Unlimited};
pub use retry::RetryPolicy;
pub use rule::{
    AlertQuery, AlertRule, AlertRuleBuilder, ComparisonOperator, Condition, ExecErrState,
    NoDataState, Reducer, RelativeTimeRange, RuleKey, RuleLimits,
};
pub use scheduler::{
    AlertNotifier, Clock, Health, NoopNotifier, RuleHealth, Scheduler, SchedulerConfig,
};
pub use state::{StateManager, StateManagerConfig, StateTransition, TickOutcome};
pub use store::{InstanceStore, MemoryInstanceStore, MemoryRuleStore, RuleStore};
