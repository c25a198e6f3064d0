//! Windowed aggregation of metric points.
//!
//! Points are matched against the aggregation rules, accumulated into one
//! [`Slot`] per time window and flushed downstream once the window is old
//! enough, or when the caller forces a roll-up.

use crate::datamodel::DataPoint;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

pub mod aggregate_function;
pub mod aggregation_method;
pub mod error;
pub mod late_point_logger;
pub mod live_accumulator;
pub mod metric_aggregation_rule;
pub mod metric_aggregation_rules;
pub mod metrics;
pub mod namespace;
pub mod policy;
pub mod recovery_accumulator;
pub mod rules_loader;
pub mod sink;
pub mod slot;
pub mod slot_strategy;
mod slot_table;

pub use aggregate_function::{AggregateFunction, AggregateKind, LatencyStats};
pub use aggregation_method::MetricAggregationMethod;
pub use error::{AggregateError, RuleError, SlotStrategyError};
pub use late_point_logger::{
    LatePointLogger, LateReason, MeteredLatePointLogger, NoopLatePointLogger,
};
pub use live_accumulator::LiveAccumulator;
pub use metric_aggregation_rule::{MetricAggregationRule, RuleMatch};
pub use metric_aggregation_rules::MetricAggregationRules;
pub use metrics::AccumulatorMetrics;
pub use namespace::{MeteredNamespaceCounter, NamespaceCounter, NoopNamespaceCounter};
pub use policy::{
    CachingPolicyProvider, MetricAggregate, MetricAggregationPolicy,
    MetricAggregationPolicyProvider, MetricAggregationPolicySource, RulesPolicyProvider,
    RulesSource,
};
pub use recovery_accumulator::RecoveryAccumulator;
pub use rules_loader::MetricAggregationRulesLoader;
pub use sink::DataPointSink;
pub use slot::Slot;
pub use slot_strategy::{DefaultSlotStrategy, SlotStrategy};

pub const DEFAULT_MIN_PAUSE_BETWEEN_FLUSHES: Duration = Duration::from_secs(15);

/// What happened to a point handed to [`Accumulator::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointOutcome {
    /// No rule maps the metric name to an aggregate
    NoAggregates,
    Accumulated {
        aggregates: usize,
        /// At least one matching rule asked to drop the original point
        drop_original: bool,
    },
    Late(LateReason),
}

impl PointOutcome {
    pub fn is_drop_original(&self) -> bool {
        matches!(
            self,
            PointOutcome::Accumulated {
                drop_original: true,
                ..
            }
        )
    }
}

/// Summary of one roll-up that was not skipped by pacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollUpReport {
    pub closed_slots: usize,
    pub open_slots: usize,
    pub flushed_points: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    pub open_slots: usize,
    pub pending_aggregates: usize,
    pub flushed_aggregates: u64,
    pub max_closed_slot_ts: i64,
}

/// Collaborators and tuning shared by both accumulator flavours.
#[derive(Debug, Clone)]
pub struct AccumulatorContext {
    pub policy_provider: Arc<dyn MetricAggregationPolicyProvider>,
    pub slot_strategy: Arc<dyn SlotStrategy>,
    pub late_point_logger: Arc<dyn LatePointLogger>,
    pub namespace_counter: Arc<dyn NamespaceCounter>,
    pub metrics: AccumulatorMetrics,
    pub min_pause_between_flushes: Duration,
}

impl AccumulatorContext {
    pub fn new(
        policy_provider: Arc<dyn MetricAggregationPolicyProvider>,
        metrics: AccumulatorMetrics,
    ) -> Self {
        Self {
            policy_provider,
            slot_strategy: Arc::new(DefaultSlotStrategy::default()),
            late_point_logger: Arc::new(NoopLatePointLogger),
            namespace_counter: Arc::new(NoopNamespaceCounter),
            metrics,
            min_pause_between_flushes: DEFAULT_MIN_PAUSE_BETWEEN_FLUSHES,
        }
    }

    pub fn with_slot_strategy(mut self, slot_strategy: Arc<dyn SlotStrategy>) -> Self {
        self.slot_strategy = slot_strategy;
        self
    }

    pub fn with_late_point_logger(mut self, late_point_logger: Arc<dyn LatePointLogger>) -> Self {
        self.late_point_logger = late_point_logger;
        self
    }

    pub fn with_namespace_counter(mut self, namespace_counter: Arc<dyn NamespaceCounter>) -> Self {
        self.namespace_counter = namespace_counter;
        self
    }

    pub fn with_min_pause_between_flushes(mut self, pause: Duration) -> Self {
        self.min_pause_between_flushes = pause;
        self
    }
}

/// Aggregation engine: buffers points per window and flushes closed windows.
pub trait Accumulator: Send + Sync + Debug {
    fn add(&self, point: &DataPoint) -> PointOutcome;

    /// Closes the windows ready to be flushed, every window when `force` is set.
    ///
    /// Without `force`, a call within the pacing interval of the previous
    /// roll-up does nothing and returns `None`.
    fn roll_up(&self, sink: &dyn DataPointSink, now_millis: i64, force: bool)
    -> Option<RollUpReport>;

    /// End of the newest flushed window, 0 before any flush.
    fn max_closed_slot_ts(&self) -> i64;

    fn slot_strategy(&self) -> &dyn SlotStrategy;

    fn reset(&self);

    /// Open windows, ascending.
    fn time_slots(&self) -> Vec<i64>;

    fn refresh_stats(&self);

    fn dump_stats(&self);

    fn stats(&self) -> AccumulatorStats;
}
