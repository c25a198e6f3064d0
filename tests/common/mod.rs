#![allow(dead_code)]

use metric_rollup::accumulator::{
    AccumulatorContext, AccumulatorMetrics, MetricAggregate, MetricAggregationMethod,
};
use metric_rollup::test_utils::{CountingLatePointLogger, StaticPolicyProvider};
use std::sync::Arc;

pub mod fixtures;

/// Policy provider mapping every fixture metric to its aggregate.
pub fn policy_provider() -> StaticPolicyProvider {
    fixtures::METRICS
        .iter()
        .fold(StaticPolicyProvider::default(), |provider, (name, aggregate)| {
            provider.with(
                name,
                vec![MetricAggregate::new(*aggregate, MetricAggregationMethod::Sum, false)],
            )
        })
}

pub fn context(prefix: &str, logger: Arc<CountingLatePointLogger>) -> AccumulatorContext {
    AccumulatorContext::new(
        Arc::new(policy_provider()),
        AccumulatorMetrics::unregistered(prefix).expect("valid metric names"),
    )
    .with_late_point_logger(logger)
}
