//! Test doubles for the accumulator collaborators.
//!
//! Available to unit tests and, through the `test-utils` feature, to the
//! integration tests.

use crate::accumulator::{
    DataPointSink, LatePointLogger, LateReason, MetricAggregate, MetricAggregationPolicy,
    MetricAggregationPolicyProvider,
};
use crate::datamodel::{DataPoint, DataPoints};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Records every late point it is handed.
#[derive(Debug, Default)]
pub struct CountingLatePointLogger {
    points: Mutex<Vec<(DataPoint, LateReason)>>,
}

impl CountingLatePointLogger {
    pub fn count(&self, reason: LateReason) -> usize {
        self.points
            .lock()
            .iter()
            .filter(|(_, r)| *r == reason)
            .count()
    }

    pub fn total(&self) -> usize {
        self.points.lock().len()
    }

    pub fn points(&self) -> Vec<(DataPoint, LateReason)> {
        self.points.lock().clone()
    }
}

impl LatePointLogger for CountingLatePointLogger {
    fn log_late_point(&self, point: &DataPoint, _now: i64, reason: LateReason, _context: &str) {
        self.points.lock().push((point.clone(), reason));
    }
}

/// Keeps every batch delivered to it.
#[derive(Debug, Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<DataPoints>>,
}

impl CollectingSink {
    pub fn batches(&self) -> Vec<DataPoints> {
        self.batches.lock().clone()
    }

    /// All delivered points, in delivery order.
    pub fn points(&self) -> Vec<DataPoint> {
        self.batches
            .lock()
            .iter()
            .flat_map(|batch| batch.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().iter().map(DataPoints::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataPointSink for CollectingSink {
    fn accept(&self, points: DataPoints) -> anyhow::Result<()> {
        self.batches.lock().push(points);
        Ok(())
    }
}

/// Fixed name to aggregates mapping, revision 1.
#[derive(Debug, Default, Clone)]
pub struct StaticPolicyProvider {
    policies: HashMap<String, Arc<MetricAggregationPolicy>>,
}

impl StaticPolicyProvider {
    pub fn with(mut self, name: &str, aggregates: Vec<MetricAggregate>) -> Self {
        self.policies.insert(
            name.to_string(),
            Arc::new(MetricAggregationPolicy::new(1, aggregates)),
        );
        self
    }
}

impl MetricAggregationPolicyProvider for StaticPolicyProvider {
    fn policy_for(&self, name: &str) -> Arc<MetricAggregationPolicy> {
        self.policies
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(MetricAggregationPolicy::default()))
    }
}
