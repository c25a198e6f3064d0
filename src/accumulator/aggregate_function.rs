use super::aggregation_method::MetricAggregationMethod;
use super::error::AggregateError;
use crate::datamodel::DataPoint;
use std::collections::BTreeMap;

/// Whether a function flushes one value or a family of suffixed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    SingleValue,
    MultiValue,
}

/// Running state of one aggregate within one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFunction {
    Sum { sum: f64 },
    Avg { sum: f64, count: u64 },
    Latency(LatencyStats),
}

impl AggregateFunction {
    /// Builds the function for an aggregate target.
    ///
    /// `Custom1` averages aggregates whose name ends with `mean`, `p95`, `min`
    /// or `max` and sums everything else.
    pub fn create(key: &str, method: MetricAggregationMethod) -> Self {
        match method {
            MetricAggregationMethod::Avg => Self::avg(),
            MetricAggregationMethod::Sum => Self::sum(),
            MetricAggregationMethod::Latency => Self::latency(),
            MetricAggregationMethod::Custom1 => Self::custom1(key),
        }
    }

    pub fn sum() -> Self {
        AggregateFunction::Sum { sum: 0.0 }
    }

    pub fn avg() -> Self {
        AggregateFunction::Avg { sum: 0.0, count: 0 }
    }

    pub fn latency() -> Self {
        AggregateFunction::Latency(LatencyStats::default())
    }

    fn custom1(key: &str) -> Self {
        if ["mean", "p95", "min", "max"]
            .iter()
            .any(|suffix| key.ends_with(suffix))
        {
            Self::avg()
        } else {
            Self::sum()
        }
    }

    pub fn kind(&self) -> AggregateKind {
        match self {
            AggregateFunction::Latency(_) => AggregateKind::MultiValue,
            _ => AggregateKind::SingleValue,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum { .. } => "sum",
            AggregateFunction::Avg { .. } => "avg",
            AggregateFunction::Latency(_) => "latency",
        }
    }

    /// Feeds a point observed at `now` (epoch seconds).
    pub fn add(&mut self, point: &DataPoint, now: i64) {
        match self {
            AggregateFunction::Sum { sum } => *sum += point.value,
            AggregateFunction::Avg { sum, count } => {
                *sum += point.value;
                *count += 1;
            }
            AggregateFunction::Latency(stats) => stats.accept(now.saturating_sub(point.ts)),
        }
    }

    /// Single-value result. Multi-value functions report 0 here.
    pub fn value(&self) -> f64 {
        match self {
            AggregateFunction::Sum { sum } => *sum,
            AggregateFunction::Avg { count: 0, .. } => 0.0,
            AggregateFunction::Avg { sum, count } => *sum / *count as f64,
            AggregateFunction::Latency(_) => 0.0,
        }
    }

    /// Suffix to value mapping of a multi-value function.
    pub fn values(&self) -> Result<BTreeMap<&'static str, f64>, AggregateError> {
        match self {
            AggregateFunction::Latency(stats) => Ok(stats.values()),
            other => Err(AggregateError::UnsupportedOperation {
                function: other.type_name(),
            }),
        }
    }
}

/// Arrival delay statistics, in whole seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyStats {
    count: u64,
    sum: i64,
    min: i64,
    max: i64,
}

impl LatencyStats {
    pub fn accept(&mut self, delay: i64) {
        if self.count == 0 {
            self.min = delay;
            self.max = delay;
        } else {
            self.min = self.min.min(delay);
            self.max = self.max.max(delay);
        }
        self.count += 1;
        self.sum = self.sum.saturating_add(delay);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum as f64 / self.count as f64
    }

    fn values(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("min", self.min as f64),
            ("max", self.max as f64),
            ("mean", self.mean()),
            ("count", self.count as f64),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(value: f64, ts: i64) -> DataPoint {
        DataPoint::new("metric", value, ts)
    }

    #[test]
    fn test_custom1_selection() {
        let function = AggregateFunction::create("foo.bar.p95", MetricAggregationMethod::Custom1);
        assert_eq!(function, AggregateFunction::avg());
        assert_eq!(function.value(), 0.0);
        assert_eq!(
            function.values(),
            Err(AggregateError::UnsupportedOperation { function: "avg" })
        );

        for key in ["a.mean", "a.min", "a.max"] {
            assert_eq!(
                AggregateFunction::create(key, MetricAggregationMethod::Custom1),
                AggregateFunction::avg()
            );
        }
        assert_eq!(
            AggregateFunction::create("foo.bar.count", MetricAggregationMethod::Custom1),
            AggregateFunction::sum()
        );

        let function = AggregateFunction::create("foo.bar.latency", MetricAggregationMethod::Latency);
        assert_eq!(function.kind(), AggregateKind::MultiValue);
        assert_eq!(function.value(), 0.0);
    }

    #[test]
    fn test_sum_and_avg_are_order_independent() {
        let points = [point(1.5, 0), point(4.0, 0), point(-2.25, 0)];
        let orders = [[0, 1, 2], [2, 0, 1], [1, 2, 0]];

        for method in [MetricAggregationMethod::Sum, MetricAggregationMethod::Avg] {
            let results: Vec<f64> = orders
                .iter()
                .map(|order| {
                    let mut function = AggregateFunction::create("x", method);
                    for i in order {
                        function.add(&points[*i], 0);
                    }
                    function.value()
                })
                .collect();
            assert!(results.windows(2).all(|w| w[0] == w[1]), "{:?}", results);
        }
    }

    #[test]
    fn test_sum_and_avg_values() {
        let mut sum = AggregateFunction::sum();
        let mut avg = AggregateFunction::avg();
        assert_eq!(avg.value(), 0.0);
        for v in [1.0, 2.0, 6.0] {
            sum.add(&point(v, 0), 0);
            avg.add(&point(v, 0), 0);
        }
        assert_eq!(sum.value(), 9.0);
        assert_eq!(avg.value(), 3.0);
        assert!(sum.values().is_err());
    }

    #[test]
    fn test_latency_aggregation() {
        let time = 1_700_000_000;
        let mut latency = AggregateFunction::latency();
        for delay in 0..5 {
            latency.add(&point(2.0, time), time + delay);
        }

        let values = latency.values().unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values["min"], 0.0);
        assert_eq!(values["max"], 4.0);
        assert_eq!(values["count"], 5.0);
        assert_eq!(values["mean"], 2.0);
    }

    #[test]
    fn test_latency_delay_saturates() {
        let mut latency = AggregateFunction::latency();
        latency.add(&point(1.0, i64::MIN), i64::MAX);
        latency.add(&point(1.0, i64::MIN), i64::MAX);

        let values = latency.values().unwrap();
        assert_eq!(values["max"], i64::MAX as f64);
        assert_eq!(values["count"], 2.0);
    }

    #[test]
    fn test_latency_without_samples() {
        let values = AggregateFunction::latency().values().unwrap();
        assert_eq!(values["min"], 0.0);
        assert_eq!(values["max"], 0.0);
        assert_eq!(values["mean"], 0.0);
        assert_eq!(values["count"], 0.0);
    }
}
