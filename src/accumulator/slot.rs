use super::aggregate_function::{AggregateFunction, AggregateKind};
use super::late_point_logger::{LateReason, LatePointLogger};
use super::policy::MetricAggregate;
use super::sink::DataPointSink;
use crate::datamodel::{DataPoint, DataPoints};
use anyhow::Result;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// One open time window and the aggregates collected for it.
pub struct Slot {
    ts: i64,
    closed: RwLock<bool>,
    aggregates: DashMap<String, AggregateFunction>,
    late_point_logger: Arc<dyn LatePointLogger>,
}

impl Slot {
    pub fn new(ts: i64, late_point_logger: Arc<dyn LatePointLogger>) -> Self {
        Self {
            ts,
            closed: RwLock::new(false),
            aggregates: DashMap::new(),
            late_point_logger,
        }
    }

    pub fn ts(&self) -> i64 {
        self.ts
    }

    /// Feeds `point` into the aggregate, creating the function on first use.
    ///
    /// Returns false when the slot was already closed. The point is then
    /// reported as late instead.
    pub fn apply(&self, aggregate: &MetricAggregate, point: &DataPoint, now: i64) -> bool {
        self.apply_all(std::slice::from_ref(aggregate), point, now)
    }

    /// Same as `apply` for several aggregates, all of them or none.
    pub fn apply_all(&self, aggregates: &[MetricAggregate], point: &DataPoint, now: i64) -> bool {
        let closed = self.closed.read();
        if *closed {
            self.late_point_logger.log_late_point(
                point,
                now,
                LateReason::SlotClosed,
                &format!("slot [{}] is already closed", self.ts),
            );
            return false;
        }

        for aggregate in aggregates {
            self.add_to(aggregate, point, now);
        }
        true
    }

    fn add_to(&self, aggregate: &MetricAggregate, point: &DataPoint, now: i64) {
        let name = aggregate.aggregate_name();
        if let Some(mut function) = self.aggregates.get_mut(name) {
            function.add(point, now);
            return;
        }
        self.aggregates
            .entry(name.to_string())
            .or_insert_with(|| AggregateFunction::create(name, aggregate.method()))
            .add(point, now);
    }

    /// Distinct aggregates in the slot.
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Marks the slot closed and hands its aggregates to the sink as one batch.
    ///
    /// Waits for the applies in flight. Returns the number of points
    /// delivered, 0 when the slot holds nothing or was closed before.
    pub fn close(&self, sink: &dyn DataPointSink) -> Result<usize> {
        {
            let mut closed = self.closed.write();
            if *closed {
                return Ok(0);
            }
            *closed = true;
        }
        if self.is_empty() {
            return Ok(0);
        }

        let points = self.materialize()?;
        if points.is_empty() {
            return Ok(0);
        }
        let count = points.len();
        sink.accept(DataPoints::from(points))?;
        Ok(count)
    }

    fn materialize(&self) -> Result<Vec<DataPoint>> {
        let mut points = Vec::with_capacity(self.aggregates.len());
        for entry in self.aggregates.iter() {
            let (name, function) = entry.pair();
            match function.kind() {
                AggregateKind::SingleValue => {
                    points.push(DataPoint::new(name.as_str(), function.value(), self.ts));
                }
                AggregateKind::MultiValue => {
                    for (suffix, value) in function.values()? {
                        points.push(DataPoint::new(format!("{}.{}", name, suffix), value, self.ts));
                    }
                }
            }
        }
        points.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(points)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("ts", &self.ts)
            .field("closed", &self.is_closed())
            .field("aggregates", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::MetricAggregationMethod;
    use crate::test_utils::{CollectingSink, CountingLatePointLogger};

    fn sum(name: &str) -> MetricAggregate {
        MetricAggregate::new(name, MetricAggregationMethod::Sum, false)
    }

    #[test]
    fn test_apply_and_close() {
        let logger = Arc::new(CountingLatePointLogger::default());
        let slot = Slot::new(120, logger.clone());

        assert!(slot.apply(&sum("b.total"), &DataPoint::new("x", 2.0, 130), 131));
        assert!(slot.apply(&sum("b.total"), &DataPoint::new("y", 3.0, 135), 136));
        assert!(slot.apply(
            &MetricAggregate::new("a.delay", MetricAggregationMethod::Latency, false),
            &DataPoint::new("x", 2.0, 130),
            133
        ));
        assert_eq!(slot.len(), 2);

        let sink = CollectingSink::default();
        assert_eq!(slot.close(&sink).unwrap(), 5);
        assert!(slot.is_closed());

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        let names: Vec<&str> = batches[0].iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["a.delay.count", "a.delay.max", "a.delay.mean", "a.delay.min", "b.total"]
        );
        assert!(batches[0].iter().all(|p| p.ts == 120));
        assert_eq!(batches[0].get(4).unwrap().value, 5.0);
        assert_eq!(batches[0].get(1).unwrap().value, 3.0);

        // applying after close is a late point
        assert!(!slot.apply(&sum("b.total"), &DataPoint::new("x", 1.0, 130), 200));
        assert_eq!(logger.count(LateReason::SlotClosed), 1);

        // closing again delivers nothing
        assert_eq!(slot.close(&sink).unwrap(), 0);
        assert_eq!(sink.batches().len(), 1);
    }

    #[test]
    fn test_empty_slot_delivers_nothing() {
        let slot = Slot::new(0, Arc::new(CountingLatePointLogger::default()));
        let sink = CollectingSink::default();
        assert_eq!(slot.close(&sink).unwrap(), 0);
        assert!(sink.batches().is_empty());
    }

    #[test]
    fn test_sink_error_is_returned() {
        let slot = Slot::new(0, Arc::new(CountingLatePointLogger::default()));
        slot.apply(&sum("a"), &DataPoint::new("x", 1.0, 0), 0);

        let failing = |_points: DataPoints| -> anyhow::Result<()> { anyhow::bail!("storage down") };
        let err = slot.close(&failing).unwrap_err();
        assert_eq!(err.to_string(), "storage down");
        assert!(slot.is_closed());
    }

    #[test]
    fn test_concurrent_applies_all_land_before_close() {
        let slot = Arc::new(Slot::new(0, Arc::new(CountingLatePointLogger::default())));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        slot.apply(&sum("a"), &DataPoint::new("x", 1.0, 0), 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let sink = CollectingSink::default();
        slot.close(&sink).unwrap();
        assert_eq!(sink.points()[0].value, 4000.0);
    }
}
