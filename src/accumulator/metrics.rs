use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Instruments describing one accumulator.
#[derive(Debug, Clone)]
pub struct AccumulatorMetrics {
    pub flush_duration: Histogram,
    pub slot_flush_duration: Histogram,
    pub created_slots: IntCounter,
    pub closed_slots: IntCounter,
    pub flushed_aggregates: IntCounter,
    pub sink_failures: IntCounter,
    pub pending_aggregates: IntGauge,
    pub open_slots: IntGauge,
}

impl AccumulatorMetrics {
    pub fn new(registry: &Registry, prefix: &str) -> Result<Self, prometheus::Error> {
        let metrics = Self::unregistered(prefix)?;
        registry.register(Box::new(metrics.flush_duration.clone()))?;
        registry.register(Box::new(metrics.slot_flush_duration.clone()))?;
        registry.register(Box::new(metrics.created_slots.clone()))?;
        registry.register(Box::new(metrics.closed_slots.clone()))?;
        registry.register(Box::new(metrics.flushed_aggregates.clone()))?;
        registry.register(Box::new(metrics.sink_failures.clone()))?;
        registry.register(Box::new(metrics.pending_aggregates.clone()))?;
        registry.register(Box::new(metrics.open_slots.clone()))?;
        Ok(metrics)
    }

    /// Instruments that are not exported anywhere.
    pub fn unregistered(prefix: &str) -> Result<Self, prometheus::Error> {
        let durations = vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];
        Ok(Self {
            flush_duration: Histogram::with_opts(
                HistogramOpts::new(
                    format!("{}_flush_duration_seconds", prefix),
                    "Time spent in one roll-up",
                )
                .buckets(durations.clone()),
            )?,
            slot_flush_duration: Histogram::with_opts(
                HistogramOpts::new(
                    format!("{}_slot_flush_duration_seconds", prefix),
                    "Time spent closing one slot",
                )
                .buckets(durations),
            )?,
            created_slots: IntCounter::new(
                format!("{}_created_slots_total", prefix),
                "Slots opened",
            )?,
            closed_slots: IntCounter::new(
                format!("{}_closed_slots_total", prefix),
                "Slots closed and flushed",
            )?,
            flushed_aggregates: IntCounter::new(
                format!("{}_flushed_aggregates_total", prefix),
                "Aggregated points handed to the sink",
            )?,
            sink_failures: IntCounter::new(
                format!("{}_sink_failures_total", prefix),
                "Slot flushes rejected by the sink",
            )?,
            pending_aggregates: IntGauge::new(
                format!("{}_pending_aggregates", prefix),
                "Aggregates held by open slots",
            )?,
            open_slots: IntGauge::new(format!("{}_open_slots", prefix), "Open slots")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register() {
        let registry = Registry::new();
        let metrics = AccumulatorMetrics::new(&registry, "rollup").unwrap();
        metrics.created_slots.inc();

        let families = registry.gather();
        assert_eq!(families.len(), 8);
        assert!(
            families
                .iter()
                .any(|f| f.name() == "rollup_created_slots_total")
        );
        assert!(AccumulatorMetrics::new(&registry, "rollup").is_err());
    }
}
