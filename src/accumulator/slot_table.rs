use super::late_point_logger::LateReason;
use super::policy::MetricAggregationPolicy;
use super::sink::DataPointSink;
use super::slot::Slot;
use super::slot_strategy::SlotStrategy;
use super::{AccumulatorContext, AccumulatorStats, PointOutcome, RollUpReport};
use crate::datamodel::DataPoint;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, error, info};

const NEVER: i64 = i64::MIN;

/// Open slots keyed by window, shared by the live and the recovery accumulators.
///
/// Windows at or before the retired horizon have been handed to a close and
/// are never opened again. The published high-water mark only moves once a
/// close completed.
#[derive(Debug)]
pub(crate) struct SlotTable {
    name: &'static str,
    slots: DashMap<i64, Arc<Slot>>,
    retired_horizon: AtomicI64,
    max_closed_slot_ts: AtomicI64,
    last_roll_up_millis: AtomicI64,
    context: AccumulatorContext,
}

impl SlotTable {
    pub fn new(name: &'static str, context: AccumulatorContext) -> Self {
        Self {
            name,
            slots: DashMap::new(),
            retired_horizon: AtomicI64::new(NEVER),
            max_closed_slot_ts: AtomicI64::new(0),
            last_roll_up_millis: AtomicI64::new(NEVER),
            context,
        }
    }

    pub fn strategy(&self) -> &dyn SlotStrategy {
        self.context.slot_strategy.as_ref()
    }

    pub fn policy_for(&self, name: &str) -> Arc<MetricAggregationPolicy> {
        self.context.policy_provider.policy_for(name)
    }

    pub fn get(&self, slot_ts: i64) -> Option<Arc<Slot>> {
        self.slots.get(&slot_ts).map(|slot| Arc::clone(slot.value()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn oldest(&self) -> Option<i64> {
        self.slots.iter().map(|entry| *entry.key()).min()
    }

    pub fn is_retired(&self, slot_ts: i64) -> bool {
        slot_ts <= self.retired_horizon.load(Ordering::Acquire)
    }

    /// Returns the slot of the window, opening it when absent.
    ///
    /// Fails with `SlotClosed` for a window already retired.
    pub fn get_or_create(&self, slot_ts: i64) -> Result<Arc<Slot>, LateReason> {
        if let Some(slot) = self.get(slot_ts) {
            return Ok(slot);
        }

        match self.slots.entry(slot_ts) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                // checked under the entry lock, retiring sets the horizon before removing
                if self.is_retired(slot_ts) {
                    return Err(LateReason::SlotClosed);
                }
                let slot = Arc::new(Slot::new(
                    slot_ts,
                    Arc::clone(&self.context.late_point_logger),
                ));
                entry.insert(Arc::clone(&slot));
                self.context.metrics.created_slots.inc();
                debug!("{}: opened slot [{}]", self.name, slot_ts);
                Ok(slot)
            }
        }
    }

    /// Feeds the point into every aggregate of its policy.
    pub fn apply(
        &self,
        slot: &Slot,
        policy: &MetricAggregationPolicy,
        point: &DataPoint,
        now: i64,
    ) -> PointOutcome {
        if !slot.apply_all(policy.aggregates(), point, now) {
            return PointOutcome::Late(LateReason::SlotClosed);
        }

        let mut drop_original = false;
        for aggregate in policy.aggregates() {
            self.context.namespace_counter.count(aggregate.aggregate_name());
            drop_original |= aggregate.is_drop_original();
        }
        PointOutcome::Accumulated {
            aggregates: policy.aggregates().len(),
            drop_original,
        }
    }

    pub fn late(&self, point: &DataPoint, now: i64, reason: LateReason, context: &str) -> PointOutcome {
        self.context
            .late_point_logger
            .log_late_point(point, now, reason, context);
        PointOutcome::Late(reason)
    }

    /// Retires the window, then flushes it.
    ///
    /// Returns the number of points the sink accepted, `None` when no such
    /// slot was open.
    pub fn close_slot(&self, slot_ts: i64, sink: &dyn DataPointSink) -> Option<usize> {
        self.retired_horizon.fetch_max(slot_ts, Ordering::AcqRel);
        let (_, slot) = self.slots.remove(&slot_ts)?;

        let metrics = &self.context.metrics;
        let timer = metrics.slot_flush_duration.start_timer();
        let flushed = match slot.close(sink) {
            Ok(flushed) => {
                metrics.flushed_aggregates.inc_by(flushed as u64);
                debug!(
                    "{}: closed slot [{}] with {} points",
                    self.name, slot_ts, flushed
                );
                flushed
            }
            Err(err) => {
                metrics.sink_failures.inc();
                error!("{}: failed to flush slot [{}]: {:?}", self.name, slot_ts, err);
                0
            }
        };
        timer.observe_duration();
        metrics.closed_slots.inc();

        self.max_closed_slot_ts
            .fetch_max(self.strategy().end_ts(slot_ts), Ordering::AcqRel);
        Some(flushed)
    }

    /// Closes the eligible slots, oldest first.
    ///
    /// Returns `None` when the previous roll-up is too recent and `force` is unset.
    pub fn roll_up(
        &self,
        sink: &dyn DataPointSink,
        now_millis: i64,
        force: bool,
        eligible: impl Fn(i64) -> bool,
    ) -> Option<RollUpReport> {
        let min_pause_millis = self.context.min_pause_between_flushes.as_millis() as i64;
        let last = self.last_roll_up_millis.load(Ordering::Acquire);
        if !force && last != NEVER && last.saturating_add(min_pause_millis) > now_millis {
            return None;
        }

        let timer = self.context.metrics.flush_duration.start_timer();

        let mut report = RollUpReport::default();
        for slot_ts in self.time_slots() {
            if !force && !eligible(slot_ts) {
                report.open_slots += 1;
                continue;
            }
            if let Some(flushed) = self.close_slot(slot_ts, sink) {
                report.closed_slots += 1;
                report.flushed_points += flushed;
            }
        }

        let elapsed = timer.stop_and_record();
        self.last_roll_up_millis.store(now_millis, Ordering::Release);
        info!(
            "{}: roll-up completed in {:.3}s, closed slots: {}, open slots: {}, flushed points: {}",
            self.name, elapsed, report.closed_slots, report.open_slots, report.flushed_points
        );
        Some(report)
    }

    pub fn max_closed_slot_ts(&self) -> i64 {
        self.max_closed_slot_ts.load(Ordering::Acquire)
    }

    pub fn time_slots(&self) -> Vec<i64> {
        let mut windows: Vec<i64> = self.slots.iter().map(|entry| *entry.key()).collect();
        windows.sort_unstable();
        windows
    }

    pub fn stats(&self) -> AccumulatorStats {
        AccumulatorStats {
            open_slots: self.slots.len(),
            pending_aggregates: self.slots.iter().map(|entry| entry.value().len()).sum(),
            flushed_aggregates: self.context.metrics.flushed_aggregates.get(),
            max_closed_slot_ts: self.max_closed_slot_ts(),
        }
    }

    pub fn refresh_stats(&self) {
        let stats = self.stats();
        self.context
            .metrics
            .pending_aggregates
            .set(stats.pending_aggregates as i64);
        self.context.metrics.open_slots.set(stats.open_slots as i64);
    }

    pub fn dump_stats(&self) {
        let stats = self.stats();
        info!(
            "{}: stats: flushed_aggregates={}, pending_aggregates={}, open_slots={}, max_closed_slot_ts={}",
            self.name,
            stats.flushed_aggregates,
            stats.pending_aggregates,
            stats.open_slots,
            stats.max_closed_slot_ts
        );
    }

    /// Drops every open slot without flushing and forgets the clocks.
    pub fn reset(&self) {
        self.slots.clear();
        self.retired_horizon.store(NEVER, Ordering::Release);
        self.max_closed_slot_ts.store(0, Ordering::Release);
        self.last_roll_up_millis.store(NEVER, Ordering::Release);
    }
}
