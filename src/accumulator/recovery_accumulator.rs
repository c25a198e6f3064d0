use super::late_point_logger::LateReason;
use super::policy::MetricAggregationPolicy;
use super::sink::DataPointSink;
use super::slot_strategy::SlotStrategy;
use super::slot_table::SlotTable;
use super::{Accumulator, AccumulatorContext, AccumulatorStats, PointOutcome, RollUpReport};
use crate::datamodel::DataPoint;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info};

pub const DEFAULT_RECOVERY_MAX_SLOTS: usize = 3;

/// Accumulator used while replaying a backlog.
///
/// Time is the newest window seen in the replayed data, not the wall clock.
/// At most `max_open_slots` windows are open at once: opening one more first
/// flushes the oldest through the eviction sink.
pub struct RecoveryAccumulator {
    table: SlotTable,
    max_open_slots: usize,
    max_recovery_slot_ts: AtomicI64,
    creation: Mutex<()>,
    eviction_sink: Arc<dyn DataPointSink>,
}

impl RecoveryAccumulator {
    pub fn new(
        context: AccumulatorContext,
        max_open_slots: usize,
        eviction_sink: Arc<dyn DataPointSink>,
    ) -> Self {
        let max_open_slots = max_open_slots.max(1);
        info!(
            "Recovery accumulator created, max open slots: {}",
            max_open_slots
        );
        Self {
            table: SlotTable::new("recovery_accumulator", context),
            max_open_slots,
            max_recovery_slot_ts: AtomicI64::new(i64::MIN),
            creation: Mutex::new(()),
            eviction_sink,
        }
    }

    pub fn max_open_slots(&self) -> usize {
        self.max_open_slots
    }

    /// Newest window seen so far, the replay clock.
    pub fn max_recovery_slot_ts(&self) -> i64 {
        self.max_recovery_slot_ts.load(Ordering::Acquire)
    }

    fn horizon(&self, max_recovery_slot_ts: i64) -> i64 {
        let lookback = self.max_open_slots as i64 * self.table.strategy().precision();
        max_recovery_slot_ts.saturating_sub(lookback)
    }

    fn open_slot(
        &self,
        policy: &MetricAggregationPolicy,
        point: &DataPoint,
        slot_ts: i64,
        now: i64,
    ) -> PointOutcome {
        let _creation = self.creation.lock();

        let slot = match self.table.get(slot_ts) {
            Some(slot) => slot,
            None => {
                if self.table.is_retired(slot_ts) {
                    return self.table.late(
                        point,
                        now,
                        LateReason::SlotClosed,
                        &format!("slot [{}] was already flushed", slot_ts),
                    );
                }
                let horizon = self.horizon(now);
                if slot_ts < horizon {
                    return self.table.late(
                        point,
                        now,
                        LateReason::SlotExpired,
                        &format!("slot [{}] is older than the recovery horizon [{}]", slot_ts, horizon),
                    );
                }
                while self.table.len() >= self.max_open_slots {
                    let Some(oldest) = self.table.oldest() else {
                        break;
                    };
                    if oldest > slot_ts {
                        return self.table.late(
                            point,
                            now,
                            LateReason::SlotExpired,
                            &format!("slot [{}] is older than every open slot", slot_ts),
                        );
                    }
                    debug!("Evicting recovery slot [{}] to open [{}]", oldest, slot_ts);
                    self.table.close_slot(oldest, self.eviction_sink.as_ref());
                }
                match self.table.get_or_create(slot_ts) {
                    Ok(slot) => slot,
                    Err(reason) => {
                        return self.table.late(point, now, reason, "slot was flushed concurrently");
                    }
                }
            }
        };
        self.table.apply(&slot, policy, point, now)
    }
}

impl Accumulator for RecoveryAccumulator {
    fn add(&self, point: &DataPoint) -> PointOutcome {
        let policy = self.table.policy_for(&point.name);
        if policy.is_empty() {
            return PointOutcome::NoAggregates;
        }

        let slot_ts = self.table.strategy().slot_ts(point.ts);
        let now = self
            .max_recovery_slot_ts
            .fetch_max(slot_ts, Ordering::AcqRel)
            .max(slot_ts);

        match self.table.get(slot_ts) {
            Some(slot) => self.table.apply(&slot, &policy, point, now),
            None => self.open_slot(&policy, point, slot_ts, now),
        }
    }

    fn roll_up(
        &self,
        sink: &dyn DataPointSink,
        now_millis: i64,
        force: bool,
    ) -> Option<RollUpReport> {
        let horizon = self.horizon(self.max_recovery_slot_ts());
        self.table
            .roll_up(sink, now_millis, force, |slot_ts| slot_ts < horizon)
    }

    fn max_closed_slot_ts(&self) -> i64 {
        self.table.max_closed_slot_ts()
    }

    fn slot_strategy(&self) -> &dyn SlotStrategy {
        self.table.strategy()
    }

    fn reset(&self) {
        let _creation = self.creation.lock();
        self.table.reset();
        self.max_recovery_slot_ts.store(i64::MIN, Ordering::Release);
    }

    fn time_slots(&self) -> Vec<i64> {
        self.table.time_slots()
    }

    fn refresh_stats(&self) {
        self.table.refresh_stats();
    }

    fn dump_stats(&self) {
        self.table.dump_stats();
    }

    fn stats(&self) -> AccumulatorStats {
        self.table.stats()
    }
}

impl fmt::Debug for RecoveryAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryAccumulator")
            .field("table", &self.table)
            .field("max_open_slots", &self.max_open_slots)
            .field("max_recovery_slot_ts", &self.max_recovery_slot_ts())
            .finish()
    }
}
