use super::late_point_logger::LateReason;
use super::sink::DataPointSink;
use super::slot_strategy::SlotStrategy;
use super::slot_table::SlotTable;
use super::{Accumulator, AccumulatorContext, AccumulatorStats, PointOutcome, RollUpReport};
use crate::datamodel::DataPoint;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub const DEFAULT_SLOT_MAX_LIFE_SECONDS: i64 = 120;

/// Extra delay between the end of a slot's life and its flush.
const SLOT_REMOVE_GRACE_SECONDS: i64 = 5;

/// Accumulator driven by the wall clock.
///
/// A window accepts points until `slot_max_life` seconds after it started and
/// gets flushed a few seconds later.
#[derive(Debug)]
pub struct LiveAccumulator {
    table: SlotTable,
    slot_max_life: i64,
}

impl LiveAccumulator {
    pub fn new(context: AccumulatorContext, slot_max_life_seconds: i64) -> Self {
        info!(
            "Live accumulator created, slot max life: {}s",
            slot_max_life_seconds
        );
        Self {
            table: SlotTable::new("accumulator", context),
            slot_max_life: slot_max_life_seconds,
        }
    }

    /// Adds a point as if received at `now_millis`.
    pub fn add_at(&self, point: &DataPoint, now_millis: i64) -> PointOutcome {
        let policy = self.table.policy_for(&point.name);
        if policy.is_empty() {
            return PointOutcome::NoAggregates;
        }

        let now = now_millis.div_euclid(1000);
        let slot_ts = self.table.strategy().slot_ts(point.ts);
        let expiration = slot_ts.saturating_add(self.slot_max_life);
        if now > expiration {
            return self.table.late(
                point,
                now,
                LateReason::SlotExpired,
                &format!("slot expiration: [{}]", expiration),
            );
        }

        match self.table.get_or_create(slot_ts) {
            Ok(slot) => self.table.apply(&slot, &policy, point, now),
            Err(reason) => self.table.late(
                point,
                now,
                reason,
                &format!("slot [{}] was already flushed", slot_ts),
            ),
        }
    }

    fn can_close(&self, slot_ts: i64, now: i64) -> bool {
        slot_ts
            .saturating_add(self.slot_max_life)
            .saturating_add(SLOT_REMOVE_GRACE_SECONDS)
            < now
    }
}

pub(crate) fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

impl Accumulator for LiveAccumulator {
    fn add(&self, point: &DataPoint) -> PointOutcome {
        self.add_at(point, current_time_millis())
    }

    fn roll_up(
        &self,
        sink: &dyn DataPointSink,
        now_millis: i64,
        force: bool,
    ) -> Option<RollUpReport> {
        let now = now_millis.div_euclid(1000);
        self.table
            .roll_up(sink, now_millis, force, |slot_ts| self.can_close(slot_ts, now))
    }

    fn max_closed_slot_ts(&self) -> i64 {
        self.table.max_closed_slot_ts()
    }

    fn slot_strategy(&self) -> &dyn SlotStrategy {
        self.table.strategy()
    }

    fn reset(&self) {
        self.table.reset();
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
