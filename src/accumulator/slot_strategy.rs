use super::error::SlotStrategyError;
use std::fmt::Debug;

pub const DEFAULT_SLOT_PRECISION: i64 = 60;

/// Decides which time slot a point belongs to.
///
/// Any point whose timestamp falls between `start_ts` and `end_ts` of a slot,
/// both inclusive, gets aggregated into that slot.
pub trait SlotStrategy: Send + Sync + Debug {
    /// Slot timestamp, in seconds, for a metric timestamp in seconds.
    fn slot_ts(&self, metric_ts: i64) -> i64;

    /// First second covered by the slot containing `ts`.
    fn start_ts(&self, ts: i64) -> i64;

    /// Last second covered by the slot containing `ts`.
    fn end_ts(&self, ts: i64) -> i64;

    /// Width of a slot in seconds.
    fn precision(&self) -> i64;
}

/// Fixed-width slots aligned on multiples of the precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultSlotStrategy {
    precision: i64,
}

impl DefaultSlotStrategy {
    pub fn new(precision: i64) -> Result<Self, SlotStrategyError> {
        if precision <= 0 {
            return Err(SlotStrategyError::InvalidPrecision(precision));
        }
        Ok(Self { precision })
    }
}

impl Default for DefaultSlotStrategy {
    fn default() -> Self {
        Self {
            precision: DEFAULT_SLOT_PRECISION,
        }
    }
}

impl SlotStrategy for DefaultSlotStrategy {
    fn slot_ts(&self, metric_ts: i64) -> i64 {
        metric_ts.saturating_sub(metric_ts.rem_euclid(self.precision))
    }

    fn start_ts(&self, ts: i64) -> i64 {
        self.slot_ts(ts)
    }

    fn end_ts(&self, ts: i64) -> i64 {
        self.start_ts(ts).saturating_add(self.precision - 1)
    }

    fn precision(&self) -> i64 {
        self.precision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(strategy: &dyn SlotStrategy, ts: i64, slot: i64, start: i64, end: i64) {
        assert_eq!(strategy.slot_ts(ts), slot);
        assert_eq!(strategy.start_ts(ts), start);
        assert_eq!(strategy.end_ts(ts), end);
    }

    #[test]
    fn test_default_slot_strategy() {
        let strategy = DefaultSlotStrategy::default();
        verify(&strategy, 0, 0, 0, 59);
        verify(&strategy, 30, 0, 0, 59);
        verify(&strategy, 59, 0, 0, 59);
        verify(&strategy, 60, 60, 60, 119);
        verify(&strategy, 90, 60, 60, 119);
        verify(&strategy, 110, 60, 60, 119);
        verify(&strategy, 120, 120, 120, 179);
    }

    #[test]
    fn test_bounds_hold_for_any_precision() {
        for precision in [1, 7, 10, 60, 300] {
            let strategy = DefaultSlotStrategy::new(precision).unwrap();
            for ts in (-1000..1000).step_by(13) {
                let start = strategy.start_ts(ts);
                let end = strategy.end_ts(ts);
                assert!(start <= ts && ts <= end, "ts={} precision={}", ts, precision);
                assert_eq!(end - start, precision - 1);
                assert_eq!(start % precision, 0);
            }
        }
    }

    #[test]
    fn test_extreme_timestamps_saturate() {
        let strategy = DefaultSlotStrategy::default();
        // i64::MAX is 7 past a multiple of 60
        verify(&strategy, i64::MAX, i64::MAX - 7, i64::MAX - 7, i64::MAX);
        verify(&strategy, i64::MIN, i64::MIN, i64::MIN, i64::MIN + 59);
    }

    #[test]
    fn test_invalid_precision() {
        assert_eq!(
            DefaultSlotStrategy::new(0),
            Err(SlotStrategyError::InvalidPrecision(0))
        );
        assert!(DefaultSlotStrategy::new(-60).is_err());
    }
}
