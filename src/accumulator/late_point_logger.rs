use crate::datamodel::DataPoint;
use parking_lot::Mutex;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::fmt::{self, Debug};
use std::time::{Duration, Instant};
use tracing::warn;

/// Why a point was refused by the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LateReason {
    /// The window of the point was already flushed
    SlotClosed,
    /// The window of the point is older than what the accumulator keeps open
    SlotExpired,
}

impl LateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LateReason::SlotClosed => "slot_closed",
            LateReason::SlotExpired => "slot_expired",
        }
    }
}

impl fmt::Display for LateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait LatePointLogger: Send + Sync + Debug {
    /// `now` is the accumulator clock in epoch seconds.
    fn log_late_point(&self, point: &DataPoint, now: i64, reason: LateReason, context: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLatePointLogger;

impl LatePointLogger for NoopLatePointLogger {
    fn log_late_point(&self, _point: &DataPoint, _now: i64, _reason: LateReason, _context: &str) {}
}

/// Allows at most `max` events per period.
#[derive(Debug)]
pub struct Quota {
    max: u32,
    period: Duration,
    state: Mutex<(Instant, u32)>,
}

impl Quota {
    pub fn new(max: u32, period: Duration) -> Self {
        Self {
            max,
            period,
            state: Mutex::new((Instant::now(), 0)),
        }
    }

    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        let (window_start, used) = &mut *state;
        if now.duration_since(*window_start) >= self.period {
            *window_start = now;
            *used = 0;
        }
        if *used < self.max {
            *used += 1;
            true
        } else {
            false
        }
    }
}

pub const LATE_POINT_LOG_QUOTA: u32 = 100;
pub const LATE_POINT_LOG_PERIOD: Duration = Duration::from_secs(60);

/// Counts late points and their age, and logs a bounded sample of them.
#[derive(Debug)]
pub struct MeteredLatePointLogger {
    late_points: IntCounterVec,
    point_age: HistogramVec,
    log_quota: Quota,
}

impl MeteredLatePointLogger {
    /// The live and the recovery accumulators register under distinct prefixes.
    pub fn new(registry: &Registry, prefix: &str) -> Result<Self, prometheus::Error> {
        let late_points = IntCounterVec::new(
            Opts::new(
                format!("{}_late_points_total", prefix),
                "Points skipped because they arrived too late",
            ),
            &["reason"],
        )?;
        let point_age = HistogramVec::new(
            HistogramOpts::new(
                format!("{}_late_point_age_seconds", prefix),
                "Age of the skipped points",
            )
            .buckets(vec![60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 21600.0, 86400.0]),
            &["reason"],
        )?;
        registry.register(Box::new(late_points.clone()))?;
        registry.register(Box::new(point_age.clone()))?;

        Ok(Self {
            late_points,
            point_age,
            log_quota: Quota::new(LATE_POINT_LOG_QUOTA, LATE_POINT_LOG_PERIOD),
        })
    }

    pub fn count(&self, reason: LateReason) -> u64 {
        self.late_points.with_label_values(&[reason.as_str()]).get()
    }
}

impl LatePointLogger for MeteredLatePointLogger {
    fn log_late_point(&self, point: &DataPoint, now: i64, reason: LateReason, context: &str) {
        let age = now.saturating_sub(point.ts);
        self.point_age
            .with_label_values(&[reason.as_str()])
            .observe(age as f64);
        self.late_points.with_label_values(&[reason.as_str()]).inc();

        if self.log_quota.allow() {
            warn!(
                "Point skipped aggregation because it was received too late: age [{}], point: [{}], reason: [{}], context: [{}]",
                age, point, reason, context
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota() {
        let quota = Quota::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(quota.allow_at(start));
        assert!(quota.allow_at(start));
        assert!(!quota.allow_at(start + Duration::from_secs(59)));
        assert!(quota.allow_at(start + Duration::from_secs(61)));
    }

    #[test]
    fn test_metered_logger() {
        let registry = Registry::new();
        let logger = MeteredLatePointLogger::new(&registry, "rollup").unwrap();
        let point = DataPoint::new("a.b", 1.0, 1000);

        for _ in 0..150 {
            logger.log_late_point(&point, 1300, LateReason::SlotExpired, "test");
        }
        logger.log_late_point(&point, 1300, LateReason::SlotClosed, "test");

        assert_eq!(logger.count(LateReason::SlotExpired), 150);
        assert_eq!(logger.count(LateReason::SlotClosed), 1);
        let age = logger.point_age.with_label_values(&["slot_expired"]);
        assert_eq!(age.get_sample_count(), 150);
        assert_eq!(age.get_sample_sum(), 150.0 * 300.0);

        // the recovery flavour lives next to the live one
        assert!(MeteredLatePointLogger::new(&registry, "rollup_recovery").is_ok());
    }
}
