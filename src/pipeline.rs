//! Plaintext pipeline: `name value timestamp` lines in, aggregated lines out.

use crate::accumulator::{
    Accumulator, AccumulatorContext, AccumulatorMetrics, CachingPolicyProvider, DataPointSink,
    DefaultSlotStrategy, LiveAccumulator, MeteredLatePointLogger, MeteredNamespaceCounter,
    MetricAggregationPolicySource, MetricAggregationRulesLoader, PointOutcome,
    RecoveryAccumulator,
};
use crate::config::RollupConfig;
use crate::datamodel::{DataPoint, DataPoints};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Holds flushed aggregates until the writer picks them up.
#[derive(Debug, Default)]
pub struct BufferedSink {
    points: Mutex<Vec<DataPoint>>,
}

impl BufferedSink {
    pub fn take(&self) -> Vec<DataPoint> {
        std::mem::take(&mut *self.points.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }
}

impl DataPointSink for BufferedSink {
    fn accept(&self, points: DataPoints) -> Result<()> {
        self.points.lock().extend(points);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub rollup_interval: Duration,
    /// Echo the input points that no rule asked to drop
    pub passthrough: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub lines: u64,
    pub invalid_lines: u64,
    pub accumulated: u64,
    pub unmatched: u64,
    pub late: u64,
    pub flushed_points: u64,
}

/// Accumulator, rules and output buffer wired from the configuration.
#[derive(Debug)]
pub struct Rollup {
    pub accumulator: Arc<dyn Accumulator>,
    pub rules: Arc<MetricAggregationRulesLoader>,
    pub output: Arc<BufferedSink>,
    pub aggregation_enabled: bool,
}

impl Rollup {
    pub fn from_config(config: &RollupConfig, registry: &Registry) -> Result<Self> {
        let slot_strategy = DefaultSlotStrategy::new(config.slot_precision_seconds)
            .context("Invalid slot precision")?;

        let rules = Arc::new(MetricAggregationRulesLoader::new(&config.rules_file));
        let policy_provider = CachingPolicyProvider::new(
            MetricAggregationPolicySource::new(rules.clone()),
            config.policy_cache_size,
        );

        let prefix = if config.recovery_mode {
            "rollup_recovery"
        } else {
            "rollup"
        };
        let context = AccumulatorContext::new(
            Arc::new(policy_provider),
            AccumulatorMetrics::new(registry, prefix).context("Failed to register metrics")?,
        )
        .with_slot_strategy(Arc::new(slot_strategy))
        .with_late_point_logger(Arc::new(
            MeteredLatePointLogger::new(registry, prefix)
                .context("Failed to register late point metrics")?,
        ))
        .with_namespace_counter(Arc::new(
            MeteredNamespaceCounter::new(registry, prefix)
                .context("Failed to register namespace metrics")?,
        ))
        .with_min_pause_between_flushes(config.min_pause_between_flushes());

        let output = Arc::new(BufferedSink::default());
        let accumulator: Arc<dyn Accumulator> = if config.recovery_mode {
            Arc::new(RecoveryAccumulator::new(
                context,
                config.recovery_max_slots,
                output.clone(),
            ))
        } else {
            Arc::new(LiveAccumulator::new(context, config.slot_max_life_seconds))
        };

        Ok(Self {
            accumulator,
            rules,
            output,
            aggregation_enabled: config.aggregation_enabled,
        })
    }

    /// Reads points until the input ends, then flushes every open window.
    pub async fn run<R, W>(&self, input: R, output: &mut W, options: RunOptions) -> Result<RunSummary>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + options.rollup_interval,
            options.rollup_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = RunSummary::default();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line.context("Failed to read input")? {
                        Some(line) => {
                            self.process_line(&line, output, options.passthrough, &mut summary)
                                .await?;
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.accumulator.roll_up(self.output.as_ref(), now_millis(), false);
                    self.accumulator.refresh_stats();
                    self.write_pending(output, &mut summary).await?;
                }
            }
        }

        info!("Input closed, flushing every open window");
        self.accumulator
            .roll_up(self.output.as_ref(), now_millis(), true);
        self.write_pending(output, &mut summary).await?;
        output.flush().await.context("Failed to flush output")?;
        self.accumulator.dump_stats();

        Ok(summary)
    }

    async fn process_line<W>(
        &self,
        line: &str,
        output: &mut W,
        passthrough: bool,
        summary: &mut RunSummary,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        summary.lines += 1;

        let point = match line.parse::<DataPoint>() {
            Ok(point) => point,
            Err(err) => {
                summary.invalid_lines += 1;
                warn!("Skipping invalid line [{}]: {}", line, err);
                return Ok(());
            }
        };

        let outcome = if self.aggregation_enabled {
            self.accumulator.add(&point)
        } else {
            PointOutcome::NoAggregates
        };
        match outcome {
            PointOutcome::NoAggregates => summary.unmatched += 1,
            PointOutcome::Accumulated { .. } => summary.accumulated += 1,
            PointOutcome::Late(reason) => {
                summary.late += 1;
                debug!("Late point [{}]: {}", point, reason);
            }
        }

        if passthrough && !outcome.is_drop_original() {
            write_point(output, &point).await?;
        }
        // recovery evictions flush while adding
        if !self.output.is_empty() {
            self.write_pending(output, summary).await?;
        }
        Ok(())
    }

    async fn write_pending<W>(&self, output: &mut W, summary: &mut RunSummary) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let points = self.output.take();
        for point in &points {
            write_point(output, point).await?;
        }
        summary.flushed_points += points.len() as u64;
        Ok(())
    }
}

async fn write_point<W>(output: &mut W, point: &DataPoint) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    output
        .write_all(format!("{}\n", point).as_bytes())
        .await
        .context("Failed to write output")
}

fn now_millis() -> i64 {
    crate::accumulator::live_accumulator::current_time_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config(rules: &NamedTempFile, recovery_mode: bool) -> RollupConfig {
        let mode = if recovery_mode { "true" } else { "false" };
        let path = rules.path().to_string_lossy().to_string();
        temp_env::with_vars(
            [
                ("ROLLUP_RULES_FILE", Some(path.as_str())),
                ("ROLLUP_RECOVERY_MODE", Some(mode)),
                ("ROLLUP_RECOVERY_MAX_SLOTS", Some("2")),
            ],
            || RollupConfig::load().unwrap(),
        )
    }

    fn rules_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# request totals").unwrap();
        writeln!(file, "all.<metric> (60) drop = sum pod*.<metric>").unwrap();
        file.flush().unwrap();
        file
    }

    fn options(passthrough: bool) -> RunOptions {
        RunOptions {
            rollup_interval: Duration::from_secs(3600),
            passthrough,
        }
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_recovery_replay() {
        let rules = rules_file();
        let rollup = Rollup::from_config(&config(&rules, true), &Registry::new()).unwrap();

        let input = "pod1.requests 1 60\n\
                     pod2.requests 2 70\n\
                     pod1.requests 4 125\n\
                     not a point\n\
                     other.requests 5 130\n\
                     pod1.requests 8 190\n\
                     pod1.requests 16 61\n";
        let mut output = Vec::new();
        let summary = rollup
            .run(input.as_bytes(), &mut output, options(true))
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "other.requests 5 130\n\
             all.requests 3 60\n\
             pod1.requests 16 61\n\
             all.requests 4 120\n\
             all.requests 8 180\n"
        );
        assert_eq!(summary.lines, 7);
        assert_eq!(summary.invalid_lines, 1);
        assert_eq!(summary.accumulated, 4);
        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.late, 1);
        assert_eq!(summary.flushed_points, 3);
        assert_eq!(rollup.accumulator.max_closed_slot_ts(), 239);
        assert!(rollup.accumulator.time_slots().is_empty());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_live_flushes_on_end_of_input() {
        let rules = rules_file();
        let rollup = Rollup::from_config(&config(&rules, false), &Registry::new()).unwrap();

        let now = now_millis() / 1000;
        let window = now - now.rem_euclid(60);
        let input = format!("pod1.cpu 1.5 {}\npod2.cpu 2 {}\n", now, now);
        let mut output = Vec::new();
        let summary = rollup
            .run(input.as_bytes(), &mut output, options(false))
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            format!("all.cpu 3.5 {}\n", window)
        );
        assert_eq!(summary.accumulated, 2);
        assert_eq!(summary.flushed_points, 1);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_out_of_range_timestamps_are_invalid_lines() {
        let rules = rules_file();
        let rollup = Rollup::from_config(&config(&rules, true), &Registry::new()).unwrap();

        let input = "pod1.requests 1 9223372036854775807\n\
                     pod1.requests 1 1e30\n\
                     pod1.requests 2 60\n";
        let mut output = Vec::new();
        let summary = rollup
            .run(input.as_bytes(), &mut output, options(false))
            .await
            .unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "all.requests 2 60\n");
        assert_eq!(summary.invalid_lines, 2);
        assert_eq!(summary.accumulated, 1);
        assert_eq!(rollup.accumulator.max_closed_slot_ts(), 119);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_aggregation_disabled() {
        let rules = rules_file();
        let config = temp_env::with_var("ROLLUP_AGGREGATION_ENABLED", Some("false"), || {
            config(&rules, false)
        });
        let rollup = Rollup::from_config(&config, &Registry::new()).unwrap();

        let mut output = Vec::new();
        let summary = rollup
            .run("pod1.cpu 1 60\n".as_bytes(), &mut output, options(true))
            .await
            .unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "pod1.cpu 1 60\n");
        assert_eq!(summary.unmatched, 1);
    }
}
