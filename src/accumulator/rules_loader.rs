use super::error::RuleError;
use super::metric_aggregation_rule::MetricAggregationRule;
use super::metric_aggregation_rules::MetricAggregationRules;
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Keeps the aggregation rules in sync with a configuration file.
///
/// Readers get an immutable snapshot; a reload swaps the whole set at once.
#[derive(Debug)]
pub struct MetricAggregationRulesLoader {
    path: PathBuf,
    lines: Mutex<Vec<String>>,
    rules: RwLock<Arc<MetricAggregationRules>>,
}

impl MetricAggregationRulesLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let loader = Self {
            path: path.into(),
            lines: Mutex::new(Vec::new()),
            rules: RwLock::new(Arc::new(MetricAggregationRules::default())),
        };
        info!(
            "Creating metric aggregation rules from {}",
            loader.path.display()
        );
        if let Err(err) = loader.reload() {
            error!("Failed to load metric aggregation rules: {:?}", err);
        }
        loader
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rules(&self) -> Arc<MetricAggregationRules> {
        self.rules.read().clone()
    }

    /// Re-reads the file and publishes a new revision when its rules changed.
    ///
    /// Returns whether a new snapshot was published. A file that fails to
    /// parse leaves the current snapshot untouched.
    pub fn reload(&self) -> Result<bool> {
        debug!("Checking for metric aggregation rules update");

        let mut lines = self.lines.lock();

        if !self.path.exists() {
            warn!(
                "Metric aggregation rules file {} doesn't exist",
                self.path.display()
            );
            let current = self.rules();
            lines.clear();
            if current.is_empty() {
                return Ok(false);
            }
            // new revision so that cached policies become obsolete
            warn!("Clearing current metric aggregation rules");
            *self.rules.write() = Arc::new(MetricAggregationRules::new(
                current.revision() + 1,
                Vec::new(),
            ));
            return Ok(true);
        }

        let content = std::fs::read_to_string(&self.path).with_context(|| {
            format!(
                "Failed to read metric aggregation rules from {}",
                self.path.display()
            )
        })?;
        let new_lines = rule_lines(&content);
        if *lines == new_lines {
            return Ok(false);
        }

        info!(
            "Metric aggregation rules file {} has changed",
            self.path.display()
        );
        let next_revision = self.rules().revision() + 1;
        let parsed = parse_rules(&new_lines, next_revision)
            .with_context(|| format!("Invalid rules in {}", self.path.display()))?;

        info!("New metric aggregation rules: {}", parsed);
        *self.rules.write() = Arc::new(parsed);
        *lines = new_lines;
        Ok(true)
    }

    /// Reloads the rules on a fixed interval until the task is aborted.
    pub fn spawn_reload_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let loader = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // first tick fires immediately and the rules were loaded at construction
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = loader.reload() {
                    error!("Failed to reload metric aggregation rules: {:?}", err);
                }
            }
        })
    }
}

/// Trimmed rule lines, without blanks and `#` comments.
fn rule_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Parses every line or none of them.
pub fn parse_rules(lines: &[String], revision: u64) -> Result<MetricAggregationRules, RuleError> {
    let rules = lines
        .iter()
        .enumerate()
        .map(|(order, line)| {
            MetricAggregationRule::parse_definition(line, order).map_err(|source| {
                RuleError::AtLine {
                    line_number: order + 1,
                    source: Box::new(source),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MetricAggregationRules::new(revision, rules))
}
