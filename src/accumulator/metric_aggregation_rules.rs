use super::metric_aggregation_rule::{MetricAggregationRule, RuleMatch};
use std::fmt;

/// Immutable, revisioned rule set. Reconfiguration publishes a new instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricAggregationRules {
    revision: u64,
    rules: Vec<MetricAggregationRule>,
}

impl MetricAggregationRules {
    pub fn new(revision: u64, rules: Vec<MetricAggregationRule>) -> Self {
        Self { revision, rules }
    }

    /// Every matching rule result, in declaration order.
    ///
    /// Evaluation halts after the first matching stop rule.
    pub fn apply(&self, name: &str) -> Vec<RuleMatch> {
        let mut results = Vec::new();
        for rule in &self.rules {
            let result = rule.apply(name);
            if !result.rule_applied() {
                continue;
            }
            results.push(result);
            if rule.is_stop_rule() {
                break;
            }
        }
        results
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn rules(&self) -> &[MetricAggregationRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

impl fmt::Display for MetricAggregationRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetricAggregationRules{{revision={}, rules=[", self.revision)?;
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", rule)?;
        }
        f.write_str("]}")
    }
}
