use super::aggregation_method::MetricAggregationMethod;
use super::metric_aggregation_rule::RuleMatch;
use super::metric_aggregation_rules::MetricAggregationRules;
use super::rules_loader::MetricAggregationRulesLoader;
use clru::CLruCache;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// One aggregate target a metric contributes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricAggregate {
    aggregate_name: String,
    method: MetricAggregationMethod,
    drop_original: bool,
}

impl MetricAggregate {
    pub fn new(
        aggregate_name: impl Into<String>,
        method: MetricAggregationMethod,
        drop_original: bool,
    ) -> Self {
        Self {
            aggregate_name: aggregate_name.into(),
            method,
            drop_original,
        }
    }

    /// `None` when the rule did not match.
    pub fn from_rule_match(result: &RuleMatch) -> Option<Self> {
        match (result.aggregate_name(), result.method()) {
            (Some(name), Some(method)) if !name.is_empty() => {
                Some(Self::new(name, method, result.is_drop_original()))
            }
            _ => None,
        }
    }

    pub fn aggregate_name(&self) -> &str {
        &self.aggregate_name
    }

    pub fn method(&self) -> MetricAggregationMethod {
        self.method
    }

    pub fn is_drop_original(&self) -> bool {
        self.drop_original
    }
}

/// Aggregates of one metric name, stamped with the rules revision they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricAggregationPolicy {
    revision: u64,
    aggregates: Vec<MetricAggregate>,
}

impl MetricAggregationPolicy {
    pub fn new(revision: u64, aggregates: Vec<MetricAggregate>) -> Self {
        Self {
            revision,
            aggregates,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn aggregates(&self) -> &[MetricAggregate] {
        &self.aggregates
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

/// Something able to hand out the current rules snapshot.
pub trait RulesSource: Send + Sync + Debug {
    fn current_rules(&self) -> Arc<MetricAggregationRules>;
}

impl RulesSource for MetricAggregationRulesLoader {
    fn current_rules(&self) -> Arc<MetricAggregationRules> {
        self.rules()
    }
}

impl RulesSource for Arc<MetricAggregationRules> {
    fn current_rules(&self) -> Arc<MetricAggregationRules> {
        Arc::clone(self)
    }
}

/// Turns rule evaluations into policies.
#[derive(Debug, Clone)]
pub struct MetricAggregationPolicySource {
    rules: Arc<dyn RulesSource>,
}

impl MetricAggregationPolicySource {
    pub fn new(rules: Arc<dyn RulesSource>) -> Self {
        Self { rules }
    }

    pub fn current_revision(&self) -> u64 {
        self.rules.current_rules().revision()
    }

    /// A policy computed from an older revision than the current rules.
    pub fn is_obsolete(&self, policy: &MetricAggregationPolicy) -> bool {
        policy.revision() < self.current_revision()
    }

    pub fn policy_for_metric_name(&self, name: &str) -> MetricAggregationPolicy {
        let rules = self.rules.current_rules();
        let aggregates: Vec<MetricAggregate> = rules
            .apply(name)
            .iter()
            .filter_map(MetricAggregate::from_rule_match)
            .collect();
        debug!(
            "Metric {} maps to {} aggregates (revision {})",
            name,
            aggregates.len(),
            rules.revision()
        );
        MetricAggregationPolicy::new(rules.revision(), aggregates)
    }
}

/// Maps metric names to their aggregation policy.
pub trait MetricAggregationPolicyProvider: Send + Sync + Debug {
    fn policy_for(&self, name: &str) -> Arc<MetricAggregationPolicy>;
}

/// Evaluates the rules on every lookup.
#[derive(Debug, Clone)]
pub struct RulesPolicyProvider {
    source: MetricAggregationPolicySource,
}

impl RulesPolicyProvider {
    pub fn new(source: MetricAggregationPolicySource) -> Self {
        Self { source }
    }
}

impl MetricAggregationPolicyProvider for RulesPolicyProvider {
    fn policy_for(&self, name: &str) -> Arc<MetricAggregationPolicy> {
        Arc::new(self.source.policy_for_metric_name(name))
    }
}

/// Remembers the policy of recently seen names.
///
/// A cached policy is recomputed once the rules moved to a newer revision.
pub struct CachingPolicyProvider {
    source: MetricAggregationPolicySource,
    cache: Mutex<CLruCache<String, Arc<MetricAggregationPolicy>>>,
}

impl CachingPolicyProvider {
    pub fn new(source: MetricAggregationPolicySource, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            cache: Mutex::new(CLruCache::new(capacity)),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Debug for CachingPolicyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingPolicyProvider")
            .field("source", &self.source)
            .field("cached", &self.cached_len())
            .finish()
    }
}

impl MetricAggregationPolicyProvider for CachingPolicyProvider {
    fn policy_for(&self, name: &str) -> Arc<MetricAggregationPolicy> {
        if let Some(policy) = self.cache.lock().get(name) {
            if !self.source.is_obsolete(policy) {
                return Arc::clone(policy);
            }
        }

        // evaluated without holding the cache lock
        let policy = Arc::new(self.source.policy_for_metric_name(name));
        self.cache
            .lock()
            .put(name.to_string(), Arc::clone(&policy));
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::MetricAggregationRule;
    use std::io::Write;

    fn rules(revision: u64, definitions: &[&str]) -> Arc<MetricAggregationRules> {
        let rules = definitions
            .iter()
            .enumerate()
            .map(|(i, d)| MetricAggregationRule::parse_definition(d, i).unwrap())
            .collect();
        Arc::new(MetricAggregationRules::new(revision, rules))
    }

    #[test]
    fn test_policy_for_metric_name() {
        let source = MetricAggregationPolicySource::new(Arc::new(rules(
            4,
            &["sum.<m> (60) drop c = sum app.<host>.<m>", "avg.<m> (60) = avg app.*.<m>"],
        )));

        let policy = source.policy_for_metric_name("app.web1.latency");
        assert_eq!(policy.revision(), 4);
        assert_eq!(
            policy.aggregates(),
            &[
                MetricAggregate::new("sum.latency", MetricAggregationMethod::Sum, true),
                MetricAggregate::new("avg.latency", MetricAggregationMethod::Avg, false),
            ]
        );
        assert!(!source.is_obsolete(&policy));
        assert!(source.is_obsolete(&MetricAggregationPolicy::new(3, vec![])));

        assert!(source.policy_for_metric_name("db.web1.latency").is_empty());
    }

    #[test]
    fn test_rules_provider() {
        let provider = RulesPolicyProvider::new(MetricAggregationPolicySource::new(Arc::new(
            rules(1, &["a.<m> (60) = sum b.<m>"]),
        )));
        let policy = provider.policy_for("b.x");
        assert_eq!(policy.aggregates()[0].aggregate_name(), "a.x");
    }

    #[test]
    fn test_cache_refreshes_obsolete_policies() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a.<m> (60) = sum b.<m>").unwrap();
        file.flush().unwrap();

        let loader = Arc::new(MetricAggregationRulesLoader::new(file.path()));
        let provider =
            CachingPolicyProvider::new(MetricAggregationPolicySource::new(loader.clone()), 2);

        let first = provider.policy_for("b.x");
        assert_eq!(first.revision(), 1);
        assert!(Arc::ptr_eq(&first, &provider.policy_for("b.x")));

        std::fs::write(file.path(), "c.<m> (60) = avg b.<m>\n").unwrap();
        assert!(loader.reload().unwrap());

        let refreshed = provider.policy_for("b.x");
        assert_eq!(refreshed.revision(), 2);
        assert_eq!(
            refreshed.aggregates(),
            &[MetricAggregate::new("c.x", MetricAggregationMethod::Avg, false)]
        );
    }

    #[test]
    fn test_cache_is_bounded() {
        let provider = CachingPolicyProvider::new(
            MetricAggregationPolicySource::new(Arc::new(rules(1, &[]))),
            2,
        );
        for name in ["a", "b", "c", "d"] {
            assert!(provider.policy_for(name).is_empty());
        }
        assert_eq!(provider.cached_len(), 2);

        let minimal = CachingPolicyProvider::new(
            MetricAggregationPolicySource::new(Arc::new(rules(1, &[]))),
            0,
        );
        minimal.policy_for("a");
        minimal.policy_for("b");
        assert_eq!(minimal.cached_len(), 1);
    }
}
