use dashmap::DashMap;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::fmt::Debug;
use tracing::info;

/// Hook invoked once for every aggregate a point contributes to.
pub trait NamespaceCounter: Send + Sync + Debug {
    fn count(&self, name: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNamespaceCounter;

impl NamespaceCounter for NoopNamespaceCounter {
    fn count(&self, _name: &str) {}
}

/// Top level name segment, `pod21` for `pod21.ecom.cpu`.
pub fn namespace(name: &str) -> &str {
    match name.find('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// Counts points per namespace in a Prometheus registry.
#[derive(Debug)]
pub struct MeteredNamespaceCounter {
    per_namespace: IntCounterVec,
    added: IntCounter,
    seen: DashMap<String, IntCounter>,
}

impl MeteredNamespaceCounter {
    pub fn new(registry: &Registry, prefix: &str) -> Result<Self, prometheus::Error> {
        let per_namespace = IntCounterVec::new(
            Opts::new(
                format!("{}_namespace_points_total", prefix),
                "Points aggregated per namespace",
            ),
            &["namespace"],
        )?;
        let added = IntCounter::new(
            format!("{}_namespaces_added_total", prefix),
            "Namespaces seen for the first time",
        )?;
        registry.register(Box::new(per_namespace.clone()))?;
        registry.register(Box::new(added.clone()))?;

        Ok(Self {
            per_namespace,
            added,
            seen: DashMap::new(),
        })
    }

    pub fn exists(&self, name: &str) -> bool {
        self.seen.contains_key(namespace(name))
    }

    pub fn live_namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.seen.iter().map(|e| e.key().clone()).collect();
        namespaces.sort();
        namespaces
    }
}

impl NamespaceCounter for MeteredNamespaceCounter {
    fn count(&self, name: &str) {
        let ns = namespace(name);
        if let Some(counter) = self.seen.get(ns) {
            counter.inc();
            return;
        }

        self.seen
            .entry(ns.to_string())
            .or_insert_with(|| {
                info!("Added new namespace [{}] based on metric [{}]", ns, name);
                self.added.inc();
                self.per_namespace.with_label_values(&[ns])
            })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace() {
        assert_eq!(namespace("pod21.ecom.cpu"), "pod21");
        assert_eq!(namespace("pi"), "pi");
        assert_eq!(namespace(".hidden"), ".hidden");
    }

    #[test]
    fn test_metered_counter() {
        let registry = Registry::new();
        let counter = MeteredNamespaceCounter::new(&registry, "rollup").unwrap();
        counter.count("pod1.a");
        counter.count("pod1.b");
        counter.count("pod2.a");

        assert!(counter.exists("pod1.zzz"));
        assert!(!counter.exists("pod3.a"));
        assert_eq!(counter.live_namespaces(), vec!["pod1", "pod2"]);
        assert_eq!(counter.added.get(), 2);
        assert_eq!(counter.per_namespace.with_label_values(&["pod1"]).get(), 2);

        // registering twice under the same prefix fails
        assert!(MeteredNamespaceCounter::new(&registry, "rollup").is_err());
    }
}
