use super::error::RuleError;
use std::fmt;
use std::str::FromStr;

/// How points mapped to the same aggregate are combined.
///
/// Not to be confused with the storage-side rollup of archived series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricAggregationMethod {
    /// Average or sum depending on the aggregate name suffix
    Custom1,
    Avg,
    Sum,
    Latency,
}

impl MetricAggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricAggregationMethod::Custom1 => "CUSTOM1",
            MetricAggregationMethod::Avg => "AVG",
            MetricAggregationMethod::Sum => "SUM",
            MetricAggregationMethod::Latency => "LATENCY",
        }
    }
}

impl fmt::Display for MetricAggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricAggregationMethod {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CUSTOM1" => Ok(MetricAggregationMethod::Custom1),
            "AVG" => Ok(MetricAggregationMethod::Avg),
            "SUM" => Ok(MetricAggregationMethod::Sum),
            "LATENCY" => Ok(MetricAggregationMethod::Latency),
            other => Err(RuleError::UnknownMethod(other.to_string())),
        }
    }
}
