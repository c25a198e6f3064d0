use thiserror::Error;

/// Configuration errors raised while compiling aggregation rules.
#[derive(Error, Debug)]
pub enum RuleError {
    /// The line does not follow `<target> (<window>) [flags] = <method> <pattern>`
    #[error("Malformed aggregation rule [{line}]: {reason}")]
    Malformed { line: String, reason: String },

    #[error("Unsupported flag: [{0}]")]
    UnsupportedFlag(String),

    #[error("Unsupported aggregation method: [{0}]")]
    UnknownMethod(String),

    #[error(
        "Aggregation for frequency [{window}] is not supported. For now only {supported} second frequency is supported"
    )]
    UnsupportedWindow { window: i64, supported: i64 },

    /// The target template references a placeholder the source pattern never captures
    #[error("Placeholder <{placeholder}> in target [{target}] is not captured by the source pattern")]
    UnknownPlaceholder { placeholder: String, target: String },

    #[error("Invalid source pattern [{pattern}]: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Error raised by the rules loader, carries the offending line number
    #[error("Line {line_number}: {source}")]
    AtLine {
        line_number: usize,
        #[source]
        source: Box<RuleError>,
    },
}

impl RuleError {
    pub fn malformed(line: &str, reason: &str) -> Self {
        RuleError::Malformed {
            line: line.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Contract violations on aggregate functions.
#[derive(Error, Debug, PartialEq)]
pub enum AggregateError {
    #[error("Unsupported operation: {function} aggregate only provides a single value")]
    UnsupportedOperation { function: &'static str },
}

#[derive(Error, Debug, PartialEq)]
pub enum SlotStrategyError {
    #[error("Slot precision must be greater than zero, got {0}")]
    InvalidPrecision(i64),
}
