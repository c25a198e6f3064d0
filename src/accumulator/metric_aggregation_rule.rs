use super::aggregation_method::MetricAggregationMethod;
use super::error::RuleError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The only aggregation window rules may declare, in seconds.
pub const SUPPORTED_WINDOW_SECONDS: i64 = 60;

static WINDOW_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\(\s*(-?\d+)\s*\)$").expect("Failed to compile window token regex")
});

/// Outcome of evaluating one rule against a metric name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleMatch {
    aggregate_name: Option<String>,
    method: Option<MetricAggregationMethod>,
    drop_original: bool,
}

impl RuleMatch {
    pub fn new(
        aggregate_name: Option<String>,
        method: MetricAggregationMethod,
        drop_original: bool,
    ) -> Self {
        let applied = aggregate_name.is_some();
        Self {
            aggregate_name,
            method: applied.then_some(method),
            drop_original: applied && drop_original,
        }
    }

    pub fn no_match() -> Self {
        Self {
            aggregate_name: None,
            method: None,
            drop_original: false,
        }
    }

    pub fn aggregate_name(&self) -> Option<&str> {
        self.aggregate_name.as_deref()
    }

    pub fn method(&self) -> Option<MetricAggregationMethod> {
        self.method
    }

    pub fn is_drop_original(&self) -> bool {
        self.drop_original
    }

    pub fn rule_applied(&self) -> bool {
        self.aggregate_name.is_some()
    }
}

impl fmt::Display for RuleMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.aggregate_name, self.method) {
            (Some(name), Some(method)) if self.drop_original => {
                write!(f, "{} ({}, drop)", name, method)
            }
            (Some(name), Some(method)) => write!(f, "{} ({})", name, method),
            _ => f.write_str("no match"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Field(String),
}

/// One line of the aggregation rules file, compiled.
///
/// ```text
/// ocapi.<realm>.<tenant>.<metric> (60) c = custom1 pod[0-9]{3,6}.ecom.<realm>.<tenant>.*.*.ocapi.clients.*.<<metric>>
/// ```
///
/// The left side is the aggregate name template, the window and optional
/// flags: `drop` removes the original point, `c` lets evaluation continue
/// with the following rules after a match. The right side is the method and
/// the source pattern. `<name>` captures one dot separated segment, `<<name>>`
/// captures the remainder across dots.
#[derive(Debug, Clone)]
pub struct MetricAggregationRule {
    order: usize,
    input_pattern: String,
    output_pattern: String,
    window: i64,
    method: MetricAggregationMethod,
    drop_original: bool,
    stop_rule: bool,
    pattern: Regex,
    field_names: Vec<String>,
    template: Vec<TemplatePart>,
}

impl MetricAggregationRule {
    pub fn parse_definition(line: &str, order: usize) -> Result<Self, RuleError> {
        let (left_side, right_side) = line
            .split_once('=')
            .ok_or_else(|| RuleError::malformed(line, "missing '='"))?;

        let left_parts: Vec<&str> = left_side.split_whitespace().collect();
        let [output_pattern, window_token, flags @ ..] = left_parts.as_slice() else {
            return Err(RuleError::malformed(
                line,
                "expected '<aggregate> (<window>)' before '='",
            ));
        };

        let window = WINDOW_TOKEN_REGEX
            .captures(window_token)
            .and_then(|captures| captures[1].parse::<i64>().ok())
            .ok_or_else(|| {
                RuleError::malformed(line, &format!("invalid window [{}]", window_token))
            })?;

        let mut drop_original = false;
        let mut stop_rule = true;
        for flag in flags {
            match flag.to_lowercase().as_str() {
                "drop" => drop_original = true,
                "c" => stop_rule = false,
                _ => return Err(RuleError::UnsupportedFlag(flag.to_string())),
            }
        }

        let right_parts: Vec<&str> = right_side.split_whitespace().collect();
        let [method, input_pattern] = right_parts.as_slice() else {
            return Err(RuleError::malformed(
                line,
                "expected '<method> <pattern>' after '='",
            ));
        };

        Self::new(
            order,
            input_pattern,
            window,
            output_pattern,
            method.parse()?,
            drop_original,
            stop_rule,
        )
    }

    pub fn new(
        order: usize,
        input_pattern: &str,
        window: i64,
        output_pattern: &str,
        method: MetricAggregationMethod,
        drop_original: bool,
        stop_rule: bool,
    ) -> Result<Self, RuleError> {
        if window != SUPPORTED_WINDOW_SECONDS {
            return Err(RuleError::UnsupportedWindow {
                window,
                supported: SUPPORTED_WINDOW_SECONDS,
            });
        }

        let (pattern, field_names) = build_pattern(input_pattern)?;
        let template = build_template(output_pattern, &field_names)?;

        Ok(Self {
            order,
            input_pattern: input_pattern.to_string(),
            output_pattern: output_pattern.to_string(),
            window,
            method,
            drop_original,
            stop_rule,
            pattern,
            field_names,
            template,
        })
    }

    pub fn apply(&self, name: &str) -> RuleMatch {
        RuleMatch::new(self.aggregated_name(name), self.method, self.drop_original)
    }

    fn aggregated_name(&self, name: &str) -> Option<String> {
        let captures = self.pattern.captures(name)?;

        let mut aggregated = String::with_capacity(self.output_pattern.len() + name.len());
        for part in &self.template {
            match part {
                TemplatePart::Literal(text) => aggregated.push_str(text),
                TemplatePart::Field(field) => {
                    if let Some(value) = captures.name(field) {
                        aggregated.push_str(value.as_str());
                    }
                }
            }
        }
        Some(aggregated)
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn method(&self) -> MetricAggregationMethod {
        self.method
    }

    pub fn window(&self) -> i64 {
        self.window
    }

    pub fn is_drop_original(&self) -> bool {
        self.drop_original
    }

    /// No other rule is evaluated for a name once this one matched it.
    pub fn is_stop_rule(&self) -> bool {
        self.stop_rule
    }

    pub fn field_names(&self) -> &[String] {
        &self.field_names
    }
}

/// Compiles the source pattern, returning the regex and its capture names in order.
fn build_pattern(input_pattern: &str) -> Result<(Regex, Vec<String>), RuleError> {
    let mut field_names = Vec::new();

    let regex_parts: Vec<String> = input_pattern
        .split('.')
        .map(|part| {
            if let Some((pre, field, post)) = placeholder(part, "<<", ">>") {
                field_names.push(field.to_string());
                return format!("{}(?P<{}>.+){}", pre, field, post);
            }
            if let Some((pre, field, post)) = placeholder(part, "<", ">") {
                field_names.push(field.to_string());
                return format!("{}(?P<{}>[^.]+){}", pre, field, post);
            }
            if part == "*" {
                "[^.]+".to_string()
            } else {
                part.replace('*', "[^.]*")
            }
        })
        .collect();

    let pattern = format!("^{}$", regex_parts.join(r"\."));
    let regex = Regex::new(&pattern).map_err(|source| RuleError::InvalidPattern {
        pattern: input_pattern.to_string(),
        source,
    })?;

    Ok((regex, field_names))
}

/// Splits `pre<open>field<close>post`, when the segment holds such a placeholder.
fn placeholder<'a>(part: &'a str, open: &str, close: &str) -> Option<(&'a str, &'a str, &'a str)> {
    let start = part.find(open)?;
    let end = start + open.len() + part[start + open.len()..].find(close)?;
    let field = &part[start + open.len()..end];
    if field.is_empty() {
        return None;
    }
    Some((&part[..start], field, &part[end + close.len()..]))
}

fn build_template(output_pattern: &str, field_names: &[String]) -> Result<Vec<TemplatePart>, RuleError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = output_pattern;

    while let Some(start) = rest.find('<') {
        let Some(len) = rest[start + 1..].find('>') else {
            break;
        };
        let field = &rest[start + 1..start + 1 + len];
        literal.push_str(&rest[..start]);

        if !field_names.iter().any(|name| name == field) {
            return Err(RuleError::UnknownPlaceholder {
                placeholder: field.to_string(),
                target: output_pattern.to_string(),
            });
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
        }
        parts.push(TemplatePart::Field(field.to_string()));
        rest = &rest[start + len + 2..];
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(TemplatePart::Literal(literal));
    }
    Ok(parts)
}

impl PartialEq for MetricAggregationRule {
    fn eq(&self, other: &Self) -> bool {
        self.input_pattern == other.input_pattern
            && self.output_pattern == other.output_pattern
            && self.window == other.window
            && self.method == other.method
            && self.drop_original == other.drop_original
            && self.stop_rule == other.stop_rule
    }
}

impl Eq for MetricAggregationRule {}

impl Hash for MetricAggregationRule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.input_pattern.hash(state);
        self.output_pattern.hash(state);
        self.window.hash(state);
        self.method.hash(state);
        self.drop_original.hash(state);
        self.stop_rule.hash(state);
    }
}

/// Renders the rule back in the configuration file syntax.
impl fmt::Display for MetricAggregationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.output_pattern, self.window)?;
        if self.drop_original {
            f.write_str(" drop")?;
        }
        if !self.stop_rule {
            f.write_str(" c")?;
        }
        write!(
            f,
            " = {} {}",
            self.method.as_str().to_lowercase(),
            self.input_pattern
        )
    }
}
