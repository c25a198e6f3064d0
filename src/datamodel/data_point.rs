use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Latest timestamp accepted by the parser, 9999-12-31T23:59:59Z.
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// Largest magnitude printed through the two-decimal path. Above it the
/// value in hundredths no longer fits an `i64`.
const MAX_ROUNDED_VALUE: f64 = 9.0e16;

/// A single metric sample: a name, a value, and a timestamp in epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub name: String,
    pub value: f64,
    pub ts: i64,
}

impl DataPoint {
    pub fn new(name: impl Into<String>, value: f64, ts: i64) -> Self {
        Self {
            name: name.into(),
            value,
            ts,
        }
    }

    /// Value formatted the way the plaintext protocol prints it.
    pub fn str_value(&self) -> String {
        format_value(self.value)
    }
}

/// Formats a value with at most two decimals and without a trailing `.00`.
///
/// Non-finite values and magnitudes of 9e16 and above use the default `f64`
/// formatting (`NaN`, `inf`, all integer digits).
pub fn format_value(value: f64) -> String {
    if !value.is_finite() || value.abs() >= MAX_ROUNDED_VALUE {
        return format!("{}", value);
    }
    let cents = (value * 100.0).round() as i64;
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    let (whole, fraction) = (cents / 100, cents % 100);
    match fraction {
        0 => format!("{}{}", sign, whole),
        f if f % 10 == 0 => format!("{}{}.{}", sign, whole, f / 10),
        f => format!("{}{}.{:02}", sign, whole, f),
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.str_value(), self.ts)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum DataPointParseError {
    #[error("Expected 'name value timestamp', got {0} fields")]
    FieldCount(usize),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Parses the plaintext line protocol: `<name> <value> <timestamp>`.
impl FromStr for DataPoint {
    type Err = DataPointParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, value, ts] = fields.as_slice() else {
            return Err(DataPointParseError::FieldCount(fields.len()));
        };

        let value = value
            .parse::<f64>()
            .map_err(|_| DataPointParseError::InvalidValue(value.to_string()))?;

        // Some senders emit fractional timestamps, the fraction is dropped.
        let ts = match ts.parse::<i64>() {
            Ok(parsed) => Some(parsed),
            Err(_) => ts
                .parse::<f64>()
                .ok()
                .map(f64::trunc)
                .filter(|parsed| (0.0..=MAX_TIMESTAMP as f64).contains(parsed))
                .map(|parsed| parsed as i64),
        }
        .filter(|parsed| (0..=MAX_TIMESTAMP).contains(parsed))
        .ok_or_else(|| DataPointParseError::InvalidTimestamp(ts.to_string()))?;

        Ok(DataPoint::new(*name, value, ts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(12.0), "12");
        assert_eq!(format_value(12.5), "12.5");
        assert_eq!(format_value(12.05), "12.05");
        assert_eq!(format_value(12.123), "12.12");
        assert_eq!(format_value(1.999), "2");
        assert_eq!(format_value(-0.5), "-0.5");
        assert_eq!(format_value(0.0), "0");
    }

    #[test]
    fn test_display() {
        let point = DataPoint::new("foo.bar", 123.0, 60);
        assert_eq!(point.to_string(), "foo.bar 123 60");
    }

    #[test]
    fn test_parse() {
        let point: DataPoint = "foo.bar 1.5 1700000000".parse().unwrap();
        assert_eq!(point, DataPoint::new("foo.bar", 1.5, 1700000000));

        let point: DataPoint = "foo.bar   2   1700000000.75".parse().unwrap();
        assert_eq!(point.ts, 1700000000);

        assert_eq!(
            "foo.bar 1".parse::<DataPoint>(),
            Err(DataPointParseError::FieldCount(2))
        );
        assert_eq!(
            "foo.bar abc 1".parse::<DataPoint>(),
            Err(DataPointParseError::InvalidValue("abc".to_string()))
        );
        assert!("foo.bar 1 yesterday".parse::<DataPoint>().is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_timestamps() {
        for ts in ["9223372036854775807", "-60", "1e30", "253402300800", "-0.5e3"] {
            assert_eq!(
                format!("foo.bar 1 {}", ts).parse::<DataPoint>(),
                Err(DataPointParseError::InvalidTimestamp(ts.to_string())),
                "ts={}",
                ts
            );
        }
        let point: DataPoint = "foo.bar 1 253402300799".parse().unwrap();
        assert_eq!(point.ts, MAX_TIMESTAMP);
        let point: DataPoint = "foo.bar 1 0".parse().unwrap();
        assert_eq!(point.ts, 0);
    }

    #[test]
    fn test_format_large_and_non_finite_values() {
        assert_eq!(format_value(8.9e16), "89000000000000000");
        assert_eq!(format_value(1e20), "100000000000000000000");
        assert_eq!(format_value(-1e17), "-100000000000000000");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "inf");
    }
}
