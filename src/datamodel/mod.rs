pub mod data_point;
pub mod data_points;

pub use data_point::{DataPoint, DataPointParseError, MAX_TIMESTAMP, format_value};
pub use data_points::DataPoints;
