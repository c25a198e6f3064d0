#![forbid(unsafe_code)]

pub mod accumulator;
pub mod config;
pub mod datamodel;
pub mod pipeline;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
