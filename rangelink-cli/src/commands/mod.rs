//! Command handlers for the rangelink CLI.

pub mod decode;
pub mod monitor;
