//! Schema module - Configuration and result types for the rule search.

mod config;
mod search;

pub use config::*;
pub use search::*;
