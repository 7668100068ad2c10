//! Config file loading and conversion into a run.
mod apply;
mod loader;
mod parse;
pub mod types;


pub use apply::into_run;
pub use loader::load_config;
pub use types::{ConfigFile, DurationValue, StreamBodyConfig};

pub(crate) use parse::{parse_duration_value, parse_header};
