//! The consumer side of the result channel.
mod tally;

use std::collections::BTreeMap;
use std::time::Duration;

use crate::outcome::Outcome;

pub use tally::TallyReporter;

/// Consumes outcome records and exposes the finalized distributions.
///
/// `record` is called from a single collector task in arrival order;
/// `finalize` once, after the last record.
pub trait Reporter: Send + 'static {
    fn record(&mut self, outcome: Outcome);

    /// `elapsed` is the wall-clock duration of the run.
    fn finalize(&mut self, elapsed: Duration);

    /// Error description to count.
    fn error_dist(&self) -> &BTreeMap<String, u64>;

    /// Status code to count, for requests without an error.
    fn status_code_dist(&self) -> &BTreeMap<u16, u64>;
}
