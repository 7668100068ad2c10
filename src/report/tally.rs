use std::collections::BTreeMap;
use std::time::Duration;

use crate::outcome::Outcome;

use super::Reporter;

/// Counts records, error descriptions and status codes.
#[derive(Debug, Clone, Default)]
pub struct TallyReporter {
    records: u64,
    successes: u64,
    bytes: u64,
    errors: BTreeMap<String, u64>,
    status_codes: BTreeMap<u16, u64>,
    elapsed: Option<Duration>,
}

impl TallyReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub const fn successes(&self) -> u64 {
        self.successes
    }

    /// Response body bytes across successful requests.
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Run duration, set by `finalize`.
    #[must_use]
    pub const fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

impl Reporter for TallyReporter {
    fn record(&mut self, outcome: Outcome) {
        self.records = self.records.saturating_add(1);
        match (outcome.error, outcome.status_code) {
            (Some(error), _) => {
                let count = self.errors.entry(error.to_string()).or_insert(0);
                *count = count.saturating_add(1);
            }
            (None, Some(status)) => {
                self.successes = self.successes.saturating_add(1);
                self.bytes = self.bytes.saturating_add(outcome.content_length);
                let count = self.status_codes.entry(status).or_insert(0);
                *count = count.saturating_add(1);
            }
            (None, None) => {}
        }
    }

    fn finalize(&mut self, elapsed: Duration) {
        self.elapsed = Some(elapsed);
    }

    fn error_dist(&self) -> &BTreeMap<String, u64> {
        &self.errors
    }

    fn status_code_dist(&self) -> &BTreeMap<u16, u64> {
        &self.status_codes
    }
}
