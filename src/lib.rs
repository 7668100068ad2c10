//! Core library for the `volley` load generator.
//!
//! A [`run::Dispatcher`] spreads a request budget over a fixed pool of
//! workers, optionally paced by a shared rate limiter and bounded by a run
//! deadline. Every request yields an [`outcome::Outcome`] carrying its
//! status or classified error and a DNS/connect/write/wait/read timing
//! breakdown; outcomes flow through a bounded channel to a
//! [`report::Reporter`].
pub mod args;
pub mod config;
pub mod error;
pub mod http;
pub mod logger;
pub mod outcome;
pub mod report;
pub mod run;
pub mod shutdown;
