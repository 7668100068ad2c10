//! Run configuration, cancellation context, the worker loop and the dispatcher.
mod config;
mod context;
mod dispatcher;
mod worker;


pub use config::{DEFAULT_CONCURRENCY, DEFAULT_REQUESTS, MAX_RESULT_CAPACITY, RunConfig};
pub(crate) use context::{DeadlineBound, RunContext};
pub use dispatcher::{Dispatcher, RunSummary};
