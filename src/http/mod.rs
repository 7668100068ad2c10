//! Request templates, the shared client, timing hooks and the request executor.
mod body;
mod client;
mod execution;
mod rate;
mod template;
mod trace;

#[cfg(test)]
mod tests;

pub use body::{BodyGenerator, ChunkCycle};
pub use client::{Protocol, TlsVerification, TransportOptions, USER_AGENT};
pub use template::{
    BodySource, DEFAULT_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT, RequestTemplate,
    RequestTemplateBuilder,
};

pub(crate) use client::build_client;
pub(crate) use execution::execute;
pub(crate) use rate::RateLimiter;
