use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Failure classes surfaced on an outcome record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestErrorKind {
    /// DNS lookup failed.
    Resolution,
    /// Connection refused, unreachable, or TLS handshake failure.
    Connection,
    /// Per-request timeout, run deadline, or run cancellation.
    Timeout,
    /// Malformed response or protocol negotiation failure.
    Transport,
    /// The streaming body generator failed.
    BodyProduction,
}

impl RequestErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RequestErrorKind::Resolution => "resolution failure",
            RequestErrorKind::Connection => "connection failure",
            RequestErrorKind::Timeout => "timeout",
            RequestErrorKind::Transport => "transport error",
            RequestErrorKind::BodyProduction => "body production failure",
        }
    }
}

impl fmt::Display for RequestErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified request failure. Its `Display` text is the error-distribution key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct RequestError {
    kind: RequestErrorKind,
    detail: String,
}

impl RequestError {
    pub(crate) fn new(kind: RequestErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub(crate) fn request_timeout(timeout: Duration) -> Self {
        Self::new(
            RequestErrorKind::Timeout,
            format!("request timeout of {:?} exceeded", timeout),
        )
    }

    pub(crate) fn run_deadline() -> Self {
        Self::new(RequestErrorKind::Timeout, "run deadline exceeded")
    }

    pub(crate) fn canceled() -> Self {
        Self::new(RequestErrorKind::Timeout, "run canceled")
    }

    /// Classifies any error returned by the HTTP stack.
    pub(crate) fn from_source(err: &(dyn StdError + 'static)) -> Self {
        Self::new(classify(err), describe_chain(err))
    }

    #[must_use]
    pub const fn kind(&self) -> RequestErrorKind {
        self.kind
    }

    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Failure raised by a streaming body generator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("body generator failed: {message}")]
pub struct BodyError {
    message: String,
}

impl BodyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure raised by the instrumented DNS resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("lookup of '{host}' failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lookup of '{host}' returned no addresses")]
    NoAddresses { host: String },
}

fn classify(err: &(dyn StdError + 'static)) -> RequestErrorKind {
    if chain_contains::<BodyError>(err) {
        return RequestErrorKind::BodyProduction;
    }
    if chain_contains::<ResolveError>(err) {
        return RequestErrorKind::Resolution;
    }
    let mut current = Some(err);
    while let Some(cause) = current {
        if let Some(http_err) = cause.downcast_ref::<reqwest::Error>() {
            if http_err.is_timeout() {
                return RequestErrorKind::Timeout;
            }
            if http_err.is_connect() {
                return RequestErrorKind::Connection;
            }
        }
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            match io_err.kind() {
                std::io::ErrorKind::TimedOut => return RequestErrorKind::Timeout,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::AddrNotAvailable => return RequestErrorKind::Connection,
                _ => {}
            }
        }
        current = cause.source();
    }
    RequestErrorKind::Transport
}

fn chain_contains<E>(err: &(dyn StdError + 'static)) -> bool
where
    E: StdError + 'static,
{
    let mut current = Some(err);
    while let Some(cause) = current {
        if cause.is::<E>() {
            return true;
        }
        current = cause.source();
    }
    false
}

/// Joins the error and its causes with `": "`, skipping causes already quoted
/// by their parent's message.
pub(crate) fn describe_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let message = cause.to_string();
        if !text.contains(&message) {
            text.push_str(": ");
            text.push_str(&message);
        }
        current = cause.source();
    }
    text
}
