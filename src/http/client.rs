use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Proxy, redirect};
use tracing::debug;

use crate::error::{EngineError, EngineResult, HttpError, ValidationError};

use super::trace::{ConnectTimingLayer, TracedResolver};

pub const USER_AGENT: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));
/// Redirect hops followed when redirects are enabled.
const REDIRECT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Http1,
    Http2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVerification {
    /// Accept any server certificate.
    #[default]
    Skip,
    Verify,
}

/// How the client settles the HTTP version with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VersionMode {
    Http1Only,
    /// ALPN over TLS, offering h2 and falling back to HTTP/1.1.
    Negotiated,
    /// Cleartext h2 (h2c) without an upgrade round trip.
    PriorKnowledge,
}

pub(crate) fn version_mode(protocol: Protocol, scheme: &str) -> VersionMode {
    match protocol {
        Protocol::Http1 => VersionMode::Http1Only,
        Protocol::Http2 if scheme == "https" => VersionMode::Negotiated,
        Protocol::Http2 => VersionMode::PriorKnowledge,
    }
}

/// Settings for the client shared by every worker in a run.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub protocol: Protocol,
    pub tls: TlsVerification,
    pub proxy: Option<String>,
    pub disable_compression: bool,
    pub disable_keepalive: bool,
    pub disable_redirects: bool,
    /// Idle connections kept per host; `None` sizes the pool from concurrency.
    pub max_idle_per_host: Option<usize>,
    pub connect_timeout: Option<Duration>,
}

impl TransportOptions {
    /// # Errors
    ///
    /// Returns an error when the proxy URL cannot be used.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(url) = self.proxy.as_deref() {
            Proxy::all(url).map_err(|source| ValidationError::InvalidProxyUrl {
                url: url.to_owned(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Builds the one client a run shares, with the timing hooks installed.
///
/// `scheme` is the target's URL scheme; it decides how HTTP/2 is reached.
///
/// # Errors
///
/// Returns an error when the proxy is invalid or the client cannot be built.
pub(crate) fn build_client(
    options: &TransportOptions,
    idle_cap: usize,
    scheme: &str,
) -> EngineResult<Client> {
    let mut builder = Client::builder()
        .user_agent(USER_AGENT)
        .dns_resolver(Arc::new(TracedResolver))
        .connector_layer(ConnectTimingLayer)
        .pool_max_idle_per_host(idle_cap)
        .danger_accept_invalid_certs(matches!(options.tls, TlsVerification::Skip));

    let version = version_mode(options.protocol, scheme);
    builder = match version {
        VersionMode::Http1Only => builder.http1_only(),
        VersionMode::Negotiated => builder,
        VersionMode::PriorKnowledge => builder.http2_prior_knowledge(),
    };

    builder = match options.proxy.as_deref() {
        Some(url) => {
            let proxy = Proxy::all(url).map_err(|source| {
                EngineError::validation(ValidationError::InvalidProxyUrl {
                    url: url.to_owned(),
                    source,
                })
            })?;
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    if options.disable_compression {
        builder = builder.no_gzip();
    }

    if options.disable_keepalive {
        builder = builder
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Some(Duration::ZERO));
    }

    builder = if options.disable_redirects {
        builder.redirect(redirect::Policy::none())
    } else {
        builder.redirect(redirect::Policy::limited(REDIRECT_LIMIT))
    };

    if let Some(timeout) = options.connect_timeout {
        builder = builder.connect_timeout(timeout);
    }

    debug!(
        "Building HTTP client: version={:?}, tls={:?}, idle_cap={}",
        version, options.tls, idle_cap
    );
    builder
        .build()
        .map_err(|source| EngineError::http(HttpError::BuildClientFailed { source }))
}
