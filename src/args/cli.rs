use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConfigFile, DurationValue};

use super::parsers::{parse_duration_arg, parse_header_arg, parse_rate_arg};

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Concurrent HTTP load generator with per-request DNS, connect, write, wait and read timing.",
    next_help_heading = "Transport Options"
)]
pub struct CliArgs {
    /// Target URL
    #[arg(help_heading = "Common Options")]
    pub url: Option<String>,

    /// Number of requests to run [default: 200, or unbounded with -z]
    #[arg(short = 'n', long = "requests", help_heading = "Common Options")]
    pub requests: Option<u64>,

    /// Number of workers issuing requests concurrently [default: 50]
    #[arg(short = 'c', long = "concurrency", help_heading = "Common Options")]
    pub concurrency: Option<usize>,

    /// Aggregate rate limit in requests per second (0 = unlimited)
    #[arg(short = 'q', long = "qps", value_parser = parse_rate_arg, help_heading = "Common Options")]
    pub qps: Option<f64>,

    /// Run duration (e.g. 10s, 2m); stops the run when it elapses
    #[arg(short = 'z', long = "duration", value_parser = parse_duration_arg, help_heading = "Common Options")]
    pub duration: Option<DurationValue>,

    /// Per-request timeout (e.g. 500ms, 20s) [default: 20s]
    #[arg(short = 't', long = "timeout", value_parser = parse_duration_arg, help_heading = "Common Options")]
    pub timeout: Option<DurationValue>,

    /// HTTP method [default: GET]
    #[arg(short = 'm', long = "method", help_heading = "Common Options")]
    pub method: Option<String>,

    /// Request header in 'Key: Value' format (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header_arg, help_heading = "Common Options")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long = "data", conflicts_with = "data_file", help_heading = "Common Options")]
    pub data: Option<String>,

    /// Read the request body from a file
    #[arg(short = 'D', long = "data-file", help_heading = "Common Options")]
    pub data_file: Option<String>,

    /// Config file (.toml or .json); flags override its values
    #[arg(long = "config", env = "VOLLEY_CONFIG", help_heading = "Common Options")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", help_heading = "Common Options")]
    pub verbose: bool,

    /// Use HTTP/2 with prior knowledge
    #[arg(long = "h2")]
    pub http2: bool,

    /// Proxy URL for every request
    #[arg(short = 'x', long = "proxy")]
    pub proxy: Option<String>,

    /// Do not negotiate gzip responses
    #[arg(long = "disable-compression")]
    pub disable_compression: bool,

    /// Open a new connection for every request
    #[arg(long = "disable-keepalive")]
    pub disable_keepalive: bool,

    /// Do not follow redirects
    #[arg(long = "disable-redirects")]
    pub disable_redirects: bool,

    /// Skip TLS certificate verification (the default)
    #[arg(long = "insecure", conflicts_with = "verify_tls")]
    pub insecure: bool,

    /// Verify TLS certificates
    #[arg(long = "verify-tls")]
    pub verify_tls: bool,

    /// TCP connect timeout (e.g. 2s)
    #[arg(long = "connect-timeout", value_parser = parse_duration_arg)]
    pub connect_timeout: Option<DurationValue>,

    /// Idle connections kept per host [default: min(concurrency, 500)]
    #[arg(long = "max-idle")]
    pub max_idle_per_host: Option<usize>,
}

impl CliArgs {
    /// The values given on the command line, for merging over a config file.
    #[must_use]
    pub fn overlay(&self) -> ConfigFile {
        let insecure = if self.verify_tls {
            Some(false)
        } else if self.insecure {
            Some(true)
        } else {
            None
        };
        ConfigFile {
            url: self.url.clone(),
            method: self.method.clone(),
            headers: (!self.headers.is_empty()).then(|| self.headers.clone()),
            data: self.data.clone(),
            data_file: self.data_file.clone(),
            stream: None,
            requests: self.requests,
            concurrency: self.concurrency,
            qps: self.qps,
            duration: self.duration.clone(),
            timeout: self.timeout.clone(),
            connect_timeout: self.connect_timeout.clone(),
            http2: self.http2.then_some(true),
            proxy_url: self.proxy.clone(),
            disable_compression: self.disable_compression.then_some(true),
            disable_keepalive: self.disable_keepalive.then_some(true),
            disable_redirects: self.disable_redirects.then_some(true),
            insecure,
            max_idle_per_host: self.max_idle_per_host,
        }
    }
}
