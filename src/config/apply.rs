use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::error::{ConfigError, EngineError, EngineResult, ValidationError};
use crate::http::{
    BodySource, ChunkCycle, Protocol, RequestTemplate, TlsVerification, TransportOptions,
};
use crate::run::{DEFAULT_CONCURRENCY, DEFAULT_REQUESTS, RunConfig};

use super::parse::parse_header;
use super::types::{ConfigFile, DurationValue, StreamBodyConfig};

/// Turns a merged config into the run parameters and request template.
///
/// # Errors
///
/// Returns an error for a missing URL, conflicting body sources, malformed
/// durations or headers, or an unreadable body file.
pub fn into_run(config: &ConfigFile) -> EngineResult<(RunConfig, RequestTemplate)> {
    let url = config
        .url
        .clone()
        .ok_or_else(|| EngineError::validation(ValidationError::MissingUrl))?;

    let run_timeout = duration_field(config.duration.as_ref(), "duration")?;
    let requests = match (config.requests, run_timeout) {
        (Some(requests), _) => requests,
        (None, Some(_)) => 0,
        (None, None) => DEFAULT_REQUESTS,
    };
    if requests > 0 && run_timeout.is_some() && config.requests.is_some() {
        warn!("Both a request count and a duration are set; the run ends at whichever comes first.");
    }

    let transport = TransportOptions {
        protocol: if config.http2.unwrap_or(false) {
            Protocol::Http2
        } else {
            Protocol::Http1
        },
        tls: if config.insecure.unwrap_or(true) {
            TlsVerification::Skip
        } else {
            TlsVerification::Verify
        },
        proxy: config.proxy_url.clone(),
        disable_compression: config.disable_compression.unwrap_or(false),
        disable_keepalive: config.disable_keepalive.unwrap_or(false),
        disable_redirects: config.disable_redirects.unwrap_or(false),
        max_idle_per_host: config.max_idle_per_host,
        connect_timeout: duration_field(config.connect_timeout.as_ref(), "connect_timeout")?,
    };

    let run = RunConfig {
        requests,
        concurrency: config.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
        qps: config.qps.unwrap_or(0.0),
        run_timeout,
        transport,
    };

    let mut builder = RequestTemplate::builder(url)
        .method(config.method.as_deref().unwrap_or("GET"))
        .body_source(resolve_body(config)?);
    if let Some(timeout) = duration_field(config.timeout.as_ref(), "timeout")? {
        builder = builder.timeout(timeout);
    }
    for header in config.headers.iter().flatten() {
        let (name, value) = parse_header(header)
            .map_err(|source| EngineError::config(ConfigError::InvalidHeader { source }))?;
        builder = builder.header(name, value);
    }
    let template = builder.build()?;

    Ok((run, template))
}

fn duration_field(
    value: Option<&DurationValue>,
    field: &'static str,
) -> EngineResult<Option<std::time::Duration>> {
    value
        .map(|value| {
            value.to_duration().map_err(|err| {
                EngineError::config(ConfigError::InvalidField {
                    field,
                    source: Box::new(err),
                })
            })
        })
        .transpose()
}

fn resolve_body(config: &ConfigFile) -> EngineResult<BodySource> {
    match (&config.data, &config.data_file, &config.stream) {
        (Some(_), Some(_), _) => Err(conflict("data", "data_file")),
        (Some(_), _, Some(_)) => Err(conflict("data", "stream")),
        (_, Some(_), Some(_)) => Err(conflict("data_file", "stream")),
        (Some(data), None, None) => Ok(BodySource::Fixed(Bytes::from(data.clone()))),
        (None, Some(path), None) => {
            let path = PathBuf::from(path);
            let content = std::fs::read(&path).map_err(|source| {
                EngineError::config(ConfigError::ReadBodyFile { path, source })
            })?;
            Ok(BodySource::Fixed(Bytes::from(content)))
        }
        (None, None, Some(stream)) => stream_body(stream),
        (None, None, None) => Ok(BodySource::Empty),
    }
}

fn stream_body(stream: &StreamBodyConfig) -> EngineResult<BodySource> {
    let chunks = stream
        .chunks
        .iter()
        .map(|chunk| Bytes::from(chunk.clone()))
        .collect();
    let mut cycle = ChunkCycle::new(chunks)?;
    if let Some(pause) = duration_field(stream.pause.as_ref(), "stream.pause")? {
        cycle = cycle.with_pause(pause);
    }
    if let Some(rounds) = stream.rounds {
        cycle = cycle.with_rounds(rounds);
    }
    Ok(BodySource::Generator(Arc::new(cycle)))
}

fn conflict(left: &'static str, right: &'static str) -> EngineError {
    EngineError::config(ConfigError::Conflict { left, right })
}
