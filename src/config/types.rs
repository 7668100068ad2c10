use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Every field is optional; unset fields fall back to engine defaults.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub method: Option<String>,
    /// `"Name: value"` entries; a repeated name keeps every value.
    pub headers: Option<Vec<String>>,
    pub data: Option<String>,
    pub data_file: Option<String>,
    pub stream: Option<StreamBodyConfig>,
    pub requests: Option<u64>,
    pub concurrency: Option<usize>,
    pub qps: Option<f64>,
    /// Run duration; without `requests` the run is bounded by time alone.
    pub duration: Option<DurationValue>,
    pub timeout: Option<DurationValue>,
    pub connect_timeout: Option<DurationValue>,
    pub http2: Option<bool>,
    #[serde(alias = "proxy")]
    pub proxy_url: Option<String>,
    pub disable_compression: Option<bool>,
    pub disable_keepalive: Option<bool>,
    pub disable_redirects: Option<bool>,
    /// Skip certificate verification. Defaults to `true`.
    pub insecure: Option<bool>,
    pub max_idle_per_host: Option<usize>,
}

/// A streamed request body that cycles through `chunks`.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamBodyConfig {
    pub chunks: Vec<String>,
    pub pause: Option<DurationValue>,
    pub rounds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    /// # Errors
    ///
    /// Returns an error for zero or malformed durations.
    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        match self {
            DurationValue::Seconds(0) => Err(ConfigError::DurationZero),
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => super::parse_duration_value(text),
        }
    }
}

impl ConfigFile {
    /// Fields set in `overrides` replace the ones here. A body source in
    /// `overrides` replaces every body source here.
    #[must_use]
    pub fn merge(self, overrides: ConfigFile) -> ConfigFile {
        let body_overridden = overrides.data.is_some()
            || overrides.data_file.is_some()
            || overrides.stream.is_some();
        let (data, data_file, stream) = if body_overridden {
            (overrides.data, overrides.data_file, overrides.stream)
        } else {
            (self.data, self.data_file, self.stream)
        };
        ConfigFile {
            url: overrides.url.or(self.url),
            method: overrides.method.or(self.method),
            headers: overrides.headers.or(self.headers),
            data,
            data_file,
            stream,
            requests: overrides.requests.or(self.requests),
            concurrency: overrides.concurrency.or(self.concurrency),
            qps: overrides.qps.or(self.qps),
            duration: overrides.duration.or(self.duration),
            timeout: overrides.timeout.or(self.timeout),
            connect_timeout: overrides.connect_timeout.or(self.connect_timeout),
            http2: overrides.http2.or(self.http2),
            proxy_url: overrides.proxy_url.or(self.proxy_url),
            disable_compression: overrides.disable_compression.or(self.disable_compression),
            disable_keepalive: overrides.disable_keepalive.or(self.disable_keepalive),
            disable_redirects: overrides.disable_redirects.or(self.disable_redirects),
            insecure: overrides.insecure.or(self.insecure),
            max_idle_per_host: overrides.max_idle_per_host.or(self.max_idle_per_host),
        }
    }
}
