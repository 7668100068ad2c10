use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Concurrency must be >= 1.")]
    ZeroConcurrency,
    #[error("A run without a request count (n = 0) requires a run timeout.")]
    UnboundedRun,
    #[error("Invalid rate limit '{value}'. Use a finite number >= 0.")]
    InvalidRate { value: f64 },
    #[error("Missing target URL.")]
    MissingUrl,
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Unsupported URL scheme '{scheme}'. Use http or https.")]
    UnsupportedScheme { scheme: String },
    #[error("Invalid HTTP method '{method}': {source}")]
    InvalidMethod {
        method: String,
        #[source]
        source: http::method::InvalidMethod,
    },
    #[error("Invalid header format: '{value}'. Expected 'Key: Value'")]
    InvalidHeaderFormat { value: String },
    #[error("Invalid header name '{header}': {source}")]
    InvalidHeaderName {
        header: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("Invalid header value for '{header}': {source}")]
    InvalidHeaderValue {
        header: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("Invalid proxy URL '{url}': {source}")]
    InvalidProxyUrl {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Request timeout must be > 0.")]
    ZeroRequestTimeout,
    #[error("A chunk cycle needs at least one chunk.")]
    EmptyChunkCycle,
}
