use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use url::Url;

use crate::error::ValidationError;

use super::body::BodyGenerator;

/// Upper bound applied to per-request timeouts.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(86_400);
/// Per-request timeout used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Where the request body comes from.
#[derive(Clone, Default)]
pub enum BodySource {
    #[default]
    Empty,
    Fixed(Bytes),
    Generator(Arc<dyn BodyGenerator>),
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Empty => f.write_str("Empty"),
            BodySource::Fixed(bytes) => f.debug_tuple("Fixed").field(&bytes.len()).finish(),
            BodySource::Generator(_) => f.write_str("Generator"),
        }
    }
}

/// The HTTP call every worker repeats. Read-only once a run starts.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: BodySource,
    timeout: Duration,
}

impl RequestTemplate {
    pub fn builder(url: impl Into<String>) -> RequestTemplateBuilder {
        RequestTemplateBuilder {
            method: "GET".to_owned(),
            url: url.into(),
            headers: Vec::new(),
            body: BodySource::Empty,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub const fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub const fn body(&self) -> &BodySource {
        &self.body
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Builds one request; every call gets its own copy of the header set.
    pub(crate) fn build_request(&self, body: Option<reqwest::Body>) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method.clone(), self.url.clone());
        *request.headers_mut() = self.headers.clone();
        *request.body_mut() = body;
        request
    }
}

#[derive(Debug, Clone)]
pub struct RequestTemplateBuilder {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: BodySource,
    timeout: Duration,
}

impl RequestTemplateBuilder {
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Adds a header value. Repeating a name keeps every value, in order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.extend(
            headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodySource::Fixed(body.into());
        self
    }

    #[must_use]
    pub fn body_generator(mut self, generator: Arc<dyn BodyGenerator>) -> Self {
        self.body = BodySource::Generator(generator);
        self
    }

    #[must_use]
    pub fn body_source(mut self, body: BodySource) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// # Errors
    ///
    /// Returns an error for an unparsable or non-HTTP URL, an invalid method
    /// or header, or a zero timeout.
    pub fn build(self) -> Result<RequestTemplate, ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingUrl);
        }
        let url = Url::parse(&self.url).map_err(|source| ValidationError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ValidationError::UnsupportedScheme {
                    scheme: other.to_owned(),
                });
            }
        }

        let method = Method::from_bytes(self.method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|source| ValidationError::InvalidMethod {
                method: self.method.clone(),
                source,
            })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|source| {
                ValidationError::InvalidHeaderName {
                    header: name.clone(),
                    source,
                }
            })?;
            let header_value = HeaderValue::from_str(value.trim()).map_err(|source| {
                ValidationError::InvalidHeaderValue {
                    header: name.clone(),
                    source,
                }
            })?;
            headers.append(header_name, header_value);
        }

        if self.timeout.is_zero() {
            return Err(ValidationError::ZeroRequestTimeout);
        }

        Ok(RequestTemplate {
            method,
            url,
            headers,
            body: self.body,
            timeout: self.timeout.min(MAX_REQUEST_TIMEOUT),
        })
    }
}
