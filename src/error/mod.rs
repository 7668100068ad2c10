//! Error types: fatal setup failures and per-request outcome errors.
mod config;
mod engine;
mod http;
mod request;
mod validation;


pub use config::ConfigError;
pub use engine::{EngineError, EngineResult};
pub use http::HttpError;
pub use request::{BodyError, RequestError, RequestErrorKind, ResolveError};
pub use validation::ValidationError;
