//! Structured error types for the request/poll/download protocol.
//!
//! Every variant here is fatal for the run. The one non-fatal outcome of the
//! protocol (poll timeout) is modelled as `Ok(None)` by the client, not as an
//! error.

use thiserror::Error;

use crate::transform::SchemaError;

#[derive(Debug, Error)]
pub enum DataLicenseError {
    #[error("scheduled catalog not found among {available} catalogs")]
    CatalogNotFound { available: usize },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("unexpected response status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("network unreachable: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unsupported content encoding received in the response: '{0}'")]
    UnsupportedEncoding(String),

    #[error("gzip decompression failed: {0}")]
    Decompression(String),

    #[error("payload is not a JSON record table: {0}")]
    Payload(String),

    #[error("protocol misuse: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("dataframe error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
}

impl DataLicenseError {
    /// True for a rejected/expired bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DataLicenseError::HttpStatus { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, DataLicenseError>;
