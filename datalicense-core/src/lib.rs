//! Data License core: authenticated request/poll/download client and the
//! transform that turns a delivered payload into canonical rows.
//!
//! - Transport abstraction and blocking `reqwest` transport
//! - OAuth2 session with single transparent token refresh
//! - Catalog → submit → bounded poll → gzip download state machine
//! - Schema reconciliation for tag-prefixed placeholder fields
//! - Date normalisation into one canonical timestamp per row
//! - Instrument source and storage sink collaborators

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod instruments;
pub mod session;
pub mod storage;
pub mod tabular;
pub mod transform;

pub use client::{ClientSettings, ClientState, DataRequest, RequestProtocolClient, SessionId};
pub use config::Settings;
pub use error::{DataLicenseError, Result};
pub use session::{ApiSession, AuthSession};
pub use transform::Transformer;
