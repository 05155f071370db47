//! Transport abstraction.
//!
//! The session and protocol client speak to the provider only through
//! [`HttpTransport`]. The production transport is [`ReqwestTransport`]; any
//! closure `Fn(&HttpRequest) -> Result<HttpResponse>` is also a transport,
//! which is how tests fake the provider.

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

use crate::error::{DataLicenseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A single outbound HTTP call.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    /// Stream mode: the body is handed back unread and never logged.
    pub stream: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            stream: false,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            body: RequestBody::Json(body),
            ..Self::get(url)
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            body: RequestBody::Form(form),
            ..Self::get(url)
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub enum ResponseBody {
    Buffered(Vec<u8>),
    Streamed(Box<dyn Read + Send>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            ResponseBody::Streamed(_) => write!(f, "Streamed"),
        }
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are stored lower-cased.
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: ResponseBody::Buffered(body.into()),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// Consume the body into memory, draining a streamed body if needed.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Streamed(mut reader) => {
                let mut buf = Vec::new();
                reader
                    .read_to_end(&mut buf)
                    .map_err(|e| DataLicenseError::Transport(format!("read body: {e}")))?;
                Ok(buf)
            }
        }
    }

    /// Borrow a buffered body. Streamed bodies return `None`.
    pub fn buffered(&self) -> Option<&[u8]> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            ResponseBody::Streamed(_) => None,
        }
    }

    pub fn json_body<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let bytes = self.into_bytes()?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DataLicenseError::MalformedResponse(format!("invalid JSON body: {e}")))
    }
}

/// Anything that can perform one HTTP round trip.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Pin a closure's signature so it coerces into a transport.
pub fn transport_fn<F>(f: F) -> F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync,
{
    f
}

impl<F> HttpTransport for F
where
    F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync,
{
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        self(request)
    }
}
