//! Blocking `reqwest` transport.
//!
//! Built without reqwest's own decompression so the provider's
//! `content-encoding` header reaches the client untouched.

use std::collections::BTreeMap;
use std::time::Duration;

use super::{HttpRequest, HttpResponse, HttpTransport, Method, RequestBody, ResponseBody};
use crate::error::{DataLicenseError, Result};

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("datalicense/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataLicenseError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let resp = builder.send().map_err(|e| {
            if e.is_timeout() {
                DataLicenseError::Transport(format!("timed out: {e}"))
            } else {
                DataLicenseError::Transport(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = if request.stream {
            ResponseBody::Streamed(Box::new(resp))
        } else {
            let bytes = resp
                .bytes()
                .map_err(|e| DataLicenseError::Transport(format!("read body: {e}")))?;
            ResponseBody::Buffered(bytes.to_vec())
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
