//! Authenticated session over any [`HttpTransport`].
//!
//! `AuthSession` wraps a transport and owns the bearer token. An expired token
//! (past its `expires_in`, or rejected by the provider with 401) is refreshed
//! once per call and the call retried. Every other non-success status is fatal
//! and carries the status code and body; retry policy belongs to the caller.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::config::Credentials;
use crate::error::{DataLicenseError, Result};
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

/// Longest response body echoed into debug logs.
const LOGGED_BODY_LIMIT: usize = 2048;

/// An authenticated request capability.
pub trait ApiSession {
    fn request(&mut self, request: HttpRequest) -> Result<HttpResponse>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Token {
    access_token: String,
    expires_at: Option<Instant>,
}

impl Token {
    pub fn new(access_token: impl Into<String>, lifetime: Option<Duration>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: lifetime.map(|d| Instant::now() + d),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

pub struct AuthSession<T> {
    transport: T,
    credentials: Credentials,
    token_url: String,
    api_version: String,
    token: Option<Token>,
}

impl<T: HttpTransport> AuthSession<T> {
    pub fn new(
        transport: T,
        credentials: Credentials,
        token_url: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            token_url: token_url.into(),
            api_version: api_version.into(),
            token: None,
        }
    }

    /// Build a session and fetch the first token.
    pub fn connect(
        transport: T,
        credentials: Credentials,
        token_url: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self> {
        let mut session = Self::new(transport, credentials, token_url, api_version);
        session.authenticate()?;
        Ok(session)
    }

    /// Exchange the client credentials for a bearer token.
    pub fn authenticate(&mut self) -> Result<&Token> {
        let form = vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), self.credentials.client_id.clone()),
            ("client_secret".to_string(), self.credentials.client_secret.clone()),
        ];
        let request = HttpRequest::post_form(self.token_url.as_str(), form);
        debug!(url = %request.url, "requesting access token");

        let response = self.transport.send(&request)?;
        if !response.is_success() {
            let status = response.status;
            let body = truncate_body(&response.into_bytes()?);
            return Err(DataLicenseError::Authentication(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        let parsed: TokenResponse = response.json_body().map_err(|e| {
            DataLicenseError::Authentication(format!("unreadable token response: {e}"))
        })?;

        let token = Token::new(parsed.access_token, parsed.expires_in.map(Duration::from_secs));
        Ok(&*self.token.insert(token))
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    fn send_authorized(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut authorized = request.clone();
        if let Some(token) = &self.token {
            authorized = authorized
                .with_header("Authorization", format!("Bearer {}", token.access_token));
        }
        authorized = authorized.with_header("api-version", self.api_version.as_str());

        debug!(
            "Request being sent to HTTP server: {}, {}",
            authorized.method, authorized.url
        );
        let response = self.transport.send(&authorized)?;
        debug!("Response status: {}", response.status);
        debug!(
            "Response x-request-id: {}",
            response.header("x-request-id").unwrap_or("-")
        );
        if response.is_success() && !authorized.stream {
            if let Some(body) = response.buffered() {
                debug!("Response content: {}", truncate_body(body));
            }
        }
        Ok(response)
    }
}

impl<T: HttpTransport> ApiSession for AuthSession<T> {
    fn request(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let mut refreshed = false;
        if self.token.as_ref().map_or(true, Token::is_expired) {
            debug!("access token missing or expired, re-authenticating");
            self.authenticate()?;
            refreshed = true;
        }

        let mut response = self.send_authorized(&request)?;
        if response.status == 401 && !refreshed {
            debug!("provider rejected token, re-authenticating once");
            self.authenticate()?;
            response = self.send_authorized(&request)?;
        }

        if !response.is_success() {
            let status = response.status;
            let body = truncate_body(&response.into_bytes()?);
            return Err(DataLicenseError::HttpStatus { status, body });
        }
        Ok(response)
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.chars().count() <= LOGGED_BODY_LIMIT {
        text.into_owned()
    } else {
        let mut cut: String = text.chars().take(LOGGED_BODY_LIMIT).collect();
        cut.push_str("...");
        cut
    }
}
