//! Request → poll → download protocol client.
//!
//! ```text
//! connect ──► CatalogResolved ──submit──► RequestSubmitted ──poll──┬─► DataReady ──download──► Downloaded
//!                                                                  └─► TimedOut
//! ```
//!
//! Catalog resolution happens in [`RequestProtocolClient::connect`]. A missing
//! scheduled catalog, a malformed submission response, or an unsupported
//! content encoding abort the run. A poll timeout does not: `poll` and
//! `listen` return `Ok(None)`.

pub mod download;
pub mod request;

pub use download::decode_payload;
pub use request::{
    DataRequest, FieldSpec, Identifier, SessionId, TerminalIdentity, Trigger, TAG_PREFIX,
};

use std::time::{Duration, Instant};

use polars::prelude::DataFrame;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

use crate::config::ApiSettings;
use crate::error::{DataLicenseError, Result};
use crate::http::HttpRequest;
use crate::session::ApiSession;

pub const SCHEDULED_SUBSCRIPTION: &str = "scheduled";
const CATALOGS_PATH: &str = "/eap/catalogs/";

/// Connection and timing parameters for the protocol client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub host: String,
    pub poll_interval: Duration,
    pub reply_timeout: Duration,
}

impl ClientSettings {
    pub fn from_api(api: &ApiSettings) -> Self {
        Self {
            host: api.host.clone(),
            poll_interval: Duration::from_secs(api.poll_interval_secs),
            reply_timeout: Duration::from_secs(api.reply_timeout_min.saturating_mul(60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Catalog {
    #[serde(rename = "identifier")]
    pub id: String,
    #[serde(rename = "subscriptionType", default)]
    pub subscription_type: String,
    /// Base URL for catalog-scoped calls, always ending in `/`.
    #[serde(skip)]
    pub url: String,
}

/// First catalog whose subscription type is `scheduled`.
pub fn select_scheduled(catalogs: &[Catalog]) -> Option<&Catalog> {
    catalogs
        .iter()
        .find(|c| c.subscription_type == SCHEDULED_SUBSCRIPTION)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRequest {
    pub identifier: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    CatalogResolved,
    RequestSubmitted,
    DataReady,
    Downloaded,
    TimedOut,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    contains: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    request: SubmitBodyRequest,
}

#[derive(Debug, Deserialize)]
struct SubmitBodyRequest {
    identifier: String,
}

pub struct RequestProtocolClient<S> {
    session: S,
    settings: ClientSettings,
    host: Url,
    catalog: Catalog,
    request: DataRequest,
    submitted: Option<SubmittedRequest>,
    response: Option<ResponseDescriptor>,
    state: ClientState,
}

impl<S: ApiSession> RequestProtocolClient<S> {
    /// Discover the scheduled catalog and return a client scoped to it.
    pub fn connect(mut session: S, settings: ClientSettings, request: DataRequest) -> Result<Self> {
        let host = Url::parse(&settings.host)
            .map_err(|e| DataLicenseError::InvalidState(format!("bad host URL: {e}")))?;
        let catalogs_url = join(&host, CATALOGS_PATH)?;

        let listing: Listing<Catalog> = session
            .request(HttpRequest::get(catalogs_url.as_str()))?
            .json_body()?;

        let Some(found) = select_scheduled(&listing.contains) else {
            let ids: Vec<(&str, &str)> = listing
                .contains
                .iter()
                .map(|c| (c.id.as_str(), c.subscription_type.as_str()))
                .collect();
            error!("Scheduled catalog not in {ids:?}");
            return Err(DataLicenseError::CatalogNotFound {
                available: listing.contains.len(),
            });
        };

        let mut catalog = found.clone();
        catalog.url = join(&host, &format!("{CATALOGS_PATH}{}/", catalog.id))?.to_string();
        info!(catalog = %catalog.id, "resolved scheduled catalog");

        Ok(Self {
            session,
            settings,
            host,
            catalog,
            request,
            submitted: None,
            response: None,
            state: ClientState::CatalogResolved,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn request(&self) -> &DataRequest {
        &self.request
    }

    pub fn submitted(&self) -> Option<&SubmittedRequest> {
        self.submitted.as_ref()
    }

    pub fn response(&self) -> Option<&ResponseDescriptor> {
        self.response.as_ref()
    }

    /// POST the request document; capture the request URL and identifier.
    pub fn submit(&mut self) -> Result<&SubmittedRequest> {
        self.expect_state(ClientState::CatalogResolved, "submit")?;

        let url = format!("{}requests/", self.catalog.url);
        let document = self.request.to_document(&self.catalog.url);
        let response = self.session.request(HttpRequest::post_json(url, document))?;

        let location = response
            .header("location")
            .ok_or_else(|| {
                DataLicenseError::MalformedResponse("submission response has no Location header".into())
            })?
            .to_string();
        let request_url = join(&self.host, &location)?.to_string();
        let body: SubmitBody = response.json_body().map_err(|e| {
            DataLicenseError::MalformedResponse(format!("submission body lacks request.identifier: {e}"))
        })?;

        info!(
            request_id = %body.request.identifier,
            session = %self.request.session_id,
            "data request submitted"
        );
        self.state = ClientState::RequestSubmitted;
        Ok(&*self.submitted.insert(SubmittedRequest {
            identifier: body.request.identifier,
            url: request_url,
        }))
    }

    /// Poll the response listing until an artifact appears or the wall-clock
    /// budget runs out. `Ok(None)` means timed out.
    pub fn poll(&mut self) -> Result<Option<ResponseDescriptor>> {
        self.expect_state(ClientState::RequestSubmitted, "poll")?;

        let started = Instant::now();
        let timeout = self.settings.reply_timeout;
        while started.elapsed() < timeout {
            if let Some(descriptor) = self.poll_once()? {
                self.state = ClientState::DataReady;
                self.response = Some(descriptor.clone());
                return Ok(Some(descriptor));
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            std::thread::sleep(self.settings.poll_interval.min(remaining));
        }

        warn!(
            "Response not received within {} minutes. Exiting.",
            timeout.as_secs() / 60
        );
        self.state = ClientState::TimedOut;
        Ok(None)
    }

    fn poll_once(&mut self) -> Result<Option<ResponseDescriptor>> {
        let submitted = self
            .submitted
            .as_ref()
            .ok_or_else(|| DataLicenseError::InvalidState("no submitted request".into()))?;
        let url = format!("{}content/responses/", self.catalog.url);
        let request = HttpRequest::get(url)
            .with_query("prefix", self.request.session_id.as_str())
            .with_query("requestIdentifier", submitted.identifier.as_str());

        let listing: Listing<Value> = self.session.request(request)?.json_body()?;
        let Some(output) = listing.contains.into_iter().next() else {
            return Ok(None);
        };

        info!(
            "Response listing:\n{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        let key = output
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| DataLicenseError::MalformedResponse("response entry has no key".into()))?
            .to_string();
        let url = format!("{}content/responses/{key}", self.catalog.url);
        Ok(Some(ResponseDescriptor { key, url }))
    }

    /// Stream the artifact, gunzip it and parse it into a frame.
    pub fn download(&mut self) -> Result<DataFrame> {
        self.expect_state(ClientState::DataReady, "download")?;
        let descriptor = self
            .response
            .clone()
            .ok_or_else(|| DataLicenseError::InvalidState("no response descriptor".into()))?;

        let response = self
            .session
            .request(HttpRequest::get(descriptor.url.as_str()).streaming())?;
        let frame = decode_payload(response)?;

        info!("File downloaded: {}", descriptor.key);
        self.state = ClientState::Downloaded;
        Ok(frame)
    }

    /// Poll, then download if anything arrived.
    pub fn listen(&mut self) -> Result<Option<DataFrame>> {
        match self.poll()? {
            Some(_) => self.download().map(Some),
            None => Ok(None),
        }
    }

    fn expect_state(&self, expected: ClientState, op: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(DataLicenseError::InvalidState(format!(
                "{op} requires {expected:?}, client is {:?}",
                self.state
            )))
        }
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| DataLicenseError::MalformedResponse(format!("cannot resolve '{path}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, Method};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    const HOST: &str = "https://api.test";

    /// Session stub: every call goes to the closure, no auth.
    struct FnSession<F>(F);

    impl<F> ApiSession for FnSession<F>
    where
        F: FnMut(HttpRequest) -> Result<HttpResponse>,
    {
        fn request(&mut self, request: HttpRequest) -> Result<HttpResponse> {
            (self.0)(request)
        }
    }

    fn fn_session<F>(f: F) -> FnSession<F>
    where
        F: FnMut(HttpRequest) -> Result<HttpResponse>,
    {
        FnSession(f)
    }

    fn settings(interval_ms: u64, timeout_ms: u64) -> ClientSettings {
        ClientSettings {
            host: HOST.into(),
            poll_interval: Duration::from_millis(interval_ms),
            reply_timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn data_request() -> DataRequest {
        DataRequest::new(
            SessionId::from_raw("pa12345678"),
            "TICKER",
            &["IBM US Equity".to_string()],
            &["TICKER".to_string(), "@@NOTE".to_string()],
        )
    }

    fn catalogs(entries: Value) -> HttpResponse {
        HttpResponse::json(200, &json!({ "contains": entries }))
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    /// A provider that answers catalog, submit, N empty polls, then data.
    fn provider(
        empty_polls: usize,
        poll_calls: std::rc::Rc<std::cell::Cell<usize>>,
    ) -> impl FnMut(HttpRequest) -> Result<HttpResponse> {
        move |req| {
            let url = req.url.as_str();
            if url == "https://api.test/eap/catalogs/" {
                return Ok(catalogs(json!([
                    {"identifier": "111", "subscriptionType": "bulk"},
                    {"identifier": "222", "subscriptionType": "scheduled"},
                ])));
            }
            if url == "https://api.test/eap/catalogs/222/requests/" {
                assert_eq!(req.method, Method::Post);
                return Ok(HttpResponse::json(
                    201,
                    &json!({"request": {"identifier": "r-1"}}),
                )
                .with_header("Location", "/eap/catalogs/222/requests/r-1/"));
            }
            if url == "https://api.test/eap/catalogs/222/content/responses/" {
                let n = poll_calls.get() + 1;
                poll_calls.set(n);
                assert!(req.query.contains(&("prefix".into(), "pa12345678".into())));
                assert!(req.query.contains(&("requestIdentifier".into(), "r-1".into())));
                if n <= empty_polls {
                    return Ok(catalogs(json!([])));
                }
                return Ok(catalogs(json!([
                    {"key": "pa12345678.json", "metadata": {}},
                    {"key": "ignored.json"},
                ])));
            }
            if url == "https://api.test/eap/catalogs/222/content/responses/pa12345678.json" {
                assert!(req.stream);
                return Ok(HttpResponse::new(200, gzip(br#"[{"TICKER": "IBM"}]"#))
                    .with_header("content-encoding", "gzip"));
            }
            panic!("unexpected request {} {}", req.method, url);
        }
    }

    #[test]
    fn settings_from_api_convert_units() {
        let mut api = ApiSettings {
            reply_timeout_min: 45,
            poll_interval_secs: 30,
            ..ApiSettings::default()
        };
        let s = ClientSettings::from_api(&api);
        assert_eq!(s.reply_timeout, Duration::from_secs(45 * 60));
        assert_eq!(s.poll_interval, Duration::from_secs(30));

        api.reply_timeout_min = u64::MAX;
        assert_eq!(
            ClientSettings::from_api(&api).reply_timeout,
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn selects_first_scheduled_catalog() {
        let cat = |id: &str, kind: &str| Catalog {
            id: id.into(),
            subscription_type: kind.into(),
            url: String::new(),
        };
        let list = vec![cat("1", "bulk"), cat("2", "scheduled"), cat("3", "scheduled")];
        assert_eq!(select_scheduled(&list).unwrap().id, "2");
        assert!(select_scheduled(&[cat("1", "bulk")]).is_none());
        assert!(select_scheduled(&[]).is_none());
    }

    #[test]
    fn connect_scopes_client_to_scheduled_catalog() {
        let polls = Default::default();
        let client =
            RequestProtocolClient::connect(fn_session(provider(0, polls)), settings(1, 100), data_request())
                .unwrap();
        assert_eq!(client.catalog().id, "222");
        assert_eq!(client.catalog().url, "https://api.test/eap/catalogs/222/");
        assert_eq!(client.state(), ClientState::CatalogResolved);
    }

    #[test]
    fn missing_scheduled_catalog_is_fatal() {
        let session = fn_session(|_req: HttpRequest| {
            Ok(catalogs(json!([{"identifier": "1", "subscriptionType": "bulk"}])))
        });
        let err = RequestProtocolClient::connect(session, settings(1, 100), data_request())
            .err()
            .unwrap();
        assert!(matches!(err, DataLicenseError::CatalogNotFound { available: 1 }));
    }

    #[test]
    fn submit_captures_location_and_identifier() {
        let polls = Default::default();
        let mut client =
            RequestProtocolClient::connect(fn_session(provider(0, polls)), settings(1, 100), data_request())
                .unwrap();
        let submitted = client.submit().unwrap().clone();
        assert_eq!(submitted.identifier, "r-1");
        assert_eq!(submitted.url, "https://api.test/eap/catalogs/222/requests/r-1/");
        assert_eq!(client.state(), ClientState::RequestSubmitted);

        assert!(matches!(client.submit(), Err(DataLicenseError::InvalidState(_))));
    }

    #[test]
    fn submit_without_location_is_malformed() {
        let session = fn_session(|req: HttpRequest| {
            if req.url.ends_with("/eap/catalogs/") {
                Ok(catalogs(json!([{"identifier": "9", "subscriptionType": "scheduled"}])))
            } else {
                Ok(HttpResponse::json(201, &json!({"request": {"identifier": "r-1"}})))
            }
        });
        let mut client =
            RequestProtocolClient::connect(session, settings(1, 100), data_request()).unwrap();
        assert!(matches!(
            client.submit(),
            Err(DataLicenseError::MalformedResponse(_))
        ));
    }

    #[test]
    fn submit_without_identifier_is_malformed() {
        let session = fn_session(|req: HttpRequest| {
            if req.url.ends_with("/eap/catalogs/") {
                Ok(catalogs(json!([{"identifier": "9", "subscriptionType": "scheduled"}])))
            } else {
                Ok(HttpResponse::json(201, &json!({"status": "accepted"}))
                    .with_header("location", "/eap/catalogs/9/requests/x/"))
            }
        });
        let mut client =
            RequestProtocolClient::connect(session, settings(1, 100), data_request()).unwrap();
        assert!(matches!(
            client.submit(),
            Err(DataLicenseError::MalformedResponse(_))
        ));
    }

    #[test]
    fn outbound_document_omits_placeholders() {
        let session = fn_session(|req: HttpRequest| {
            if req.url.ends_with("/eap/catalogs/") {
                return Ok(catalogs(json!([{"identifier": "9", "subscriptionType": "scheduled"}])));
            }
            let crate::http::RequestBody::Json(doc) = &req.body else {
                panic!("submission must be JSON");
            };
            assert_eq!(doc["fieldList"]["contains"], json!([{"mnemonic": "TICKER"}]));
            assert_eq!(doc["name"], "pa12345678");
            Ok(HttpResponse::json(201, &json!({"request": {"identifier": "r"}}))
                .with_header("location", "/eap/catalogs/9/requests/r/"))
        });
        let mut client =
            RequestProtocolClient::connect(session, settings(1, 100), data_request()).unwrap();
        client.submit().unwrap();
    }

    #[test]
    fn poll_returns_first_descriptor_after_empty_polls() {
        let polls = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut client = RequestProtocolClient::connect(
            fn_session(provider(3, polls.clone())),
            settings(1, 5_000),
            data_request(),
        )
        .unwrap();
        client.submit().unwrap();

        let descriptor = client.poll().unwrap().unwrap();
        assert_eq!(descriptor.key, "pa12345678.json");
        assert_eq!(
            descriptor.url,
            "https://api.test/eap/catalogs/222/content/responses/pa12345678.json"
        );
        assert_eq!(polls.get(), 4);
        assert_eq!(client.state(), ClientState::DataReady);
    }

    #[test]
    fn poll_times_out_on_wall_clock() {
        let polls = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut client = RequestProtocolClient::connect(
            fn_session(provider(usize::MAX, polls.clone())),
            settings(5, 40),
            data_request(),
        )
        .unwrap();
        client.submit().unwrap();

        let started = Instant::now();
        assert!(client.poll().unwrap().is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_millis(1_000), "took {elapsed:?}");
        assert!(polls.get() >= 1);
        assert_eq!(client.state(), ClientState::TimedOut);
        assert!(client.response().is_none());
    }

    #[test]
    fn listen_downloads_payload() {
        let polls = Default::default();
        let mut client =
            RequestProtocolClient::connect(fn_session(provider(1, polls)), settings(1, 5_000), data_request())
                .unwrap();
        client.submit().unwrap();
        let frame = client.listen().unwrap().unwrap();
        assert_eq!(frame.height(), 1);
        assert_eq!(client.state(), ClientState::Downloaded);
    }

    #[test]
    fn operations_out_of_order_are_rejected() {
        let polls = Default::default();
        let mut client =
            RequestProtocolClient::connect(fn_session(provider(0, polls)), settings(1, 100), data_request())
                .unwrap();
        assert!(matches!(client.poll(), Err(DataLicenseError::InvalidState(_))));
        assert!(matches!(client.download(), Err(DataLicenseError::InvalidState(_))));
    }
}
