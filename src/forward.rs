//! Replay of inbound events against the local endpoint.
//!
//! Each accepted event becomes exactly one HTTP request. Failures are
//! returned as [`ForwardError`] for the relay to report; nothing here
//! retries.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Request, StatusCode};
use url::Url;

use crate::event::InboundEvent;

/// Headers the HTTP client derives from the target URL and body.
/// Copying the captured values would conflict with the replayed request.
fn is_transport_header(name: &HeaderName) -> bool {
    *name == header::HOST
        || *name == header::CONTENT_LENGTH
        || *name == header::TRANSFER_ENCODING
        || *name == header::CONNECTION
}

/// Why a single replay was dropped.
#[derive(Debug)]
pub enum ForwardError {
    /// The configured endpoint is not an absolute URL.
    InvalidUrl {
        /// Endpoint as configured.
        endpoint: String,
        /// Parser error.
        source: url::ParseError,
    },
    /// The event body could not be encoded as JSON.
    Body(serde_json::Error),
    /// The event carried a method that is not a valid HTTP token.
    InvalidMethod(String),
    /// A captured header name or value is not valid HTTP.
    InvalidHeader {
        /// Offending header name.
        name: String,
    },
    /// The request was built but the exchange failed.
    Transport(reqwest::Error),
}

impl fmt::Display for ForwardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardError::InvalidUrl { endpoint, source } => {
                write!(f, "invalid endpoint URL {endpoint:?}: {source}")
            }
            ForwardError::Body(e) => write!(f, "could not encode body as JSON: {e}"),
            ForwardError::InvalidMethod(method) => write!(f, "invalid HTTP method {method:?}"),
            ForwardError::InvalidHeader { name } => write!(f, "invalid header {name:?}"),
            ForwardError::Transport(e) => write!(f, "request failed: {e}"),
        }
    }
}

impl std::error::Error for ForwardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForwardError::InvalidUrl { source, .. } => Some(source),
            ForwardError::Body(e) => Some(e),
            ForwardError::Transport(e) => Some(e),
            ForwardError::InvalidMethod(_) | ForwardError::InvalidHeader { .. } => None,
        }
    }
}

/// Merge `query` into the query string of `url`.
///
/// Existing parameters keep their position. A key present in `query`
/// replaces every existing value for that key with the event's value;
/// keys new to the URL are appended in name order. An empty `query`
/// leaves the URL untouched.
pub fn merge_query(url: &mut Url, query: &HashMap<String, String>) {
    if query.is_empty() {
        return;
    }

    let existing: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut applied: HashSet<&str> = HashSet::new();
    let mut merged: Vec<(&str, &str)> = Vec::with_capacity(existing.len() + query.len());

    for (key, value) in &existing {
        match query.get_key_value(key.as_str()) {
            Some((event_key, event_value)) => {
                if applied.insert(event_key.as_str()) {
                    merged.push((event_key.as_str(), event_value.as_str()));
                }
            }
            None => merged.push((key.as_str(), value.as_str())),
        }
    }

    let mut added: Vec<(&str, &str)> = query
        .iter()
        .filter(|(key, _)| !applied.contains(key.as_str()))
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    added.sort_unstable();
    merged.extend(added);

    url.query_pairs_mut().clear().extend_pairs(merged);
}

/// Replays events as HTTP requests with a single shared client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    /// Build a forwarder with default client settings.
    ///
    /// `timeout` bounds each replay end to end; `None` keeps the client
    /// default of waiting indefinitely.
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;
        Ok(Self { client })
    }

    /// Build the replay request for `event` without sending it.
    pub fn build_request(
        &self,
        endpoint: &str,
        event: &InboundEvent,
    ) -> Result<Request, ForwardError> {
        let mut url = Url::parse(endpoint).map_err(|source| ForwardError::InvalidUrl {
            endpoint: endpoint.to_string(),
            source,
        })?;
        merge_query(&mut url, &event.query);

        let body = serde_json::to_vec(&event.body).map_err(ForwardError::Body)?;

        let method = if event.method.is_empty() {
            Method::GET
        } else {
            Method::from_bytes(event.method.as_bytes())
                .map_err(|_| ForwardError::InvalidMethod(event.method.clone()))?
        };

        let mut headers = HeaderMap::with_capacity(event.headers.len() + 1);
        for (name, value) in &event.headers {
            let invalid = || ForwardError::InvalidHeader { name: name.clone() };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            if is_transport_header(&header_name) {
                continue;
            }
            let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            headers.insert(header_name, header_value);
        }
        // The body is JSON by construction, whatever the capture said.
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let mut request = Request::new(method, url);
        *request.headers_mut() = headers;
        *request.body_mut() = Some(body.into());
        Ok(request)
    }

    /// Replay `event` against `endpoint` once and return the response status.
    pub async fn forward(
        &self,
        endpoint: &str,
        event: &InboundEvent,
    ) -> Result<StatusCode, ForwardError> {
        let request = self.build_request(endpoint, event)?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(ForwardError::Transport)?;
        Ok(response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn event(method: &str) -> InboundEvent {
        InboundEvent {
            id: "abc".to_string(),
            method: method.to_string(),
            ..Default::default()
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn body_json(request: &Request) -> serde_json::Value {
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_merge_query_event_wins_on_collision() {
        let mut url = Url::parse("https://x/y?z=1").unwrap();
        merge_query(&mut url, &query(&[("z", "2"), ("w", "3")]));
        assert_eq!(url.as_str(), "https://x/y?z=2&w=3");
    }

    #[test]
    fn test_merge_query_preserves_unrelated_base_params() {
        let mut url = Url::parse("http://localhost/hook?a=1&b=2").unwrap();
        merge_query(&mut url, &query(&[("b", "9")]));
        assert_eq!(url.query(), Some("a=1&b=9"));
    }

    #[test]
    fn test_merge_query_collapses_repeated_base_key() {
        let mut url = Url::parse("http://localhost/hook?t=1&t=2&u=3").unwrap();
        merge_query(&mut url, &query(&[("t", "x")]));
        assert_eq!(url.query(), Some("t=x&u=3"));
    }

    #[test]
    fn test_merge_query_appends_new_keys_sorted() {
        let mut url = Url::parse("http://localhost/hook").unwrap();
        merge_query(&mut url, &query(&[("c", "3"), ("a", "1"), ("b", "2")]));
        assert_eq!(url.query(), Some("a=1&b=2&c=3"));
    }

    #[test]
    fn test_merge_query_empty_leaves_url_untouched() {
        let mut url = Url::parse("http://localhost/hook?keep=%20me").unwrap();
        merge_query(&mut url, &HashMap::new());
        assert_eq!(url.as_str(), "http://localhost/hook?keep=%20me");
    }

    #[test]
    fn test_merge_query_encodes_values() {
        let mut url = Url::parse("http://localhost/hook").unwrap();
        merge_query(&mut url, &query(&[("q", "a b&c")]));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("q".to_string(), "a b&c".to_string())]);
    }

    #[test]
    fn test_build_request_forces_json_content_type() {
        let forwarder = Forwarder::new(None).unwrap();
        let mut ev = event("POST");
        ev.headers = query(&[("Content-Type", "text/plain"), ("X-Test", "1")]);

        let request = forwarder.build_request("http://localhost:9000/hook", &ev).unwrap();

        let content_types: Vec<_> = request.headers().get_all(header::CONTENT_TYPE).iter().collect();
        assert_eq!(content_types, vec!["application/json"]);
        assert_eq!(request.headers()["x-test"], "1");
    }

    #[test]
    fn test_build_request_skips_transport_headers() {
        let forwarder = Forwarder::new(None).unwrap();
        let mut ev = event("POST");
        ev.headers = query(&[
            ("Host", "webhookinspector.com"),
            ("Content-Length", "999"),
            ("X-Keep", "yes"),
        ]);

        let request = forwarder.build_request("http://localhost:9000/hook", &ev).unwrap();

        assert!(request.headers().get(header::HOST).is_none());
        assert!(request.headers().get(header::CONTENT_LENGTH).is_none());
        assert_eq!(request.headers()["x-keep"], "yes");
    }

    #[test]
    fn test_build_request_body_round_trips() {
        let forwarder = Forwarder::new(None).unwrap();
        let mut ev = event("PUT");
        ev.body = serde_json::json!({
            "nested": {"list": [1, 2.5, "three", null, false]},
            "unicode": "héllo ✓",
            "empty": {}
        });

        let request = forwarder.build_request("http://localhost/", &ev).unwrap();

        assert_eq!(body_json(&request), ev.body);
        assert_eq!(request.method(), &Method::PUT);
    }

    #[test]
    fn test_build_request_missing_body_sends_null() {
        let forwarder = Forwarder::new(None).unwrap();
        let request = forwarder.build_request("http://localhost/", &event("POST")).unwrap();
        assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&b"null"[..]));
    }

    #[test]
    fn test_build_request_empty_method_defaults_to_get() {
        let forwarder = Forwarder::new(None).unwrap();
        let request = forwarder.build_request("http://localhost/", &event("")).unwrap();
        assert_eq!(request.method(), &Method::GET);
    }

    #[test]
    fn test_build_request_rejects_bad_endpoint() {
        let forwarder = Forwarder::new(None).unwrap();
        let err = forwarder.build_request("not a url", &event("POST")).unwrap_err();
        assert!(matches!(err, ForwardError::InvalidUrl { .. }));
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn test_build_request_rejects_bad_method() {
        let forwarder = Forwarder::new(None).unwrap();
        let err = forwarder
            .build_request("http://localhost/", &event("PO ST"))
            .unwrap_err();
        assert!(matches!(err, ForwardError::InvalidMethod(_)));
    }

    #[test]
    fn test_build_request_rejects_bad_header() {
        let forwarder = Forwarder::new(None).unwrap();
        let mut ev = event("POST");
        ev.headers = query(&[("X-Bad", "line\nbreak")]);
        let err = forwarder.build_request("http://localhost/", &ev).unwrap_err();
        assert!(matches!(err, ForwardError::InvalidHeader { ref name } if name == "X-Bad"));
    }

    #[tokio::test]
    async fn test_forward_delivers_replay() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::query_param("q", "1"))
            .and(matchers::header("X-Test", "1"))
            .and(matchers::header("Content-Type", "application/json"))
            .and(matchers::body_json(serde_json::json!({"k": "v"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let forwarder = Forwarder::new(None).unwrap();
        let mut ev = event("POST");
        ev.headers = query(&[("X-Test", "1")]);
        ev.query = query(&[("q", "1")]);
        ev.body = serde_json::json!({"k": "v"});

        let status = forwarder
            .forward(&format!("{}/hook", mock_server.uri()), &ev)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_forward_reports_error_status_without_failing() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let forwarder = Forwarder::new(None).unwrap();
        let status = forwarder
            .forward(&mock_server.uri(), &event("POST"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_forward_transport_failure() {
        let forwarder = Forwarder::new(Some(Duration::from_secs(2))).unwrap();
        let err = forwarder
            .forward("http://127.0.0.1:1/hook", &event("POST"))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::Transport(_)));
    }

    #[tokio::test]
    async fn test_forward_timeout_applies() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let forwarder = Forwarder::new(Some(Duration::from_millis(100))).unwrap();
        let err = forwarder
            .forward(&mock_server.uri(), &event("POST"))
            .await
            .unwrap_err();
        match err {
            ForwardError::Transport(e) => assert!(e.is_timeout()),
            other => panic!("expected transport timeout, got {other}"),
        }
    }
}
