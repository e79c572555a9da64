// # HTTP Changelog Transport
//
// This crate provides the reqwest-backed `ChangelogTransport` for the
// Changebot core.
//
// ## Behaviour
//
// - One request per call: no retries, no caching
// - Non-2xx answers become `Error::Status` carrying the canonical reason
//   phrase ("Not Found", "Service Unavailable", ...), which the core folds
//   into the store's error field
// - Connection failures and timeouts become `Error::Http`
// - Bodies that are not JSON become `Error::Json`
//
// Logging the failure and degrading is the core's job; this crate only
// reports what happened.
//
// ## API Reference
//
// - Updates feed: GET `{base}/updates`
// - User tracking: GET / PATCH `{base}/users/{userId}`

use async_trait::async_trait;
use changebot_core::traits::ChangelogTransport;
use changebot_core::{Error, Result};
use serde_json::Value;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("changebot/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the default timeout
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a transport with a custom request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        tracing::debug!("{} answered {}", response.url(), status);
        Err(Error::status(status.as_u16(), text))
    }
}

#[async_trait]
impl ChangelogTransport for HttpTransport {
    async fn get_json(&self, url: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::http(format!("HTTP request failed: {}", e)))?;

        let response = Self::check(response)?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response: {}", e)))?;

        Ok(serde_json::from_str(&body)?)
    }

    async fn patch_json(&self, url: &str, body: &Value) -> Result<()> {
        tracing::debug!("PATCH {}", url);

        let response = self
            .client
            .patch(url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::http(format!("HTTP request failed: {}", e)))?;

        Self::check(response)?;
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_decodes_json_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/widgets/acme/updates"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"publications": []})))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let body = transport
            .get_json(&format!("{}/widgets/acme/updates", mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(body, json!({"publications": []}));
    }

    #[tokio::test]
    async fn non_success_status_carries_reason_phrase() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/widgets/missing/updates"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .get_json(&format!("{}/widgets/missing/updates", mock_server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Status { status: 404, .. }));
        assert_eq!(err.to_string(), "Not Found");
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let err = transport
            .get_json(&format!("{}/updates", mock_server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Json(_)));
    }

    #[tokio::test]
    async fn patch_sends_json_body() {
        let mock_server = MockServer::start().await;
        let body = json!({"last_seen_at": "2024-01-15T10:30:00.000Z"});

        Mock::given(method("PATCH"))
            .and(path("/widgets/acme/users/u1"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        transport
            .patch_json(&format!("{}/widgets/acme/users/u1", mock_server.uri()), &body)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_host_is_an_http_error() {
        let transport = HttpTransport::with_timeout(Duration::from_millis(200)).unwrap();
        let err = transport
            .get_json("http://127.0.0.1:1/updates")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
