//! Changelog API client
//!
//! Thin facade over a [`ChangelogTransport`] for the three endpoints the
//! provider uses:
//!
//! - `GET {base}/updates`
//! - `GET {base}/users/{userId}`
//! - `PATCH {base}/users/{userId}` with `{last_seen_at, data?}`
//!
//! `{base}` is `{api_base}/widgets/{slug}` in slug mode, or the caller's URL
//! in url mode. Every method logs failures as warnings and returns `None` or
//! `false` instead of an error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::traits::ChangelogTransport;
use crate::updates::format_timestamp_ms;

/// Where a provider's data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Hosted changelog under the API root
    Slug {
        /// API root, e.g. `https://api.changebot.ai/v1`
        api_base: String,
        /// Changelog slug
        slug: String,
    },
    /// Caller-supplied updates feed URL
    Url(String),
}

impl Endpoint {
    /// Pick the endpoint from a slug or a URL; slug wins
    pub fn resolve(api_base: &str, slug: Option<&str>, url: Option<&str>) -> Result<Self> {
        match (slug.filter(|s| !s.is_empty()), url.filter(|u| !u.is_empty())) {
            (Some(slug), _) => Ok(Endpoint::Slug {
                api_base: api_base.trim_end_matches('/').to_string(),
                slug: slug.to_string(),
            }),
            (None, Some(url)) => Ok(Endpoint::Url(url.to_string())),
            (None, None) => Err(Error::invalid_input("Either slug or url must be provided")),
        }
    }

    /// Base for user-tracking routes
    ///
    /// In url mode a trailing `/updates` segment is stripped so the feed URL
    /// and the tracking routes share one base.
    pub fn base(&self) -> String {
        match self {
            Endpoint::Slug { api_base, slug } => {
                format!("{}/widgets/{}", api_base, encode_path_segment(slug))
            }
            Endpoint::Url(url) => {
                let trimmed = url.trim_end_matches('/');
                trimmed
                    .strip_suffix("/updates")
                    .unwrap_or(trimmed)
                    .to_string()
            }
        }
    }

    /// URL the updates feed is fetched from
    pub fn updates_url(&self) -> String {
        match self {
            Endpoint::Slug { .. } => format!("{}/updates", self.base()),
            Endpoint::Url(url) => url.clone(),
        }
    }

    /// URL of one user's tracking record
    pub fn user_url(&self, user_id: &str) -> String {
        format!("{}/users/{}", self.base(), encode_path_segment(user_id))
    }
}

/// Remote user-tracking record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTracking {
    /// User id as the server reports it
    #[serde(default)]
    pub id: Value,
    /// ISO-8601; `None` when the server has never seen this user
    #[serde(default)]
    pub last_seen_at: Option<String>,
}

/// Changelog API client
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn ChangelogTransport>,
    endpoint: Endpoint,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("transport", &self.transport.transport_name())
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl ApiClient {
    /// Create a client for an endpoint
    pub fn new(transport: Arc<dyn ChangelogTransport>, endpoint: Endpoint) -> Self {
        Self {
            transport,
            endpoint,
        }
    }

    /// The endpoint this client talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Fetch the raw updates payload
    pub async fn fetch_updates(&self) -> Option<Value> {
        let url = self.endpoint.updates_url();
        match self.transport.get_json(&url).await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("Failed to fetch updates from {}: {}", url, e);
                None
            }
        }
    }

    /// Fetch a user's tracking record
    pub async fn fetch_user_tracking(&self, user_id: &str) -> Option<UserTracking> {
        let url = self.endpoint.user_url(user_id);
        let body = match self.transport.get_json(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to fetch user tracking for {}: {}", user_id, e);
                return None;
            }
        };
        match serde_json::from_value::<UserTracking>(body) {
            Ok(tracking) => Some(tracking),
            Err(e) => {
                warn!("Malformed user tracking response for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Record that a user has seen everything up to `last_seen_ms`
    pub async fn update_user_tracking(
        &self,
        user_id: &str,
        last_seen_ms: i64,
        data: Option<&Value>,
    ) -> bool {
        let Some(last_seen_at) = format_timestamp_ms(last_seen_ms) else {
            warn!("Refusing to send out-of-range last_seen_at {}", last_seen_ms);
            return false;
        };

        let mut body = serde_json::json!({ "last_seen_at": last_seen_at });
        if let Some(data) = data {
            body["data"] = data.clone();
        }

        let url = self.endpoint.user_url(user_id);
        match self.transport.patch_json(&url, &body).await {
            Ok(()) => {
                debug!("Updated user tracking for {}", user_id);
                true
            }
            Err(e) => {
                warn!("Failed to update user tracking for {}: {}", user_id, e);
                false
            }
        }
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_endpoint_urls() {
        let endpoint = Endpoint::resolve("https://api.changebot.ai/v1/", Some("acme"), None).unwrap();
        assert_eq!(
            endpoint.updates_url(),
            "https://api.changebot.ai/v1/widgets/acme/updates"
        );
        assert_eq!(
            endpoint.user_url("user 1"),
            "https://api.changebot.ai/v1/widgets/acme/users/user%201"
        );
    }

    #[test]
    fn url_endpoint_uses_raw_feed_url() {
        let endpoint =
            Endpoint::resolve("https://ignored", None, Some("http://localhost:3000/updates")).unwrap();
        assert_eq!(endpoint.updates_url(), "http://localhost:3000/updates");
        assert_eq!(endpoint.user_url("u1"), "http://localhost:3000/users/u1");
    }

    #[test]
    fn slug_wins_over_url() {
        let endpoint = Endpoint::resolve("https://api", Some("acme"), Some("http://x")).unwrap();
        assert!(matches!(endpoint, Endpoint::Slug { .. }));
    }

    #[test]
    fn neither_slug_nor_url_is_an_error() {
        assert!(Endpoint::resolve("https://api", None, None).is_err());
        assert!(Endpoint::resolve("https://api", Some(""), Some("")).is_err());
    }

    #[test]
    fn tracking_record_accepts_null_last_seen() {
        let tracking: UserTracking =
            serde_json::from_value(serde_json::json!({"id": "u1", "last_seen_at": null})).unwrap();
        assert!(tracking.last_seen_at.is_none());
    }
}
