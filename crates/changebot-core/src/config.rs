//! Configuration types for the Changebot core
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use tracing::error;

/// Scope used when none is given
pub const DEFAULT_SCOPE: &str = "default";

/// Production API root; slug mode appends `/widgets/{slug}`
pub const DEFAULT_API_BASE: &str = "https://api.changebot.ai/v1";

/// Provider configuration
///
/// One provider instance owns one scope. Exactly one of `mock_data`, `slug`
/// or `url` selects the data source, checked in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Scope this provider answers for
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Hosted changelog slug (slug mode)
    #[serde(default)]
    pub slug: Option<String>,

    /// Arbitrary updates feed URL (url mode)
    #[serde(default)]
    pub url: Option<String>,

    /// Raw publications payload used instead of the network
    #[serde(default)]
    pub mock_data: Option<serde_json::Value>,

    /// Identified user; enables remote last-seen tracking
    #[serde(default)]
    pub user_id: Option<String>,

    /// Extra user data sent along with tracking updates, as a JSON object string
    #[serde(default)]
    pub user_data: Option<String>,

    /// API root used in slug mode
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// How long a remote last-seen sync is trusted (in seconds)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Default timeout for consumers waiting on this scope (in milliseconds)
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl ProviderConfig {
    /// Create a configuration for a scope with defaults
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            slug: None,
            url: None,
            mock_data: None,
            user_id: None,
            user_data: None,
            api_base: default_api_base(),
            cache_ttl_secs: default_cache_ttl_secs(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }

    /// Set the hosted changelog slug
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }

    /// Set the updates feed URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Use a raw payload instead of the network
    pub fn with_mock_data(mut self, data: serde_json::Value) -> Self {
        self.mock_data = Some(data);
        self
    }

    /// Set the identified user
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set extra user data (JSON object string)
    pub fn with_user_data(mut self, user_data: impl Into<String>) -> Self {
        self.user_data = Some(user_data.into());
        self
    }

    /// Override the API root
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.scope.trim().is_empty() {
            return Err(crate::Error::config("Provider scope cannot be empty"));
        }
        if self.api_base.trim().is_empty() {
            return Err(crate::Error::config("API base cannot be empty"));
        }
        if matches!(&self.slug, Some(slug) if slug.trim().is_empty()) {
            return Err(crate::Error::config("Slug cannot be empty when set"));
        }
        if matches!(&self.url, Some(url) if url.trim().is_empty()) {
            return Err(crate::Error::config("URL cannot be empty when set"));
        }
        if self.cache_ttl_secs == 0 {
            return Err(crate::Error::config("Cache TTL must be > 0"));
        }
        Ok(())
    }

    /// Identified user, ignoring blank ids
    pub fn user(&self) -> Option<&str> {
        self.user_id.as_deref().filter(|id| !id.trim().is_empty())
    }

    /// Parse `user_data` into a JSON object
    ///
    /// Malformed or non-object data is logged and treated as absent.
    pub fn parsed_user_data(&self) -> Option<serde_json::Value> {
        let raw = self.user_data.as_deref()?;
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => {
                error!("userData must be a JSON object, ignoring it");
                None
            }
            Err(e) => {
                error!("Failed to parse userData: {}", e);
                None
            }
        }
    }

    /// Cache TTL as milliseconds
    pub fn cache_ttl_ms(&self) -> i64 {
        (self.cache_ttl_secs as i64).saturating_mul(1000)
    }

    /// How long consumers of this scope wait for the provider
    pub fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.wait_timeout_ms)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE)
    }
}

/// Persisted storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// File-backed storage
    File {
        /// Path to the storage file
        path: String,
    },

    /// In-memory storage (not persistent)
    #[default]
    Memory,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    30 * 60
}

fn default_wait_timeout_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: ProviderConfig = serde_json::from_str(r#"{"slug":"acme"}"#).unwrap();
        assert_eq!(config.scope, "default");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.cache_ttl_secs, 1800);
        assert_eq!(config.wait_timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_scope_is_rejected() {
        let config = ProviderConfig::new("  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_user_data_is_ignored() {
        let config = ProviderConfig::new("a").with_user_data("{not json");
        assert!(config.parsed_user_data().is_none());

        let config = ProviderConfig::new("a").with_user_data("[1,2]");
        assert!(config.parsed_user_data().is_none());

        let config = ProviderConfig::new("a").with_user_data(r#"{"plan":"pro"}"#);
        assert_eq!(
            config.parsed_user_data(),
            Some(serde_json::json!({"plan": "pro"}))
        );
    }

    #[test]
    fn blank_user_id_is_anonymous() {
        let config = ProviderConfig::new("a").with_user_id("");
        assert!(config.user().is_none());
    }

    #[test]
    fn storage_config_tagged() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"type":"file","path":"/tmp/x.json"}"#).unwrap();
        assert!(matches!(config, StorageConfig::File { .. }));
        let config: StorageConfig = serde_json::from_str(r#"{"type":"memory"}"#).unwrap();
        assert!(matches!(config, StorageConfig::Memory));
    }
}
