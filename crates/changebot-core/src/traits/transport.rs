// # Changelog Transport Trait
//
// Defines the interface for the HTTP calls made against the changelog API.
//
// ## Implementations
//
// - reqwest: `changebot-http` crate
// - Tests: scripted in-memory transports
//
// ## Contract
//
// Transports are single-shot: one request per call, no retries, no caching.
// URL construction and the "log and degrade" policy live in the core
// (`ApiClient`, `ScopedStore`); a transport only reports what happened.

use async_trait::async_trait;

/// Trait for changelog API transports
#[async_trait]
pub trait ChangelogTransport: Send + Sync {
    /// GET a URL and decode the body as JSON
    ///
    /// # Returns
    ///
    /// - `Ok(Value)`: 2xx response with a JSON body
    /// - `Err(Error::Status { .. })`: non-2xx response
    /// - `Err(Error)`: transport or decoding failure
    async fn get_json(&self, url: &str) -> Result<serde_json::Value, crate::Error>;

    /// PATCH a URL with a JSON body
    ///
    /// # Returns
    ///
    /// - `Ok(())`: 2xx response
    /// - `Err(Error::Status { .. })`: non-2xx response
    /// - `Err(Error)`: transport failure
    async fn patch_json(&self, url: &str, body: &serde_json::Value) -> Result<(), crate::Error>;

    /// Get the transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}
