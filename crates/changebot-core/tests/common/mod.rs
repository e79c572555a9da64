//! Test doubles and common utilities for contract tests
//!
//! The scripted transport answers GETs from a URL → body table, can be told
//! to fail per URL or entirely, and records every call it sees.

#![allow(dead_code)]

use async_trait::async_trait;
use changebot_core::error::{Error, Result};
use changebot_core::traits::ChangelogTransport;
use changebot_core::updates::format_timestamp_ms;
use changebot_core::{ProviderConfig, ProviderDeps, SafeStorage};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const API_BASE: &str = "https://api.test/v1";
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// One recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub body: Option<Value>,
}

/// In-memory transport with scripted responses
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Value>>,
    statuses: Mutex<HashMap<String, (u16, &'static str)>>,
    calls: Mutex<Vec<Call>>,
    offline: AtomicBool,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer GETs of `url` with `body`
    pub fn respond(&self, url: impl Into<String>, body: Value) {
        self.routes.lock().unwrap().insert(url.into(), body);
    }

    /// Answer every call to `url` with a non-2xx status
    pub fn fail_with_status(&self, url: impl Into<String>, status: u16, text: &'static str) {
        self.statuses.lock().unwrap().insert(url.into(), (status, text));
    }

    /// Clear a scripted status failure
    pub fn recover(&self, url: &str) {
        self.statuses.lock().unwrap().remove(url);
    }

    /// Fail every call at the connection level
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.method == "GET" && call.url == url)
            .count()
    }

    pub fn patches(&self) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.method == "PATCH")
            .map(|call| (call.url.clone(), call.body.clone().unwrap_or(Value::Null)))
            .collect()
    }

    fn check(&self, url: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::http(format!("connection refused: {}", url)));
        }
        if let Some((status, text)) = self.statuses.lock().unwrap().get(url) {
            return Err(Error::status(*status, *text));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangelogTransport for ScriptedTransport {
    async fn get_json(&self, url: &str) -> Result<Value> {
        self.calls.lock().unwrap().push(Call {
            method: "GET",
            url: url.to_string(),
            body: None,
        });
        self.check(url)?;
        self.routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::status(404, "Not Found"))
    }

    async fn patch_json(&self, url: &str, body: &Value) -> Result<()> {
        self.calls.lock().unwrap().push(Call {
            method: "PATCH",
            url: url.to_string(),
            body: Some(body.clone()),
        });
        self.check(url)
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

/// Deps with fresh bus, registry and in-memory storage
pub fn deps(transport: &Arc<ScriptedTransport>) -> ProviderDeps {
    ProviderDeps::new(SafeStorage::in_memory(), transport.clone())
}

pub fn iso(ms: i64) -> String {
    format_timestamp_ms(ms).unwrap()
}

/// Two plain updates and one banner, one toast
pub fn sample_payload(now: i64) -> Value {
    json!({
        "widget": {"title": "What's new", "slug": "acme"},
        "publications": [
            {"id": 4, "title": "Toast", "highlight_target": "toast", "published_at": iso(now - 1000)},
            {"id": 3, "title": "Fresh", "published_at": iso(now - 2000), "tags": ["Feature"]},
            {"id": 2, "title": "Banner", "highlight_target": "banner", "published_at": iso(now - 3 * DAY_MS)},
            {"id": 1, "title": "Old", "published_at": iso(now - 10 * DAY_MS)}
        ]
    })
}

pub fn updates_url(slug: &str) -> String {
    format!("{}/widgets/{}/updates", API_BASE, slug)
}

pub fn user_url(slug: &str, user: &str) -> String {
    format!("{}/widgets/{}/users/{}", API_BASE, slug, user)
}

/// Slug-mode config against the test API
pub fn slug_config(scope: &str, slug: &str) -> ProviderConfig {
    ProviderConfig::new(scope)
        .with_slug(slug)
        .with_api_base(API_BASE)
}

/// Mock-data config
pub fn mock_config(scope: &str, now: i64) -> ProviderConfig {
    ProviderConfig::new(scope).with_mock_data(sample_payload(now))
}
