//! Minimal embedding example for changebot-core
//!
//! Two providers on separate scopes share one bus and registry. A badge
//! watches the unread count through a change stream, a toast picks its
//! highlight, and opening the panel marks everything as read.
//!
//! The transport here serves canned JSON so the example runs offline.

use async_trait::async_trait;
use changebot_core::scoped::names;
use changebot_core::store::StateKey;
use changebot_core::traits::ChangelogTransport;
use changebot_core::updates::{HighlightTarget, format_timestamp_ms, now_ms};
use changebot_core::{
    Error, HighlightTracker, ProviderConfig, ProviderController, ProviderDeps, Result,
    SafeStorage, WidgetConsumer,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_stream::StreamExt;

const FEED_URL: &str = "http://changelog.local/updates";

/// Transport serving one canned feed
struct CannedTransport {
    feed: Value,
}

#[async_trait]
impl ChangelogTransport for CannedTransport {
    async fn get_json(&self, url: &str) -> Result<Value> {
        if url == FEED_URL {
            Ok(self.feed.clone())
        } else if url.ends_with("/users/demo-user") {
            Ok(json!({"id": "demo-user", "last_seen_at": null}))
        } else {
            Err(Error::status(404, "Not Found"))
        }
    }

    async fn patch_json(&self, url: &str, body: &Value) -> Result<()> {
        tracing::info!("PATCH {} {}", url, body);
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "canned"
    }
}

fn feed(now: i64) -> Value {
    let at = |offset: i64| format_timestamp_ms(now - offset);
    json!({
        "widget": {"title": "Product updates", "subheading": "What shipped this week"},
        "publications": [
            {"id": 3, "title": "Dark mode", "highlight_target": "toast", "published_at": at(60_000), "tags": ["Feature"]},
            {"id": 2, "title": "Faster search", "published_at": at(3_600_000), "tags": [{"id": 7, "name": "Performance", "color": "#10b981"}]},
            {"id": 1, "title": "Welcome", "highlight_target": "banner", "published_at": at(7 * 86_400_000)}
        ]
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let now = now_ms();
    let transport = Arc::new(CannedTransport { feed: feed(now) });
    let deps = ProviderDeps::new(SafeStorage::in_memory(), transport);

    let main_config = ProviderConfig::new("main")
        .with_url(FEED_URL)
        .with_user_id("demo-user");

    // A toast that mounts before its provider waits through the registry
    let late_toast = {
        let bus = deps.bus.clone();
        let registry = deps.registry.clone();
        let timeout = main_config.wait_timeout();
        tokio::spawn(async move {
            WidgetConsumer::connect_when_ready(bus, &registry, "main", timeout).await
        })
    };

    let main = ProviderController::connect(main_config, deps.clone()).await?;
    let docs = ProviderController::connect(
        ProviderConfig::new("docs").with_mock_data(feed(now)),
        deps.clone(),
    )
    .await?;

    main.wait_for_background_sync().await;

    // Pretend the user last looked two hours ago
    main.mark_viewed(Some(now - 2 * 3_600_000)).await;

    let badge = WidgetConsumer::connect(deps.bus.clone(), "main");
    let Some(services) = badge.services() else {
        return Err(Error::Other("provider for scope main did not answer".into()));
    };
    println!("badge: {} unread", badge.new_updates_count());

    let mut counts = services.store.changes(StateKey::NewUpdatesCount);

    let toast = late_toast
        .await
        .map_err(|e| Error::Other(e.to_string()))?;
    if let Some(services) = toast.services() {
        let mut tracker = HighlightTracker::new(HighlightTarget::Toast);
        if let Some(update) = tracker.check_services(services) {
            println!("toast: {}", update.title);
        }
    }

    let panel = WidgetConsumer::connect(deps.bus.clone(), "main");
    panel.dispatch(names::OPEN_DISPLAY, None).await;

    if let Some(value) = counts.next().await {
        println!("badge: {} unread after opening", value.as_count().unwrap_or(0));
    }

    println!(
        "docs scope untouched: open={} last_viewed={:?}",
        docs.store().is_open(),
        docs.store().last_viewed()
    );

    drop(counts);
    main.disconnect();
    docs.disconnect();
    Ok(())
}
