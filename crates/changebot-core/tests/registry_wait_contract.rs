//! Contract Test: Registry Waits
//!
//! Consumers may mount before or after their provider.
//!
//! Constraints verified:
//! - A wait started before registration resolves on registration
//! - A wait started after registration resolves immediately
//! - Concurrent waits share one pending entry; cancelling one leaves the other
//! - A wait with no provider fails with an error naming the scope
//! - A provider that reconnects under the same scope satisfies earlier waits
//!
//! If this test fails, late-mounting providers strand their consumers.

mod common;

use changebot_core::registry::DEFAULT_WAIT_TIMEOUT;
use changebot_core::updates::now_ms;
use changebot_core::{Error, ProviderController, WidgetConsumer};
use common::*;
use std::time::Duration;

#[tokio::test]
async fn wait_before_provider_connects() {
    let transport = ScriptedTransport::new();
    let deps = deps(&transport);

    let waiter = deps.registry.wait_for_store("late", DEFAULT_WAIT_TIMEOUT);
    let pending = tokio::spawn(waiter.wait());

    let provider = ProviderController::connect(mock_config("late", now_ms()), deps.clone())
        .await
        .unwrap();

    let services = pending.await.unwrap().unwrap();
    assert_eq!(services.config.scope, "late");
    assert_eq!(services.store.updates().len(), provider.store().updates().len());
}

#[tokio::test]
async fn wait_after_provider_connects() {
    let transport = ScriptedTransport::new();
    let deps = deps(&transport);
    let _provider = ProviderController::connect(mock_config("early", now_ms()), deps.clone())
        .await
        .unwrap();

    let waiter = deps.registry.wait_for_store("early", DEFAULT_WAIT_TIMEOUT);
    assert!(waiter.is_ready());
    assert!(waiter.wait().await.is_ok());
}

#[tokio::test]
async fn concurrent_waits_share_and_cancel_independently() {
    let transport = ScriptedTransport::new();
    let deps = deps(&transport);

    let first = deps.registry.wait_for_store("shared", DEFAULT_WAIT_TIMEOUT);
    let second = deps.registry.wait_for_store("shared", DEFAULT_WAIT_TIMEOUT);
    assert_eq!(deps.registry.pending_count(), 1);

    second.cancel();
    let first = tokio::spawn(first.wait());

    let _provider = ProviderController::connect(mock_config("shared", now_ms()), deps.clone())
        .await
        .unwrap();

    assert!(first.await.unwrap().is_ok());
    assert!(matches!(
        second.wait().await,
        Err(Error::WaitCancelled { .. })
    ));
}

#[tokio::test]
async fn missing_provider_times_out_with_scope_name() {
    let transport = ScriptedTransport::new();
    let deps = deps(&transport);

    let err = deps
        .registry
        .wait_for_store("ghost", Duration::from_millis(25))
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoProvider { .. }));
    assert!(err.to_string().contains("ghost"));
    assert_eq!(deps.registry.pending_count(), 0);
}

#[tokio::test]
async fn cancel_after_settling_is_harmless() {
    let transport = ScriptedTransport::new();
    let deps = deps(&transport);
    let _provider = ProviderController::connect(mock_config("s", now_ms()), deps.clone())
        .await
        .unwrap();

    let waiter = deps.registry.wait_for_store("s", DEFAULT_WAIT_TIMEOUT);
    let cancel = waiter.cancel_handle();
    assert!(waiter.wait().await.is_ok());
    cancel.cancel();
    cancel.cancel();
    assert!(deps.registry.has_store("s"));
}

#[tokio::test]
async fn remount_satisfies_pending_wait() {
    let transport = ScriptedTransport::new();
    let deps = deps(&transport);

    let first = ProviderController::connect(mock_config("panel", now_ms()), deps.clone())
        .await
        .unwrap();
    first.disconnect();

    let bus = deps.bus.clone();
    let registry = deps.registry.clone();
    let consumer = tokio::spawn(async move {
        WidgetConsumer::connect_when_ready(bus, &registry, "panel", DEFAULT_WAIT_TIMEOUT).await
    });
    tokio::task::yield_now().await;

    let second = ProviderController::connect(mock_config("panel", now_ms()), deps.clone())
        .await
        .unwrap();

    let consumer = consumer.await.unwrap();
    assert!(!consumer.is_standalone());
    second.disconnect();
}
