//! Walks through the consent flow offline: events issued before consent are queued, granting
//! consent loads the tag and flushes them in order.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wedding_site_analytics::analytics::error::AnalyticsResult;
use wedding_site_analytics::analytics::{
    Analytics, AnalyticsConfig, DataLayer, MemoryStore, PageView, ScriptInjector, ScriptRequest,
};
use wedding_site_analytics::platform::{PageLocation, StaticHost};

/// Pretends the tag script loaded without touching the network.
struct OfflineInjector;

#[async_trait]
impl ScriptInjector for OfflineInjector {
    async fn inject(&self, request: &ScriptRequest) -> AnalyticsResult<()> {
        println!("would inject {}", request.src);
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let layer = Arc::new(DataLayer::new());
    let host = StaticHost::new()
        .with_location(PageLocation::new("https://ana-and-leo.example", "/"))
        .with_title("Ana & Leo");

    let analytics = Analytics::builder(AnalyticsConfig::new("G-DEMO123"))
        .storage(Arc::new(MemoryStore::new()))
        .host(Arc::new(host))
        .tag_channel(layer.clone())
        .script_injector(Arc::new(OfflineInjector))
        .build()?;

    analytics.init().await;
    analytics.page(PageView::new());
    let params = json!({"section": "hero", "variant": "primary"});
    analytics.track("cta_click", params.as_object().cloned().unwrap_or_default());
    println!("queued before consent: {}", analytics.queued());

    analytics.consent().grant();
    // Activation runs on a detached task; give it a few turns.
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    println!("queued after consent: {}", analytics.queued());
    for command in layer.commands() {
        println!("{command}");
    }

    Ok(())
}
