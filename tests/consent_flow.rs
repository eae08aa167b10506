#![cfg(not(target_arch = "wasm32"))]

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use wedding_site_analytics::analytics::error::{script_load_error, AnalyticsResult};
use wedding_site_analytics::analytics::{
    Analytics, AnalyticsConfig, ConsentStatus, DataLayer, FileStore, GtagCommand,
    HttpFallbackTransport, LoadState, PageView, ScriptInjector, ScriptRequest,
};
use wedding_site_analytics::platform::runtime::{block_on, sleep};
use wedding_site_analytics::platform::{DoNotTrackSignals, PageLocation, StaticHost};

struct CountingInjector {
    succeed: bool,
    calls: AtomicUsize,
}

impl CountingInjector {
    fn new(succeed: bool) -> Self {
        Self {
            succeed,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ScriptInjector for CountingInjector {
    async fn inject(&self, _request: &ScriptRequest) -> AnalyticsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(())
        } else {
            Err(script_load_error("blocked"))
        }
    }
}

fn unique_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    std::env::temp_dir().join(format!(
        "wedding-analytics-{name}-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ))
}

fn event_names(layer: &DataLayer) -> Vec<String> {
    layer.event_names()
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(flavor = "current_thread")]
async fn granted_consent_survives_a_restart() {
    let dir = unique_dir("restart");
    let storage = Arc::new(FileStore::new(dir.clone()).unwrap());

    let first_layer = Arc::new(DataLayer::new());
    let first = Analytics::builder(AnalyticsConfig::new("G-WEDDING"))
        .storage(storage.clone())
        .tag_channel(first_layer.clone())
        .script_injector(Arc::new(CountingInjector::new(true)))
        .build()
        .unwrap();
    first.init().await;
    first.track("rsvp_submit", Default::default());
    first.consent().grant();
    settle().await;
    assert_eq!(event_names(&first_layer), vec!["rsvp_submit"]);
    let client_id = first.client_id();

    let second_layer = Arc::new(DataLayer::new());
    let injector = Arc::new(CountingInjector::new(true));
    let second = Analytics::builder(AnalyticsConfig::new("G-WEDDING"))
        .storage(Arc::new(FileStore::new(dir.clone()).unwrap()))
        .tag_channel(second_layer.clone())
        .script_injector(injector.clone())
        .build()
        .unwrap();
    assert_eq!(second.consent().status(), ConsentStatus::Granted);
    second.init().await;

    assert_eq!(second.load_state(), LoadState::Ready);
    assert_eq!(injector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.client_id(), client_id);
    second.page(PageView::new().with_path("/gallery"));
    assert_eq!(event_names(&second_layer), vec!["page_view"]);

    second.consent().reset();
    assert_eq!(first.consent().status(), ConsentStatus::Unset);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(flavor = "current_thread")]
async fn do_not_track_keeps_the_tag_unloaded() {
    let host = Arc::new(
        StaticHost::new().with_location(PageLocation::new("https://ana-and-leo.example", "/")),
    );
    host.set_do_not_track(DoNotTrackSignals {
        window: Some("yes".into()),
        ..Default::default()
    });
    let layer = Arc::new(DataLayer::new());
    let injector = Arc::new(CountingInjector::new(true));
    let analytics = Analytics::builder(AnalyticsConfig::new("G-WEDDING"))
        .storage(Arc::new(
            wedding_site_analytics::analytics::MemoryStore::new(),
        ))
        .host(host)
        .tag_channel(layer.clone())
        .script_injector(injector.clone())
        .build()
        .unwrap();

    analytics.consent().grant();
    analytics.init().await;
    analytics.page(PageView::new());
    settle().await;

    assert_eq!(injector.calls.load(Ordering::SeqCst), 0);
    assert!(layer.commands().is_empty());
    assert_eq!(analytics.queued(), 1);
}

#[test]
fn blocked_tag_sends_events_to_the_collection_endpoint() {
    let Some(server) = panic::catch_unwind(AssertUnwindSafe(MockServer::start)).ok() else {
        eprintln!("Skipping blocked_tag_sends_events_to_the_collection_endpoint: unable to start mock server");
        return;
    };
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/events")
            .json_body_partial(
                json!({
                    "type": "event",
                    "event_name": "rsvp_error",
                    "params": {"reason": "validation"},
                    "env": "production"
                })
                .to_string(),
            );
        then.status(204);
    });

    let layer = Arc::new(DataLayer::new());
    let analytics = Analytics::builder(
        AnalyticsConfig::new("G-WEDDING")
            .with_environment("production")
            .with_fallback_url(server.url("/events")),
    )
    .storage(Arc::new(wedding_site_analytics::analytics::MemoryStore::new()))
    .tag_channel(layer.clone())
    .script_injector(Arc::new(CountingInjector::new(false)))
    .fallback_transport(Arc::new(HttpFallbackTransport::new().unwrap()))
    .build()
    .unwrap();

    block_on(async {
        analytics.consent().grant();
        analytics.init().await;
        let params = json!({"reason": "validation"});
        analytics.track("rsvp_error", params.as_object().cloned().unwrap_or_default());
        for _ in 0..200 {
            if mock.hits_async().await >= 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    });

    mock.assert_hits(1);
    assert_eq!(analytics.load_state(), LoadState::Failed);
    assert!(layer
        .commands()
        .iter()
        .all(|command| !matches!(command, GtagCommand::Event { .. })));
}
