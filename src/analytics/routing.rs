use std::sync::Mutex;

use crate::analytics::api::Analytics;
use crate::analytics::events::PageView;

/// Sends a page view for client-side navigations. The first observed route counts as a change.
#[derive(Debug, Default)]
pub struct RouteTracker {
    last_path: Mutex<Option<String>>,
}

impl RouteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `path` and sends a page view when it differs from the previous observation.
    /// Returns whether a page view was issued.
    pub fn observe(&self, analytics: &Analytics, path: &str, title: Option<&str>) -> bool {
        {
            let mut last_path = self.last_path.lock().unwrap();
            if last_path.as_deref() == Some(path) {
                return false;
            }
            *last_path = Some(path.to_string());
        }

        let mut view = PageView::new().with_path(path);
        view.title = title.map(str::to_string);
        analytics.page(view);
        true
    }

    pub fn last_path(&self) -> Option<String> {
        self.last_path.lock().unwrap().clone()
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::analytics::config::AnalyticsConfig;
    use crate::analytics::gtag::DataLayer;
    use crate::analytics::storage::MemoryStore;
    use crate::platform::{ManualClock, StaticHost};
    use crate::test_support::{RecordingTransport, StaticInjector};

    #[tokio::test(flavor = "current_thread")]
    async fn only_path_changes_emit_page_views() {
        let layer = Arc::new(DataLayer::new());
        let clock = Arc::new(ManualClock::starting_at(0));
        let analytics = Analytics::builder(AnalyticsConfig::new("G-WEDDING"))
            .storage(Arc::new(MemoryStore::new()))
            .host(Arc::new(StaticHost::new().with_title("Ana & Leo")))
            .clock(clock.clone())
            .tag_channel(layer.clone())
            .script_injector(Arc::new(StaticInjector::succeeding()))
            .fallback_transport(Arc::new(RecordingTransport::default()))
            .build()
            .unwrap();
        analytics.consent().grant();
        analytics.init().await;

        let tracker = RouteTracker::new();
        assert!(tracker.observe(&analytics, "/", None));
        clock.advance(5_000);
        assert!(!tracker.observe(&analytics, "/", None));
        assert!(tracker.observe(&analytics, "/gallery", Some("Gallery")));
        assert!(tracker.observe(&analytics, "/", None));

        assert_eq!(tracker.last_path().as_deref(), Some("/"));
        assert_eq!(layer.event_names(), vec!["page_view"; 3]);
    }
}
