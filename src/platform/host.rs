//! The page hosting the tracker: where it is, what it is called, who is asking and whether
//! the visitor asked not to be tracked.

use std::sync::Mutex;

/// Current page location split into origin (`https://example.com`) and path (`/rsvp?x=1`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLocation {
    pub origin: String,
    pub path: String,
}

impl PageLocation {
    pub fn new(origin: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: path.into(),
        }
    }

    pub fn href(&self) -> String {
        format!("{}{}", self.origin, self.path)
    }
}

impl Default for PageLocation {
    fn default() -> Self {
        Self::new("http://localhost", "/")
    }
}

/// Raw Do-Not-Track values as exposed by `navigator.doNotTrack`, `window.doNotTrack` and
/// `navigator.msDoNotTrack`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DoNotTrackSignals {
    pub navigator: Option<String>,
    pub window: Option<String>,
    pub ms_navigator: Option<String>,
}

impl DoNotTrackSignals {
    /// Signals with `navigator.doNotTrack` set to `"1"`.
    pub fn enabled() -> Self {
        Self {
            navigator: Some("1".into()),
            ..Default::default()
        }
    }

    /// The first non-empty surface decides; `"1"` and `"yes"` mean tracking is refused.
    pub fn is_enabled(&self) -> bool {
        let value = [&self.navigator, &self.window, &self.ms_navigator]
            .into_iter()
            .flatten()
            .find(|value| !value.is_empty());
        matches!(value.map(String::as_str), Some("1") | Some("yes"))
    }
}

pub trait Host: Send + Sync {
    fn location(&self) -> PageLocation;
    fn document_title(&self) -> Option<String>;
    fn user_agent(&self) -> String;
    fn do_not_track(&self) -> DoNotTrackSignals;
}

#[derive(Clone, Debug)]
struct StaticHostState {
    location: PageLocation,
    title: Option<String>,
    user_agent: String,
    do_not_track: DoNotTrackSignals,
}

/// Host whose values are set explicitly. Used natively and in tests.
#[derive(Debug)]
pub struct StaticHost {
    state: Mutex<StaticHostState>,
}

impl Default for StaticHost {
    fn default() -> Self {
        let user_agent = std::env::var("ANALYTICS_USER_AGENT").unwrap_or_else(|_| {
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        });
        Self {
            state: Mutex::new(StaticHostState {
                location: PageLocation::default(),
                title: None,
                user_agent,
                do_not_track: DoNotTrackSignals::default(),
            }),
        }
    }
}

impl StaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(self, location: PageLocation) -> Self {
        self.set_location(location);
        self
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.set_title(Some(title.into()));
        self
    }

    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.state.lock().unwrap().user_agent = user_agent.into();
        self
    }

    pub fn set_location(&self, location: PageLocation) {
        self.state.lock().unwrap().location = location;
    }

    pub fn set_title(&self, title: Option<String>) {
        self.state.lock().unwrap().title = title;
    }

    pub fn set_do_not_track(&self, signals: DoNotTrackSignals) {
        self.state.lock().unwrap().do_not_track = signals;
    }
}

impl Host for StaticHost {
    fn location(&self) -> PageLocation {
        self.state.lock().unwrap().location.clone()
    }

    fn document_title(&self) -> Option<String> {
        self.state.lock().unwrap().title.clone()
    }

    fn user_agent(&self) -> String {
        self.state.lock().unwrap().user_agent.clone()
    }

    fn do_not_track(&self) -> DoNotTrackSignals {
        self.state.lock().unwrap().do_not_track.clone()
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use browser::BrowserHost;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
mod browser {
    use wasm_bindgen::JsValue;

    use super::{DoNotTrackSignals, Host, PageLocation};

    /// Host backed by the live `window`. Every read goes back to the DOM.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct BrowserHost;

    fn read_string(target: &JsValue, key: &str) -> Option<String> {
        js_sys::Reflect::get(target, &JsValue::from_str(key))
            .ok()
            .and_then(|value| value.as_string())
    }

    impl Host for BrowserHost {
        fn location(&self) -> PageLocation {
            let Some(window) = web_sys::window() else {
                return PageLocation::default();
            };
            let location = window.location();
            let origin = location.origin().unwrap_or_default();
            let pathname = location.pathname().unwrap_or_else(|_| "/".to_string());
            let search = location.search().unwrap_or_default();
            PageLocation::new(origin, format!("{pathname}{search}"))
        }

        fn document_title(&self) -> Option<String> {
            web_sys::window()?.document().map(|document| document.title())
        }

        fn user_agent(&self) -> String {
            web_sys::window()
                .and_then(|window| window.navigator().user_agent().ok())
                .unwrap_or_default()
        }

        fn do_not_track(&self) -> DoNotTrackSignals {
            let Some(window) = web_sys::window() else {
                return DoNotTrackSignals::default();
            };
            let navigator: JsValue = window.navigator().into();
            let window: JsValue = window.into();
            DoNotTrackSignals {
                navigator: read_string(&navigator, "doNotTrack"),
                window: read_string(&window, "doNotTrack"),
                ms_navigator: read_string(&navigator, "msDoNotTrack"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn do_not_track_accepts_one_and_yes() {
        assert!(DoNotTrackSignals::enabled().is_enabled());
        let signals = DoNotTrackSignals {
            ms_navigator: Some("yes".into()),
            ..Default::default()
        };
        assert!(signals.is_enabled());
        assert!(!DoNotTrackSignals::default().is_enabled());
    }

    #[test]
    fn first_present_surface_wins() {
        let signals = DoNotTrackSignals {
            navigator: Some("0".into()),
            window: Some("1".into()),
            ms_navigator: None,
        };
        assert!(!signals.is_enabled());

        let signals = DoNotTrackSignals {
            navigator: Some(String::new()),
            window: Some("1".into()),
            ms_navigator: None,
        };
        assert!(signals.is_enabled());
    }

    #[test]
    fn static_host_reports_configured_page() {
        let host = StaticHost::new()
            .with_location(PageLocation::new("https://ana-and-leo.example", "/rsvp?src=mail"))
            .with_title("RSVP");
        assert_eq!(host.location().href(), "https://ana-and-leo.example/rsvp?src=mail");
        assert_eq!(host.document_title().as_deref(), Some("RSVP"));
        host.set_title(None);
        assert_eq!(host.document_title(), None);
    }
}
