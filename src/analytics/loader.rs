//! One-shot loader for the GA4 tag script.
//!
//! Concurrent callers share a single in-flight load. A failed load clears that future so the
//! next trigger starts over; a successful one is never repeated.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::{FutureExt, Shared};
use url::Url;

use crate::analytics::config::AnalyticsConfig;
use crate::analytics::constants::GTAG_SCRIPT_URL;
use crate::analytics::diagnostics::{DiagnosticKind, Diagnostics};
use crate::analytics::error::{invalid_argument, script_load_error, AnalyticsResult};
use crate::analytics::gtag::{GtagCommand, TagChannel};
use crate::platform::runtime::{with_timeout, TimedOut};
use crate::platform::Clock;

/// The script element to inject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptRequest {
    pub src: String,
    pub nonce: Option<String>,
    pub is_async: bool,
    pub referrer_policy: &'static str,
}

impl ScriptRequest {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            nonce: None,
            is_async: true,
            referrer_policy: "origin",
        }
    }

    /// `https://www.googletagmanager.com/gtag/js?id=<id>` with the id URL-encoded.
    pub fn for_measurement_id(measurement_id: &str, nonce: Option<&str>) -> AnalyticsResult<Self> {
        let measurement_id = measurement_id.trim();
        if measurement_id.is_empty() {
            return Err(invalid_argument("measurement id must not be empty"));
        }
        let url = Url::parse_with_params(GTAG_SCRIPT_URL, [("id", measurement_id)])
            .map_err(|err| invalid_argument(format!("invalid tag script URL: {err}")))?;
        let mut request = Self::new(url.to_string());
        request.nonce = nonce.map(str::to_string);
        Ok(request)
    }
}

/// Places the tag script on the page and resolves once it has loaded.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ScriptInjector: Send + Sync {
    async fn inject(&self, request: &ScriptRequest) -> AnalyticsResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed,
}

#[cfg(not(target_arch = "wasm32"))]
type LoadFuture = futures::future::BoxFuture<'static, AnalyticsResult<()>>;
#[cfg(target_arch = "wasm32")]
type LoadFuture = futures::future::LocalBoxFuture<'static, AnalyticsResult<()>>;

#[cfg(not(target_arch = "wasm32"))]
fn into_load_future<F>(future: F) -> LoadFuture
where
    F: std::future::Future<Output = AnalyticsResult<()>> + Send + 'static,
{
    future.boxed()
}

#[cfg(target_arch = "wasm32")]
fn into_load_future<F>(future: F) -> LoadFuture
where
    F: std::future::Future<Output = AnalyticsResult<()>> + 'static,
{
    future.boxed_local()
}

#[derive(Default)]
struct LoaderStatus {
    pending: Option<Shared<LoadFuture>>,
    failed: bool,
    attempts: u32,
}

struct LoaderInner {
    config: AnalyticsConfig,
    tag: Arc<dyn TagChannel>,
    injector: Arc<dyn ScriptInjector>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<Diagnostics>,
    ready: AtomicBool,
    status: Mutex<LoaderStatus>,
}

impl LoaderInner {
    fn push(&self, command: GtagCommand) {
        if let Err(err) = self.tag.command(&command) {
            self.diagnostics.report(DiagnosticKind::SendFailure, &err);
        }
    }
}

#[derive(Clone)]
pub struct ScriptLoader {
    inner: Arc<LoaderInner>,
}

impl fmt::Debug for ScriptLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptLoader")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl ScriptLoader {
    pub fn new(
        config: AnalyticsConfig,
        tag: Arc<dyn TagChannel>,
        injector: Arc<dyn ScriptInjector>,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                config,
                tag,
                injector,
                clock,
                diagnostics,
                ready: AtomicBool::new(false),
                status: Mutex::new(LoaderStatus::default()),
            }),
        }
    }

    /// Loads the tag script unless it already has. Callers arriving while a load is in flight
    /// await that same load.
    pub async fn load_once(&self) -> AnalyticsResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        let pending = self.pending_or_start();
        pending.await
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LoadState {
        if self.is_ready() {
            return LoadState::Ready;
        }
        let status = self.inner.status.lock().unwrap();
        if status.pending.is_some() {
            LoadState::Loading
        } else if status.failed {
            LoadState::Failed
        } else {
            LoadState::Idle
        }
    }

    /// Number of loads started so far.
    pub fn attempts(&self) -> u32 {
        self.inner.status.lock().unwrap().attempts
    }

    fn pending_or_start(&self) -> Shared<LoadFuture> {
        let mut status = self.inner.status.lock().unwrap();
        if let Some(pending) = status.pending.as_ref() {
            return pending.clone();
        }
        status.failed = false;
        status.attempts += 1;
        let pending = self.start().shared();
        status.pending = Some(pending.clone());
        pending
    }

    fn start(&self) -> LoadFuture {
        let inner = Arc::clone(&self.inner);

        inner.tag.install_stub();
        inner.push(GtagCommand::Js {
            timestamp_ms: inner.clock.now_millis() as i64,
        });
        inner.push(GtagCommand::strict_consent_defaults());
        let request =
            ScriptRequest::for_measurement_id(inner.config.measurement_id(), inner.config.nonce());

        into_load_future(async move {
            let outcome = match request {
                Ok(request) => {
                    let timeout = inner.config.load_timeout();
                    match with_timeout(inner.injector.inject(&request), timeout).await {
                        Ok(result) => result,
                        Err(TimedOut) => Err(script_load_error(format!(
                            "timed out after {}ms loading {}",
                            timeout.as_millis(),
                            request.src
                        ))),
                    }
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(()) => {
                    inner.push(GtagCommand::config_without_page_views(
                        inner.config.measurement_id(),
                    ));
                    inner.ready.store(true, Ordering::SeqCst);
                    inner.status.lock().unwrap().pending = None;
                    inner.diagnostics.note("gtag script loaded");
                    Ok(())
                }
                Err(err) => {
                    {
                        let mut status = inner.status.lock().unwrap();
                        status.pending = None;
                        status.failed = true;
                    }
                    inner.diagnostics.report(DiagnosticKind::LoadFailure, &err);
                    Err(err)
                }
            }
        })
    }
}

pub use probe::HttpScriptProbe;

mod probe {
    use std::collections::HashSet;
    use std::sync::Mutex;
    #[cfg(not(target_arch = "wasm32"))]
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Client;

    use super::{ScriptInjector, ScriptRequest};
    use crate::analytics::error::{internal_error, script_load_error, AnalyticsResult};

    /// Stand-in for a script tag outside the browser DOM: fetches the source once and treats a
    /// successful response as a completed load.
    #[derive(Debug)]
    pub struct HttpScriptProbe {
        client: Client,
        loaded: Mutex<HashSet<String>>,
    }

    impl HttpScriptProbe {
        pub fn new() -> AnalyticsResult<Self> {
            let builder = Client::builder();
            #[cfg(not(target_arch = "wasm32"))]
            let builder = builder.timeout(Duration::from_secs(30));
            let client = builder
                .build()
                .map_err(|err| internal_error(format!("failed to build HTTP client: {err}")))?;
            Ok(Self {
                client,
                loaded: Mutex::new(HashSet::new()),
            })
        }
    }

    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    impl ScriptInjector for HttpScriptProbe {
        async fn inject(&self, request: &ScriptRequest) -> AnalyticsResult<()> {
            if self.loaded.lock().unwrap().contains(&request.src) {
                return Ok(());
            }

            let response = self
                .client
                .get(&request.src)
                .header("Referrer-Policy", request.referrer_policy)
                .send()
                .await
                .map_err(|err| script_load_error(format!("failed to fetch tag script: {err}")))?;
            let status = response.status();
            if !status.is_success() {
                return Err(script_load_error(format!(
                    "tag script request failed with status {status}"
                )));
            }

            self.loaded.lock().unwrap().insert(request.src.clone());
            Ok(())
        }
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use dom::DomScriptInjector;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
mod dom {
    use std::cell::RefCell;
    use std::rc::Rc;

    use async_trait::async_trait;
    use futures::channel::oneshot;
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    use web_sys::{Document, HtmlScriptElement};

    use super::{ScriptInjector, ScriptRequest};
    use crate::analytics::error::{internal_error, script_load_error, AnalyticsResult};

    const LOADED_ATTRIBUTE: &str = "data-loaded";

    /// Appends an async `<script>` to `document.head`, reusing an existing element with the
    /// same source.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct DomScriptInjector;

    fn document() -> AnalyticsResult<Document> {
        web_sys::window()
            .and_then(|window| window.document())
            .ok_or_else(|| internal_error("document is not available"))
    }

    fn find_existing(document: &Document, src: &str) -> Option<HtmlScriptElement> {
        let scripts = document.get_elements_by_tag_name("script");
        (0..scripts.length())
            .filter_map(|index| scripts.item(index))
            .filter_map(|element| element.dyn_into::<HtmlScriptElement>().ok())
            .find(|script| script.src() == src)
    }

    async fn wait_for_load(script: &HtmlScriptElement, src: &str) -> AnalyticsResult<()> {
        let (sender, receiver) = oneshot::channel::<AnalyticsResult<()>>();
        let sender = Rc::new(RefCell::new(Some(sender)));

        let on_load = {
            let sender = Rc::clone(&sender);
            let script = script.clone();
            Closure::<dyn FnMut(web_sys::Event)>::new(move |_event| {
                let _ = script.set_attribute(LOADED_ATTRIBUTE, "true");
                if let Some(sender) = sender.borrow_mut().take() {
                    let _ = sender.send(Ok(()));
                }
            })
        };
        let on_error = {
            let sender = Rc::clone(&sender);
            let src = src.to_string();
            Closure::<dyn FnMut(web_sys::Event)>::new(move |_event| {
                if let Some(sender) = sender.borrow_mut().take() {
                    let _ = sender.send(Err(script_load_error(format!(
                        "failed to load tag script {src}"
                    ))));
                }
            })
        };

        script
            .add_event_listener_with_callback("load", on_load.as_ref().unchecked_ref())
            .map_err(|_| internal_error("failed to attach load listener"))?;
        script
            .add_event_listener_with_callback("error", on_error.as_ref().unchecked_ref())
            .map_err(|_| internal_error("failed to attach error listener"))?;

        let outcome = receiver
            .await
            .unwrap_or_else(|_| Err(internal_error("script listener dropped")));

        let _ = script
            .remove_event_listener_with_callback("load", on_load.as_ref().unchecked_ref());
        let _ = script
            .remove_event_listener_with_callback("error", on_error.as_ref().unchecked_ref());
        outcome
    }

    #[async_trait(?Send)]
    impl ScriptInjector for DomScriptInjector {
        async fn inject(&self, request: &ScriptRequest) -> AnalyticsResult<()> {
            let document = document()?;

            if let Some(existing) = find_existing(&document, &request.src) {
                if existing.get_attribute(LOADED_ATTRIBUTE).as_deref() == Some("true") {
                    return Ok(());
                }
                return wait_for_load(&existing, &request.src).await;
            }

            let script = document
                .create_element("script")
                .map_err(|_| internal_error("failed to create script element"))?
                .dyn_into::<HtmlScriptElement>()
                .map_err(|_| internal_error("created element is not a script"))?;
            script.set_src(&request.src);
            script.set_async(request.is_async);
            let _ = script.set_attribute("referrerpolicy", request.referrer_policy);
            if let Some(nonce) = request.nonce.as_deref() {
                let _ = script.set_attribute("nonce", nonce);
            }

            let head = document
                .head()
                .ok_or_else(|| internal_error("document has no head"))?;
            let load = wait_for_load(&script, &request.src);
            head.append_child(&script)
                .map_err(|_| internal_error("failed to append tag script"))?;
            load.await
        }
    }
}
