//! Secondary channel: a JSON POST to a configured collection endpoint.
//!
//! Used when the tag script could not be loaded or a primary send failed. Delivery is best
//! effort; failures are recorded in [`Diagnostics`] and never surface to the caller.

use std::fmt;
use std::sync::Arc;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::analytics::client_id::ClientIdStore;
use crate::analytics::config::AnalyticsConfig;
use crate::analytics::diagnostics::{DiagnosticKind, Diagnostics};
use crate::analytics::error::{internal_error, network_error, AnalyticsResult};
use crate::analytics::events::EventParams;
use crate::platform::runtime::spawn_detached;
use crate::platform::{Clock, Host};

#[cfg(not(target_arch = "wasm32"))]
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a fallback request before the envelope fields are attached.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackEvent {
    PageView {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Event {
        event_name: String,
        params: EventParams,
    },
    UserProperties {
        props: EventParams,
    },
}

#[derive(Serialize)]
struct FallbackEnvelope<'a> {
    #[serde(flatten)]
    event: &'a FallbackEvent,
    cid: &'a str,
    env: &'a str,
    #[serde(rename = "userAgent")]
    user_agent: &'a str,
    ts: u64,
}

/// Delivers a serialized fallback body to the collection endpoint.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait FallbackTransport: Send + Sync {
    async fn post(&self, url: &str, body: String) -> AnalyticsResult<()>;
}

/// Plain `fetch`/HTTP POST with a JSON content type.
#[derive(Clone, Debug)]
pub struct HttpFallbackTransport {
    client: Client,
}

impl HttpFallbackTransport {
    pub fn new() -> AnalyticsResult<Self> {
        let builder = Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(FALLBACK_TIMEOUT);
        let client = builder
            .build()
            .map_err(|err| internal_error(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl FallbackTransport for HttpFallbackTransport {
    async fn post(&self, url: &str, body: String) -> AnalyticsResult<()> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| network_error(format!("failed to send fallback event: {err}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = match status {
            StatusCode::BAD_REQUEST => "fallback endpoint rejected the event (400)".to_string(),
            _ => format!("fallback endpoint responded with status {status}"),
        };
        Err(network_error(message))
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use beacon::BeaconTransport;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
mod beacon {
    use async_trait::async_trait;
    use wasm_bindgen::JsValue;

    use super::{FallbackTransport, HttpFallbackTransport};
    use crate::analytics::error::AnalyticsResult;

    /// Prefers `navigator.sendBeacon`, which survives page unloads, and falls back to a POST
    /// when the beacon is refused.
    #[derive(Clone, Debug)]
    pub struct BeaconTransport {
        http: HttpFallbackTransport,
    }

    impl BeaconTransport {
        pub fn new() -> AnalyticsResult<Self> {
            Ok(Self {
                http: HttpFallbackTransport::new()?,
            })
        }

        fn beacon(url: &str, body: &str) -> bool {
            let Some(window) = web_sys::window() else {
                return false;
            };
            let parts = js_sys::Array::of1(&JsValue::from_str(body));
            let options = web_sys::BlobPropertyBag::new();
            options.set_type("application/json");
            let Ok(blob) = web_sys::Blob::new_with_str_sequence_and_options(&parts, &options)
            else {
                return false;
            };
            window
                .navigator()
                .send_beacon_with_opt_blob(url, Some(&blob))
                .unwrap_or(false)
        }
    }

    #[async_trait(?Send)]
    impl FallbackTransport for BeaconTransport {
        async fn post(&self, url: &str, body: String) -> AnalyticsResult<()> {
            if Self::beacon(url, &body) {
                return Ok(());
            }
            self.http.post(url, body).await
        }
    }
}

struct FallbackInner {
    url: Option<String>,
    environment: String,
    transport: Arc<dyn FallbackTransport>,
    client_ids: Arc<ClientIdStore>,
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<Diagnostics>,
}

/// Builds fallback envelopes and hands them to a [`FallbackTransport`].
#[derive(Clone)]
pub struct FallbackSender {
    inner: Arc<FallbackInner>,
}

impl fmt::Debug for FallbackSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackSender")
            .field("url", &self.inner.url)
            .field("environment", &self.inner.environment)
            .finish()
    }
}

impl FallbackSender {
    /// An unusable endpoint URL is recorded as a misconfiguration and disables the channel.
    pub fn new(
        config: &AnalyticsConfig,
        transport: Arc<dyn FallbackTransport>,
        client_ids: Arc<ClientIdStore>,
        host: Arc<dyn Host>,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        let url = match config.parsed_fallback_url() {
            Ok(url) => url.map(|url| url.to_string()),
            Err(err) => {
                diagnostics.report(DiagnosticKind::Misconfiguration, &err);
                None
            }
        };
        Self {
            inner: Arc::new(FallbackInner {
                url,
                environment: config.environment().to_string(),
                transport,
                client_ids,
                host,
                clock,
                diagnostics,
            }),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.url.is_some()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.inner.url.as_deref()
    }

    /// Sends `event` and waits for the transport. Without an endpoint this does nothing.
    pub async fn send(&self, event: FallbackEvent) {
        if let Some((url, body)) = self.prepare(&event) {
            self.deliver(url, body).await;
        }
    }

    /// Fire-and-forget variant of [`send`](Self::send). The envelope is captured immediately.
    pub fn dispatch(&self, event: FallbackEvent) {
        let Some((url, body)) = self.prepare(&event) else {
            return;
        };
        let sender = self.clone();
        spawn_detached(async move {
            sender.deliver(url, body).await;
        });
    }

    fn prepare(&self, event: &FallbackEvent) -> Option<(String, String)> {
        let url = self.inner.url.clone()?;
        let client_id = self.inner.client_ids.get_or_create();
        let user_agent = self.inner.host.user_agent();
        let envelope = FallbackEnvelope {
            event,
            cid: &client_id,
            env: &self.inner.environment,
            user_agent: &user_agent,
            ts: self.inner.clock.now_millis(),
        };
        match serde_json::to_string(&envelope) {
            Ok(body) => Some((url, body)),
            Err(err) => {
                self.inner.diagnostics.report(
                    DiagnosticKind::FallbackFailure,
                    &internal_error(format!("failed to encode fallback event: {err}")),
                );
                None
            }
        }
    }

    async fn deliver(&self, url: String, body: String) {
        if let Err(err) = self.inner.transport.post(&url, body).await {
            self.inner
                .diagnostics
                .report(DiagnosticKind::FallbackFailure, &err);
        }
    }
}
