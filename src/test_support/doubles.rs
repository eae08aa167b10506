use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::channel::oneshot;
use serde_json::Value;

use crate::analytics::error::{internal_error, network_error, script_load_error, AnalyticsResult};
use crate::analytics::{FallbackTransport, ScriptInjector, ScriptRequest};

/// Fallback transport that records every post instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    posts: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.posts()
            .iter()
            .filter_map(|(_, body)| serde_json::from_str(body).ok())
            .collect()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl FallbackTransport for RecordingTransport {
    async fn post(&self, url: &str, body: String) -> AnalyticsResult<()> {
        self.posts.lock().unwrap().push((url.to_string(), body));
        if self.fail {
            return Err(network_error("collector unreachable"));
        }
        Ok(())
    }
}

/// Injector resolving immediately with a configurable outcome.
#[derive(Debug)]
pub struct StaticInjector {
    outcome: Mutex<AnalyticsResult<()>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ScriptRequest>>,
}

impl StaticInjector {
    fn with_outcome(outcome: AnalyticsResult<()>) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_outcome(Ok(()))
    }

    pub fn failing() -> Self {
        Self::with_outcome(Err(script_load_error("blocked by an ad blocker")))
    }

    pub fn set_outcome(&self, outcome: AnalyticsResult<()>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ScriptRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ScriptInjector for StaticInjector {
    async fn inject(&self, request: &ScriptRequest) -> AnalyticsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.outcome.lock().unwrap().clone()
    }
}

/// Injector that stays pending until the paired sender resolves it. Only the first injection
/// is gated; later ones fail.
#[derive(Debug)]
pub struct GatedInjector {
    gate: Mutex<Option<oneshot::Receiver<AnalyticsResult<()>>>>,
    calls: AtomicUsize,
}

impl GatedInjector {
    pub fn new() -> (Self, oneshot::Sender<AnalyticsResult<()>>) {
        let (sender, receiver) = oneshot::channel();
        let injector = Self {
            gate: Mutex::new(Some(receiver)),
            calls: AtomicUsize::new(0),
        };
        (injector, sender)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ScriptInjector for GatedInjector {
    async fn inject(&self, _request: &ScriptRequest) -> AnalyticsResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        match gate {
            Some(receiver) => receiver
                .await
                .unwrap_or_else(|_| Err(internal_error("gate dropped"))),
            None => Err(internal_error("gate already used")),
        }
    }
}
