mod api;
mod client_id;
mod config;
mod consent;
mod constants;
mod dedupe;
mod diagnostics;
pub mod dom;
pub mod error;
mod events;
mod fallback;
mod gate;
mod gtag;
mod loader;
mod logger;
mod queue;
mod routing;
mod storage;

pub use api::{Analytics, AnalyticsBuilder};
pub use client_id::ClientIdStore;
pub use config::{
    AnalyticsConfig, APP_ENVIRONMENT_VAR, ENABLED_VAR, ENVIRONMENT_VAR, FALLBACK_URL_VAR,
    LOAD_TIMEOUT_VAR, MEASUREMENT_ID_VAR, NONCE_VAR,
};
pub use consent::{ConsentListener, ConsentPrompt, ConsentStatus, ConsentStore, ConsentSubscription};
pub use dedupe::DedupeFilter;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use events::{EventParams, PageView};
pub use fallback::{FallbackEvent, FallbackSender, FallbackTransport, HttpFallbackTransport};
pub use gate::{evaluate, is_allowed, Allowance, Blocker, GateInputs};
pub use gtag::{ConsentMode, DataLayer, DataLayerState, GtagCommand, TagChannel};
pub use loader::{HttpScriptProbe, LoadState, ScriptInjector, ScriptLoader, ScriptRequest};
pub use queue::{EventQueue, QueuedAction};
pub use routing::RouteTracker;
pub use storage::{KeyValueStore, MemoryStore};

#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileStore;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use fallback::BeaconTransport;
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use gtag::WindowGtag;
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use loader::DomScriptInjector;
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use storage::LocalStorageStore;
