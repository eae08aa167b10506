use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::analytics::client_id::ClientIdStore;
use crate::analytics::config::AnalyticsConfig;
use crate::analytics::consent::{ConsentStatus, ConsentStore, ConsentSubscription};
use crate::analytics::dedupe::DedupeFilter;
use crate::analytics::diagnostics::{DiagnosticKind, Diagnostics};
use crate::analytics::error::AnalyticsResult;
use crate::analytics::events::{event_dedupe_key, page_dedupe_key, EventParams, Outbound, PageView};
use crate::analytics::fallback::{FallbackSender, FallbackTransport};
use crate::analytics::gate::{evaluate, Allowance, GateInputs};
use crate::analytics::gtag::{GtagCommand, TagChannel};
use crate::analytics::loader::{LoadState, ScriptInjector, ScriptLoader};
use crate::analytics::logger::LOGGER;
use crate::analytics::queue::EventQueue;
use crate::analytics::storage::KeyValueStore;
use crate::platform::runtime::spawn_detached;
use crate::platform::{Clock, Host, SystemClock};

/// Consent-gated tracking facade. Build one per process and share it by cloning.
#[derive(Clone)]
pub struct Analytics {
    inner: Arc<AnalyticsInner>,
}

impl fmt::Debug for Analytics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analytics")
            .field("measurement_id", &self.inner.config.measurement_id())
            .field("environment", &self.inner.config.environment())
            .field("load_state", &self.load_state())
            .field("queued", &self.queued())
            .finish()
    }
}

struct AnalyticsInner {
    config: AnalyticsConfig,
    host: Arc<dyn Host>,
    tag: Arc<dyn TagChannel>,
    consent: ConsentStore,
    client_ids: Arc<ClientIdStore>,
    loader: ScriptLoader,
    fallback: FallbackSender,
    queue: EventQueue,
    dedupe: DedupeFilter,
    diagnostics: Arc<Diagnostics>,
    initialized: AtomicBool,
    consent_subscription: Mutex<Option<ConsentSubscription>>,
}

impl AnalyticsInner {
    fn allowance(&self) -> Allowance {
        evaluate(GateInputs {
            enabled: self.config.enabled(),
            has_measurement_id: self.config.has_measurement_id(),
            do_not_track: self.host.do_not_track().is_enabled(),
            consent: self.consent.status(),
        })
    }

    /// Primary channel when the tag is ready, the fallback otherwise or when the primary send
    /// fails.
    fn deliver(&self, outbound: Outbound) {
        if self.loader.is_ready() {
            match self.tag.command(&outbound.to_command()) {
                Ok(()) => return,
                Err(err) => self.diagnostics.report(DiagnosticKind::SendFailure, &err),
            }
        }
        self.fallback.dispatch(outbound.into_fallback());
    }

    fn dispatch(self: &Arc<Self>, outbound: Outbound) {
        if self.allowance().is_allowed() {
            match self.loader.state() {
                LoadState::Ready | LoadState::Failed => {
                    self.deliver(outbound);
                    return;
                }
                LoadState::Idle | LoadState::Loading => {}
            }
        }

        let weak: Weak<AnalyticsInner> = Arc::downgrade(self);
        self.queue.enqueue(move || {
            if let Some(inner) = weak.upgrade() {
                inner.deliver(outbound);
            }
        });
    }
}

impl Analytics {
    pub fn builder(config: AnalyticsConfig) -> AnalyticsBuilder {
        AnalyticsBuilder::new(config)
    }

    /// Platform defaults with configuration read from the environment.
    pub fn from_env() -> AnalyticsResult<Self> {
        AnalyticsBuilder::new(AnalyticsConfig::from_env()).build()
    }

    /// Wires consent changes to activation and activates right away when tracking is already
    /// allowed. Only the first call on an instance does anything.
    pub async fn init(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.consent.subscribe(move |status| {
            if status != ConsentStatus::Granted {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let analytics = Analytics { inner };
            if analytics.is_allowed() {
                spawn_detached(async move {
                    analytics.activate().await;
                });
            }
        });
        *self.inner.consent_subscription.lock().unwrap() = Some(subscription);

        let allowance = self.allowance();
        if allowance.is_allowed() {
            self.activate().await;
        } else {
            for blocker in allowance.blockers() {
                self.inner.diagnostics.note(blocker.to_string());
            }
        }
    }

    /// Loads the tag, grants consent to it on success and drains the queue. After a failed load
    /// the queue drains to the fallback. When tracking stopped being allowed while the tag was
    /// loading, nothing is granted and the queue is kept.
    pub async fn activate(&self) {
        let loaded = self.inner.loader.load_once().await;

        let allowance = self.allowance();
        if !allowance.is_allowed() {
            for blocker in allowance.blockers() {
                self.inner
                    .diagnostics
                    .note(format!("activation halted: {blocker}"));
            }
            return;
        }

        match loaded {
            Ok(()) => self.push_primary(GtagCommand::consent_granted_update()),
            Err(err) => {
                if !self.inner.config.is_production() {
                    LOGGER.warn(format!("analytics tag unavailable, using fallback: {err}"));
                }
            }
        }
        let flushed = self.inner.queue.flush();
        if flushed > 0 {
            self.inner
                .diagnostics
                .note(format!("flushed {flushed} queued analytics actions"));
        }
    }

    /// Records a page view. Path and title default to the host's current location and title.
    pub fn page(&self, view: PageView) {
        let location = self.inner.host.location();
        let path = view.path.unwrap_or_else(|| location.path.clone());
        let title = view.title.or_else(|| self.inner.host.document_title());

        if self
            .inner
            .dedupe
            .should_skip(&page_dedupe_key(&path, title.as_deref()))
        {
            return;
        }

        self.inner.dispatch(Outbound::PageView {
            location: format!("{}{}", location.origin, path),
            path,
            title,
        });
    }

    /// Records a custom event. Blank names are ignored.
    pub fn track(&self, name: &str, params: EventParams) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        if self
            .inner
            .dedupe
            .should_skip(&event_dedupe_key(name, &params))
        {
            return;
        }

        self.inner.dispatch(Outbound::Event {
            name: name.to_string(),
            params,
        });
    }

    pub fn user_properties(&self, props: EventParams) {
        self.inner.dispatch(Outbound::UserProperties { props });
    }

    pub fn consent(&self) -> &ConsentStore {
        &self.inner.consent
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.inner.config
    }

    pub fn allowance(&self) -> Allowance {
        self.inner.allowance()
    }

    pub fn is_allowed(&self) -> bool {
        self.allowance().is_allowed()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.loader.is_ready()
    }

    pub fn load_state(&self) -> LoadState {
        self.inner.loader.state()
    }

    /// Number of actions waiting for the next flush.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    pub fn client_id(&self) -> String {
        self.inner.client_ids.get_or_create()
    }

    fn push_primary(&self, command: GtagCommand) {
        if let Err(err) = self.inner.tag.command(&command) {
            self.inner
                .diagnostics
                .report(DiagnosticKind::SendFailure, &err);
        }
    }
}

/// Assembles an [`Analytics`] from explicit collaborators, filling the rest with the platform
/// defaults.
pub struct AnalyticsBuilder {
    config: AnalyticsConfig,
    storage: Option<Arc<dyn KeyValueStore>>,
    host: Option<Arc<dyn Host>>,
    clock: Option<Arc<dyn Clock>>,
    tag: Option<Arc<dyn TagChannel>>,
    injector: Option<Arc<dyn ScriptInjector>>,
    transport: Option<Arc<dyn FallbackTransport>>,
}

impl AnalyticsBuilder {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            storage: None,
            host: None,
            clock: None,
            tag: None,
            injector: None,
            transport: None,
        }
    }

    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn tag_channel(mut self, tag: Arc<dyn TagChannel>) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn script_injector(mut self, injector: Arc<dyn ScriptInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn fallback_transport(mut self, transport: Arc<dyn FallbackTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> AnalyticsResult<Analytics> {
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let diagnostics = Arc::new(Diagnostics::new(!config.is_production(), clock.clone()));

        let storage = match self.storage {
            Some(storage) => storage,
            None => defaults::storage(&diagnostics),
        };
        let host = self.host.unwrap_or_else(defaults::host);
        let tag = self.tag.unwrap_or_else(defaults::tag_channel);
        let injector = match self.injector {
            Some(injector) => injector,
            None => defaults::script_injector()?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => defaults::fallback_transport()?,
        };

        let consent = ConsentStore::new(storage.clone(), diagnostics.clone());
        let client_ids = Arc::new(ClientIdStore::new(storage, diagnostics.clone()));
        let loader = ScriptLoader::new(
            config.clone(),
            tag.clone(),
            injector,
            clock.clone(),
            diagnostics.clone(),
        );
        let fallback = FallbackSender::new(
            &config,
            transport,
            client_ids.clone(),
            host.clone(),
            clock.clone(),
            diagnostics.clone(),
        );

        Ok(Analytics {
            inner: Arc::new(AnalyticsInner {
                config,
                host,
                tag,
                consent,
                client_ids,
                loader,
                fallback,
                queue: EventQueue::new(),
                dedupe: DedupeFilter::new(clock),
                diagnostics,
                initialized: AtomicBool::new(false),
                consent_subscription: Mutex::new(None),
            }),
        })
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
mod defaults {
    use std::sync::Arc;

    use crate::analytics::diagnostics::Diagnostics;
    use crate::analytics::error::AnalyticsResult;
    use crate::analytics::fallback::{BeaconTransport, FallbackTransport};
    use crate::analytics::gtag::{TagChannel, WindowGtag};
    use crate::analytics::loader::{DomScriptInjector, ScriptInjector};
    use crate::analytics::storage::{KeyValueStore, LocalStorageStore};
    use crate::platform::{BrowserHost, Host};

    pub(super) fn storage(_diagnostics: &Diagnostics) -> Arc<dyn KeyValueStore> {
        Arc::new(LocalStorageStore)
    }

    pub(super) fn host() -> Arc<dyn Host> {
        Arc::new(BrowserHost)
    }

    pub(super) fn tag_channel() -> Arc<dyn TagChannel> {
        Arc::new(WindowGtag::new())
    }

    pub(super) fn script_injector() -> AnalyticsResult<Arc<dyn ScriptInjector>> {
        Ok(Arc::new(DomScriptInjector))
    }

    pub(super) fn fallback_transport() -> AnalyticsResult<Arc<dyn FallbackTransport>> {
        Ok(Arc::new(BeaconTransport::new()?))
    }
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
mod defaults {
    use std::sync::Arc;

    use crate::analytics::diagnostics::Diagnostics;
    use crate::analytics::error::AnalyticsResult;
    use crate::analytics::fallback::{FallbackTransport, HttpFallbackTransport};
    use crate::analytics::gtag::{DataLayer, TagChannel};
    use crate::analytics::loader::{HttpScriptProbe, ScriptInjector};
    use crate::analytics::storage::KeyValueStore;
    use crate::platform::{Host, StaticHost};

    #[cfg(not(target_arch = "wasm32"))]
    pub(super) fn storage(diagnostics: &Diagnostics) -> Arc<dyn KeyValueStore> {
        use crate::analytics::diagnostics::DiagnosticKind;
        use crate::analytics::storage::{FileStore, MemoryStore};

        match FileStore::from_env() {
            Ok(store) => Arc::new(store),
            Err(err) => {
                diagnostics.report(DiagnosticKind::StorageFailure, &err);
                Arc::new(MemoryStore::new())
            }
        }
    }

    #[cfg(target_arch = "wasm32")]
    pub(super) fn storage(_diagnostics: &Diagnostics) -> Arc<dyn KeyValueStore> {
        Arc::new(crate::analytics::storage::MemoryStore::new())
    }

    pub(super) fn host() -> Arc<dyn Host> {
        Arc::new(StaticHost::new())
    }

    pub(super) fn tag_channel() -> Arc<dyn TagChannel> {
        Arc::new(DataLayer::new())
    }

    pub(super) fn script_injector() -> AnalyticsResult<Arc<dyn ScriptInjector>> {
        Ok(Arc::new(HttpScriptProbe::new()?))
    }

    pub(super) fn fallback_transport() -> AnalyticsResult<Arc<dyn FallbackTransport>> {
        Ok(Arc::new(HttpFallbackTransport::new()?))
    }
}
