use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_channel::{Receiver, Sender};

use crate::analytics::constants::CONSENT_STORAGE_KEY;
use crate::analytics::diagnostics::{DiagnosticKind, Diagnostics};
use crate::analytics::storage::KeyValueStore;
use crate::platform::DoNotTrackSignals;

/// The visitor's analytics decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConsentStatus {
    #[default]
    Unset,
    Granted,
    Denied,
}

impl ConsentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentStatus::Unset => "unset",
            ConsentStatus::Granted => "granted",
            ConsentStatus::Denied => "denied",
        }
    }

    fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("granted") => ConsentStatus::Granted,
            Some("denied") => ConsentStatus::Denied,
            _ => ConsentStatus::Unset,
        }
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ConsentListener = Arc<dyn Fn(ConsentStatus) + Send + Sync + 'static>;

/// Handle returned by [`ConsentStore::subscribe`]. Dropping it removes the listener.
pub struct ConsentSubscription {
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl ConsentSubscription {
    fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ConsentSubscription {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl fmt::Debug for ConsentSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentSubscription")
            .field("active", &self.cleanup.is_some())
            .finish()
    }
}

#[derive(Default)]
struct ConsentState {
    listeners: Vec<(usize, ConsentListener)>,
    watchers: Vec<Sender<ConsentStatus>>,
    /// Last written status, authoritative once storage has failed.
    memory: ConsentStatus,
    degraded: bool,
}

struct ConsentInner {
    storage: Arc<dyn KeyValueStore>,
    diagnostics: Arc<Diagnostics>,
    state: Mutex<ConsentState>,
    next_id: AtomicUsize,
}

/// Persisted tri-state consent with change notification.
#[derive(Clone)]
pub struct ConsentStore {
    inner: Arc<ConsentInner>,
}

impl fmt::Debug for ConsentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentStore")
            .field("status", &self.status())
            .finish()
    }
}

impl ConsentStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            inner: Arc::new(ConsentInner {
                storage,
                diagnostics,
                state: Mutex::new(ConsentState::default()),
                next_id: AtomicUsize::new(1),
            }),
        }
    }

    pub fn status(&self) -> ConsentStatus {
        {
            let state = self.inner.state.lock().unwrap();
            if state.degraded {
                return state.memory;
            }
        }

        match self.inner.storage.get(CONSENT_STORAGE_KEY) {
            Ok(value) => ConsentStatus::from_stored(value.as_deref()),
            Err(err) => {
                self.inner
                    .diagnostics
                    .report(DiagnosticKind::StorageFailure, &err);
                let mut state = self.inner.state.lock().unwrap();
                state.degraded = true;
                state.memory
            }
        }
    }

    pub fn grant(&self) {
        self.write(ConsentStatus::Granted);
    }

    pub fn deny(&self) {
        self.write(ConsentStatus::Denied);
    }

    /// Forgets the decision; listeners observe [`ConsentStatus::Unset`].
    pub fn reset(&self) {
        self.write(ConsentStatus::Unset);
    }

    /// Registers `listener` for every subsequent change. Panics inside a listener are contained.
    pub fn subscribe<F>(&self, listener: F) -> ConsentSubscription
    where
        F: Fn(ConsentStatus) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .state
            .lock()
            .unwrap()
            .listeners
            .push((id, Arc::new(listener)));

        let inner = Arc::downgrade(&self.inner);
        ConsentSubscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                if let Ok(mut state) = inner.state.lock() {
                    state.listeners.retain(|(listener_id, _)| *listener_id != id);
                }
            }
        })
    }

    /// Channel receiving every subsequent change. Dropping the receiver ends the feed.
    pub fn changes(&self) -> Receiver<ConsentStatus> {
        let (sender, receiver) = async_channel::unbounded();
        self.inner.state.lock().unwrap().watchers.push(sender);
        receiver
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().unwrap().listeners.len()
    }

    fn write(&self, status: ConsentStatus) {
        let outcome = match status {
            ConsentStatus::Unset => self.inner.storage.remove(CONSENT_STORAGE_KEY),
            other => self.inner.storage.set(CONSENT_STORAGE_KEY, other.as_str()),
        };

        let listeners = {
            let mut state = self.inner.state.lock().unwrap();
            state.memory = status;
            if outcome.is_err() {
                state.degraded = true;
            }
            state.watchers.retain(|sender| sender.try_send(status).is_ok());
            state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>()
        };

        if let Err(err) = outcome {
            self.inner
                .diagnostics
                .report(DiagnosticKind::StorageFailure, &err);
        }

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(status))).is_err() {
                self.inner
                    .diagnostics
                    .note(format!("consent listener panicked while handling {status}"));
            }
        }
    }
}

/// Decision logic behind the consent banner.
#[derive(Clone, Debug)]
pub struct ConsentPrompt {
    store: ConsentStore,
}

impl ConsentPrompt {
    pub fn new(store: ConsentStore) -> Self {
        Self { store }
    }

    /// The banner shows until the visitor decides either way.
    pub fn is_visible(&self) -> bool {
        self.store.status() == ConsentStatus::Unset
    }

    pub fn accept(&self) {
        self.store.grant();
    }

    pub fn decline(&self) {
        self.store.deny();
    }

    /// Declines on the visitor's behalf when Do-Not-Track is on and nothing was decided yet.
    /// Returns whether a decision was recorded.
    pub fn apply_do_not_track(&self, signals: &DoNotTrackSignals) -> bool {
        if signals.is_enabled() && self.store.status() == ConsentStatus::Unset {
            self.store.deny();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::storage::tests::BrokenStore;
    use crate::analytics::storage::MemoryStore;
    use crate::platform::ManualClock;

    fn diagnostics() -> Arc<Diagnostics> {
        Arc::new(Diagnostics::new(false, Arc::new(ManualClock::default())))
    }

    fn store() -> ConsentStore {
        ConsentStore::new(Arc::new(MemoryStore::new()), diagnostics())
    }

    #[test]
    fn status_follows_the_last_call() {
        let consent = store();
        assert_eq!(consent.status(), ConsentStatus::Unset);

        let sequences: [&[ConsentStatus]; 4] = [
            &[ConsentStatus::Granted],
            &[ConsentStatus::Granted, ConsentStatus::Denied],
            &[ConsentStatus::Denied, ConsentStatus::Unset],
            &[ConsentStatus::Unset, ConsentStatus::Denied, ConsentStatus::Granted],
        ];
        for sequence in sequences {
            for step in sequence {
                match step {
                    ConsentStatus::Granted => consent.grant(),
                    ConsentStatus::Denied => consent.deny(),
                    ConsentStatus::Unset => consent.reset(),
                }
            }
            assert_eq!(consent.status(), *sequence.last().unwrap());
        }
    }

    #[test]
    fn decision_is_persisted_under_fixed_key() {
        let storage = Arc::new(MemoryStore::new());
        let consent = ConsentStore::new(storage.clone(), diagnostics());
        consent.grant();
        assert_eq!(
            storage.get(CONSENT_STORAGE_KEY).unwrap().as_deref(),
            Some("granted")
        );

        let reopened = ConsentStore::new(storage.clone(), diagnostics());
        assert_eq!(reopened.status(), ConsentStatus::Granted);

        reopened.reset();
        assert_eq!(storage.get(CONSENT_STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn unknown_stored_values_read_as_unset() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(CONSENT_STORAGE_KEY, "maybe").unwrap();
        let consent = ConsentStore::new(storage, diagnostics());
        assert_eq!(consent.status(), ConsentStatus::Unset);
    }

    #[test]
    fn listeners_are_notified_and_panics_are_contained() {
        let consent = store();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _noisy = consent.subscribe(|_| panic!("bad subscriber"));
        let sink = Arc::clone(&seen);
        let subscription = consent.subscribe(move |status| sink.lock().unwrap().push(status));

        consent.grant();
        consent.deny();
        consent.reset();
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[ConsentStatus::Granted, ConsentStatus::Denied, ConsentStatus::Unset]
        );

        subscription.unsubscribe();
        assert_eq!(consent.listener_count(), 1);
        consent.grant();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn change_feed_delivers_statuses() {
        let consent = store();
        let feed = consent.changes();
        consent.grant();
        consent.reset();
        assert_eq!(feed.try_recv().unwrap(), ConsentStatus::Granted);
        assert_eq!(feed.try_recv().unwrap(), ConsentStatus::Unset);
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn storage_failures_degrade_to_memory() {
        let diagnostics = diagnostics();
        let consent = ConsentStore::new(Arc::new(BrokenStore), diagnostics.clone());

        assert_eq!(consent.status(), ConsentStatus::Unset);
        consent.grant();
        assert_eq!(consent.status(), ConsentStatus::Granted);
        consent.reset();
        assert_eq!(consent.status(), ConsentStatus::Unset);
        assert!(diagnostics.count(DiagnosticKind::StorageFailure) >= 2);
    }

    #[test]
    fn prompt_visibility_and_do_not_track() {
        let consent = store();
        let prompt = ConsentPrompt::new(consent.clone());
        assert!(prompt.is_visible());

        assert!(!prompt.apply_do_not_track(&DoNotTrackSignals::default()));
        assert!(prompt.apply_do_not_track(&DoNotTrackSignals::enabled()));
        assert_eq!(consent.status(), ConsentStatus::Denied);
        assert!(!prompt.is_visible());

        prompt.accept();
        assert!(!prompt.apply_do_not_track(&DoNotTrackSignals::enabled()));
        assert_eq!(consent.status(), ConsentStatus::Granted);
    }
}
