use std::sync::{Arc, Mutex};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::analytics::constants::CLIENT_ID_STORAGE_KEY;
use crate::analytics::diagnostics::{DiagnosticKind, Diagnostics};
use crate::analytics::storage::KeyValueStore;

/// Opaque per-browser identifier attached to fallback events. Created on first use.
pub struct ClientIdStore {
    storage: Arc<dyn KeyValueStore>,
    diagnostics: Arc<Diagnostics>,
    ephemeral: Mutex<Option<String>>,
}

impl ClientIdStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            storage,
            diagnostics,
            ephemeral: Mutex::new(None),
        }
    }

    /// Returns the persisted id, generating and storing one when absent. If storage is
    /// unavailable the id lives only as long as this process.
    pub fn get_or_create(&self) -> String {
        if let Some(id) = self.ephemeral.lock().unwrap().clone() {
            return id;
        }

        match self.storage.get(CLIENT_ID_STORAGE_KEY) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(err) => {
                self.diagnostics
                    .report(DiagnosticKind::StorageFailure, &err);
                return self.remember_ephemeral();
            }
        }

        let id = generate_client_id();
        if let Err(err) = self.storage.set(CLIENT_ID_STORAGE_KEY, &id) {
            self.diagnostics
                .report(DiagnosticKind::StorageFailure, &err);
            *self.ephemeral.lock().unwrap() = Some(id.clone());
        }
        id
    }

    fn remember_ephemeral(&self) -> String {
        let mut ephemeral = self.ephemeral.lock().unwrap();
        ephemeral.get_or_insert_with(generate_client_id).clone()
    }
}

fn generate_client_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(32)
        .collect()
}
