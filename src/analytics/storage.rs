//! Durable key-value storage for consent and client identifiers.
//!
//! Browsers use `localStorage`; native builds persist one file per key. Every backend reports
//! failures as `analytics/storage` errors and leaves degradation to its callers.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::analytics::error::AnalyticsResult;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AnalyticsResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AnalyticsResult<()>;
    fn remove(&self, key: &str) -> AnalyticsResult<()>;
}

/// Process-local store. Values vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> AnalyticsResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AnalyticsResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AnalyticsResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStore;

#[cfg(not(target_arch = "wasm32"))]
mod file {
    use std::fs;
    use std::io::ErrorKind;
    use std::path::PathBuf;
    use std::sync::Arc;

    use percent_encoding::{percent_encode, NON_ALPHANUMERIC};

    use super::KeyValueStore;
    use crate::analytics::error::{storage_error, AnalyticsResult};

    const CACHE_DIR_VAR: &str = "ANALYTICS_STORAGE_DIR";

    /// Stores each key in its own file under `base_dir`.
    #[derive(Clone, Debug)]
    pub struct FileStore {
        base_dir: Arc<PathBuf>,
    }

    impl FileStore {
        pub fn new(base_dir: PathBuf) -> AnalyticsResult<Self> {
            fs::create_dir_all(&base_dir).map_err(|err| {
                storage_error(format!(
                    "Failed to create analytics storage directory '{}': {}",
                    base_dir.display(),
                    err
                ))
            })?;
            Ok(Self {
                base_dir: Arc::new(base_dir),
            })
        }

        /// Uses `ANALYTICS_STORAGE_DIR` when set, otherwise `.analytics/` in the working
        /// directory.
        pub fn from_env() -> AnalyticsResult<Self> {
            if let Ok(dir) = std::env::var(CACHE_DIR_VAR) {
                return Self::new(PathBuf::from(dir));
            }
            let dir = std::env::current_dir()
                .map_err(|err| storage_error(format!("Failed to obtain working directory: {err}")))?
                .join(".analytics");
            Self::new(dir)
        }

        fn file_for(&self, key: &str) -> PathBuf {
            let encoded = percent_encode(key.as_bytes(), NON_ALPHANUMERIC).to_string();
            self.base_dir.join(encoded)
        }
    }

    impl KeyValueStore for FileStore {
        fn get(&self, key: &str) -> AnalyticsResult<Option<String>> {
            let path = self.file_for(key);
            match fs::read_to_string(&path) {
                Ok(value) => Ok(Some(value)),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
                Err(err) => Err(storage_error(format!(
                    "Failed to read '{}': {}",
                    path.display(),
                    err
                ))),
            }
        }

        fn set(&self, key: &str, value: &str) -> AnalyticsResult<()> {
            let path = self.file_for(key);
            fs::write(&path, value).map_err(|err| {
                storage_error(format!("Failed to write '{}': {}", path.display(), err))
            })
        }

        fn remove(&self, key: &str) -> AnalyticsResult<()> {
            let path = self.file_for(key);
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(storage_error(format!(
                    "Failed to delete '{}': {}",
                    path.display(),
                    err
                ))),
            }
        }
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use web::LocalStorageStore;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
mod web {
    use wasm_bindgen::JsValue;
    use web_sys::Storage;

    use super::KeyValueStore;
    use crate::analytics::error::{storage_error, AnalyticsError, AnalyticsResult};

    /// `window.localStorage`. Private browsing modes may refuse access; those errors surface as
    /// storage failures.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct LocalStorageStore;

    impl LocalStorageStore {
        fn storage() -> AnalyticsResult<Storage> {
            let window =
                web_sys::window().ok_or_else(|| storage_error("window is not available"))?;
            window
                .local_storage()
                .map_err(map_js_error)?
                .ok_or_else(|| storage_error("localStorage is unavailable"))
        }
    }

    fn map_js_error(err: JsValue) -> AnalyticsError {
        let detail = err
            .as_string()
            .or_else(|| {
                js_sys::JSON::stringify(&err)
                    .ok()
                    .and_then(|value| value.as_string())
            })
            .unwrap_or_else(|| format!("{err:?}"));
        storage_error(format!("Web storage error: {detail}"))
    }

    impl KeyValueStore for LocalStorageStore {
        fn get(&self, key: &str) -> AnalyticsResult<Option<String>> {
            Self::storage()?.get_item(key).map_err(map_js_error)
        }

        fn set(&self, key: &str, value: &str) -> AnalyticsResult<()> {
            Self::storage()?.set_item(key, value).map_err(map_js_error)
        }

        fn remove(&self, key: &str) -> AnalyticsResult<()> {
            Self::storage()?.remove_item(key).map_err(map_js_error)
        }
    }
}
