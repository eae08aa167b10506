//! Test utilities shared across crate-level unit tests.

#[cfg(not(target_arch = "wasm32"))]
pub mod http;
pub mod doubles;

pub use doubles::{GatedInjector, RecordingTransport, StaticInjector};
#[cfg(not(target_arch = "wasm32"))]
pub use http::try_start_server;
