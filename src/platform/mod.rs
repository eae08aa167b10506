//! Platform seams shared by the analytics subsystem: runtime helpers, clocks, environment
//! lookups and the host page abstraction.

pub mod environment;
pub mod host;
pub mod runtime;
pub mod time;

pub use host::{DoNotTrackSignals, Host, PageLocation, StaticHost};
pub use time::{Clock, ManualClock, SystemClock};

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use host::BrowserHost;
