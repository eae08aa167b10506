//! The primary channel: `gtag(...)` commands and where they go.
//!
//! Commands are modelled as data so the same sequence can be pushed to the browser's
//! `window.gtag` or recorded in an in-process data layer.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::analytics::constants::{DATA_LAYER_CAPACITY, DEFAULT_DATA_LAYER_NAME};
use crate::analytics::error::AnalyticsResult;
use crate::analytics::events::EventParams;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsentMode {
    Default,
    Update,
}

impl ConsentMode {
    fn as_str(self) -> &'static str {
        match self {
            ConsentMode::Default => "default",
            ConsentMode::Update => "update",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GtagCommand {
    Js { timestamp_ms: i64 },
    Consent {
        mode: ConsentMode,
        settings: BTreeMap<String, String>,
    },
    Config {
        measurement_id: String,
        params: EventParams,
    },
    Event { name: String, params: EventParams },
    Set { target: String, values: EventParams },
}

impl GtagCommand {
    /// `consent default` used before the visitor decides: everything denied except security.
    pub fn strict_consent_defaults() -> Self {
        GtagCommand::Consent {
            mode: ConsentMode::Default,
            settings: consent_settings(&[
                ("ad_storage", "denied"),
                ("analytics_storage", "denied"),
                ("functionality_storage", "denied"),
                ("personalization_storage", "denied"),
                ("security_storage", "granted"),
            ]),
        }
    }

    pub fn consent_granted_update() -> Self {
        GtagCommand::Consent {
            mode: ConsentMode::Update,
            settings: consent_settings(&[
                ("ad_storage", "granted"),
                ("analytics_storage", "granted"),
            ]),
        }
    }

    /// `config <id> {send_page_view: false}`; page views are sent explicitly.
    pub fn config_without_page_views(measurement_id: impl Into<String>) -> Self {
        let mut params = EventParams::new();
        params.insert("send_page_view".into(), Value::Bool(false));
        GtagCommand::Config {
            measurement_id: measurement_id.into(),
            params,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GtagCommand::Js { .. } => "js",
            GtagCommand::Consent { .. } => "consent",
            GtagCommand::Config { .. } => "config",
            GtagCommand::Event { .. } => "event",
            GtagCommand::Set { .. } => "set",
        }
    }

    /// The argument list passed to `gtag(...)`. The `js` timestamp is rendered as RFC 3339.
    pub fn to_arguments(&self) -> Vec<Value> {
        match self {
            GtagCommand::Js { timestamp_ms } => {
                let rendered = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(*timestamp_ms)
                    .map(|time| time.to_rfc3339())
                    .unwrap_or_default();
                vec![json!("js"), Value::String(rendered)]
            }
            GtagCommand::Consent { mode, settings } => {
                vec![json!("consent"), json!(mode.as_str()), json!(settings)]
            }
            GtagCommand::Config {
                measurement_id,
                params,
            } => vec![
                json!("config"),
                json!(measurement_id),
                Value::Object(params.clone()),
            ],
            GtagCommand::Event { name, params } => {
                vec![json!("event"), json!(name), Value::Object(params.clone())]
            }
            GtagCommand::Set { target, values } => {
                vec![json!("set"), json!(target), Value::Object(values.clone())]
            }
        }
    }
}

fn consent_settings(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Destination of primary-channel commands.
pub trait TagChannel: Send + Sync {
    /// Makes sure commands can be accepted before the tag script has loaded.
    fn install_stub(&self);

    fn command(&self, command: &GtagCommand) -> AnalyticsResult<()>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataLayerState {
    pub name: String,
    pub stub_installed: bool,
    pub commands: VecDeque<GtagCommand>,
}

/// In-process data layer, the native stand-in for `window.dataLayer`. Keeps the most recent
/// commands only.
#[derive(Debug)]
pub struct DataLayer {
    state: Mutex<DataLayerState>,
}

impl Default for DataLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLayer {
    pub fn new() -> Self {
        Self::named(DEFAULT_DATA_LAYER_NAME)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(DataLayerState {
                name: name.into(),
                ..Default::default()
            }),
        }
    }

    pub fn snapshot(&self) -> DataLayerState {
        self.state.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<GtagCommand> {
        self.state.lock().unwrap().commands.iter().cloned().collect()
    }

    /// Names of `event` commands in push order.
    pub fn event_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter_map(|command| match command {
                GtagCommand::Event { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.commands.clear();
        state.stub_installed = false;
    }
}

impl TagChannel for DataLayer {
    fn install_stub(&self) {
        self.state.lock().unwrap().stub_installed = true;
    }

    fn command(&self, command: &GtagCommand) -> AnalyticsResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.commands.len() == DATA_LAYER_CAPACITY {
            state.commands.pop_front();
        }
        state.commands.push_back(command.clone());
        Ok(())
    }
}

impl fmt::Display for GtagCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.to_arguments().iter().map(Value::to_string).collect();
        write!(f, "gtag({})", rendered.join(", "))
    }
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use window::WindowGtag;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
mod window {
    use wasm_bindgen::{JsCast, JsValue};

    use super::{GtagCommand, TagChannel};
    use crate::analytics::constants::DEFAULT_DATA_LAYER_NAME;
    use crate::analytics::error::{internal_error, AnalyticsResult};

    /// Forwards commands to `window.gtag`, creating the `dataLayer` stub when absent.
    #[derive(Clone, Debug)]
    pub struct WindowGtag {
        data_layer_name: String,
    }

    impl Default for WindowGtag {
        fn default() -> Self {
            Self {
                data_layer_name: DEFAULT_DATA_LAYER_NAME.to_string(),
            }
        }
    }

    impl WindowGtag {
        pub fn new() -> Self {
            Self::default()
        }

        fn global() -> AnalyticsResult<JsValue> {
            web_sys::window()
                .map(JsValue::from)
                .ok_or_else(|| internal_error("window is not available"))
        }
    }

    fn to_js(value: &serde_json::Value) -> AnalyticsResult<JsValue> {
        js_sys::JSON::parse(&value.to_string())
            .map_err(|_| internal_error("failed to convert gtag argument"))
    }

    impl TagChannel for WindowGtag {
        fn install_stub(&self) {
            let Ok(global) = Self::global() else {
                return;
            };
            let layer_key = JsValue::from_str(&self.data_layer_name);
            let has_layer = js_sys::Reflect::get(&global, &layer_key)
                .map(|value| value.is_object())
                .unwrap_or(false);
            if !has_layer {
                let _ = js_sys::Reflect::set(&global, &layer_key, &js_sys::Array::new());
            }

            let gtag_key = JsValue::from_str("gtag");
            let has_gtag = js_sys::Reflect::get(&global, &gtag_key)
                .map(|value| value.is_function())
                .unwrap_or(false);
            if !has_gtag {
                let body = format!("window['{}'].push(arguments);", self.data_layer_name);
                let stub = js_sys::Function::new_no_args(&body);
                let _ = js_sys::Reflect::set(&global, &gtag_key, &stub);
            }
        }

        fn command(&self, command: &GtagCommand) -> AnalyticsResult<()> {
            let global = Self::global()?;
            let gtag = js_sys::Reflect::get(&global, &JsValue::from_str("gtag"))
                .map_err(|_| internal_error("window.gtag is not readable"))?
                .dyn_into::<js_sys::Function>()
                .map_err(|_| internal_error("window.gtag is not a function"))?;

            let arguments = js_sys::Array::new();
            for (index, argument) in command.to_arguments().iter().enumerate() {
                if index == 1 && matches!(command, GtagCommand::Js { .. }) {
                    arguments.push(&js_sys::Date::new_0());
                } else {
                    arguments.push(&to_js(argument)?);
                }
            }
            gtag.apply(&JsValue::NULL, &arguments)
                .map(|_| ())
                .map_err(|_| internal_error(format!("gtag {} command threw", command.kind())))
        }
    }
}
