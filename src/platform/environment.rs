//! Resolution of startup settings from the process environment and injected defaults.
//!
//! Values are looked up in the environment first, then in the `__ANALYTICS_DEFAULTS__` object
//! (an environment variable holding JSON or `key=value` pairs, a file named by
//! `__ANALYTICS_DEFAULTS_PATH`, or a global object of the same name in the browser).

use std::env;
use std::fs;

use serde_json::{Map, Value};

const DEFAULTS_VAR: &str = "__ANALYTICS_DEFAULTS__";
const DEFAULTS_PATH_VAR: &str = "__ANALYTICS_DEFAULTS_PATH";

/// Returns the parsed defaults object when one was provided.
pub fn injected_defaults() -> Option<Map<String, Value>> {
    defaults_from_env()
        .or_else(defaults_from_path)
        .or_else(defaults_from_global)
}

fn defaults_from_env() -> Option<Map<String, Value>> {
    let raw = env::var(DEFAULTS_VAR).ok()?;
    parse_defaults(&raw)
}

fn defaults_from_path() -> Option<Map<String, Value>> {
    let path = env::var(DEFAULTS_PATH_VAR).ok()?;
    let content = fs::read_to_string(path).ok()?;
    parse_defaults(&content)
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
fn defaults_from_global() -> Option<Map<String, Value>> {
    use wasm_bindgen::JsValue;

    let global = js_sys::global();
    let value = js_sys::Reflect::get(&global, &JsValue::from_str(DEFAULTS_VAR)).ok()?;
    if value.is_null() || value.is_undefined() {
        return None;
    }
    let serialized = js_sys::JSON::stringify(&value).ok()?.as_string()?;
    parse_defaults(&serialized)
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
fn defaults_from_global() -> Option<Map<String, Value>> {
    None
}

/// Reads a string-valued global such as `window.__CSP_NONCE__`.
#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub fn global_string(name: &str) -> Option<String> {
    use wasm_bindgen::JsValue;

    let global = js_sys::global();
    js_sys::Reflect::get(&global, &JsValue::from_str(name))
        .ok()?
        .as_string()
        .filter(|value| !value.is_empty())
}

#[cfg(not(all(target_arch = "wasm32", feature = "wasm-web")))]
pub fn global_string(_name: &str) -> Option<String> {
    None
}

fn parse_defaults(raw: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return Some(map);
    }
    parse_key_value_config(raw)
}

fn parse_key_value_config(raw: &str) -> Option<Map<String, Value>> {
    let mut map = Map::new();
    for entry in raw.split(',') {
        let mut parts = entry.splitn(2, '=');
        let key = parts.next()?.trim();
        let value = parts.next()?.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

/// Looks `key` up in the environment, then in the injected defaults. Booleans and numbers in
/// the defaults object are rendered as strings.
pub fn lookup(key: &str) -> Option<String> {
    if let Ok(value) = env::var(key) {
        return Some(value);
    }
    let defaults = injected_defaults()?;
    match defaults.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
