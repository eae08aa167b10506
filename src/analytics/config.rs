use std::time::Duration;

use url::Url;

use crate::analytics::constants::{
    DEFAULT_ENVIRONMENT, DEFAULT_LOAD_TIMEOUT, PRODUCTION_ENVIRONMENT,
};
use crate::analytics::error::{invalid_argument, AnalyticsResult};
use crate::platform::environment;

pub const ENABLED_VAR: &str = "ANALYTICS_ENABLED";
pub const MEASUREMENT_ID_VAR: &str = "GA4_MEASUREMENT_ID";
pub const ENVIRONMENT_VAR: &str = "ANALYTICS_ENVIRONMENT";
pub const APP_ENVIRONMENT_VAR: &str = "APP_ENV";
pub const FALLBACK_URL_VAR: &str = "ANALYTICS_FALLBACK_URL";
pub const NONCE_VAR: &str = "ANALYTICS_CSP_NONCE";
pub const LOAD_TIMEOUT_VAR: &str = "ANALYTICS_LOAD_TIMEOUT_MS";
const NONCE_GLOBAL: &str = "__CSP_NONCE__";

/// Process-wide analytics settings, resolved once at startup and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyticsConfig {
    enabled: bool,
    measurement_id: String,
    environment: String,
    fallback_url: Option<String>,
    nonce: Option<String>,
    load_timeout: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl AnalyticsConfig {
    pub fn new(measurement_id: impl Into<String>) -> Self {
        Self {
            enabled: true,
            measurement_id: measurement_id.into().trim().to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            fallback_url: None,
            nonce: None,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    /// Resolves the configuration from environment variables and injected defaults.
    pub fn from_env() -> Self {
        let mut config = Self::from_lookup(environment::lookup);
        if config.nonce.is_none() {
            config.nonce = environment::global_string(NONCE_GLOBAL);
        }
        config
    }

    /// Resolves the configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let enabled = read(ENABLED_VAR)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(true);
        let environment = read(ENVIRONMENT_VAR)
            .or_else(|| read(APP_ENVIRONMENT_VAR))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());
        let load_timeout = read(LOAD_TIMEOUT_VAR)
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LOAD_TIMEOUT);

        Self {
            enabled,
            measurement_id: read(MEASUREMENT_ID_VAR)
                .map(|value| value.trim().to_string())
                .unwrap_or_default(),
            environment,
            fallback_url: read(FALLBACK_URL_VAR),
            nonce: read(NONCE_VAR),
            load_timeout,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_fallback_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.fallback_url = if url.trim().is_empty() { None } else { Some(url) };
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Upper bound for the tag script load. `Duration::ZERO` waits indefinitely.
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn measurement_id(&self) -> &str {
        &self.measurement_id
    }

    pub fn has_measurement_id(&self) -> bool {
        !self.measurement_id.is_empty()
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn is_production(&self) -> bool {
        self.environment == PRODUCTION_ENVIRONMENT
    }

    pub fn fallback_url(&self) -> Option<&str> {
        self.fallback_url.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    /// Parses the fallback endpoint. Only absolute `http(s)` URLs are accepted.
    pub fn parsed_fallback_url(&self) -> AnalyticsResult<Option<Url>> {
        let Some(raw) = self.fallback_url.as_deref() else {
            return Ok(None);
        };
        let url = Url::parse(raw.trim())
            .map_err(|err| invalid_argument(format!("invalid fallback URL '{raw}': {err}")))?;
        match url.scheme() {
            "http" | "https" => Ok(Some(url)),
            other => Err(invalid_argument(format!(
                "fallback URL '{raw}' must use http or https, not {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_lookup_yields_defaults() {
        let config = AnalyticsConfig::from_lookup(|_| None);
        assert!(config.enabled());
        assert!(!config.has_measurement_id());
        assert_eq!(config.environment(), "development");
        assert_eq!(config.fallback_url(), None);
        assert_eq!(config.load_timeout(), DEFAULT_LOAD_TIMEOUT);
    }

    #[test]
    fn lookup_values_are_applied() {
        let config = AnalyticsConfig::from_lookup(lookup_from(&[
            (ENABLED_VAR, "TRUE"),
            (MEASUREMENT_ID_VAR, " G-WEDDING1 "),
            (APP_ENVIRONMENT_VAR, "production"),
            (FALLBACK_URL_VAR, "https://collect.example/events"),
            (NONCE_VAR, "abc123"),
            (LOAD_TIMEOUT_VAR, "2500"),
        ]));
        assert!(config.enabled());
        assert_eq!(config.measurement_id(), "G-WEDDING1");
        assert!(config.is_production());
        assert_eq!(config.fallback_url(), Some("https://collect.example/events"));
        assert_eq!(config.nonce(), Some("abc123"));
        assert_eq!(config.load_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn anything_but_true_disables() {
        let config = AnalyticsConfig::from_lookup(lookup_from(&[(ENABLED_VAR, "yes")]));
        assert!(!config.enabled());
    }

    #[test]
    fn explicit_environment_wins_over_app_env() {
        let config = AnalyticsConfig::from_lookup(lookup_from(&[
            (ENVIRONMENT_VAR, "staging"),
            (APP_ENVIRONMENT_VAR, "production"),
        ]));
        assert_eq!(config.environment(), "staging");
    }

    #[test]
    fn fallback_url_validation() {
        let ok = AnalyticsConfig::new("G-1").with_fallback_url("http://localhost:8000/api/analytics");
        assert!(ok.parsed_fallback_url().unwrap().is_some());

        let bad = AnalyticsConfig::new("G-1").with_fallback_url("not a url");
        let err = bad.parsed_fallback_url().unwrap_err();
        assert_eq!(err.code_str(), "analytics/invalid-argument");

        let ftp = AnalyticsConfig::new("G-1").with_fallback_url("ftp://example.com/sink");
        assert!(ftp.parsed_fallback_url().is_err());

        let none = AnalyticsConfig::new("G-1").with_fallback_url("  ");
        assert_eq!(none.parsed_fallback_url().unwrap(), None);
    }
}
