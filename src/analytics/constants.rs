use std::time::Duration;

pub const LOGGER_NAME: &str = "@wedding/analytics";

pub const CONSENT_STORAGE_KEY: &str = "analytics_consent_v1";
pub const CLIENT_ID_STORAGE_KEY: &str = "analytics_cid";

pub const DEDUPE_WINDOW: Duration = Duration::from_millis(2_000);
pub const DEDUPE_CLEANUP_THRESHOLD: usize = 1_000;

pub const GTAG_SCRIPT_URL: &str = "https://www.googletagmanager.com/gtag/js";
pub const DEFAULT_DATA_LAYER_NAME: &str = "dataLayer";
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const PRODUCTION_ENVIRONMENT: &str = "production";

pub const PAGE_VIEW_EVENT: &str = "page_view";
pub const OUTBOUND_CLICK_EVENT: &str = "outbound_click";
pub const FORM_SUBMIT_EVENT: &str = "form_submit";
pub const BUTTON_CLICK_EVENT: &str = "button_click";
pub const CTA_CLICK_EVENT: &str = "cta_click";

pub const MAX_LABEL_CHARS: usize = 120;
pub const DIAGNOSTICS_CAPACITY: usize = 64;
pub const DATA_LAYER_CAPACITY: usize = 256;
