use serde_json::{Map, Value};

use crate::analytics::constants::PAGE_VIEW_EVENT;
use crate::analytics::fallback::FallbackEvent;
use crate::analytics::gtag::GtagCommand;

/// Event parameters as sent to the tag. Keys serialize in sorted order.
pub type EventParams = Map<String, Value>;

/// Arguments of a page view. Missing fields default to the host's current location and title.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageView {
    pub path: Option<String>,
    pub title: Option<String>,
}

impl PageView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A send whose payload has been fully resolved at call time.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Outbound {
    PageView {
        location: String,
        path: String,
        title: Option<String>,
    },
    Event { name: String, params: EventParams },
    UserProperties { props: EventParams },
}

impl Outbound {
    pub(crate) fn to_command(&self) -> GtagCommand {
        match self {
            Outbound::PageView {
                location,
                path,
                title,
            } => {
                let mut params = EventParams::new();
                params.insert("page_location".into(), Value::String(location.clone()));
                params.insert("page_path".into(), Value::String(path.clone()));
                if let Some(title) = title {
                    params.insert("page_title".into(), Value::String(title.clone()));
                }
                GtagCommand::Event {
                    name: PAGE_VIEW_EVENT.to_string(),
                    params,
                }
            }
            Outbound::Event { name, params } => GtagCommand::Event {
                name: name.clone(),
                params: params.clone(),
            },
            Outbound::UserProperties { props } => GtagCommand::Set {
                target: "user_properties".to_string(),
                values: props.clone(),
            },
        }
    }

    pub(crate) fn into_fallback(self) -> FallbackEvent {
        match self {
            Outbound::PageView { path, title, .. } => FallbackEvent::PageView { path, title },
            Outbound::Event { name, params } => FallbackEvent::Event {
                event_name: name,
                params,
            },
            Outbound::UserProperties { props } => FallbackEvent::UserProperties { props },
        }
    }
}

pub(crate) fn page_dedupe_key(path: &str, title: Option<&str>) -> String {
    format!("page:{}:{}", path, title.unwrap_or(""))
}

pub(crate) fn event_dedupe_key(name: &str, params: &EventParams) -> String {
    let serialized = serde_json::to_string(params).unwrap_or_default();
    format!("event:{name}:{serialized}")
}
