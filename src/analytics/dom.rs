//! Parameter builders for the DOM trackers, plus the browser listeners that feed them.
//!
//! Empty strings count as absent, and absent values are left out of the parameters.

use serde_json::Value;
use url::Url;

use crate::analytics::constants::MAX_LABEL_CHARS;
use crate::analytics::events::EventParams;

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

fn insert_opt(params: &mut EventParams, key: &str, value: Option<&str>) {
    if let Some(value) = present(value) {
        params.insert(key.to_string(), Value::String(value.to_string()));
    }
}

/// Trims and cuts `text` to the label length limit.
pub fn truncate_label(text: &str) -> String {
    text.trim().chars().take(MAX_LABEL_CHARS).collect()
}

/// `aria-label` when present, otherwise the element's trimmed text.
pub fn element_label(aria_label: Option<&str>, text: Option<&str>) -> Option<String> {
    if let Some(label) = present(aria_label) {
        return Some(label.to_string());
    }
    let text = truncate_label(text.unwrap_or_default());
    (!text.is_empty()).then_some(text)
}

/// Parameters for an `outbound_click`, or `None` when the link stays on the page's origin
/// and is not marked `rel="external"`.
pub fn outbound_link_params(
    href: &str,
    page_url: &str,
    rel: &str,
    text: &str,
    target: &str,
) -> Option<EventParams> {
    if href.is_empty() {
        return None;
    }
    let page = Url::parse(page_url).ok()?;
    let url = page.join(href).ok()?;
    let external = url.origin() != page.origin() || rel.contains("external");
    if !external {
        return None;
    }

    let mut params = EventParams::new();
    params.insert("url".into(), Value::String(url.to_string()));
    params.insert("text".into(), Value::String(truncate_label(text)));
    params.insert("rel".into(), Value::String(rel.to_string()));
    params.insert("target".into(), Value::String(target.to_string()));
    Some(params)
}

/// Parameters for a tracked click. `extra` overrides the derived keys.
pub fn click_params(
    selector: &str,
    id: Option<&str>,
    label: Option<&str>,
    extra: EventParams,
) -> EventParams {
    let mut params = EventParams::new();
    params.insert("element".into(), Value::String(selector.to_string()));
    insert_opt(&mut params, "id", id);
    insert_opt(&mut params, "label", label);
    params.extend(extra);
    params
}

/// Attributes read from a submitted form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormAttributes {
    pub id: Option<String>,
    pub name: Option<String>,
    pub action: Option<String>,
    pub method: Option<String>,
}

/// Parameters for a `form_submit`. The action defaults to `current_path` and the method to
/// `get`. `extra` overrides the derived keys.
pub fn form_submit_params(
    selector: &str,
    form: &FormAttributes,
    current_path: &str,
    extra: EventParams,
) -> EventParams {
    let mut params = EventParams::new();
    params.insert("form".into(), Value::String(selector.to_string()));
    insert_opt(&mut params, "id", form.id.as_deref());
    insert_opt(&mut params, "name", form.name.as_deref());
    let action = present(form.action.as_deref()).unwrap_or(current_path);
    params.insert("action".into(), Value::String(action.to_string()));
    let method = present(form.method.as_deref())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "get".to_string());
    params.insert("method".into(), Value::String(method));
    params.extend(extra);
    params
}

/// Parameters of the default `[data-analytics="cta"]` click: `section` and `variant` from the
/// element's data attributes.
pub fn cta_params(section: Option<&str>, variant: Option<&str>) -> EventParams {
    let mut params = EventParams::new();
    insert_opt(&mut params, "section", section);
    insert_opt(&mut params, "variant", variant);
    params
}

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use listeners::{
    enable_outbound_link_tracking, init_dom_tracking, track_clicks, track_form_submits,
    DomListener, DomTracking,
};

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
mod listeners {
    use wasm_bindgen::closure::Closure;
    use wasm_bindgen::JsCast;
    use web_sys::{Document, Element, Event, HtmlAnchorElement};

    use super::{
        click_params, cta_params, element_label, form_submit_params, outbound_link_params,
        FormAttributes,
    };
    use crate::analytics::api::Analytics;
    use crate::analytics::constants::{
        CTA_CLICK_EVENT, FORM_SUBMIT_EVENT, OUTBOUND_CLICK_EVENT,
    };
    use crate::analytics::error::{internal_error, AnalyticsResult};
    use crate::analytics::events::EventParams;

    const CTA_SELECTOR: &str = "[data-analytics=\"cta\"]";

    /// A capture-phase document listener. Dropping it removes the listener.
    pub struct DomListener {
        document: Document,
        event: &'static str,
        closure: Closure<dyn FnMut(Event)>,
    }

    impl Drop for DomListener {
        fn drop(&mut self) {
            let _ = self.document.remove_event_listener_with_callback_and_bool(
                self.event,
                self.closure.as_ref().unchecked_ref(),
                true,
            );
        }
    }

    /// The default trackers installed together.
    pub struct DomTracking {
        _listeners: Vec<DomListener>,
    }

    fn document() -> AnalyticsResult<Document> {
        web_sys::window()
            .and_then(|window| window.document())
            .ok_or_else(|| internal_error("document is not available"))
    }

    fn listen<F>(event: &'static str, handler: F) -> AnalyticsResult<DomListener>
    where
        F: FnMut(Event) + 'static,
    {
        let document = document()?;
        let closure = Closure::<dyn FnMut(Event)>::new(handler);
        document
            .add_event_listener_with_callback_and_bool(
                event,
                closure.as_ref().unchecked_ref(),
                true,
            )
            .map_err(|_| internal_error(format!("failed to attach {event} listener")))?;
        Ok(DomListener {
            document,
            event,
            closure,
        })
    }

    fn closest(event: &Event, selector: &str) -> Option<Element> {
        event
            .target()?
            .dyn_into::<Element>()
            .ok()?
            .closest(selector)
            .ok()
            .flatten()
    }

    fn attribute(element: &Element, name: &str) -> Option<String> {
        element.get_attribute(name)
    }

    pub fn enable_outbound_link_tracking(analytics: &Analytics) -> AnalyticsResult<DomListener> {
        let analytics = analytics.clone();
        listen("click", move |event| {
            let Some(anchor) = closest(&event, "a")
                .and_then(|element| element.dyn_into::<HtmlAnchorElement>().ok())
            else {
                return;
            };
            let page_url = web_sys::window()
                .and_then(|window| window.location().href().ok())
                .unwrap_or_default();
            let text = anchor.text_content().unwrap_or_default();
            if let Some(params) =
                outbound_link_params(&anchor.href(), &page_url, &anchor.rel(), &text, &anchor.target())
            {
                analytics.track(OUTBOUND_CLICK_EVENT, params);
            }
        })
    }

    /// Tracks clicks on elements matching `selector`; `params` enriches the event from the
    /// matched element.
    pub fn track_clicks<F>(
        analytics: &Analytics,
        selector: &str,
        event_name: &str,
        params: F,
    ) -> AnalyticsResult<DomListener>
    where
        F: Fn(&Element) -> EventParams + 'static,
    {
        let analytics = analytics.clone();
        let selector = selector.to_string();
        let event_name = event_name.to_string();
        listen("click", move |event| {
            let Some(element) = closest(&event, &selector) else {
                return;
            };
            let id = Some(element.id())
                .filter(|id| !id.is_empty())
                .or_else(|| attribute(&element, "data-id"));
            let label = element_label(
                attribute(&element, "aria-label").as_deref(),
                element.text_content().as_deref(),
            );
            let extra = params(&element);
            analytics.track(
                &event_name,
                click_params(&selector, id.as_deref(), label.as_deref(), extra),
            );
        })
    }

    pub fn track_form_submits<F>(
        analytics: &Analytics,
        selector: &str,
        map: F,
    ) -> AnalyticsResult<DomListener>
    where
        F: Fn(&Element) -> EventParams + 'static,
    {
        let analytics = analytics.clone();
        let selector = selector.to_string();
        listen("submit", move |event| {
            let Some(form) = closest(&event, &selector) else {
                return;
            };
            if form.tag_name() != "FORM" {
                return;
            }
            let attributes = FormAttributes {
                id: Some(form.id()),
                name: attribute(&form, "name"),
                action: attribute(&form, "action"),
                method: attribute(&form, "method"),
            };
            let current_path = web_sys::window()
                .and_then(|window| window.location().pathname().ok())
                .unwrap_or_else(|| "/".to_string());
            let extra = map(&form);
            analytics.track(
                FORM_SUBMIT_EVENT,
                form_submit_params(&selector, &attributes, &current_path, extra),
            );
        })
    }

    /// Outbound links, every form submit, and `[data-analytics="cta"]` clicks as `cta_click`.
    pub fn init_dom_tracking(analytics: &Analytics) -> AnalyticsResult<DomTracking> {
        let listeners = vec![
            enable_outbound_link_tracking(analytics)?,
            track_form_submits(analytics, "form", |_| EventParams::new())?,
            track_clicks(analytics, CTA_SELECTOR, CTA_CLICK_EVENT, |element| {
                cta_params(
                    element.get_attribute("data-section").as_deref(),
                    element.get_attribute("data-variant").as_deref(),
                )
            })?,
        ];
        Ok(DomTracking {
            _listeners: listeners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = "https://ana-and-leo.example/travel?from=home";

    #[test]
    fn same_origin_links_are_not_outbound() {
        assert_eq!(outbound_link_params("/rsvp", PAGE, "", "RSVP", ""), None);
        assert_eq!(
            outbound_link_params("https://ana-and-leo.example/gallery", PAGE, "", "", ""),
            None
        );
    }

    #[test]
    fn other_origins_are_outbound() {
        let params = outbound_link_params(
            "https://maps.example.com/venue",
            PAGE,
            "noopener",
            "  Directions to the venue  ",
            "_blank",
        )
        .unwrap();
        assert_eq!(
            Value::Object(params),
            json!({
                "url": "https://maps.example.com/venue",
                "text": "Directions to the venue",
                "rel": "noopener",
                "target": "_blank"
            })
        );
    }

    #[test]
    fn rel_external_forces_outbound_on_same_origin() {
        let params = outbound_link_params("registry", PAGE, "external", "Registry", "").unwrap();
        assert_eq!(params["url"], json!("https://ana-and-leo.example/registry"));
    }

    #[test]
    fn link_text_is_capped() {
        let long = "x".repeat(300);
        let params = outbound_link_params("https://a.example/", PAGE, "", &long, "").unwrap();
        assert_eq!(params["text"].as_str().map(|text| text.chars().count()), Some(120));
    }

    #[test]
    fn click_params_merge_extras_last() {
        let mut extra = EventParams::new();
        extra.insert("section".into(), json!("hero"));
        extra.insert("label".into(), json!("override"));
        let params = click_params("[data-analytics=\"cta\"]", Some(""), Some("RSVP now"), extra);
        assert_eq!(
            Value::Object(params),
            json!({
                "element": "[data-analytics=\"cta\"]",
                "label": "override",
                "section": "hero"
            })
        );
    }

    #[test]
    fn labels_prefer_aria_and_fall_back_to_text() {
        assert_eq!(
            element_label(Some("Open gallery"), Some("ignored")),
            Some("Open gallery".into())
        );
        assert_eq!(element_label(Some(""), Some("  Photos ")), Some("Photos".into()));
        assert_eq!(element_label(None, Some("   ")), None);
    }

    #[test]
    fn form_defaults_action_and_method() {
        let form = FormAttributes {
            id: Some("rsvp-form".into()),
            method: Some("POST".into()),
            ..Default::default()
        };
        let params = form_submit_params("form", &form, "/rsvp", EventParams::new());
        assert_eq!(
            Value::Object(params),
            json!({
                "form": "form",
                "id": "rsvp-form",
                "action": "/rsvp",
                "method": "post"
            })
        );

        let bare = form_submit_params("form", &FormAttributes::default(), "/", EventParams::new());
        assert_eq!(bare["method"], json!("get"));
    }

    #[test]
    fn cta_params_skip_missing_attributes() {
        assert_eq!(
            Value::Object(cta_params(Some("hero"), None)),
            json!({"section": "hero"})
        );
    }
}
