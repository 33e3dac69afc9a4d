//! Interactive element picker.
//!
//! Injects an overlay into the page, then blocks on a promise the user
//! resolves by clicking an element (Cmd/Ctrl+click accumulates a
//! multi-selection finished with Enter; Escape cancels).

use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::actions::ToolError;
use crate::scripts::PICKER_SCRIPT;

/// Description of one picked element, as reported by the overlay script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    pub id: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub text: Option<String>,
    pub html: String,
    /// Ancestor chain up to (excluding) `body`, e.g. `div#main > form.login`.
    pub parents: String,
}

impl ElementInfo {
    pub fn format(&self) -> String {
        let opt = |value: &Option<String>| value.clone().unwrap_or_else(|| "None".to_string());
        format!(
            "tag: {}\nid: {}\nclass: {}\ntext: {}\nhtml: {}\nparents: {}",
            self.tag,
            opt(&self.id),
            opt(&self.class_name),
            opt(&self.text),
            self.html,
            self.parents,
        )
    }
}

/// What the user did with the picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    /// Escape was pressed; nothing was selected.
    Cancelled,
    One(ElementInfo),
    Many(Vec<ElementInfo>),
}

/// Run the picker on `page` with `message` shown in the banner. Blocks until
/// the user resolves or cancels the selection.
pub async fn pick(page: &Page, message: &str) -> Result<PickOutcome, ToolError> {
    page.evaluate(PICKER_SCRIPT).await?;

    let literal = serde_json::to_string(message)
        .map_err(|err| ToolError::Protocol(format!("could not encode message: {err}")))?;
    let params = EvaluateParams::builder()
        .expression(format!("window.__browserToolsPick({literal})"))
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(ToolError::Protocol)?;

    let result = page.evaluate(params).await?;
    parse_outcome(result.value().cloned().unwrap_or(JsonValue::Null))
}

fn parse_outcome(value: JsonValue) -> Result<PickOutcome, ToolError> {
    match value {
        JsonValue::Null => Ok(PickOutcome::Cancelled),
        JsonValue::Array(items) => {
            let infos = items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<ElementInfo>, _>>()
                .map_err(|err| ToolError::Protocol(format!("bad picker result: {err}")))?;
            Ok(PickOutcome::Many(infos))
        }
        other => {
            let info = serde_json::from_value(other)
                .map_err(|err| ToolError::Protocol(format!("bad picker result: {err}")))?;
            Ok(PickOutcome::One(info))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonValue {
        json!({
            "tag": "button",
            "id": "submit",
            "class": "btn btn-primary",
            "text": "Send",
            "html": "<button id=\"submit\" class=\"btn btn-primary\">Send</button>",
            "parents": "form#login > div.actions",
        })
    }

    #[test]
    fn null_result_means_cancelled() {
        assert_eq!(parse_outcome(JsonValue::Null).unwrap(), PickOutcome::Cancelled);
    }

    #[test]
    fn single_object_is_one_element() {
        match parse_outcome(sample()).unwrap() {
            PickOutcome::One(info) => {
                assert_eq!(info.tag, "button");
                assert_eq!(info.id.as_deref(), Some("submit"));
                assert_eq!(info.parents, "form#login > div.actions");
            }
            other => panic!("expected single element, got {other:?}"),
        }
    }

    #[test]
    fn array_result_is_multi_selection() {
        let value = json!([sample(), sample()]);
        match parse_outcome(value).unwrap() {
            PickOutcome::Many(infos) => assert_eq!(infos.len(), 2),
            other => panic!("expected multi selection, got {other:?}"),
        }
    }

    #[test]
    fn null_fields_render_as_none() {
        let value = json!({
            "tag": "div",
            "id": null,
            "class": null,
            "text": null,
            "html": "<div></div>",
            "parents": "",
        });
        match parse_outcome(value).unwrap() {
            PickOutcome::One(info) => {
                let rendered = info.format();
                assert!(rendered.contains("id: None"));
                assert!(rendered.contains("class: None"));
                assert!(rendered.contains("tag: div"));
            }
            other => panic!("expected single element, got {other:?}"),
        }
    }

    #[test]
    fn malformed_result_is_a_protocol_error() {
        let err = parse_outcome(json!(42)).expect_err("should fail");
        assert!(matches!(err, ToolError::Protocol(_)));
    }
}
