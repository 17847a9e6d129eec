//! Rich-text resolution for project work item fields.
//!
//! The project API returns rich-text fields as a delta-op document, often
//! double-encoded as a JSON string. Parsing is pure; the one network call
//! is the secondary work item query. Inline images are returned as
//! references only; byte resolution belongs to the AI gateway's multimodal
//! assembly.

use crate::errors::ProjectError;
use crate::project_client::ProjectClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Inline image reference found in a rich-text document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RichTextImage {
    pub uuid: Option<String>,
    pub src: Option<String>,
    pub width: Option<String>,
}

impl RichTextImage {
    /// Reference string used in logs and degradation placeholders.
    pub fn reference(&self) -> String {
        self.uuid
            .clone()
            .or_else(|| self.src.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Normalized rich-text document.
///
/// `is_empty` distinguishes "field has no rich text" from a failed query;
/// the latter is an error, never an empty doc.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RichTextDoc {
    pub plain_text: String,
    pub html: Option<String>,
    pub images: Vec<RichTextImage>,
    pub is_empty: bool,
}

impl RichTextDoc {
    pub fn empty() -> Self {
        Self {
            is_empty: true,
            ..Default::default()
        }
    }
}

/// Parse a field value into a normalized document.
///
/// Accepts the shapes the project API produces: a delta document object, a
/// JSON string containing one, or a wrapper object with `doc` / `doc_html`
/// / `doc_text` keys.
pub fn parse_rich_text_value(value: &Value) -> RichTextDoc {
    if value.is_null() {
        return RichTextDoc::empty();
    }

    let (doc, html, text_override) = match value {
        Value::Object(map) if map.contains_key("doc") => {
            let doc = map.get("doc").cloned().unwrap_or(Value::Null);
            let html = map
                .get("doc_html")
                .and_then(|v| v.as_str())
                .map(String::from);
            let text = map
                .get("doc_text")
                .and_then(|v| v.as_str())
                .map(String::from);
            (doc, html, text)
        }
        other => (other.clone(), None, None),
    };

    let doc = decode_doc(&doc);

    let mut images = Vec::new();
    find_images(&doc, &mut images);

    let plain_text = text_override.unwrap_or_else(|| extract_plain_text(&doc));
    let is_empty = plain_text.trim().is_empty() && images.is_empty();

    RichTextDoc {
        plain_text,
        html,
        images,
        is_empty,
    }
}

/// Rich-text documents arrive double-encoded more often than not.
fn decode_doc(doc: &Value) -> Value {
    match doc {
        Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| doc.clone()),
        other => other.clone(),
    }
}

fn is_image_op(op: &Value) -> bool {
    op.get("attributes")
        .and_then(|a| a.get("image"))
        .map(|flag| flag == "true" || flag == &Value::Bool(true))
        .unwrap_or(false)
}

/// Collect image references from any nesting depth.
fn find_images(value: &Value, out: &mut Vec<RichTextImage>) {
    match value {
        Value::Object(map) => {
            if is_image_op(value) {
                let attributes = &map["attributes"];
                out.push(RichTextImage {
                    uuid: attributes
                        .get("uuid")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    src: attributes
                        .get("src")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    width: attributes
                        .get("width")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                });
                return;
            }
            for nested in map.values() {
                find_images(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                find_images(item, out);
            }
        }
        _ => {}
    }
}

/// Concatenate string `insert` ops, skipping image ops.
fn extract_plain_text(value: &Value) -> String {
    let mut text = String::new();
    collect_text(value, &mut text);
    text
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            if is_image_op(value) {
                return;
            }
            if let Some(Value::String(inserted)) = map.get("insert") {
                out.push_str(inserted);
            }
            for (key, nested) in map {
                if key == "insert" {
                    continue;
                }
                collect_text(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_text(item, out);
            }
        }
        _ => {}
    }
}

/// Resolve the rich-text document behind one work item field.
///
/// An absent field or an empty document yields `is_empty: true` without an
/// error; only the query itself can fail.
pub async fn resolve_rich_text(
    client: &ProjectClient,
    project_key: &str,
    work_item_type_key: &str,
    work_item_id: i64,
    field_key: &str,
    timeout_ms: u64,
) -> Result<RichTextDoc, ProjectError> {
    let item = client
        .query_work_item_fields(
            project_key,
            work_item_type_key,
            work_item_id,
            &[field_key.to_string()],
            timeout_ms,
        )
        .await?;

    let field_value = item
        .get("fields")
        .and_then(|fields| fields.as_array())
        .and_then(|fields| {
            fields
                .iter()
                .find(|f| f.get("field_key").and_then(|k| k.as_str()) == Some(field_key))
        })
        .and_then(|f| f.get("field_value"))
        .cloned()
        .unwrap_or(Value::Null);

    let doc = parse_rich_text_value(&field_value);
    debug!(
        work_item.id = work_item_id,
        field.key = %field_key,
        richtext.empty = doc.is_empty,
        richtext.images = doc.images.len(),
        "Resolved rich text field"
    );

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project_client::StaticTokenProvider;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delta_doc() -> Value {
        json!({
            "ops": [
                {"insert": "The incident started "},
                {"insert": "at 09:30.", "attributes": {"bold": "true"}},
                {
                    "insert": {"image": "placeholder"},
                    "attributes": {
                        "image": "true",
                        "uuid": "img-uuid-1",
                        "src": "attachments/img-1.png",
                        "width": "640"
                    }
                },
                {"insert": "\nSee screenshot above."}
            ]
        })
    }

    #[test]
    fn test_parse_object_document() {
        let doc = parse_rich_text_value(&delta_doc());
        assert!(!doc.is_empty);
        assert_eq!(
            doc.plain_text,
            "The incident started at 09:30.\nSee screenshot above."
        );
        assert_eq!(doc.images.len(), 1);
        assert_eq!(doc.images[0].uuid.as_deref(), Some("img-uuid-1"));
        assert_eq!(doc.images[0].width.as_deref(), Some("640"));
    }

    #[test]
    fn test_parse_double_encoded_document() {
        let encoded = Value::String(serde_json::to_string(&delta_doc()).unwrap());
        let doc = parse_rich_text_value(&encoded);
        assert_eq!(doc.images.len(), 1);
        assert!(doc.plain_text.contains("incident started"));
    }

    #[test]
    fn test_parse_wrapper_with_html() {
        let wrapper = json!({
            "doc": serde_json::to_string(&delta_doc()).unwrap(),
            "doc_html": "<p>The incident started</p>",
        });

        let doc = parse_rich_text_value(&wrapper);
        assert_eq!(doc.html.as_deref(), Some("<p>The incident started</p>"));
        assert_eq!(doc.images.len(), 1);
    }

    #[test]
    fn test_empty_is_not_an_error() {
        let doc = parse_rich_text_value(&Value::Null);
        assert!(doc.is_empty);
        assert!(doc.plain_text.is_empty());
        assert!(doc.images.is_empty());

        let blank = parse_rich_text_value(&json!({"ops": [{"insert": "   "}]}));
        assert!(blank.is_empty);
    }

    #[test]
    fn test_image_only_document_is_not_empty() {
        let doc = parse_rich_text_value(&json!({
            "ops": [{
                "insert": {"image": "x"},
                "attributes": {"image": "true", "uuid": "only-image"}
            }]
        }));
        assert!(!doc.is_empty);
        assert_eq!(doc.images.len(), 1);
        assert!(doc.plain_text.trim().is_empty());
    }

    #[test]
    fn test_image_reference_fallback() {
        let with_uuid = RichTextImage {
            uuid: Some("u1".to_string()),
            src: Some("s1".to_string()),
            width: None,
        };
        assert_eq!(with_uuid.reference(), "u1");

        let src_only = RichTextImage {
            uuid: None,
            src: Some("s1".to_string()),
            width: None,
        };
        assert_eq!(src_only.reference(), "s1");
    }

    #[tokio::test]
    async fn test_resolve_rich_text_field() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open_api/proj/work_item/story/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "err_code": 0,
                "data": [{
                    "id": 42,
                    "fields": [{
                        "field_key": "description",
                        "field_value": serde_json::to_string(&delta_doc()).unwrap(),
                    }]
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = ProjectClient::new(
            Arc::new(reqwest::Client::new()),
            mock_server.uri(),
            "user-1".to_string(),
            Arc::new(StaticTokenProvider("tok".to_string())),
        );

        let doc = resolve_rich_text(&client, "proj", "story", 42, "description", 5000)
            .await
            .unwrap();

        assert!(!doc.is_empty);
        assert_eq!(doc.images.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_missing_field_is_empty() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "err_code": 0,
                "data": [{"id": 42, "fields": []}]
            })))
            .mount(&mock_server)
            .await;

        let client = ProjectClient::new(
            Arc::new(reqwest::Client::new()),
            mock_server.uri(),
            "user-1".to_string(),
            Arc::new(StaticTokenProvider("tok".to_string())),
        );

        let doc = resolve_rich_text(&client, "proj", "story", 42, "description", 5000)
            .await
            .unwrap();

        assert!(doc.is_empty);
    }
}
