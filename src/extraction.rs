//! Field extraction from webhook payloads.
//!
//! Evaluates dotted path expressions (`$.payload.changed_fields[0].cur_field_value`)
//! against a JSON payload and renders prompt templates from the extracted
//! field map. Everything here is pure: same inputs always produce the same
//! output, no I/O.

use crate::errors::ExtractionError;
use crate::model::{ExtractionConfig, FieldSpec};
use serde_json::Value;
use std::collections::HashMap;

/// Path expression for the work item id in the default webhook shape.
pub const DEFAULT_RECORD_ID_PATH: &str = "$.payload.id";

/// Field key used for the extracted value in single-path mode.
pub const SINGLE_FIELD_KEY: &str = "field_value";

/// Heading prepended to the primary content when the prompt template
/// contains no matching placeholder.
const FALLBACK_HEADING: &str = "Data to analyze:";

/// One extracted field. `value: None` means the path resolved to nothing
/// or to JSON null; it is distinct from a field-level evaluation error.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtractedField {
    pub key: String,
    pub path: String,
    pub value: Option<String>,
    pub placeholder: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedField {
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }
}

/// Result of evaluating an extraction configuration against a payload.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExtractionOutcome {
    pub fields: Vec<ExtractedField>,
    /// Keys of required fields that resolved to nothing or errored.
    pub failed_fields: Vec<String>,
}

impl ExtractionOutcome {
    /// Placeholder-to-value map over fields that actually carry a value.
    pub fn field_map(&self) -> HashMap<String, String> {
        self.fields
            .iter()
            .filter_map(|f| {
                f.value
                    .as_ref()
                    .map(|v| (f.placeholder.clone(), v.clone()))
            })
            .collect()
    }

    /// Value of the primary content field, when present.
    pub fn primary_value(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == SINGLE_FIELD_KEY)
            .and_then(|f| f.value.as_deref())
            .or_else(|| self.fields.iter().find_map(|f| f.value.as_deref()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .and_then(|f| f.value.as_deref())
    }
}

/// Evaluate a path expression against a payload.
///
/// Supported syntax is the dotted/indexed subset: `$`, `.name`, `[index]`.
/// Returns `Ok(None)` when any segment is absent or the final value is null.
pub fn evaluate_path(payload: &Value, path: &str) -> Result<Option<Value>, ExtractionError> {
    let segments = parse_path(path)?;

    let mut current = payload;
    for segment in &segments {
        let next = match segment {
            PathSegment::Key(key) => current.get(key.as_str()),
            PathSegment::Index(index) => current.get(*index),
        };
        match next {
            Some(value) => current = value,
            None => return Ok(None),
        }
    }

    if current.is_null() {
        Ok(None)
    } else {
        Ok(Some(current.clone()))
    }
}

#[derive(Debug, PartialEq)]
enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, ExtractionError> {
    let invalid = |details: &str| ExtractionError::InvalidPath {
        path: path.to_string(),
        details: details.to_string(),
    };

    let rest = path
        .strip_prefix('$')
        .ok_or_else(|| invalid("path must start with '$'"))?;

    let mut segments = Vec::new();
    let mut chars = rest.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut key = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    key.push(next);
                    chars.next();
                }
                if key.is_empty() {
                    return Err(invalid("empty key segment"));
                }
                segments.push(PathSegment::Key(key));
            }
            '[' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(_) => return Err(invalid("index segments accept digits only")),
                        None => return Err(invalid("unterminated index segment")),
                    }
                }
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| invalid("invalid index segment"))?;
                segments.push(PathSegment::Index(index));
            }
            _ => return Err(invalid("expected '.' or '[' after segment")),
        }
    }

    Ok(segments)
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Extract fields from a payload according to the task's configuration.
///
/// Each path is evaluated independently; a missing required field is
/// collected into `failed_fields` without aborting the remaining fields.
/// The call as a whole fails only in single-path mode (the one field is
/// implicitly required) or when the configuration declares fail-fast.
pub fn extract(
    payload: &Value,
    config: &ExtractionConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    match config {
        ExtractionConfig::SinglePath { path } => {
            let value = evaluate_path(payload, path)?.map(|v| coerce_to_string(&v));
            if value.is_none() {
                return Err(ExtractionError::RequiredFieldMissing {
                    key: SINGLE_FIELD_KEY.to_string(),
                    path: path.clone(),
                });
            }
            Ok(ExtractionOutcome {
                fields: vec![ExtractedField {
                    key: SINGLE_FIELD_KEY.to_string(),
                    path: path.clone(),
                    value,
                    placeholder: SINGLE_FIELD_KEY.to_string(),
                    required: true,
                    error: None,
                }],
                failed_fields: Vec::new(),
            })
        }
        ExtractionConfig::MultiField { fields, fail_fast } => {
            let mut outcome = ExtractionOutcome::default();

            for spec in fields {
                outcome.fields.push(extract_one(payload, spec));
            }

            outcome.failed_fields = outcome
                .fields
                .iter()
                .filter(|f| f.required && (!f.has_value() || f.error.is_some()))
                .map(|f| f.key.clone())
                .collect();

            if *fail_fast && !outcome.failed_fields.is_empty() {
                return Err(ExtractionError::RequiredFieldsFailed {
                    keys: outcome.failed_fields.join(", "),
                });
            }

            Ok(outcome)
        }
    }
}

fn extract_one(payload: &Value, spec: &FieldSpec) -> ExtractedField {
    let placeholder = spec
        .placeholder
        .clone()
        .unwrap_or_else(|| spec.key.clone());

    match evaluate_path(payload, &spec.path) {
        Ok(value) => ExtractedField {
            key: spec.key.clone(),
            path: spec.path.clone(),
            value: value.map(|v| coerce_to_string(&v)),
            placeholder,
            required: spec.required,
            error: None,
        },
        Err(e) => ExtractedField {
            key: spec.key.clone(),
            path: spec.path.clone(),
            value: None,
            placeholder,
            required: spec.required,
            error: Some(e.to_string()),
        },
    }
}

/// Render a prompt template by substituting `{key}` placeholders from the
/// field map.
///
/// Substitution is a single left-to-right scan, so values containing brace
/// tokens are never re-substituted and rendering is idempotent. Unknown
/// placeholders stay literal. When no placeholder in the template matched
/// the map, the primary content is appended under a fixed heading.
pub fn render_prompt(
    template: &str,
    fields: &HashMap<String, String>,
    primary: Option<&str>,
) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut matched_any = false;

    let mut i = 0;
    while i < template.len() {
        let c = match template[i..].chars().next() {
            Some(c) => c,
            None => break,
        };

        if c == '{' {
            // A token is '{' followed by a name containing no braces and a
            // closing '}'. Anything else stays literal.
            if let Some(offset) = template[i + 1..].find(['{', '}']) {
                let boundary_idx = i + 1 + offset;
                if template[boundary_idx..].starts_with('}') {
                    let name = &template[i + 1..boundary_idx];
                    if let Some(value) = fields.get(name) {
                        rendered.push_str(value);
                        matched_any = true;
                    } else {
                        rendered.push('{');
                        rendered.push_str(name);
                        rendered.push('}');
                    }
                    i = boundary_idx + 1;
                    continue;
                }
            }
            rendered.push('{');
            i += 1;
            continue;
        }

        rendered.push(c);
        i += c.len_utf8();
    }

    if !matched_any {
        if let Some(content) = primary {
            rendered.push_str("\n\n");
            rendered.push_str(FALLBACK_HEADING);
            rendered.push('\n');
            rendered.push_str(content);
        }
    }

    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evaluate_simple_path() {
        let payload = json!({"field_value": "req-123.txt", "record_id": "R1"});
        let value = evaluate_path(&payload, "$.field_value").unwrap();
        assert_eq!(value, Some(json!("req-123.txt")));
    }

    #[test]
    fn test_evaluate_nested_indexed_path() {
        let payload = json!({
            "payload": {
                "id": 42,
                "changed_fields": [
                    {"cur_field_value": "updated text"}
                ]
            }
        });

        let value =
            evaluate_path(&payload, "$.payload.changed_fields[0].cur_field_value").unwrap();
        assert_eq!(value, Some(json!("updated text")));

        let id = evaluate_path(&payload, DEFAULT_RECORD_ID_PATH).unwrap();
        assert_eq!(id, Some(json!(42)));
    }

    #[test]
    fn test_evaluate_missing_and_null() {
        let payload = json!({"a": {"b": null}});
        assert_eq!(evaluate_path(&payload, "$.a.b").unwrap(), None);
        assert_eq!(evaluate_path(&payload, "$.a.c").unwrap(), None);
        assert_eq!(evaluate_path(&payload, "$.x[3]").unwrap(), None);
    }

    #[test]
    fn test_invalid_paths_rejected() {
        let payload = json!({});
        assert!(evaluate_path(&payload, "field_value").is_err());
        assert!(evaluate_path(&payload, "$.a[x]").is_err());
        assert!(evaluate_path(&payload, "$.a[1").is_err());
        assert!(evaluate_path(&payload, "$..b").is_err());
    }

    #[test]
    fn test_single_path_extraction() {
        let payload = json!({"field_value": "req-123.txt", "record_id": "R1"});
        let config = ExtractionConfig::SinglePath {
            path: "$.field_value".to_string(),
        };

        let outcome = extract(&payload, &config).unwrap();
        let map = outcome.field_map();
        assert_eq!(map.get("field_value"), Some(&"req-123.txt".to_string()));
    }

    #[test]
    fn test_single_path_missing_is_overall_error() {
        let payload = json!({"other": 1});
        let config = ExtractionConfig::SinglePath {
            path: "$.field_value".to_string(),
        };

        let err = extract(&payload, &config).unwrap_err();
        assert!(matches!(err, ExtractionError::RequiredFieldMissing { .. }));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let payload = json!({"payload": {"id": 7, "changed_fields": [{"cur_field_value": "v"}]}});
        let config = ExtractionConfig::default();

        let first = extract(&payload, &config).unwrap();
        let second = extract(&payload, &config).unwrap();
        assert_eq!(first.field_map(), second.field_map());
    }

    #[test]
    fn test_multi_field_partial_failure_continues() {
        let payload = json!({"a": "alpha", "c": 3});
        let config = ExtractionConfig::MultiField {
            fields: vec![
                FieldSpec {
                    key: "a".to_string(),
                    path: "$.a".to_string(),
                    placeholder: None,
                    required: true,
                },
                FieldSpec {
                    key: "b".to_string(),
                    path: "$.b".to_string(),
                    placeholder: None,
                    required: true,
                },
                FieldSpec {
                    key: "c".to_string(),
                    path: "$.c".to_string(),
                    placeholder: Some("count".to_string()),
                    required: false,
                },
            ],
            fail_fast: false,
        };

        let outcome = extract(&payload, &config).unwrap();
        assert_eq!(outcome.failed_fields, vec!["b".to_string()]);
        assert_eq!(outcome.fields.len(), 3);

        let map = outcome.field_map();
        assert_eq!(map.get("a"), Some(&"alpha".to_string()));
        assert_eq!(map.get("count"), Some(&"3".to_string()));
        assert!(!map.contains_key("b"));
    }

    #[test]
    fn test_multi_field_fail_fast() {
        let payload = json!({});
        let config = ExtractionConfig::MultiField {
            fields: vec![FieldSpec {
                key: "must".to_string(),
                path: "$.must".to_string(),
                placeholder: None,
                required: true,
            }],
            fail_fast: true,
        };

        let err = extract(&payload, &config).unwrap_err();
        assert!(matches!(err, ExtractionError::RequiredFieldsFailed { .. }));
    }

    #[test]
    fn test_missing_field_has_no_fabricated_value() {
        let payload = json!({});
        let config = ExtractionConfig::MultiField {
            fields: vec![FieldSpec {
                key: "gone".to_string(),
                path: "$.gone".to_string(),
                placeholder: None,
                required: false,
            }],
            fail_fast: false,
        };

        let outcome = extract(&payload, &config).unwrap();
        assert!(!outcome.fields[0].has_value());
        assert!(outcome.fields[0].error.is_none());
        assert!(outcome.field_map().is_empty());
    }

    #[test]
    fn test_render_prompt_substitution() {
        let mut fields = HashMap::new();
        fields.insert("field_value".to_string(), "hello".to_string());

        let rendered = render_prompt("Summarize: {field_value}", &fields, Some("hello"));
        assert_eq!(rendered, "Summarize: hello");
    }

    #[test]
    fn test_render_prompt_is_idempotent() {
        let mut fields = HashMap::new();
        fields.insert("a".to_string(), "{b}".to_string());
        fields.insert("b".to_string(), "NOPE".to_string());

        // A substituted value containing a brace token is not re-substituted.
        let rendered = render_prompt("value: {a}", &fields, None);
        assert_eq!(rendered, "value: {b}");

        let again = render_prompt(&rendered, &fields, None);
        assert_eq!(again, "value: NOPE");
    }

    #[test]
    fn test_render_prompt_unknown_placeholder_stays_literal() {
        let fields = HashMap::new();
        let rendered = render_prompt("keep {unknown} here", &fields, None);
        assert_eq!(rendered, "keep {unknown} here");
    }

    #[test]
    fn test_render_prompt_fallback_heading() {
        let fields = HashMap::new();
        let rendered = render_prompt("Analyze the following.", &fields, Some("raw content"));
        assert_eq!(
            rendered,
            "Analyze the following.\n\nData to analyze:\nraw content"
        );

        // Deterministic: same inputs, same output.
        let again = render_prompt("Analyze the following.", &fields, Some("raw content"));
        assert_eq!(rendered, again);
    }

    #[test]
    fn test_render_prompt_unbalanced_brace() {
        let mut fields = HashMap::new();
        fields.insert("x".to_string(), "1".to_string());
        let rendered = render_prompt("open { and {x}", &fields, None);
        assert_eq!(rendered, "open { and 1");
    }
}
