//! Claude messages API request shape.

use super::{AnalysisParams, ImageAttachment, ProviderRequest, TokenUsage};
use crate::errors::AiError;
use crate::model::AiModelConfig;
use serde_json::{Value, json};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub(crate) fn build_request(
    model: &AiModelConfig,
    prompt: &str,
    images: &[&ImageAttachment],
    params: &AnalysisParams,
) -> ProviderRequest {
    let url = format!("{}/messages", model.base_url.trim_end_matches('/'));

    let content = if images.is_empty() {
        Value::String(prompt.to_string())
    } else {
        let mut parts: Vec<Value> = images
            .iter()
            .map(|image| {
                json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image.media_type,
                        "data": image.data_base64,
                    },
                })
            })
            .collect();
        parts.push(json!({"type": "text", "text": prompt}));
        Value::Array(parts)
    };

    // max_tokens is mandatory for this API.
    let mut body = json!({
        "model": model.model,
        "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": [{"role": "user", "content": content}],
    });

    if let Some(temperature) = params.temperature {
        body["temperature"] = json!(temperature);
    }

    ProviderRequest {
        url,
        headers: vec![
            ("x-api-key", model.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ],
        body,
    }
}

pub(crate) fn parse_response(body: &Value) -> Result<(String, Option<TokenUsage>), AiError> {
    let text = body
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AiError::MalformedResponse {
            details: "response carries no text content blocks".to_string(),
        })?;

    let usage = body.get("usage").and_then(|u| {
        let prompt = u.get("input_tokens")?.as_u64()? as u32;
        let completion = u.get("output_tokens")?.as_u64()? as u32;
        Some(TokenUsage::reported(prompt, completion, prompt + completion))
    });

    Ok((text, usage))
}
