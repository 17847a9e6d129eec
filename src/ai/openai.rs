//! OpenAI-compatible chat completions request shape.
//!
//! Also serves providers configured as `Other`, which speak this dialect
//! by convention.

use super::{AnalysisParams, ImageAttachment, ProviderRequest, TokenUsage};
use crate::errors::AiError;
use crate::model::AiModelConfig;
use serde_json::{Value, json};

pub(crate) fn build_request(
    model: &AiModelConfig,
    prompt: &str,
    images: &[&ImageAttachment],
    params: &AnalysisParams,
) -> ProviderRequest {
    let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

    let content = if images.is_empty() {
        Value::String(prompt.to_string())
    } else {
        let mut parts = vec![json!({"type": "text", "text": prompt})];
        for image in images {
            parts.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", image.media_type, image.data_base64),
                },
            }));
        }
        Value::Array(parts)
    };

    let mut body = json!({
        "model": model.model,
        "messages": [{"role": "user", "content": content}],
    });

    if let Some(temperature) = params.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = params.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    ProviderRequest {
        url,
        headers: vec![("Authorization", format!("Bearer {}", model.api_key))],
        body,
    }
}

pub(crate) fn parse_response(body: &Value) -> Result<(String, Option<TokenUsage>), AiError> {
    let text = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| AiError::MalformedResponse {
            details: "response carries no choices[0].message.content".to_string(),
        })?
        .to_string();

    let usage = body.get("usage").and_then(|u| {
        let prompt = u.get("prompt_tokens")?.as_u64()? as u32;
        let completion = u.get("completion_tokens")?.as_u64()? as u32;
        let total = u
            .get("total_tokens")
            .and_then(|t| t.as_u64())
            .map(|t| t as u32)
            .unwrap_or(prompt + completion);
        Some(TokenUsage::reported(prompt, completion, total))
    });

    Ok((text, usage))
}
