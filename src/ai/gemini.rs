//! Gemini generateContent request shape.

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
    let url = format!(
        "{}/models/{}:generateContent?key={}",
        model.base_url.trim_end_matches('/'),
        model.model,
        model.api_key
    );

    let mut parts = vec![json!({"text": prompt})];
    for image in images {
        parts.push(json!({
            "inline_data": {
                "mime_type": image.media_type,
                "data": image.data_base64,
            },
        }));
    }

    let mut generation_config = json!({});
    if let Some(temperature) = params.temperature {
        generation_config["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = params.max_tokens {
        generation_config["maxOutputTokens"] = json!(max_tokens);
    }

    let body = json!({
        "contents": [{"parts": parts}],
        "generationConfig": generation_config,
    });

    ProviderRequest {
        url,
        headers: Vec::new(),
        body,
    }
}

pub(crate) fn parse_response(body: &Value) -> Result<(String, Option<TokenUsage>), AiError> {
    let text = body
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AiError::MalformedResponse {
            details: "response carries no candidates[0].content.parts text".to_string(),
        })?;

    let usage = body.get("usageMetadata").and_then(|u| {
        let prompt = u.get("promptTokenCount")?.as_u64()? as u32;
        let completion = u
            .get("candidatesTokenCount")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u32;
        let total = u
            .get("totalTokenCount")
            .and_then(|t| t.as_u64())
            .map(|t| t as u32)
            .unwrap_or(prompt + completion);
        Some(TokenUsage::reported(prompt, completion, total))
    });

    Ok((text, usage))
}
