//! AI invocation gateway.
//!
//! Normalizes calls across provider families behind one `analyze` entry
//! point: provider-specific request shaping lives in the per-provider
//! modules, while proxying, timeouts, multimodal assembly, and token
//! accounting are handled here once.

use crate::errors::AiError;
use crate::model::{AiModelConfig, ProviderKind};
use crate::richtext::RichTextImage;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

mod claude;
mod gemini;
mod openai;

/// Token counts for one provider call. `estimated` is true when the
/// provider omitted usage data and the counts are a conservative guess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated: bool,
}

impl TokenUsage {
    pub fn reported(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            estimated: false,
        }
    }

    /// Rough chars/4 fallback when the provider reports nothing.
    pub fn estimate(prompt: &str, response: &str) -> Self {
        let prompt_tokens = prompt.len().div_ceil(4) as u32;
        let completion_tokens = response.len().div_ceil(4) as u32;
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated: true,
        }
    }
}

/// Result of one provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResult {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub provider: ProviderKind,
}

/// Per-call parameters taken from the task configuration.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: u64,
}

/// An image resolved to bytes, ready for provider-specific embedding.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub reference: String,
    pub media_type: String,
    pub data_base64: String,
}

/// One assembled attachment: resolved bytes, or a reference whose download
/// failed and degrades to a textual placeholder.
#[derive(Debug, Clone)]
pub enum ImagePart {
    Resolved(ImageAttachment),
    Unavailable(String),
}

impl ImagePart {
    pub fn placeholder(reference: &str) -> String {
        format!("[image unavailable: {}]", reference)
    }
}

/// Resolves image references to bytes for multimodal assembly.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, image: &RichTextImage) -> anyhow::Result<(Vec<u8>, Option<String>)>;
}

/// Download each image, degrading individual failures to placeholders so
/// one broken attachment never aborts the whole call.
pub async fn assemble_attachments(
    fetcher: &dyn ImageFetcher,
    images: &[RichTextImage],
) -> Vec<ImagePart> {
    let mut parts = Vec::with_capacity(images.len());

    for image in images {
        let reference = image.reference();
        match fetcher.fetch(image).await {
            Ok((bytes, content_type)) => {
                parts.push(ImagePart::Resolved(ImageAttachment {
                    reference,
                    media_type: content_type.unwrap_or_else(|| "image/png".to_string()),
                    data_base64: BASE64.encode(&bytes),
                }));
            }
            Err(e) => {
                warn!(
                    image.reference = %reference,
                    error = %e,
                    "Image download failed, degrading to placeholder"
                );
                parts.push(ImagePart::Unavailable(reference));
            }
        }
    }

    parts
}

/// Append placeholders for unavailable attachments to the prompt text so
/// the model is told what is missing.
pub fn prompt_with_placeholders(prompt: &str, parts: &[ImagePart]) -> String {
    let mut rendered = prompt.to_string();
    for part in parts {
        if let ImagePart::Unavailable(reference) = part {
            rendered.push('\n');
            rendered.push_str(&ImagePart::placeholder(reference));
        }
    }
    rendered
}

fn resolved_attachments(parts: &[ImagePart]) -> Vec<&ImageAttachment> {
    parts
        .iter()
        .filter_map(|p| match p {
            ImagePart::Resolved(attachment) => Some(attachment),
            ImagePart::Unavailable(_) => None,
        })
        .collect()
}

/// Provider-shaped request ready to send.
pub(crate) struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

/// The gateway itself. Shares one pooled client; proxied models get a
/// dedicated client built per call.
pub struct AiGateway {
    http_client: Arc<reqwest::Client>,
}

impl AiGateway {
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }

    fn client_for_model(
        &self,
        model: &AiModelConfig,
    ) -> Result<Arc<reqwest::Client>, AiError> {
        if !model.use_proxy {
            return Ok(self.http_client.clone());
        }

        let proxy_url = model.proxy_url.as_deref().ok_or_else(|| AiError::Proxy {
            details: "use_proxy is set but proxy_url is empty".to_string(),
        })?;

        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| AiError::Proxy {
            details: format!("{}: {}", proxy_url, e),
        })?;

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .build()
            .map_err(|e| AiError::Proxy {
                details: e.to_string(),
            })?;

        Ok(Arc::new(client))
    }

    /// Run one analysis call against the configured provider.
    pub async fn analyze(
        &self,
        model: &AiModelConfig,
        prompt: &str,
        attachments: &[ImagePart],
        params: &AnalysisParams,
    ) -> Result<AiResult, AiError> {
        let full_prompt = prompt_with_placeholders(prompt, attachments);
        let images = resolved_attachments(attachments);

        let request = match model.provider {
            ProviderKind::OpenAiCompatible | ProviderKind::Other => {
                openai::build_request(model, &full_prompt, &images, params)
            }
            ProviderKind::Gemini => gemini::build_request(model, &full_prompt, &images, params),
            ProviderKind::Claude => claude::build_request(model, &full_prompt, &images, params),
        };

        debug!(
            ai.provider = %model.provider,
            ai.model = %model.model,
            ai.images = images.len(),
            ai.proxied = model.use_proxy,
            "Dispatching provider call"
        );

        let client = self.client_for_model(model)?;

        let mut builder = client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = match timeout(Duration::from_millis(params.timeout_ms), builder.send())
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                if model.use_proxy && e.is_connect() {
                    return Err(AiError::Proxy {
                        details: e.to_string(),
                    });
                }
                return Err(AiError::Network { source: e });
            }
            Err(_) => {
                return Err(AiError::Timeout {
                    timeout_ms: params.timeout_ms,
                });
            }
        };

        let status = response.status().as_u16();
        if status != 200 {
            let details = response.text().await.unwrap_or_default();
            return Err(AiError::RequestFailed { status, details });
        }

        let body: Value = response.json().await.map_err(|e| AiError::MalformedResponse {
            details: e.to_string(),
        })?;

        let (text, usage) = match model.provider {
            ProviderKind::OpenAiCompatible | ProviderKind::Other => openai::parse_response(&body)?,
            ProviderKind::Gemini => gemini::parse_response(&body)?,
            ProviderKind::Claude => claude::parse_response(&body)?,
        };

        let usage = usage.unwrap_or_else(|| TokenUsage::estimate(&full_prompt, &text));

        Ok(AiResult {
            text,
            usage,
            model: model.model.clone(),
            provider: model.provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model(provider: ProviderKind, base_url: &str) -> AiModelConfig {
        AiModelConfig {
            id: "m1".to_string(),
            provider,
            base_url: base_url.to_string(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            use_proxy: false,
            proxy_url: None,
        }
    }

    fn params() -> AnalysisParams {
        AnalysisParams {
            temperature: Some(0.2),
            max_tokens: Some(256),
            timeout_ms: 5000,
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl ImageFetcher for FailingFetcher {
        async fn fetch(
            &self,
            _image: &RichTextImage,
        ) -> anyhow::Result<(Vec<u8>, Option<String>)> {
            anyhow::bail!("download refused")
        }
    }

    struct AlternatingFetcher;

    #[async_trait]
    impl ImageFetcher for AlternatingFetcher {
        async fn fetch(&self, image: &RichTextImage) -> anyhow::Result<(Vec<u8>, Option<String>)> {
            if image.reference() == "good" {
                Ok((vec![1, 2, 3], Some("image/png".to_string())))
            } else {
                anyhow::bail!("gone")
            }
        }
    }

    #[test]
    fn test_token_usage_estimation() {
        let usage = TokenUsage::estimate("abcdefgh", "xyz");
        assert_eq!(usage.prompt_tokens, 2);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, 3);
        assert!(usage.estimated);
    }

    #[tokio::test]
    async fn test_assembly_degrades_per_image() {
        let images = vec![
            RichTextImage {
                uuid: Some("good".to_string()),
                src: None,
                width: None,
            },
            RichTextImage {
                uuid: Some("bad".to_string()),
                src: None,
                width: None,
            },
        ];

        let parts = assemble_attachments(&AlternatingFetcher, &images).await;
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[0], ImagePart::Resolved(_)));
        assert!(matches!(parts[1], ImagePart::Unavailable(_)));

        let prompt = prompt_with_placeholders("context", &parts);
        assert!(prompt.contains("[image unavailable: bad]"));
        assert!(!prompt.contains("[image unavailable: good]"));
    }

    #[tokio::test]
    async fn test_all_failures_still_produce_placeholders() {
        let images = vec![RichTextImage {
            uuid: None,
            src: Some("attachments/x.png".to_string()),
            width: None,
        }];

        let parts = assemble_attachments(&FailingFetcher, &images).await;
        let prompt = prompt_with_placeholders("p", &parts);
        assert!(prompt.contains("[image unavailable: attachments/x.png]"));
    }

    #[tokio::test]
    async fn test_analyze_openai_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "the answer"}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15},
            })))
            .mount(&mock_server)
            .await;

        let gateway = AiGateway::new(Arc::new(reqwest::Client::new()));
        let result = gateway
            .analyze(
                &model(ProviderKind::OpenAiCompatible, &mock_server.uri()),
                "Summarize: hello",
                &[],
                &params(),
            )
            .await
            .unwrap();

        assert_eq!(result.text, "the answer");
        assert_eq!(result.usage, TokenUsage::reported(12, 3, 15));
    }

    #[tokio::test]
    async fn test_analyze_other_uses_openai_shape() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}],
            })))
            .mount(&mock_server)
            .await;

        let gateway = AiGateway::new(Arc::new(reqwest::Client::new()));
        let result = gateway
            .analyze(
                &model(ProviderKind::Other, &mock_server.uri()),
                "p",
                &[],
                &params(),
            )
            .await
            .unwrap();

        // No usage block in the response, so counts are estimated.
        assert!(result.usage.estimated);
    }

    #[tokio::test]
    async fn test_analyze_timeout_is_distinct() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&mock_server)
            .await;

        let gateway = AiGateway::new(Arc::new(reqwest::Client::new()));
        let mut fast = params();
        fast.timeout_ms = 50;

        let err = gateway
            .analyze(
                &model(ProviderKind::OpenAiCompatible, &mock_server.uri()),
                "p",
                &[],
                &fast,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn test_analyze_rate_limited() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&mock_server)
            .await;

        let gateway = AiGateway::new(Arc::new(reqwest::Client::new()));
        let err = gateway
            .analyze(
                &model(ProviderKind::OpenAiCompatible, &mock_server.uri()),
                "p",
                &[],
                &params(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::RequestFailed { status: 429, .. }));
        assert_eq!(err.kind(), crate::errors::ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_proxy_required_but_missing() {
        let gateway = AiGateway::new(Arc::new(reqwest::Client::new()));
        let mut proxied = model(ProviderKind::OpenAiCompatible, "http://localhost:9");
        proxied.use_proxy = true;
        proxied.proxy_url = None;

        let err = gateway
            .analyze(&proxied, "p", &[], &params())
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::Proxy { .. }));
    }
}
