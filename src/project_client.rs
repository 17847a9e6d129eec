//! Authenticated client for the project-management system's open API.
//!
//! Handles plugin token acquisition with caching, work item field queries
//! (with the multi-text expansion the rich-text resolver needs), field
//! updates, and attachment downloads.

use crate::errors::ProjectError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

/// Refresh the cached plugin token this long before it expires.
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

/// Source of a valid API token. Credentials are passed in explicitly when
/// the provider is constructed; nothing here reads ambient state.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_valid_token(&self) -> Result<String, ProjectError>;
}

/// Fixed token, for tests and pre-issued tokens.
pub struct StaticTokenProvider(pub String);

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_valid_token(&self) -> Result<String, ProjectError> {
        Ok(self.0.clone())
    }
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges plugin id/secret for a plugin token and caches it until it
/// nears expiry.
pub struct PluginTokenProvider {
    http_client: Arc<reqwest::Client>,
    base_url: String,
    plugin_id: String,
    plugin_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl PluginTokenProvider {
    pub fn new(
        http_client: Arc<reqwest::Client>,
        base_url: String,
        plugin_id: String,
        plugin_secret: String,
    ) -> Self {
        Self {
            http_client,
            base_url,
            plugin_id,
            plugin_secret,
            cached: Mutex::new(None),
        }
    }

    async fn fetch_token(&self) -> Result<CachedToken, ProjectError> {
        let url = format!(
            "{}/open_api/authen/plugin_token",
            self.base_url.trim_end_matches('/')
        );

        let response = self
            .http_client
            .post(&url)
            .json(&json!({
                "plugin_id": self.plugin_id,
                "plugin_secret": self.plugin_secret,
                "type": 0,
            }))
            .send()
            .await
            .map_err(|e| ProjectError::TokenAcquisitionFailed {
                details: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body: Value =
            response
                .json()
                .await
                .map_err(|e| ProjectError::TokenAcquisitionFailed {
                    details: e.to_string(),
                })?;

        if status != 200 {
            return Err(ProjectError::TokenAcquisitionFailed {
                details: format!("HTTP {}: {}", status, body),
            });
        }

        let token = body
            .get("data")
            .and_then(|d| d.get("token"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ProjectError::TokenAcquisitionFailed {
                details: "response carries no data.token".to_string(),
            })?
            .to_string();

        let expire_seconds = body
            .get("data")
            .and_then(|d| d.get("expire_time"))
            .and_then(|e| e.as_i64())
            .unwrap_or(7200);

        Ok(CachedToken {
            token,
            expires_at: Utc::now() + ChronoDuration::seconds(expire_seconds),
        })
    }
}

#[async_trait]
impl TokenProvider for PluginTokenProvider {
    async fn get_valid_token(&self) -> Result<String, ProjectError> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            let margin = ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECONDS);
            if entry.expires_at - margin > Utc::now() {
                return Ok(entry.token.clone());
            }
        }

        debug!("Refreshing project plugin token");
        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Client for work item queries, field updates, and attachment downloads.
pub struct ProjectClient {
    http_client: Arc<reqwest::Client>,
    base_url: String,
    user_key: String,
    token_provider: Arc<dyn TokenProvider>,
}

impl ProjectClient {
    pub fn new(
        http_client: Arc<reqwest::Client>,
        base_url: String,
        user_key: String,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_key,
            token_provider,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_with_timeout(
        &self,
        request: reqwest::RequestBuilder,
        timeout_ms: u64,
    ) -> Result<reqwest::Response, ProjectError> {
        match timeout(Duration::from_millis(timeout_ms), request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ProjectError::Network { source: e }),
            Err(_) => Err(ProjectError::Timeout { timeout_ms }),
        }
    }

    fn check_err_code(body: &Value, status: u16) -> Result<(), ProjectError> {
        let err_code = body.get("err_code").and_then(|c| c.as_i64()).unwrap_or(0);
        if err_code != 0 {
            let err_msg = body
                .get("err_msg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(ProjectError::RequestFailed {
                status,
                details: format!("err_code {}: {}", err_code, err_msg),
            });
        }
        Ok(())
    }

    /// Query one work item, expanding rich-text fields.
    ///
    /// Returns the work item object from the response's `data` array.
    pub async fn query_work_item_fields(
        &self,
        project_key: &str,
        work_item_type_key: &str,
        work_item_id: i64,
        field_keys: &[String],
        timeout_ms: u64,
    ) -> Result<Value, ProjectError> {
        let token = self.token_provider.get_valid_token().await?;
        let url = format!(
            "{}/open_api/{}/work_item/{}/query",
            self.base_url, project_key, work_item_type_key
        );

        debug!(
            project.key = %project_key,
            work_item.id = work_item_id,
            "Querying work item fields"
        );

        let request = self
            .http_client
            .post(&url)
            .header("X-PLUGIN-TOKEN", &token)
            .header("X-USER-KEY", &self.user_key)
            .json(&json!({
                "work_item_ids": [work_item_id],
                "fields": field_keys,
                "expand": {"need_multi_text": true},
            }));

        let response = self.send_with_timeout(request, timeout_ms).await?;
        let status = response.status().as_u16();

        if status == 404 {
            return Err(ProjectError::WorkItemNotFound { work_item_id });
        }
        if status != 200 {
            let details = response.text().await.unwrap_or_default();
            return Err(ProjectError::RequestFailed { status, details });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProjectError::MalformedResponse {
                details: e.to_string(),
            })?;

        Self::check_err_code(&body, status)?;

        body.get("data")
            .and_then(|d| d.as_array())
            .and_then(|items| items.first())
            .cloned()
            .ok_or(ProjectError::WorkItemNotFound { work_item_id })
    }

    /// Update one field on a work item. Last write wins; repeating the call
    /// with identical arguments leaves the field equal to `value`.
    pub async fn update_field(
        &self,
        project_key: &str,
        work_item_type_key: &str,
        work_item_id: i64,
        field_key: &str,
        value: &str,
        timeout_ms: u64,
    ) -> Result<Value, ProjectError> {
        let token = self.token_provider.get_valid_token().await?;
        let url = format!(
            "{}/open_api/{}/work_item/{}/{}",
            self.base_url, project_key, work_item_type_key, work_item_id
        );

        debug!(
            project.key = %project_key,
            work_item.id = work_item_id,
            field.key = %field_key,
            "Updating work item field"
        );

        let request = self
            .http_client
            .put(&url)
            .header("X-PLUGIN-TOKEN", &token)
            .header("X-USER-KEY", &self.user_key)
            .json(&json!({
                "update_fields": [{
                    "field_key": field_key,
                    "field_value": value,
                }],
            }));

        let response = self.send_with_timeout(request, timeout_ms).await?;
        let status = response.status().as_u16();

        if status == 404 {
            return Err(ProjectError::WorkItemNotFound { work_item_id });
        }
        if status != 200 && status != 204 {
            let details = response.text().await.unwrap_or_default();
            return Err(ProjectError::RequestFailed { status, details });
        }

        if status == 204 {
            return Ok(Value::Null);
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        Self::check_err_code(&body, status)?;
        Ok(body)
    }

    /// Download an attachment referenced by a rich-text image. Relative
    /// references are resolved against the API base.
    pub async fn download_attachment(
        &self,
        src: &str,
        timeout_ms: u64,
    ) -> Result<(Vec<u8>, Option<String>), ProjectError> {
        let token = self.token_provider.get_valid_token().await?;
        let url = if src.starts_with("http://") || src.starts_with("https://") {
            src.to_string()
        } else {
            format!("{}/{}", self.base_url, src.trim_start_matches('/'))
        };

        let request = self
            .http_client
            .get(&url)
            .header("X-PLUGIN-TOKEN", &token)
            .header("X-USER-KEY", &self.user_key);

        let response = self.send_with_timeout(request, timeout_ms).await?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ProjectError::RequestFailed {
                status,
                details: format!("attachment download failed for {}", src),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProjectError::Network { source: e })?;

        Ok((bytes.to_vec(), content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> ProjectClient {
        ProjectClient::new(
            Arc::new(reqwest::Client::new()),
            base.to_string(),
            "user-1".to_string(),
            Arc::new(StaticTokenProvider("tok-123".to_string())),
        )
    }

    #[tokio::test]
    async fn test_query_work_item_fields() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open_api/proj/work_item/story/query"))
            .and(header("X-PLUGIN-TOKEN", "tok-123"))
            .and(header("X-USER-KEY", "user-1"))
            .and(body_partial_json(serde_json::json!({
                "work_item_ids": [42],
                "expand": {"need_multi_text": true},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "err_code": 0,
                "data": [{"id": 42, "fields": [{"field_key": "desc", "field_value": "text"}]}],
            })))
            .mount(&mock_server)
            .await;

        let item = client(&mock_server.uri())
            .query_work_item_fields("proj", "story", 42, &["desc".to_string()], 5000)
            .await
            .unwrap();

        assert_eq!(item.get("id").and_then(|v| v.as_i64()), Some(42));
    }

    #[tokio::test]
    async fn test_query_empty_data_is_not_found() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "err_code": 0,
                "data": [],
            })))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server.uri())
            .query_work_item_fields("proj", "story", 7, &[], 5000)
            .await
            .unwrap_err();

        assert!(matches!(err, ProjectError::WorkItemNotFound { work_item_id: 7 }));
    }

    #[tokio::test]
    async fn test_query_err_code_surfaces() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "err_code": 10001,
                "err_msg": "permission denied",
            })))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server.uri())
            .query_work_item_fields("proj", "story", 7, &[], 5000)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_update_field_is_idempotent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/open_api/proj/work_item/story/42"))
            .and(body_partial_json(serde_json::json!({
                "update_fields": [{"field_key": "ai_summary", "field_value": "answer"}],
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"err_code": 0})),
            )
            .expect(2)
            .mount(&mock_server)
            .await;

        let project = client(&mock_server.uri());
        for _ in 0..2 {
            project
                .update_field("proj", "story", 42, "ai_summary", "answer", 5000)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_update_field_accepts_204() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server.uri())
            .update_field("proj", "story", 42, "f", "v", 5000)
            .await
            .unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn test_plugin_token_provider_caches() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/open_api/authen/plugin_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"token": "fresh-token", "expire_time": 7200},
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = PluginTokenProvider::new(
            Arc::new(reqwest::Client::new()),
            mock_server.uri(),
            "plugin-id".to_string(),
            "plugin-secret".to_string(),
        );

        let first = provider.get_valid_token().await.unwrap();
        let second = provider.get_valid_token().await.unwrap();
        assert_eq!(first, "fresh-token");
        assert_eq!(second, "fresh-token");
    }

    #[tokio::test]
    async fn test_plugin_token_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let provider = PluginTokenProvider::new(
            Arc::new(reqwest::Client::new()),
            mock_server.uri(),
            "id".to_string(),
            "secret".to_string(),
        );

        let err = provider.get_valid_token().await.unwrap_err();
        assert!(matches!(err, ProjectError::TokenAcquisitionFailed { .. }));
    }

    #[tokio::test]
    async fn test_download_attachment() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attachments/img-1.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&mock_server)
            .await;

        let (bytes, content_type) = client(&mock_server.uri())
            .download_attachment("attachments/img-1.png", 5000)
            .await
            .unwrap();

        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(content_type.as_deref(), Some("image/png"));
    }
}
