//! HTTP and WebDAV adapter.
//!
//! Files are addressed as URLs relative to the credential's server base.
//! WebDAV servers are spoken to with plain GET plus basic auth, which is
//! all the fetch contract needs.

use super::{FileInfo, ProbeMode, StorageClient, preview_from_bytes};
use crate::errors::StorageClientError;
use crate::model::StorageCredential;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

pub struct HttpStorageClient {
    http_client: Arc<reqwest::Client>,
}

impl HttpStorageClient {
    pub fn new(http_client: Arc<reqwest::Client>) -> Self {
        Self { http_client }
    }

    fn file_url(credential: &StorageCredential, path: &str) -> String {
        let base = credential.server.trim_end_matches('/');
        let relative = path.trim_start_matches('/');
        format!("{}/{}", base, relative)
    }

    fn apply_auth(
        &self,
        request: reqwest::RequestBuilder,
        credential: &StorageCredential,
    ) -> reqwest::RequestBuilder {
        match &credential.username {
            Some(username) => request.basic_auth(username, credential.password.as_deref()),
            None => request,
        }
    }

    async fn classify_response(
        response: reqwest::Response,
        credential: &StorageCredential,
        path: &str,
        mode: ProbeMode,
    ) -> Result<FileInfo, StorageClientError> {
        let status = response.status();

        if status.as_u16() == 404 {
            if mode == ProbeMode::FileAccess {
                return Err(StorageClientError::FileNotFound {
                    path: path.to_string(),
                });
            }
            // A 404 on the bare server base still proves reachability.
            return Ok(FileInfo::connection_ok(credential));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(StorageClientError::AuthFailed {
                server: credential.server.clone(),
                details: format!("HTTP {}", status.as_u16()),
            });
        }

        if !status.is_success() {
            return Err(StorageClientError::Network {
                server: credential.server.clone(),
                details: format!("HTTP {}", status.as_u16()),
            });
        }

        if mode == ProbeMode::ConnectionTest {
            return Ok(FileInfo::connection_ok(credential));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let declared_size = response.content_length();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageClientError::Network {
                server: credential.server.clone(),
                details: e.to_string(),
            })?;

        Ok(FileInfo {
            mode: ProbeMode::FileAccess,
            exists: true,
            is_directory: false,
            path: Some(path.to_string()),
            size: declared_size.or(Some(bytes.len() as u64)),
            content_type,
            preview: Some(preview_from_bytes(&bytes)),
            server: credential.server.clone(),
            share: credential.share.clone(),
            protocol: credential.protocol,
        })
    }

    async fn probe(
        &self,
        credential: &StorageCredential,
        url: &str,
        path: &str,
        mode: ProbeMode,
        timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError> {
        debug!(storage.url = %url, storage.mode = ?mode, "Probing HTTP storage");

        let request = self.apply_auth(self.http_client.get(url), credential);

        let response = match timeout(Duration::from_millis(timeout_ms), request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return Err(StorageClientError::Network {
                    server: credential.server.clone(),
                    details: e.to_string(),
                });
            }
            Err(_) => {
                return Err(StorageClientError::Timeout {
                    path: path.to_string(),
                    timeout_ms,
                });
            }
        };

        Self::classify_response(response, credential, path, mode).await
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn fetch_file(
        &self,
        credential: &StorageCredential,
        path: &str,
        timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError> {
        let url = Self::file_url(credential, path);
        self.probe(credential, &url, path, ProbeMode::FileAccess, timeout_ms)
            .await
    }

    async fn test_connection(
        &self,
        credential: &StorageCredential,
        timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError> {
        let url = credential.server.trim_end_matches('/').to_string();
        self.probe(credential, &url, "", ProbeMode::ConnectionTest, timeout_ms)
            .await
    }
}
