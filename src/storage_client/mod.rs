//! Uniform file-fetch contract over heterogeneous network file stores.
//!
//! One adapter per protocol sits behind the `StorageClient` trait; the
//! orchestrator selects the adapter from the credential's protocol. Every
//! result records which probe mode produced it, so a successful connection
//! test can never be mistaken for proof that a target file exists.

use crate::errors::StorageClientError;
use crate::model::{StorageCredential, StorageProtocol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod ftp;
mod http;
mod mounted;

pub use ftp::FtpStorageClient;
pub use http::HttpStorageClient;
pub use mounted::MountedStorageClient;

/// Upper bound on the decoded content preview carried on a `FileInfo`.
pub const PREVIEW_LIMIT_BYTES: usize = 8 * 1024;

/// Which operation produced a `FileInfo`.
///
/// `ConnectionTest` only proves the backend is reachable with the given
/// credential; it says nothing about any particular file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    ConnectionTest,
    FileAccess,
}

/// Descriptor for a probed file or connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub mode: ProbeMode,
    pub exists: bool,
    pub is_directory: bool,
    pub path: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    /// Best-effort decoded preview of the first `PREVIEW_LIMIT_BYTES`.
    pub preview: Option<String>,
    /// Diagnostics: which server and share answered.
    pub server: String,
    pub share: Option<String>,
    pub protocol: StorageProtocol,
}

impl FileInfo {
    pub fn connection_ok(credential: &StorageCredential) -> Self {
        Self {
            mode: ProbeMode::ConnectionTest,
            exists: false,
            is_directory: false,
            path: None,
            size: None,
            content_type: None,
            preview: None,
            server: credential.server.clone(),
            share: credential.share.clone(),
            protocol: credential.protocol,
        }
    }
}

/// Bound a raw byte slice to the preview limit, decoding lossily.
pub(crate) fn preview_from_bytes(bytes: &[u8]) -> String {
    let bounded = &bytes[..bytes.len().min(PREVIEW_LIMIT_BYTES)];
    String::from_utf8_lossy(bounded).into_owned()
}

/// Common contract for all protocol adapters.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Fetch metadata and a bounded preview for a single file.
    async fn fetch_file(
        &self,
        credential: &StorageCredential,
        path: &str,
        timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError>;

    /// Verify the credential can reach the backend without touching any
    /// real file. The result carries `ProbeMode::ConnectionTest`.
    async fn test_connection(
        &self,
        credential: &StorageCredential,
        timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError>;
}

/// Select the adapter for a credential's protocol.
pub fn client_for(
    protocol: StorageProtocol,
    http_client: Arc<reqwest::Client>,
) -> Arc<dyn StorageClient> {
    match protocol {
        StorageProtocol::Http | StorageProtocol::Webdav => {
            Arc::new(HttpStorageClient::new(http_client))
        }
        StorageProtocol::Smb | StorageProtocol::Nfs => Arc::new(MountedStorageClient::new()),
        StorageProtocol::Ftp => Arc::new(FtpStorageClient::new()),
    }
}
