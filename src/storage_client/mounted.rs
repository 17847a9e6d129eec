//! SMB/NFS adapter over host-mounted shares.
//!
//! The share is expected to be mounted by the host at the credential's
//! `mount_point`; file access is plain filesystem I/O under that root.

use super::{FileInfo, PREVIEW_LIMIT_BYTES, ProbeMode, StorageClient, preview_from_bytes};
use crate::errors::StorageClientError;
use crate::model::StorageCredential;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;
use tracing::debug;

pub struct MountedStorageClient;

impl MountedStorageClient {
    pub fn new() -> Self {
        Self
    }

    fn mount_point(credential: &StorageCredential) -> Result<&str, StorageClientError> {
        credential
            .mount_point
            .as_deref()
            .ok_or_else(|| StorageClientError::MountUnavailable {
                mount_point: String::new(),
                details: "credential has no mount_point configured".to_string(),
            })
    }

    fn resolve(mount_point: &str, path: &str) -> PathBuf {
        Path::new(mount_point).join(path.trim_start_matches('/'))
    }

    fn guess_content_type(path: &Path) -> Option<String> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        let content_type = match extension.as_str() {
            "txt" | "log" | "md" => "text/plain",
            "json" => "application/json",
            "csv" => "text/csv",
            "html" | "htm" => "text/html",
            "xml" => "application/xml",
            "pdf" => "application/pdf",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            _ => return None,
        };
        Some(content_type.to_string())
    }

    fn map_io_error(
        error: std::io::Error,
        credential: &StorageCredential,
        path: &str,
    ) -> StorageClientError {
        match error.kind() {
            IoErrorKind::NotFound => StorageClientError::FileNotFound {
                path: path.to_string(),
            },
            IoErrorKind::PermissionDenied => StorageClientError::AuthFailed {
                server: credential.server.clone(),
                details: error.to_string(),
            },
            _ => StorageClientError::Network {
                server: credential.server.clone(),
                details: error.to_string(),
            },
        }
    }

    async fn read_file_info(
        credential: &StorageCredential,
        full_path: &Path,
        path: &str,
    ) -> Result<FileInfo, StorageClientError> {
        let metadata = tokio::fs::metadata(full_path)
            .await
            .map_err(|e| Self::map_io_error(e, credential, path))?;

        if metadata.is_dir() {
            return Ok(FileInfo {
                mode: ProbeMode::FileAccess,
                exists: true,
                is_directory: true,
                path: Some(path.to_string()),
                size: None,
                content_type: None,
                preview: None,
                server: credential.server.clone(),
                share: credential.share.clone(),
                protocol: credential.protocol,
            });
        }

        let mut file = tokio::fs::File::open(full_path)
            .await
            .map_err(|e| Self::map_io_error(e, credential, path))?;

        let mut buffer = vec![0u8; PREVIEW_LIMIT_BYTES];
        let mut read_total = 0;
        while read_total < buffer.len() {
            let n = file
                .read(&mut buffer[read_total..])
                .await
                .map_err(|e| Self::map_io_error(e, credential, path))?;
            if n == 0 {
                break;
            }
            read_total += n;
        }
        buffer.truncate(read_total);

        Ok(FileInfo {
            mode: ProbeMode::FileAccess,
            exists: true,
            is_directory: false,
            path: Some(path.to_string()),
            size: Some(metadata.len()),
            content_type: Self::guess_content_type(full_path),
            preview: Some(preview_from_bytes(&buffer)),
            server: credential.server.clone(),
            share: credential.share.clone(),
            protocol: credential.protocol,
        })
    }
}

impl Default for MountedStorageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for MountedStorageClient {
    async fn fetch_file(
        &self,
        credential: &StorageCredential,
        path: &str,
        timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError> {
        let mount_point = Self::mount_point(credential)?;
        let full_path = Self::resolve(mount_point, path);

        debug!(
            storage.path = %full_path.display(),
            storage.protocol = %credential.protocol,
            "Reading file from mounted share"
        );

        match timeout(
            Duration::from_millis(timeout_ms),
            Self::read_file_info(credential, &full_path, path),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StorageClientError::Timeout {
                path: path.to_string(),
                timeout_ms,
            }),
        }
    }

    async fn test_connection(
        &self,
        credential: &StorageCredential,
        timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError> {
        let mount_point = Self::mount_point(credential)?;

        let probe = async {
            match tokio::fs::metadata(mount_point).await {
                Ok(metadata) if metadata.is_dir() => Ok(FileInfo::connection_ok(credential)),
                Ok(_) => Err(StorageClientError::MountUnavailable {
                    mount_point: mount_point.to_string(),
                    details: "mount point is not a directory".to_string(),
                }),
                Err(e) => Err(StorageClientError::MountUnavailable {
                    mount_point: mount_point.to_string(),
                    details: e.to_string(),
                }),
            }
        };

        match timeout(Duration::from_millis(timeout_ms), probe).await {
            Ok(result) => result,
            Err(_) => Err(StorageClientError::Timeout {
                path: mount_point.to_string(),
                timeout_ms,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StorageProtocol;
    use ulid::Ulid;

    fn credential(mount_point: &std::path::Path) -> StorageCredential {
        StorageCredential {
            id: "s1".to_string(),
            protocol: StorageProtocol::Smb,
            server: "files.internal".to_string(),
            share: Some("reports".to_string()),
            username: None,
            password: None,
            mount_point: Some(mount_point.display().to_string()),
        }
    }

    #[tokio::test]
    async fn test_fetch_existing_file() {
        let temp_dir = std::env::temp_dir().join(format!("fieldflow_test_{}", Ulid::new()));
        tokio::fs::create_dir_all(&temp_dir).await.unwrap();
        tokio::fs::write(temp_dir.join("report.txt"), "quarterly numbers")
            .await
            .unwrap();

        let client = MountedStorageClient::new();
        let info = client
            .fetch_file(&credential(&temp_dir), "report.txt", 5000)
            .await
            .unwrap();

        assert_eq!(info.mode, ProbeMode::FileAccess);
        assert!(info.exists);
        assert!(!info.is_directory);
        assert_eq!(info.size, Some(17));
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
        assert_eq!(info.preview.as_deref(), Some("quarterly numbers"));

        let _ = tokio::fs::remove_dir_all(&temp_dir).await;
    }

    #[tokio::test]
    async fn test_fetch_missing_file() {
        let temp_dir = std::env::temp_dir().join(format!("fieldflow_test_{}", Ulid::new()));
        tokio::fs::create_dir_all(&temp_dir).await.unwrap();

        let client = MountedStorageClient::new();
        let err = client
            .fetch_file(&credential(&temp_dir), "absent.txt", 5000)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageClientError::FileNotFound { .. }));

        let _ = tokio::fs::remove_dir_all(&temp_dir).await;
    }

    #[tokio::test]
    async fn test_fetch_directory() {
        let temp_dir = std::env::temp_dir().join(format!("fieldflow_test_{}", Ulid::new()));
        tokio::fs::create_dir_all(temp_dir.join("subdir")).await.unwrap();

        let client = MountedStorageClient::new();
        let info = client
            .fetch_file(&credential(&temp_dir), "subdir", 5000)
            .await
            .unwrap();

        assert!(info.exists);
        assert!(info.is_directory);
        assert!(info.preview.is_none());

        let _ = tokio::fs::remove_dir_all(&temp_dir).await;
    }

    #[tokio::test]
    async fn test_connection_test_requires_mount() {
        let missing = std::env::temp_dir().join(format!("fieldflow_missing_{}", Ulid::new()));

        let client = MountedStorageClient::new();
        let err = client
            .test_connection(&credential(&missing), 5000)
            .await
            .unwrap_err();

        assert!(matches!(err, StorageClientError::MountUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_connection_test_success() {
        let temp_dir = std::env::temp_dir().join(format!("fieldflow_test_{}", Ulid::new()));
        tokio::fs::create_dir_all(&temp_dir).await.unwrap();

        let client = MountedStorageClient::new();
        let info = client
            .test_connection(&credential(&temp_dir), 5000)
            .await
            .unwrap();

        assert_eq!(info.mode, ProbeMode::ConnectionTest);
        assert!(!info.exists);

        let _ = tokio::fs::remove_dir_all(&temp_dir).await;
    }

    #[tokio::test]
    async fn test_missing_mount_point_config() {
        let mut cred = credential(std::path::Path::new("/tmp"));
        cred.mount_point = None;

        let client = MountedStorageClient::new();
        let err = client.fetch_file(&cred, "x.txt", 5000).await.unwrap_err();
        assert!(matches!(err, StorageClientError::MountUnavailable { .. }));
    }
}
