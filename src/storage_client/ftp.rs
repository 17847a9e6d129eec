//! FTP adapter placeholder.
//!
//! FTP shares are not yet reachable from this service; the adapter exists
//! so protocol selection stays total and FTP credentials fail with a
//! classified error instead of a panic.
//! TODO: wire up a real FTP transfer once an async FTP client is vetted.

use super::{FileInfo, StorageClient};
use crate::errors::StorageClientError;
use crate::model::StorageCredential;
use async_trait::async_trait;

pub struct FtpStorageClient;

impl FtpStorageClient {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FtpStorageClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageClient for FtpStorageClient {
    async fn fetch_file(
        &self,
        _credential: &StorageCredential,
        _path: &str,
        _timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError> {
        Err(StorageClientError::UnsupportedProtocol {
            protocol: "ftp".to_string(),
        })
    }

    async fn test_connection(
        &self,
        _credential: &StorageCredential,
        _timeout_ms: u64,
    ) -> Result<FileInfo, StorageClientError> {
        Err(StorageClientError::UnsupportedProtocol {
            protocol: "ftp".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::model::StorageProtocol;

    #[tokio::test]
    async fn test_ftp_is_unsupported() {
        let credential = StorageCredential {
            id: "s1".to_string(),
            protocol: StorageProtocol::Ftp,
            server: "ftp.internal".to_string(),
            share: None,
            username: None,
            password: None,
            mount_point: None,
        };

        let client = FtpStorageClient::new();
        let err = client
            .fetch_file(&credential, "file.txt", 1000)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = client.test_connection(&credential, 1000).await.unwrap_err();
        assert!(matches!(err, StorageClientError::UnsupportedProtocol { .. }));
    }
}
