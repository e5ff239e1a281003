//! Storage gateway backed by per-blob SAS URLs.
//!
//! Each operation first asks the access service for a short-lived SAS URL
//! scoped to one blob, authenticating with the job's bearer token, then talks
//! to the blob URL directly.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Body, Client, Response};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::config::StorageConfig;
use super::error::StorageError;
use super::traits::StorageGateway;
use crate::job::IdToken;
use crate::metrics;

const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";
const BLOB_TYPE_BLOCK: &str = "BlockBlob";

/// REST client for the SAS-issuing access service and blob storage.
pub struct SasStorageGateway {
    client: Client,
    config: StorageConfig,
}

impl SasStorageGateway {
    /// Create a new gateway with the given configuration.
    pub fn new(config: StorageConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    /// Obtains a SAS URL for `remote_path`.
    async fn sas_url(&self, remote_path: &str, token: &IdToken) -> Result<String, StorageError> {
        let url = format!(
            "{}/api/GetUserBlobSasUrl?blobPath={}",
            self.base_url(),
            urlencoding::encode(remote_path)
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| StorageError::transfer(remote_path, e.to_string()))?;
        let response = check_status(remote_path, response)?;

        let sas_url = response
            .text()
            .await
            .map_err(|e| StorageError::transfer(remote_path, e.to_string()))?
            .trim()
            .to_string();

        if sas_url.is_empty() {
            return Err(StorageError::transfer(remote_path, "empty SAS URL"));
        }
        Ok(sas_url)
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        token: &IdToken,
    ) -> Result<u64, StorageError> {
        let sas_url = self.sas_url(remote_path, token).await?;

        let response = self
            .client
            .get(&sas_url)
            .send()
            .await
            .map_err(|e| StorageError::transfer(remote_path, e.to_string()))?;
        let mut response = check_status(remote_path, response)?;
        let expected = response.content_length();

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        let part_path = part_path(local_path);
        let written = match write_body(remote_path, &part_path, &mut response, expected).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&part_path, local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;

        debug!(remote_path, bytes = written, "Downloaded blob");
        Ok(written)
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        token: &IdToken,
    ) -> Result<(), StorageError> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(local_path, e))?
            .len();

        // Put Blob rejects chunked uploads, so the length is sent up front
        let sas_url = self.sas_url(remote_path, token).await?;
        let response = self
            .client
            .put(&sas_url)
            .header(BLOB_TYPE_HEADER, BLOB_TYPE_BLOCK)
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| StorageError::transfer(remote_path, e.to_string()))?;
        check_status(remote_path, response)?;

        debug!(remote_path, bytes = size, "Uploaded blob");
        Ok(())
    }

    async fn delete(&self, remote_path: &str, token: &IdToken) -> Result<bool, StorageError> {
        let sas_url = self.sas_url(remote_path, token).await?;
        let response = self
            .client
            .delete(&sas_url)
            .send()
            .await
            .map_err(|e| StorageError::transfer(remote_path, e.to_string()))?;

        Ok(response.status().as_u16() == 202)
    }
}

#[async_trait]
impl StorageGateway for SasStorageGateway {
    async fn fetch(
        &self,
        remote_path: &str,
        local_path: &Path,
        token: &IdToken,
    ) -> Result<u64, StorageError> {
        let result = self.download(remote_path, local_path, token).await;
        metrics::record_storage_request("fetch", result.as_ref().err());
        result
    }

    async fn publish(
        &self,
        local_path: &Path,
        remote_path: &str,
        token: &IdToken,
    ) -> Result<(), StorageError> {
        let result = self.upload(local_path, remote_path, token).await;
        metrics::record_storage_request("publish", result.as_ref().err());
        result
    }

    async fn remove(&self, remote_path: &str, token: &IdToken) -> bool {
        match self.delete(remote_path, token).await {
            Ok(removed) => {
                metrics::record_storage_request("remove", None);
                removed
            }
            Err(e) => {
                metrics::record_storage_request("remove", Some(&e));
                warn!(remote_path, error = %e, "Failed to remove blob");
                false
            }
        }
    }
}

fn check_status(remote_path: &str, response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StorageError::from_status(remote_path, status.as_u16()))
    }
}

fn part_path(local_path: &Path) -> PathBuf {
    let mut name = OsString::from(local_path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

async fn write_body(
    remote_path: &str,
    part_path: &Path,
    response: &mut Response,
    expected: Option<u64>,
) -> Result<u64, StorageError> {
    let mut file = tokio::fs::File::create(part_path)
        .await
        .map_err(|e| StorageError::io(part_path, e))?;

    let mut written: u64 = 0;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| StorageError::transfer(remote_path, e.to_string()))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| StorageError::io(part_path, e))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| StorageError::io(part_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::io(part_path, e))?;

    if let Some(expected) = expected {
        if written != expected {
            return Err(StorageError::transfer(
                remote_path,
                format!("truncated body: {} of {} bytes", written, expected),
            ));
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    fn gateway(server: &MockServer) -> SasStorageGateway {
        SasStorageGateway::new(StorageConfig::new(server.base_url())).unwrap()
    }

    fn token() -> IdToken {
        IdToken::new("tok-123")
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/tmp/job/assets/m1")),
            PathBuf::from("/tmp/job/assets/m1.part")
        );
    }

    #[tokio::test]
    async fn test_fetch_writes_file() {
        let server = MockServer::start_async().await;
        let blob_url = server.url("/blob/models/m1");

        let sas = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/GetUserBlobSasUrl")
                    .query_param("blobPath", "models/m1")
                    .header("Authorization", "Bearer tok-123");
                then.status(200).body(&blob_url);
            })
            .await;
        let blob = server
            .mock_async(|when, then| {
                when.method(GET).path("/blob/models/m1");
                then.status(200).body("scene-bytes");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("assets").join("m1");
        let written = gateway(&server)
            .fetch("models/m1", &target, &token())
            .await
            .unwrap();

        sas.assert_async().await;
        blob.assert_async().await;
        assert_eq!(written, 11);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "scene-bytes");
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_fetch_not_found_leaves_no_file() {
        let server = MockServer::start_async().await;
        let blob_url = server.url("/blob/missing");

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/GetUserBlobSasUrl");
                then.status(200).body(&blob_url);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/blob/missing");
                then.status(404);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("missing");
        let result = gateway(&server).fetch("missing", &target, &token()).await;

        assert!(matches!(result, Err(StorageError::NotFound { .. })));
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn test_rejected_token_is_auth_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/GetUserBlobSasUrl");
                then.status(401);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let result = gateway(&server)
            .fetch("models/m1", &dir.path().join("m1"), &token())
            .await;
        assert!(matches!(result, Err(StorageError::Auth { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_publish_sends_block_blob() {
        let server = MockServer::start_async().await;
        let blob_url = server.url("/blob/renders/images/m1/abc.png");

        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/GetUserBlobSasUrl")
                    .query_param("blobPath", "renders/images/m1/abc.png");
                then.status(200).body(&blob_url);
            })
            .await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/blob/renders/images/m1/abc.png")
                    .header("x-ms-blob-type", "BlockBlob")
                    .header("content-length", "8")
                    .body("png-data");
                then.status(201);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("abc.png");
        std::fs::write(&source, "png-data").unwrap();

        gateway(&server)
            .publish(&source, "renders/images/m1/abc.png", &token())
            .await
            .unwrap();
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_streams_large_artifact() {
        let server = MockServer::start_async().await;
        let blob_url = server.url("/blob/renders/videos/m1/fly.mp4");
        let contents = vec![7u8; 1 << 20];

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/GetUserBlobSasUrl");
                then.status(200).body(&blob_url);
            })
            .await;
        let put = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/blob/renders/videos/m1/fly.mp4")
                    .header("content-length", "1048576")
                    .body(String::from_utf8(vec![7u8; 1 << 20]).unwrap());
                then.status(201);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("fly.mp4");
        std::fs::write(&source, &contents).unwrap();

        gateway(&server)
            .publish(&source, "renders/videos/m1/fly.mp4", &token())
            .await
            .unwrap();
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_publish_server_error_is_transfer_error() {
        let server = MockServer::start_async().await;
        let blob_url = server.url("/blob/x");

        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/GetUserBlobSasUrl");
                then.status(200).body(&blob_url);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/blob/x");
                then.status(503);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let source = dir.path().join("x");
        std::fs::write(&source, "data").unwrap();

        let result = gateway(&server).publish(&source, "x", &token()).await;
        assert!(matches!(result, Err(StorageError::Transfer { .. })));
    }

    #[tokio::test]
    async fn test_publish_missing_local_file_is_io_error() {
        let server = MockServer::start_async().await;
        let result = gateway(&server)
            .publish(Path::new("/nonexistent/file.png"), "x", &token())
            .await;
        assert!(matches!(result, Err(StorageError::Io { .. })));
    }

    #[tokio::test]
    async fn test_remove_requires_accepted() {
        let server = MockServer::start_async().await;
        let accepted_url = server.url("/blob/accepted");
        let ok_url = server.url("/blob/ok");

        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/GetUserBlobSasUrl")
                    .query_param("blobPath", "accepted");
                then.status(200).body(&accepted_url);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/GetUserBlobSasUrl")
                    .query_param("blobPath", "ok");
                then.status(200).body(&ok_url);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/blob/accepted");
                then.status(202);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/blob/ok");
                then.status(200);
            })
            .await;

        let gateway = gateway(&server);
        assert!(gateway.remove("accepted", &token()).await);
        assert!(!gateway.remove("ok", &token()).await);
    }
}
