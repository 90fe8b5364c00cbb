//! Crash storage over the GCS JSON API.
//!
//! Uploads use the media upload endpoint with the object name passed as a
//! query parameter. Authorization is a static bearer token when configured;
//! without one, requests go out unauthenticated, which is what the storage
//! emulator and sidecar auth proxies expect.

use bytes::Bytes;
use intake_config::CrashStorageConfig;
use reqwest::{Client, Url};
use uuid::Uuid;

use crate::report::CrashReport;
use crate::service::ServiceError;
use crate::services::AdapterError;

use super::{crash_objects, CrashStorage};

/// Saves raw crash files to a GCS-compatible bucket.
#[derive(Debug)]
pub struct GcsCrashStorage {
    client: Client,
    endpoint: Url,
    bucket: String,
    auth_token: Option<String>,
    dump_field: String,
}

impl GcsCrashStorage {
    /// Creates the storage from configuration.
    pub fn new(config: &CrashStorageConfig, dump_field: &str) -> Result<Self, ServiceError> {
        let bucket = config.require_bucket()?.to_owned();

        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| "https://storage.googleapis.com".to_owned());
        let endpoint = Url::parse(&endpoint)
            .map_err(|error| ServiceError::Adapter(format!("invalid gcs endpoint: {error}")))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ServiceError::Adapter(error.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            bucket,
            auth_token: config.auth_token.clone(),
            dump_field: dump_field.to_owned(),
        })
    }

    fn upload_url(&self, key: &str) -> Result<Url, AdapterError> {
        let mut url = self
            .endpoint
            .join(&format!("upload/storage/v1/b/{}/o", self.bucket))
            .map_err(|error| AdapterError::Permanent(error.to_string()))?;

        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);

        Ok(url)
    }

    fn object_url(&self, key: &str) -> Result<Url, AdapterError> {
        let mut url = self
            .endpoint
            .join(&format!("storage/v1/b/{}/o", self.bucket))
            .map_err(|error| AdapterError::Permanent(error.to_string()))?;

        // The object name is a single, fully-escaped path segment.
        url.path_segments_mut()
            .map_err(|()| AdapterError::Permanent("endpoint cannot be a base".to_owned()))?
            .push(key);

        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn upload(&self, key: &str, body: Bytes) -> Result<(), AdapterError> {
        let url = self.upload_url(key)?;
        let response = self
            .authorize(self.client.post(url))
            .header("content-type", "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(AdapterError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(
                status,
                &format!("PUT gs://{}/{key}", self.bucket),
            ));
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AdapterError> {
        let url = self.object_url(key)?;
        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(AdapterError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(
                status,
                &format!("DELETE gs://{}/{key}", self.bucket),
            ));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl CrashStorage for GcsCrashStorage {
    async fn save_crash(&self, report: &CrashReport) -> Result<(), AdapterError> {
        for (key, object) in crash_objects(report, &self.dump_field) {
            self.upload(&key, object).await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        let key = format!("test/testfile-{}.txt", Uuid::new_v4());
        self.upload(&key, Bytes::from_static(b"test")).await?;

        if let Err(error) = self.delete(&key).await {
            intake_log::warn!("failed to clean up verification object {key}: {error}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CrashStorageConfig {
        CrashStorageConfig {
            class: intake_config::StorageKind::Gcs,
            bucket_name: Some("crash-reports".to_owned()),
            endpoint_url: Some("http://localhost:4443/".to_owned()),
            region: "us-west-2".to_owned(),
            access_key: None,
            secret_access_key: None,
            auth_token: None,
            timeout: std::time::Duration::from_secs(10),
            root: std::path::PathBuf::new(),
        }
    }

    #[test]
    fn test_upload_url_encodes_name() {
        let storage = GcsCrashStorage::new(&config(), "upload_file_minidump").unwrap();
        let url = storage.upload_url("v1/dump/abc").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/upload/storage/v1/b/crash-reports/o?uploadType=media&name=v1%2Fdump%2Fabc"
        );
    }

    #[test]
    fn test_object_url_is_single_segment() {
        let storage = GcsCrashStorage::new(&config(), "upload_file_minidump").unwrap();
        let url = storage.object_url("v1/dump/abc").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:4443/storage/v1/b/crash-reports/o/v1%2Fdump%2Fabc"
        );
    }
}
