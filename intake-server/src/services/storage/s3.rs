//! Crash storage over the S3 REST API.
//!
//! Talks plain HTTP to an S3-compatible endpoint with path-style addressing,
//! signing requests with SigV4 when static credentials are configured.
//! Unsigned requests are allowed so local emulators work without
//! credentials.
//!
//! The credentials this collector runs with need `s3:PutObject` on the
//! bucket, plus `s3:DeleteObject` under `test/` for the startup
//! verification.

use bytes::Bytes;
use chrono::Utc;
use intake_config::CrashStorageConfig;
use reqwest::{Client, Method, Url};
use uuid::Uuid;

use crate::report::CrashReport;
use crate::service::ServiceError;
use crate::services::AdapterError;
use crate::utils::{payload_hash, SigV4};

use super::{crash_objects, CrashStorage};

/// Saves raw crash files to an S3-compatible bucket.
#[derive(Debug)]
pub struct S3CrashStorage {
    client: Client,
    endpoint: Url,
    bucket: String,
    signer: Option<SigV4>,
    dump_field: String,
}

impl S3CrashStorage {
    /// Creates the storage from configuration.
    pub fn new(config: &CrashStorageConfig, dump_field: &str) -> Result<Self, ServiceError> {
        let bucket = config.require_bucket()?.to_owned();

        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", config.region));
        let endpoint = Url::parse(&endpoint)
            .map_err(|error| ServiceError::Adapter(format!("invalid s3 endpoint: {error}")))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ServiceError::Adapter(error.to_string()))?;

        let signer = match (&config.access_key, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(SigV4::new(
                access_key.clone(),
                secret_key.clone(),
                config.region.clone(),
                "s3",
            )),
            _ => None,
        };

        Ok(Self {
            client,
            endpoint,
            bucket,
            signer,
            dump_field: dump_field.to_owned(),
        })
    }

    fn object_url(&self, key: &str) -> Result<Url, AdapterError> {
        // Path-style addressing lets bucket names contain dots under TLS.
        self.endpoint
            .join(&format!("{}/{}", self.bucket, key))
            .map_err(|error| AdapterError::Permanent(format!("bad object key {key:?}: {error}")))
    }

    async fn request(
        &self,
        method: Method,
        key: &str,
        body: Option<Bytes>,
    ) -> Result<(), AdapterError> {
        let url = self.object_url(key)?;
        let content_hash = match &body {
            Some(body) => payload_hash(body),
            None => payload_hash(b""),
        };

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header("x-amz-content-sha256", &content_hash);

        if let Some(signer) = &self.signer {
            let signed = signer.sign(
                method.as_str(),
                &url,
                &[("x-amz-content-sha256", &content_hash)],
                &content_hash,
                Utc::now(),
            );
            for (name, value) in signed {
                request = request.header(name, value);
            }
        }

        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(AdapterError::from_http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(
                status,
                &format!("{method} s3://{}/{key}", self.bucket),
            ));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl CrashStorage for S3CrashStorage {
    async fn save_crash(&self, report: &CrashReport) -> Result<(), AdapterError> {
        for (key, object) in crash_objects(report, &self.dump_field) {
            self.request(Method::PUT, &key, Some(object)).await?;
        }
        Ok(())
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        let key = format!("test/testfile-{}.txt", Uuid::new_v4());
        self.request(Method::PUT, &key, Some(Bytes::from_static(b"test")))
            .await?;

        // Write capability is proven; a failed cleanup only leaves a tiny
        // test object behind.
        if let Err(error) = self.request(Method::DELETE, &key, None).await {
            intake_log::warn!("failed to clean up verification object {key}: {error}");
        }

        Ok(())
    }
}
