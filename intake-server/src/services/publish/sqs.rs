//! Crash publishing to an SQS-compatible queue.
//!
//! Uses the JSON wire protocol (`x-amz-target` + `application/x-amz-json-1.0`)
//! rather than the legacy query protocol, so responses parse with serde and
//! no XML handling is needed. The queue name is resolved to a queue URL once
//! and cached.
//!
//! The credentials this collector runs with need `sqs:GetQueueUrl` and
//! `sqs:SendMessage` on the queue.

use chrono::Utc;
use intake_config::CrashPublishConfig;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::crash_id::CrashId;
use crate::service::ServiceError;
use crate::services::AdapterError;
use crate::utils::{payload_hash, SigV4};

use super::CrashPublish;

const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

#[derive(Debug, Deserialize)]
struct GetQueueUrlResponse {
    #[serde(rename = "QueueUrl")]
    queue_url: String,
}

/// Publishes crash ids to an AWS SQS standard queue.
#[derive(Debug)]
pub struct SqsCrashPublish {
    client: Client,
    endpoint: Url,
    queue_name: String,
    signer: Option<SigV4>,
    queue_url: OnceCell<String>,
}

impl SqsCrashPublish {
    /// Creates the publisher from configuration.
    pub fn new(config: &CrashPublishConfig) -> Result<Self, ServiceError> {
        let queue_name =
            CrashPublishConfig::require(&config.queue_name, "CRASHMOVER_CRASHPUBLISH_QUEUE_NAME")?;

        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| format!("https://sqs.{}.amazonaws.com", config.region));
        let endpoint = Url::parse(&endpoint)
            .map_err(|error| ServiceError::Adapter(format!("invalid sqs endpoint: {error}")))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ServiceError::Adapter(error.to_string()))?;

        let signer = match (&config.access_key, &config.secret_access_key) {
            (Some(access_key), Some(secret_key)) => Some(SigV4::new(
                access_key.clone(),
                secret_key.clone(),
                config.region.clone(),
                "sqs",
            )),
            _ => None,
        };

        Ok(Self {
            client,
            endpoint,
            queue_name,
            signer,
            queue_url: OnceCell::new(),
        })
    }

    async fn call(&self, target: &str, body: serde_json::Value) -> Result<String, AdapterError> {
        let body = body.to_string();
        let content_hash = payload_hash(body.as_bytes());

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-target", target);

        if let Some(signer) = &self.signer {
            let signed = signer.sign(
                "POST",
                &self.endpoint,
                &[("content-type", CONTENT_TYPE), ("x-amz-target", target)],
                &content_hash,
                Utc::now(),
            );
            for (name, value) in signed {
                request = request.header(name, value);
            }
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(AdapterError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(status, target));
        }

        response
            .text()
            .await
            .map_err(AdapterError::from_http)
    }

    /// Resolves and caches the queue URL for the configured queue name.
    async fn queue_url(&self) -> Result<&str, AdapterError> {
        self.queue_url
            .get_or_try_init(|| async {
                let response = self
                    .call(
                        "AmazonSQS.GetQueueUrl",
                        serde_json::json!({ "QueueName": self.queue_name }),
                    )
                    .await?;

                let parsed: GetQueueUrlResponse = serde_json::from_str(&response)
                    .map_err(|error| {
                        AdapterError::Permanent(format!("malformed GetQueueUrl response: {error}"))
                    })?;

                Ok(parsed.queue_url)
            })
            .await
            .map(String::as_str)
    }

    async fn send_message(&self, message: &str) -> Result<(), AdapterError> {
        let queue_url = self.queue_url().await?;
        self.call(
            "AmazonSQS.SendMessage",
            serde_json::json!({ "QueueUrl": queue_url, "MessageBody": message }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CrashPublish for SqsCrashPublish {
    async fn publish_crash(&self, id: &CrashId) -> Result<(), AdapterError> {
        self.send_message(id.as_str()).await
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        self.send_message("test").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CrashPublishConfig {
        CrashPublishConfig {
            class: intake_config::PublishKind::Sqs,
            queue_name: Some("crash-ids".to_owned()),
            project_id: None,
            topic_name: None,
            endpoint_url: None,
            region: "us-west-2".to_owned(),
            access_key: None,
            secret_access_key: None,
            auth_token: None,
            timeout: std::time::Duration::from_secs(5),
        }
    }

    #[test]
    fn test_default_endpoint() {
        let publish = SqsCrashPublish::new(&config()).unwrap();
        assert_eq!(publish.endpoint.as_str(), "https://sqs.us-west-2.amazonaws.com/");
    }

    #[test]
    fn test_missing_queue_name_is_an_error() {
        let mut config = config();
        config.queue_name = None;
        assert!(SqsCrashPublish::new(&config).is_err());
    }
}
