//! Crash publishing to a Pub/Sub-compatible topic.
//!
//! This does **not** create the topic; whoever sets up infrastructure is in
//! charge of that, and publishing to a missing topic fails permanently.
//! Authorization is a static bearer token when configured; without one,
//! requests go out unauthenticated, which is what the Pub/Sub emulator
//! expects.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use intake_config::CrashPublishConfig;
use reqwest::{Client, Url};

use crate::crash_id::CrashId;
use crate::service::ServiceError;
use crate::services::AdapterError;

use super::CrashPublish;

/// Publishes crash ids to a Pub/Sub topic.
#[derive(Debug)]
pub struct PubSubCrashPublish {
    client: Client,
    topic_url: Url,
    auth_token: Option<String>,
}

impl PubSubCrashPublish {
    /// Creates the publisher from configuration.
    pub fn new(config: &CrashPublishConfig) -> Result<Self, ServiceError> {
        let project_id =
            CrashPublishConfig::require(&config.project_id, "CRASHMOVER_CRASHPUBLISH_PROJECT_ID")?;
        let topic_name =
            CrashPublishConfig::require(&config.topic_name, "CRASHMOVER_CRASHPUBLISH_TOPIC_NAME")?;

        let endpoint = config
            .endpoint_url
            .clone()
            .unwrap_or_else(|| "https://pubsub.googleapis.com".to_owned());

        let topic_url = Url::parse(&endpoint)
            .and_then(|url| url.join(&format!("v1/projects/{project_id}/topics/{topic_name}")))
            .map_err(|error| ServiceError::Adapter(format!("invalid pubsub endpoint: {error}")))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ServiceError::Adapter(error.to_string()))?;

        Ok(Self {
            client,
            topic_url,
            auth_token: config.auth_token.clone(),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn publish_url(&self) -> Result<Url, AdapterError> {
        let mut url = self.topic_url.clone();
        let topic_segment = format!(
            "{}:publish",
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_owned))
                .unwrap_or_default()
        );
        url.path_segments_mut()
            .map_err(|()| AdapterError::Permanent("endpoint cannot be a base".to_owned()))?
            .pop()
            .push(&topic_segment);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl CrashPublish for PubSubCrashPublish {
    async fn publish_crash(&self, id: &CrashId) -> Result<(), AdapterError> {
        let body = serde_json::json!({
            "messages": [{ "data": BASE64.encode(id.as_str()) }]
        });

        let response = self
            .authorize(self.client.post(self.publish_url()?))
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(status, "topics.publish"));
        }

        Ok(())
    }

    async fn verify(&self) -> Result<(), AdapterError> {
        // Getting the topic proves it exists and that we are allowed to see
        // it, without putting a test message in front of consumers.
        let response = self
            .authorize(self.client.get(self.topic_url.clone()))
            .send()
            .await
            .map_err(AdapterError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::from_status(status, "topics.get"));
        }

        Ok(())
    }
}
