//! Result publication to the durable results queue

use async_nats::jetstream::{self, Context as JsContext};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::defaults::{RESULTS_QUEUE, RESULTS_STREAM};
use crate::types::{DeadLetter, ResultPayload};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker rejected publish: {0}")]
    Broker(String),
}

/// Sink for finished results and for tasks dropped without one
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    /// Publish a result; returns once the broker has persisted it
    async fn publish(&self, payload: &ResultPayload) -> Result<(), PublishError>;

    /// Forward a dropped task for offline recovery. No-op when unconfigured.
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), PublishError>;
}

/// JetStream publisher sharing one long-lived context across publishes
pub struct JetStreamPublisher {
    js: JsContext,
    subject: String,
    dead_letter_subject: Option<String>,
}

impl JetStreamPublisher {
    /// Create the publisher, declaring the results stream
    pub async fn new(js: JsContext, dead_letter_subject: Option<String>) -> anyhow::Result<Self> {
        let stream_config = jetstream::stream::Config {
            name: RESULTS_STREAM.to_string(),
            subjects: vec![RESULTS_QUEUE.to_string()],
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            storage: jetstream::stream::StorageType::File,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await?;
        info!("JetStream results stream '{}' ready", RESULTS_STREAM);

        if let Some(subject) = &dead_letter_subject {
            // Dead letters are kept until someone removes them
            let dl_config = jetstream::stream::Config {
                name: dead_letter_stream_name(subject),
                subjects: vec![subject.clone()],
                retention: jetstream::stream::RetentionPolicy::Limits,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            };
            js.get_or_create_stream(dl_config).await?;
            info!("JetStream dead-letter stream for '{}' ready", subject);
        }

        Ok(Self {
            js,
            subject: RESULTS_QUEUE.to_string(),
            dead_letter_subject,
        })
    }

    async fn publish_persistent(&self, subject: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        // The second await resolves once the stream has stored the message
        self.js
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| PublishError::Broker(e.to_string()))?
            .await
            .map_err(|e| PublishError::Broker(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ResultPublisher for JetStreamPublisher {
    async fn publish(&self, payload: &ResultPayload) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload)?;
        self.publish_persistent(&self.subject, body).await
    }

    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), PublishError> {
        let Some(subject) = &self.dead_letter_subject else {
            debug!("No dead-letter subject configured, dropping task {}", letter.task.request_id);
            return Ok(());
        };
        let body = serde_json::to_vec(letter)?;
        self.publish_persistent(subject, body).await
    }
}

/// Stream names may not contain subject separators or wildcards
fn dead_letter_stream_name(subject: &str) -> String {
    let sanitized: String = subject
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("DLQ_{}", sanitized)
}
