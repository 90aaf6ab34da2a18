// Dispatch publisher: hands newly created OnTime extensions to the
// external scheduler via the JetStream dispatch stream

use crate::errors::QueueError;
use crate::models::ExtensionSummary;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// One dispatch record: a schedule target and the extensions to run on it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub trigger_on: String,
    pub extensions: Vec<ExtensionSummary>,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
}

impl DispatchRecord {
    pub fn new(target: &str, summary: &ExtensionSummary) -> Self {
        Self {
            trigger_on: target.to_string(),
            extensions: vec![summary.clone()],
            enqueued_at: chrono::Utc::now(),
        }
    }
}

/// Producer-only hand-off of OnTime extensions to the scheduler.
/// No retry here: a failed enqueue is logged by the caller, never
/// surfaced as a creation failure.
#[async_trait::async_trait]
pub trait SchedulePublisher: Send + Sync {
    async fn enqueue_on_time(
        &self,
        target: &str,
        summary: &ExtensionSummary,
    ) -> Result<(), QueueError>;
}

/// NATS-based dispatch publisher
pub struct NatsSchedulePublisher {
    client: NatsClient,
    subject: String,
    publish_timeout: Duration,
}

impl NatsSchedulePublisher {
    pub fn new(client: NatsClient) -> Self {
        let subject = client.config().subject.clone();
        Self {
            client,
            subject,
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl SchedulePublisher for NatsSchedulePublisher {
    #[instrument(skip(self, summary), fields(
        extension_id = %summary.extension_id,
        trigger_on = %target
    ))]
    async fn enqueue_on_time(
        &self,
        target: &str,
        summary: &ExtensionSummary,
    ) -> Result<(), QueueError> {
        let record = DispatchRecord::new(target, summary);

        let payload = serde_json::to_vec(&record).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize dispatch record: {}", e))
        })?;

        let jetstream = self.client.jetstream();
        let publish_future: PublishAckFuture = jetstream
            .publish(self.subject.clone(), payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish record: {}", e)))?;

        // Wait for acknowledgment with timeout
        let ack_result = tokio::time::timeout(self.publish_timeout, publish_future).await;

        match ack_result {
            Ok(Ok(_ack)) => {
                info!(subject = %self.subject, "Dispatch record enqueued");
                Ok(())
            }
            Ok(Err(e)) => Err(QueueError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(QueueError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}
