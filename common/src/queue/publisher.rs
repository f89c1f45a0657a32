// Dispatch-item publisher for NATS JetStream

use crate::errors::QueueError;
use crate::models::DispatchItem;
use crate::queue::nats::NatsClient;
use async_nats::jetstream::context::PublishAckFuture;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// TaskPublisher abstracts the queue producer so engine tests can swap in a
/// recording double. Delivery is at-least-once; duplicate consumption is the
/// worker's problem, not this side's.
#[async_trait::async_trait]
pub trait TaskPublisher: Send + Sync {
    /// Publish one dispatch item to the queue.
    async fn publish(&self, item: &DispatchItem) -> Result<(), QueueError>;

    /// Publish with exponential-backoff retries for transient failures.
    async fn publish_with_retry(
        &self,
        item: &DispatchItem,
        max_retries: u32,
    ) -> Result<(), QueueError>;
}

/// NATS-based publisher. Subjects are `tasks.<stream>.<entity_type>`.
pub struct NatsTaskPublisher {
    client: NatsClient,
    subject_prefix: String,
    publish_timeout: Duration,
}

impl NatsTaskPublisher {
    pub fn new(client: NatsClient) -> Self {
        let subject_prefix = format!("tasks.{}", client.config().stream_name.to_lowercase());
        Self {
            client,
            subject_prefix,
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    fn subject_for(&self, entity_type: &str) -> String {
        format!("{}.{}", self.subject_prefix, entity_type)
    }

    /// Flush outstanding publishes during graceful shutdown.
    pub async fn flush(&self) -> Result<(), QueueError> {
        self.client.flush().await
    }
}

#[async_trait::async_trait]
impl TaskPublisher for NatsTaskPublisher {
    #[instrument(skip(self, item), fields(
        entity_type = %item.entity_type,
        entity_key = %item.entity_key,
        delete = item.delete
    ))]
    async fn publish(&self, item: &DispatchItem) -> Result<(), QueueError> {
        debug!("Publishing dispatch item");

        let payload = serde_json::to_vec(item).map_err(|e| {
            QueueError::SerializationFailed(format!("Failed to serialize dispatch item: {}", e))
        })?;

        let subject = self.subject_for(&item.entity_type);

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", Uuid::new_v4().to_string().as_str());
        headers.insert("Entity-Type", item.entity_type.as_str());
        headers.insert("Entity-Key", item.entity_key.as_str());

        let publish_future: PublishAckFuture = self
            .client
            .jetstream()
            .publish_with_headers(subject.clone(), headers, payload.into())
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        // Wait for acknowledgment with timeout
        let ack_result = tokio::time::timeout(self.publish_timeout, publish_future).await;

        match ack_result {
            Ok(Ok(_ack)) => {
                debug!(subject = %subject, "Dispatch item published");
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

    #[instrument(skip(self, item), fields(
        entity_type = %item.entity_type,
        entity_key = %item.entity_key,
        max_retries = max_retries
    ))]
    async fn publish_with_retry(
        &self,
        item: &DispatchItem,
        max_retries: u32,
    ) -> Result<(), QueueError> {
        let mut attempt = 0;
        let mut last_error = None;

        while attempt <= max_retries {
            match self.publish(item).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    last_error = Some(e);

                    if attempt <= max_retries {
                        let delay = Duration::from_millis(100 * 2_u64.pow(attempt - 1));
                        warn!(
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            "Publish failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            QueueError::PublishFailed("Unknown error during publish with retry".to_string())
        }))
    }
}
