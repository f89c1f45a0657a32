// NATS JetStream client for the task queue

use crate::errors::QueueError;
use async_nats::jetstream::{
    stream::{Config as StreamConfig, RetentionPolicy, Stream},
    Context as JetStreamContext,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream name for the task queue
    pub stream_name: String,
    /// Subject pattern the stream captures
    pub subject: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Maximum number of messages to retain
    pub max_messages: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "TASKS".to_string(),
            subject: "tasks.>".to_string(),
            max_age_seconds: 86400, // 24 hours
            max_messages: 1_000_000,
        }
    }
}

/// NATS JetStream client, producer side only. The worker pool consuming the
/// stream is an external collaborator.
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Connect to the NATS server. Failure here is fatal at startup.
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: NatsConfig) -> Result<Self, QueueError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to connect to NATS: {}", e)))?;

        let jetstream = async_nats::jetstream::new(client.clone());

        info!("Connected to NATS server");
        Ok(Self {
            client,
            jetstream,
            config,
        })
    }

    /// Create the task stream if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, QueueError> {
        info!(
            stream_name = %self.config.stream_name,
            "Initializing JetStream stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![self.config.subject.clone()],
            retention: RetentionPolicy::WorkQueue, // Messages deleted after acknowledgment
            max_age: Duration::from_secs(self.config.max_age_seconds),
            max_messages: self.config.max_messages,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| QueueError::StreamCreation(format!("Failed to create stream: {}", e)))?;

        info!(stream_name = %self.config.stream_name, "Stream ready");
        Ok(stream)
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Flush outstanding publishes before releasing the connection.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<(), QueueError> {
        self.client
            .flush()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to flush NATS client: {}", e)))
    }
}
