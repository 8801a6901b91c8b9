//! SQS-backed message bus
//!
//! Publishing is buffered and sent with `SendMessageBatch` on flush.
//! Receipt handles play the role of offsets: a message is acknowledged by
//! deleting it and released by resetting its visibility timeout to zero.

use super::{Delivery, MessageBus, OutboundMessage};
use crate::config::BrokerConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::types::{
    MessageAttributeValue, MessageSystemAttributeName, SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client as SqsClient;
use backoff::{future::retry, ExponentialBackoff};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// SQS allows at most 10 entries per batch request
const MAX_BATCH_ENTRIES: usize = 10;

/// SQS long polling is capped at 20 seconds
const MAX_WAIT_SECONDS: u64 = 20;

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct SqsBusConfig {
    /// Queue URL
    pub url: String,
    /// Dead letter queue URL (optional)
    pub dlq_url: Option<String>,
    /// FIFO queues get a message group per source and content-based dedup ids
    pub fifo: bool,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Upper bound on time spent retrying one batch send
    pub max_flush_elapsed: Duration,
}

impl SqsBusConfig {
    pub fn from_broker(broker: &BrokerConfig) -> Result<Self> {
        let url = broker.queue_url.clone().ok_or_else(|| AppError::Configuration {
            message: format!("broker.queue_url is required for topic {}", broker.topic),
        })?;

        Ok(Self {
            url,
            dlq_url: broker.dlq_url.clone(),
            fifo: broker.fifo,
            visibility_timeout: broker.visibility_timeout_secs.min(i32::MAX as u64) as i32,
            max_flush_elapsed: Duration::from_secs(30),
        })
    }
}

/// SQS Queue client wrapper
pub struct SqsBus {
    client: SqsClient,
    config: SqsBusConfig,
    pending: Mutex<Vec<OutboundMessage>>,
}

impl SqsBus {
    /// Create a new queue client from the ambient AWS configuration
    pub async fn new(broker: &BrokerConfig) -> Result<Self> {
        let config = SqsBusConfig::from_broker(broker)?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &broker.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &broker.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        info!(url = %config.url, fifo = config.fifo, "SQS bus configured");
        Ok(Self::with_client(SqsClient::new(&aws_config), config))
    }

    /// Create with existing AWS client
    pub fn with_client(client: SqsClient, config: SqsBusConfig) -> Self {
        Self {
            client,
            config,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn batch_entry(&self, index: usize, message: &OutboundMessage) -> Result<SendMessageBatchRequestEntry> {
        let mut entry = SendMessageBatchRequestEntry::builder()
            .id(format!("m{}", index))
            .message_body(&message.payload);

        if self.config.fifo {
            entry = entry
                .message_group_id(&message.group)
                .message_deduplication_id(deduplication_id(&message.key));
        }

        entry.build().map_err(|e| AppError::QueueError {
            message: format!("Failed to build batch entry: {}", e),
        })
    }

    /// Send one batch, retrying transport failures. Returns the messages SQS rejected.
    async fn send_batch(&self, batch: &[OutboundMessage]) -> Result<Vec<OutboundMessage>> {
        let entries = batch
            .iter()
            .enumerate()
            .map(|(i, message)| self.batch_entry(i, message))
            .collect::<Result<Vec<_>>>()?;

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.config.max_flush_elapsed),
            ..Default::default()
        };

        let output = retry(backoff, || {
            let request = self
                .client
                .send_message_batch()
                .queue_url(&self.config.url)
                .set_entries(Some(entries.clone()));

            async move {
                request.send().await.map_err(|e| {
                    warn!(error = %e, "Batch send failed, retrying");
                    backoff::Error::transient(AppError::QueueError {
                        message: format!("Failed to send batch: {}", e),
                    })
                })
            }
        })
        .await?;

        let rejected = output
            .failed()
            .iter()
            .filter_map(|failure| {
                warn!(
                    entry = %failure.id(),
                    code = %failure.code(),
                    sender_fault = failure.sender_fault(),
                    "Message rejected by SQS"
                );
                failure
                    .id()
                    .strip_prefix('m')
                    .and_then(|i| i.parse::<usize>().ok())
                    .and_then(|i| batch.get(i).cloned())
            })
            .collect();

        Ok(rejected)
    }
}

#[async_trait]
impl MessageBus for SqsBus {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        self.pending.lock().await.push(message);
        Ok(())
    }

    async fn flush(&self) -> Result<usize> {
        let pending = std::mem::take(&mut *self.pending.lock().await);
        if pending.is_empty() {
            return Ok(0);
        }

        let mut sent = 0;
        let mut retained = Vec::new();
        let mut last_error = None;

        for batch in pending.chunks(MAX_BATCH_ENTRIES) {
            match self.send_batch(batch).await {
                Ok(rejected) => {
                    sent += batch.len() - rejected.len();
                    retained.extend(rejected);
                }
                Err(e) => {
                    retained.extend_from_slice(batch);
                    last_error = Some(e);
                }
            }
        }

        let failed = retained.len();
        if failed > 0 {
            // Keep rejected messages for the next flush
            let mut queue = self.pending.lock().await;
            retained.append(&mut queue);
            *queue = retained;
        }

        debug!(sent, failed, "Flushed messages to queue");

        match last_error {
            Some(e) => Err(e),
            None if failed > 0 => Err(AppError::QueueError {
                message: format!("{} of {} messages rejected by SQS", failed, sent + failed),
            }),
            None => Ok(sent),
        }
    }

    async fn poll(&self, wait: Duration) -> Result<Option<Delivery>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(1)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(wait.as_secs().min(MAX_WAIT_SECONDS) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let Some(message) = result.messages.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };

        let receipt = message.receipt_handle.clone().ok_or_else(|| AppError::QueueError {
            message: "Message has no receipt handle".to_string(),
        })?;

        let delivery_count = message
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        Ok(Some(Delivery {
            message_id: message.message_id.unwrap_or_default(),
            receipt,
            payload: message.body.unwrap_or_default(),
            delivery_count,
        }))
    }

    async fn commit(&self, delivery: &Delivery) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(&delivery.receipt)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!(message_id = %delivery.message_id, "Message deleted from queue");
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.config.url)
            .receipt_handle(&delivery.receipt)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to release message: {}", e),
            })?;

        debug!(message_id = %delivery.message_id, "Message released for redelivery");
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        match &self.config.dlq_url {
            Some(dlq_url) => {
                let reason_attr = MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value(reason)
                    .build()
                    .map_err(|e| AppError::QueueError {
                        message: format!("Failed to build message attribute: {}", e),
                    })?;

                self.client
                    .send_message()
                    .queue_url(dlq_url)
                    .message_body(&delivery.payload)
                    .message_attributes("reason", reason_attr)
                    .send()
                    .await
                    .map_err(|e| AppError::QueueError {
                        message: format!("Failed to send to dead letter queue: {}", e),
                    })?;

                warn!(message_id = %delivery.message_id, reason, "Message moved to dead letter queue");
            }
            None => {
                error!(
                    message_id = %delivery.message_id,
                    reason,
                    payload = %delivery.payload,
                    "No dead letter queue configured, dropping message"
                );
            }
        }

        self.commit(delivery).await
    }

    async fn close(&self) -> Result<()> {
        let pending = self.pending.lock().await.len();
        if pending > 0 {
            info!(pending, "Flushing pending messages before close");
            self.flush().await?;
        }
        info!("SQS bus closed");
        Ok(())
    }
}

/// FIFO dedup ids are limited to 128 characters; alert ids are often URLs
fn deduplication_id(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
