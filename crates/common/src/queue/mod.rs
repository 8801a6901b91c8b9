//! Message bus for candidate alerts
//!
//! Provides:
//! - The [`MessageBus`] trait both loops talk to
//! - An SQS implementation with buffered publishing and dead-lettering
//! - An in-memory implementation with offset semantics for tests and local runs
//!
//! Acknowledgement model: a delivery stays owned by the broker until
//! [`MessageBus::commit`] is called. [`MessageBus::release`] hands it back so
//! the next poll returns it again.

mod memory;
mod sqs;

pub use memory::MemoryBus;
pub use sqs::{SqsBus, SqsBusConfig};

use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Message queued for publication
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Alert id, used as the deduplication key
    pub key: String,
    /// Ordering group (the feed source)
    pub group: String,
    /// JSON payload
    pub payload: String,
}

/// Message handed to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker message id
    pub message_id: String,
    /// Broker handle used to acknowledge or release the message
    pub receipt: String,
    /// JSON payload
    pub payload: String,
    /// How many times the broker has delivered this message, including this one
    pub delivery_count: u32,
}

/// Topic abstraction shared by the producer and the consumer
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Buffer a message for publication. Does not wait for the broker.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Send every buffered message; returns how many were sent
    async fn flush(&self) -> Result<usize>;

    /// Wait up to `wait` for the next message. Errors are broker protocol failures.
    async fn poll(&self, wait: Duration) -> Result<Option<Delivery>>;

    /// Acknowledge a processed message so it is never delivered again
    async fn commit(&self, delivery: &Delivery) -> Result<()>;

    /// Give a message back without acknowledging it; the next poll redelivers it
    async fn release(&self, delivery: &Delivery) -> Result<()>;

    /// Route a message to the dead letter channel and acknowledge it
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()>;

    /// Flush pending output and release broker resources
    async fn close(&self) -> Result<()>;
}
