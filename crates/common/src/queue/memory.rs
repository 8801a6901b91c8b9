//! In-process message bus with log/offset semantics
//!
//! Behaves like a single-partition topic: `poll` advances a read position,
//! `commit` advances the committed offset, `release` seeks back so the same
//! message is delivered again. Failure injection hooks let tests exercise the
//! error paths of both loops.

use super::{Delivery, MessageBus, OutboundMessage};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryState {
    pending: Vec<OutboundMessage>,
    log: Vec<OutboundMessage>,
    position: usize,
    committed: usize,
    delivery_counts: HashMap<usize, u32>,
    dead_letters: Vec<(String, String)>,
    fail_flushes: u32,
    fail_polls: u32,
    closed: bool,
}

/// Cloneable handle to a shared in-memory topic
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a raw payload directly to the log, bypassing publish/flush
    pub fn push_raw(&self, payload: impl Into<String>) {
        self.state().log.push(OutboundMessage {
            key: String::new(),
            group: String::new(),
            payload: payload.into(),
        });
    }

    /// Messages that reached the log, in order
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state().log.clone()
    }

    /// Messages buffered but not yet flushed
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Offset of the next message that has not been acknowledged
    pub fn committed_offset(&self) -> usize {
        self.state().committed
    }

    /// Dead-lettered payloads with their reasons
    pub fn dead_letters(&self) -> Vec<(String, String)> {
        self.state().dead_letters.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Make the next `count` flushes fail
    pub fn fail_flushes(&self, count: u32) {
        self.state().fail_flushes = count;
    }

    /// Make the next `count` polls fail as broker errors
    pub fn fail_polls(&self, count: u32) {
        self.state().fail_polls = count;
    }

    fn offset_of(delivery: &Delivery) -> Result<usize> {
        delivery.receipt.parse().map_err(|_| AppError::QueueError {
            message: format!("Unknown receipt {}", delivery.receipt),
        })
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        self.state().pending.push(message);
        Ok(())
    }

    async fn flush(&self) -> Result<usize> {
        let mut state = self.state();
        if state.fail_flushes > 0 {
            state.fail_flushes -= 1;
            return Err(AppError::QueueError {
                message: "injected flush failure".to_string(),
            });
        }

        let pending = std::mem::take(&mut state.pending);
        let sent = pending.len();
        state.log.extend(pending);
        Ok(sent)
    }

    async fn poll(&self, wait: Duration) -> Result<Option<Delivery>> {
        {
            let mut state = self.state();
            if state.fail_polls > 0 {
                state.fail_polls -= 1;
                return Err(AppError::QueueError {
                    message: "injected broker failure".to_string(),
                });
            }

            let offset = state.position;
            if let Some(message) = state.log.get(offset).cloned() {
                state.position += 1;
                let count = state.delivery_counts.entry(offset).or_insert(0);
                *count += 1;

                return Ok(Some(Delivery {
                    message_id: format!("mem-{}", offset),
                    receipt: offset.to_string(),
                    payload: message.payload,
                    delivery_count: *count,
                }));
            }
        }

        tokio::time::sleep(wait).await;
        Ok(None)
    }

    async fn commit(&self, delivery: &Delivery) -> Result<()> {
        let offset = Self::offset_of(delivery)?;
        let mut state = self.state();
        state.committed = state.committed.max(offset + 1);
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<()> {
        let offset = Self::offset_of(delivery)?;
        let mut state = self.state();
        state.position = state.position.min(offset);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<()> {
        self.state()
            .dead_letters
            .push((delivery.payload.clone(), reason.to_string()));
        self.commit(delivery).await
    }

    async fn close(&self) -> Result<()> {
        self.flush().await?;
        self.state().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(key: &str) -> OutboundMessage {
        OutboundMessage {
            key: key.to_string(),
            group: "feed".to_string(),
            payload: format!("{{\"id\":\"{}\"}}", key),
        }
    }

    #[tokio::test]
    async fn test_publish_is_buffered_until_flush() {
        let bus = MemoryBus::new();
        bus.publish(message("a")).await.unwrap();
        bus.publish(message("b")).await.unwrap();

        assert!(bus.published().is_empty());
        assert_eq!(bus.flush().await.unwrap(), 2);
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_release_redelivers_same_message() {
        let bus = MemoryBus::new();
        bus.push_raw("first");
        bus.push_raw("second");

        let d1 = bus.poll(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(d1.payload, "first");
        bus.release(&d1).await.unwrap();

        let again = bus.poll(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(again.payload, "first");
        assert_eq!(again.delivery_count, 2);
        assert_eq!(bus.committed_offset(), 0);

        bus.commit(&again).await.unwrap();
        assert_eq!(bus.committed_offset(), 1);
        let d2 = bus.poll(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(d2.payload, "second");
    }

    #[tokio::test]
    async fn test_empty_poll_and_injected_failures() {
        let bus = MemoryBus::new();
        assert!(bus.poll(Duration::ZERO).await.unwrap().is_none());

        bus.fail_polls(1);
        assert!(bus.poll(Duration::ZERO).await.is_err());

        bus.publish(message("a")).await.unwrap();
        bus.fail_flushes(1);
        assert!(bus.flush().await.is_err());
        assert_eq!(bus.flush().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dead_letter_commits() {
        let bus = MemoryBus::new();
        bus.push_raw("garbage");
        let d = bus.poll(Duration::ZERO).await.unwrap().unwrap();
        tokio_test::assert_ok!(bus.dead_letter(&d, "decode").await);

        assert_eq!(bus.committed_offset(), 1);
        assert_eq!(bus.dead_letters(), vec![("garbage".to_string(), "decode".to_string())]);
    }
}
