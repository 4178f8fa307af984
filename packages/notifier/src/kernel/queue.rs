//! Queue publishing abstraction for production and testing.
//!
//! All outbound signals of this service (continuation cycles, delivery
//! wake-ups, admin alerts) go through the `QueuePublisher` trait so tests
//! can swap in a recording mock instead of a real NATS connection.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// NATS subjects used by this service.
pub mod subjects {
    /// Inbound trigger and outbound continuation requests.
    pub const CYCLE: &str = "notifier.cycle";
    /// Wake-up for the delivery worker after new ledger rows.
    pub const DELIVER: &str = "notifier.deliver";
    /// Fire-and-forget operational alerts.
    pub const ADMIN_ALERTS: &str = "notifier.alerts.admin";
}

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Trait for queue publish operations.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// Real NATS client publisher.
pub struct NatsQueue {
    client: async_nats::Client,
}

impl NatsQueue {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueuePublisher for NatsQueue {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.client.publish(subject, payload).await?;
        Ok(())
    }
}

/// Continuation request body: opaque trigger id for tracing only.
#[derive(Debug, Serialize)]
struct ContinuationSignal<'a> {
    trigger_id: &'a str,
}

/// Delivery wake-up body.
#[derive(Debug, Serialize)]
struct DeliverySignal {
    mailing_id: i64,
    rows: usize,
}

/// Admin alert body.
#[derive(Debug, Serialize)]
struct AdminAlert<'a> {
    component: &'a str,
    message: &'a str,
}

/// Typed outbound signals over a shared publisher.
#[derive(Clone)]
pub struct Outbound {
    publisher: Arc<dyn QueuePublisher>,
}

impl Outbound {
    pub fn new(publisher: Arc<dyn QueuePublisher>) -> Self {
        Self { publisher }
    }

    /// Ask for one more cycle; the next invocation re-derives its own unit
    /// of work from the change log.
    pub async fn request_continuation(&self, trigger_id: &str) -> Result<()> {
        let body = serde_json::to_vec(&ContinuationSignal { trigger_id })?;
        self.publisher
            .publish(subjects::CYCLE.to_string(), body.into())
            .await
    }

    /// Tell the delivery worker new ledger rows are ready.
    pub async fn signal_delivery(&self, mailing_id: i64, rows: usize) -> Result<()> {
        let body = serde_json::to_vec(&DeliverySignal { mailing_id, rows })?;
        self.publisher
            .publish(subjects::DELIVER.to_string(), body.into())
            .await
    }

    /// Fire-and-forget operational alert. Publish failures are logged,
    /// never propagated.
    pub async fn admin_alert(&self, component: &str, message: &str) {
        let body = match serde_json::to_vec(&AdminAlert { component, message }) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to serialize admin alert");
                return;
            }
        };
        if let Err(e) = self
            .publisher
            .publish(subjects::ADMIN_ALERTS.to_string(), body.into())
            .await
        {
            warn!(error = %e, component, "failed to publish admin alert");
        }
    }
}

/// Mock publisher that records messages for test assertions.
#[derive(Default)]
pub struct TestQueue {
    published: RwLock<Vec<PublishedMessage>>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    pub fn was_published_to(&self, subject: &str) -> bool {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|m| m.subject == subject)
    }

    pub fn publish_count_for(&self, subject: &str) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .count()
    }
}

#[async_trait]
impl QueuePublisher for TestQueue {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outbound_signals_use_fixed_subjects() {
        let queue = Arc::new(TestQueue::new());
        let outbound = Outbound::new(queue.clone());

        outbound.request_continuation("trigger-1").await.unwrap();
        outbound.signal_delivery(42, 3).await.unwrap();
        outbound.admin_alert("cycle", "something odd").await;

        assert!(queue.was_published_to(subjects::CYCLE));
        assert!(queue.was_published_to(subjects::DELIVER));
        assert!(queue.was_published_to(subjects::ADMIN_ALERTS));
        assert_eq!(queue.publish_count_for(subjects::CYCLE), 1);
    }

    #[tokio::test]
    async fn test_delivery_signal_payload() {
        let queue = Arc::new(TestQueue::new());
        let outbound = Outbound::new(queue.clone());

        outbound.signal_delivery(7, 2).await.unwrap();

        let messages = queue.messages_for_subject(subjects::DELIVER);
        let body: serde_json::Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(body["mailing_id"], 7);
        assert_eq!(body["rows"], 2);
    }
}
