//! In-Memory Notification Channel Adapter
//!
//! Implements the `NotificationChannel` port with one `tokio::sync::broadcast`
//! channel per topic. A topic exists only while it has subscribers; the last
//! subscription to go (closed or dropped) removes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::ports::{Delivery, NotificationChannel, Subscription};
use crate::error::{Error, Result};

const TOPIC_CAPACITY: usize = 16;

type Topics = Arc<DashMap<String, broadcast::Sender<String>>>;

/// Single-process publish/subscribe fan-out.
#[derive(Default)]
pub struct InMemoryNotificationChannel {
    topics: Topics,
}

impl InMemoryNotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Topics with at least one live subscription.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotificationChannel {
    async fn publish(&self, topic: &str, message: &str) -> Result<()> {
        if let Some(sender) = self.topics.get(topic) {
            // Err only means nobody is listening any more.
            let delivered = sender.send(message.to_string()).unwrap_or(0);
            debug!(topic, delivered, "Published notification");
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>> {
        let receiver = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();

        Ok(Box::new(InMemorySubscription {
            topic: topic.to_string(),
            receiver: Some(receiver),
            topics: self.topics.clone(),
        }))
    }
}

struct InMemorySubscription {
    topic: String,
    receiver: Option<broadcast::Receiver<String>>,
    topics: Topics,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn next_message(&mut self, timeout: Duration) -> Result<Delivery> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(Error::Internal(format!("subscription to {} is closed", self.topic)));
        };

        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Ok(message)) => Ok(Delivery::Message(message)),
            // Missed messages still mean something was published.
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                Ok(Delivery::Message(format!("lagged:{}", skipped)))
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => Err(Error::StoreUnavailable(format!(
                "topic {} closed",
                self.topic
            ))),
            Err(_) => Ok(Delivery::TimedOut),
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        drop(self.receiver.take());
        let removed = self
            .topics
            .remove_if(&self.topic, |_, sender| sender.receiver_count() == 0)
            .is_some();
        if removed {
            debug!(topic = %self.topic, "Removed idle topic");
        }
    }
}
