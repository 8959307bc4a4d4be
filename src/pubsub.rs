//! In-process pub/sub hub and notification fan-out.
//!
//! Channels are created on first subscribe and pruned when their last
//! subscriber goes away. Publishing to a channel nobody listens on is a
//! successful no-op.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Notification;

pub fn organization_channel(organization_id: Uuid) -> String {
    format!("org:{}", organization_id)
}

pub fn recipient_channel(recipient_id: Uuid) -> String {
    format!("recipient:{}", recipient_id)
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecvError {
    /// The hub dropped the channel.
    #[error("channel closed")]
    Closed,
}

type Channels = DashMap<String, broadcast::Sender<String>>;

/// Named broadcast channels carrying serialized messages.
#[derive(Clone)]
pub struct ChannelHub {
    channels: Arc<Channels>,
    capacity: usize,
}

impl ChannelHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Sends `payload` to every current subscriber of `channel`; returns how
    /// many subscribers it reached.
    pub fn publish(&self, channel: &str, payload: String) -> usize {
        match self.channels.get(channel) {
            Some(sender) => sender.send(payload).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscribe(&self, channel: &str) -> Subscription {
        let receiver = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(channel, "Subscribed");

        Subscription {
            channel: channel.to_string(),
            receiver: Some(receiver),
            channels: Arc::clone(&self.channels),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

/// A live subscription to one hub channel. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    receiver: Option<broadcast::Receiver<String>>,
    channels: Arc<Channels>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message in publish order. Messages lost to lag are skipped.
    pub async fn recv(&mut self) -> Result<String, RecvError> {
        let receiver = self.receiver.as_mut().ok_or(RecvError::Closed)?;
        loop {
            match receiver.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = %self.channel, "Subscriber lagged, skipped {} messages", n);
                }
                Err(broadcast::error::RecvError::Closed) => return Err(RecvError::Closed),
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // release our receiver before checking whether anyone is left
        drop(self.receiver.take());
        self.channels
            .remove_if(&self.channel, |_, sender| sender.receiver_count() == 0);
        debug!(channel = %self.channel, "Unsubscribed");
    }
}

/// Per-channel result of a fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// (channel, subscribers reached)
    pub delivered: Vec<(String, usize)>,
    pub failed: bool,
}

impl PublishOutcome {
    pub fn reached(&self) -> usize {
        self.delivered.iter().map(|(_, n)| n).sum()
    }
}

/// Publishes stored notifications onto the tenant channel and, when addressed,
/// the recipient channel. Never fails the caller.
#[derive(Clone)]
pub struct PubSubFanout {
    hub: ChannelHub,
}

impl PubSubFanout {
    pub fn new(hub: ChannelHub) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }

    pub fn publish(&self, notification: &Notification) -> PublishOutcome {
        match self.try_publish(notification) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    notification_id = %notification.notification_id,
                    "Failed to publish notification: {}", e
                );
                PublishOutcome {
                    delivered: Vec::new(),
                    failed: true,
                }
            }
        }
    }

    fn try_publish(&self, notification: &Notification) -> Result<PublishOutcome, PublishError> {
        let payload = serde_json::to_string(notification)?;

        let mut channels = vec![organization_channel(notification.organization_id)];
        if let Some(recipient_id) = notification.recipient_id {
            channels.push(recipient_channel(recipient_id));
        }

        let delivered = channels
            .into_iter()
            .map(|channel| {
                let reached = self.hub.publish(&channel, payload.clone());
                (channel, reached)
            })
            .collect();

        Ok(PublishOutcome {
            delivered,
            failed: false,
        })
    }
}
