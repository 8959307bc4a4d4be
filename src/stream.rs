//! Server-push notification streams.
//!
//! A `StreamSession` owns everything a connected client holds: its recipient
//! channel subscription and its keepalive timer. Dropping the session (the
//! HTTP body going away on disconnect) is the only teardown path.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{Principal, Role, PERM_NOTIFICATIONS_STREAM};
use crate::error::{Error, Result};
use crate::pubsub::{recipient_channel, ChannelHub, RecvError, Subscription};
use crate::store::FleetDirectory;

pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// One event-stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Connected { recipient_id: Uuid },
    Message(String),
    KeepAlive,
}

impl Frame {
    pub fn encode(&self) -> String {
        match self {
            Frame::Connected { recipient_id } => format!(
                "data: {{\"type\":\"connected\",\"recipient_id\":\"{}\"}}\n\n",
                recipient_id
            ),
            Frame::Message(payload) => format!("data: {}\n\n", payload),
            Frame::KeepAlive => ": keepalive\n\n".to_string(),
        }
    }
}

pub struct StreamGateway {
    hub: ChannelHub,
    fleet: Arc<dyn FleetDirectory>,
    keepalive: Duration,
}

impl StreamGateway {
    pub fn new(hub: ChannelHub, fleet: Arc<dyn FleetDirectory>, keepalive: Duration) -> Self {
        Self {
            hub,
            fleet,
            // a zero period would make the interval panic
            keepalive: keepalive.max(Duration::from_secs(1)),
        }
    }

    /// Validates the principal as a recipient and subscribes it to its
    /// channel. Nothing is sent to a client that fails here.
    pub async fn connect(&self, principal: &Principal) -> Result<StreamSession> {
        if principal.role != Role::Parent && !principal.can(PERM_NOTIFICATIONS_STREAM) {
            return Err(Error::Forbidden(
                "missing permission notifications:stream".to_string(),
            ));
        }

        let recipient_id = principal.user_id;
        if !self
            .fleet
            .recipient_exists(principal.organization_id, recipient_id)
            .await?
        {
            return Err(Error::not_found(format!("recipient {}", recipient_id)));
        }

        let subscription = self.hub.subscribe(&recipient_channel(recipient_id));
        info!(%recipient_id, "Stream session opened");

        Ok(StreamSession::new(recipient_id, subscription, self.keepalive))
    }
}

pub struct StreamSession {
    recipient_id: Uuid,
    subscription: Subscription,
    keepalive: Interval,
    greeted: bool,
}

impl StreamSession {
    fn new(recipient_id: Uuid, subscription: Subscription, period: Duration) -> Self {
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            recipient_id,
            subscription,
            keepalive,
            greeted: false,
        }
    }

    pub fn recipient_id(&self) -> Uuid {
        self.recipient_id
    }

    /// The connected frame first, then published messages in order,
    /// interleaved with keepalives. `None` once the channel is gone.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if !self.greeted {
            self.greeted = true;
            return Some(Frame::Connected {
                recipient_id: self.recipient_id,
            });
        }

        tokio::select! {
            biased;
            message = self.subscription.recv() => match message {
                Ok(payload) => Some(Frame::Message(payload)),
                Err(RecvError::Closed) => None,
            },
            _ = self.keepalive.tick() => {
                debug!(recipient_id = %self.recipient_id, "Keepalive");
                Some(Frame::KeepAlive)
            }
        }
    }

    /// Encoded frames as an HTTP body stream.
    pub fn into_stream(self) -> impl Stream<Item = std::result::Result<String, Infallible>> + Send {
        stream::unfold(self, |mut session| async move {
            let frame = session.next_frame().await?;
            Some((Ok(frame.encode()), session))
        })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        info!(recipient_id = %self.recipient_id, "Stream session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFleetDirectory;
    use futures::StreamExt;

    struct Setup {
        hub: ChannelHub,
        gateway: StreamGateway,
        org: Uuid,
        parent: Uuid,
    }

    fn setup() -> Setup {
        let org = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let fleet = Arc::new(MemoryFleetDirectory::new());
        fleet.add_user(org, parent);
        let hub = ChannelHub::new(16);
        Setup {
            gateway: StreamGateway::new(hub.clone(), fleet, DEFAULT_KEEPALIVE),
            hub,
            org,
            parent,
        }
    }

    #[test]
    fn test_frame_encoding() {
        let id = Uuid::nil();
        assert_eq!(
            Frame::Connected { recipient_id: id }.encode(),
            "data: {\"type\":\"connected\",\"recipient_id\":\"00000000-0000-0000-0000-000000000000\"}\n\n"
        );
        assert_eq!(
            Frame::Message("{\"a\":1}".to_string()).encode(),
            "data: {\"a\":1}\n\n"
        );
        assert_eq!(Frame::KeepAlive.encode(), ": keepalive\n\n");
    }

    #[tokio::test]
    async fn test_connect_requires_stream_right() {
        let s = setup();
        let driver = Principal::new(s.parent, s.org, Role::Driver);
        assert!(matches!(s.gateway.connect(&driver).await, Err(Error::Forbidden(_))));
        assert_eq!(s.hub.channel_count(), 0);

        let staff = Principal::new(s.parent, s.org, Role::SchoolStaff)
            .with_permission(PERM_NOTIFICATIONS_STREAM);
        assert!(s.gateway.connect(&staff).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_recipient() {
        let s = setup();
        let stranger = Principal::new(Uuid::new_v4(), s.org, Role::Parent);
        assert!(matches!(s.gateway.connect(&stranger).await, Err(Error::NotFound(_))));

        let other_org = Principal::new(s.parent, Uuid::new_v4(), Role::Parent);
        assert!(matches!(s.gateway.connect(&other_org).await, Err(Error::NotFound(_))));
        assert_eq!(s.hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_session_relays_in_publish_order() {
        let s = setup();
        let principal = Principal::new(s.parent, s.org, Role::Parent);
        let mut session = s.gateway.connect(&principal).await.unwrap();

        assert_eq!(
            session.next_frame().await,
            Some(Frame::Connected { recipient_id: s.parent })
        );

        let channel = recipient_channel(s.parent);
        assert_eq!(s.hub.publish(&channel, "first".to_string()), 1);
        assert_eq!(s.hub.publish(&channel, "second".to_string()), 1);
        // another recipient's traffic never shows up
        s.hub.publish(&recipient_channel(Uuid::new_v4()), "other".to_string());

        assert_eq!(session.next_frame().await, Some(Frame::Message("first".to_string())));
        assert_eq!(session.next_frame().await, Some(Frame::Message("second".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_after_idle_period() {
        let s = setup();
        let principal = Principal::new(s.parent, s.org, Role::Parent);
        let mut session = s.gateway.connect(&principal).await.unwrap();
        session.next_frame().await;

        let started = Instant::now();
        assert_eq!(session.next_frame().await, Some(Frame::KeepAlive));
        assert!(started.elapsed() >= DEFAULT_KEEPALIVE);

        assert_eq!(session.next_frame().await, Some(Frame::KeepAlive));
        assert!(started.elapsed() >= DEFAULT_KEEPALIVE * 2);
    }

    #[tokio::test]
    async fn test_dropping_session_releases_channel() {
        let s = setup();
        let principal = Principal::new(s.parent, s.org, Role::Parent);
        let channel = recipient_channel(s.parent);

        let first = s.gateway.connect(&principal).await.unwrap();
        let second = s.gateway.connect(&principal).await.unwrap();
        assert_eq!(s.hub.subscriber_count(&channel), 2);

        drop(first);
        assert_eq!(s.hub.subscriber_count(&channel), 1);
        drop(second);
        assert_eq!(s.hub.subscriber_count(&channel), 0);
        assert_eq!(s.hub.channel_count(), 0);
        assert_eq!(s.hub.publish(&channel, "late".to_string()), 0);
    }

    #[tokio::test]
    async fn test_into_stream_yields_encoded_frames() {
        let s = setup();
        let principal = Principal::new(s.parent, s.org, Role::Parent);
        let session = s.gateway.connect(&principal).await.unwrap();
        let mut frames = Box::pin(session.into_stream());

        let connected = frames.next().await.unwrap().unwrap();
        assert!(connected.starts_with("data: {\"type\":\"connected\""));

        s.hub.publish(&recipient_channel(s.parent), "{\"id\":1}".to_string());
        assert_eq!(frames.next().await.unwrap().unwrap(), "data: {\"id\":1}\n\n");

        drop(frames);
        assert_eq!(s.hub.channel_count(), 0);
    }
}
