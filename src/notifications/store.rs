//! Durable notification storage with a short-lived lookup cache.
//!
//! The relational repository is the source of truth. A `moka` cache keyed by
//! notification id keeps a copy of every notification written or read
//! through this store for the retention window; read-flag changes refresh
//! the cached copy when one is present.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{NewNotification, Notification, NotificationQuery, NotificationType};
use crate::store::NotificationRepository;

/// Default retention of cached copies: 7 days.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Result of persisting a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Created(Notification),
    /// The dedup key (trip, type, student) was already taken.
    AlreadyExists,
}

impl PersistOutcome {
    pub fn created(self) -> Option<Notification> {
        match self {
            PersistOutcome::Created(n) => Some(n),
            PersistOutcome::AlreadyExists => None,
        }
    }
}

pub struct NotificationStore {
    repository: Arc<dyn NotificationRepository>,
    cache: Cache<Uuid, Notification>,
}

impl NotificationStore {
    pub fn new(repository: Arc<dyn NotificationRepository>, ttl: Duration, capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();

        Self { repository, cache }
    }

    pub async fn persist(&self, notification: NewNotification) -> Result<PersistOutcome> {
        match self.repository.insert(notification).await? {
            Some(stored) => {
                self.cache
                    .insert(stored.notification_id, stored.clone())
                    .await;
                Ok(PersistOutcome::Created(stored))
            }
            None => Ok(PersistOutcome::AlreadyExists),
        }
    }

    pub async fn exists_for_trip_type_student(
        &self,
        trip_id: Uuid,
        notification_type: NotificationType,
        student_id: Option<Uuid>,
    ) -> Result<bool> {
        self.repository
            .exists_for_trip_type_student(trip_id, notification_type, student_id)
            .await
    }

    /// Cache-first lookup by id.
    pub async fn find(&self, organization_id: Uuid, notification_id: Uuid) -> Result<Option<Notification>> {
        if let Some(cached) = self.cache.get(&notification_id).await {
            if cached.organization_id == organization_id {
                return Ok(Some(cached));
            }
            return Ok(None);
        }

        let found = self.repository.find(organization_id, notification_id).await?;
        if let Some(notification) = &found {
            self.cache
                .insert(notification.notification_id, notification.clone())
                .await;
        }
        Ok(found)
    }

    /// Paginated, most recent first.
    pub async fn get_for_recipient(
        &self,
        recipient_id: Uuid,
        organization_id: Uuid,
        query: NotificationQuery,
    ) -> Result<Vec<Notification>> {
        self.repository
            .list_for_recipient(organization_id, recipient_id, query)
            .await
    }

    pub async fn get_unread_count(&self, recipient_id: Uuid, organization_id: Uuid) -> Result<i64> {
        self.repository.unread_count(organization_id, recipient_id).await
    }

    /// Marks one notification read. Idempotent; a notification addressed to
    /// someone else is `Forbidden`.
    pub async fn mark_read(
        &self,
        notification_id: Uuid,
        recipient_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Notification> {
        let existing = self
            .find(organization_id, notification_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("notification {}", notification_id)))?;

        if existing.recipient_id != Some(recipient_id) {
            return Err(Error::Forbidden(
                "notification belongs to another recipient".to_string(),
            ));
        }

        let updated = self
            .repository
            .mark_read(organization_id, notification_id, recipient_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("notification {}", notification_id)))?;

        self.refresh_cached(&updated).await;
        Ok(updated)
    }

    /// Marks every unread notification of the recipient read; returns how many changed.
    pub async fn mark_all_read(&self, recipient_id: Uuid, organization_id: Uuid) -> Result<usize> {
        let updated = self
            .repository
            .mark_all_read(organization_id, recipient_id)
            .await?;

        for notification in &updated {
            self.refresh_cached(notification).await;
        }
        debug!(%recipient_id, "Marked {} notifications read", updated.len());
        Ok(updated.len())
    }

    async fn refresh_cached(&self, notification: &Notification) {
        if self.cache.contains_key(&notification.notification_id) {
            self.cache
                .insert(notification.notification_id, notification.clone())
                .await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn cached(&self, notification_id: Uuid) -> Option<Notification> {
        self.cache.get(&notification_id).await
    }
}
