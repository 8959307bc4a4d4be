use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use sqlx::types::Json;
use uuid::Uuid;

use super::{queries, DbPool};
use crate::error::Result;
use crate::models::{NewNotification, Notification, NotificationQuery, NotificationType};
use crate::store::NotificationRepository;

#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: DbPool,
}

impl PgNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl NotificationRepository for PgNotificationRepository {
    fn insert(&self, notification: NewNotification) -> BoxFuture<'_, Result<Option<Notification>>> {
        async move {
            // ON CONFLICT DO NOTHING returns no row for a duplicate dedup key
            let stored = sqlx::query_as::<_, Notification>(queries::INSERT_NOTIFICATION)
                .bind(Uuid::new_v4())
                .bind(notification.notification_type)
                .bind(notification.organization_id)
                .bind(notification.bus_id)
                .bind(notification.route_id)
                .bind(notification.trip_id)
                .bind(notification.student_id)
                .bind(notification.recipient_id)
                .bind(&notification.title)
                .bind(&notification.message)
                .bind(Json(&notification.data))
                .bind(Utc::now())
                .fetch_optional(&self.pool)
                .await?;
            Ok(stored)
        }
        .boxed()
    }

    fn exists_for_trip_type_student(
        &self,
        trip_id: Uuid,
        notification_type: NotificationType,
        student_id: Option<Uuid>,
    ) -> BoxFuture<'_, Result<bool>> {
        async move {
            let exists = match student_id {
                Some(student_id) => {
                    sqlx::query_scalar::<_, bool>(queries::EXISTS_NOTIFICATION_FOR_STUDENT)
                        .bind(trip_id)
                        .bind(notification_type)
                        .bind(student_id)
                        .fetch_one(&self.pool)
                        .await?
                }
                None => {
                    sqlx::query_scalar::<_, bool>(queries::EXISTS_NOTIFICATION_FOR_TRIP)
                        .bind(trip_id)
                        .bind(notification_type)
                        .fetch_one(&self.pool)
                        .await?
                }
            };
            Ok(exists)
        }
        .boxed()
    }

    fn find(
        &self,
        organization_id: Uuid,
        notification_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Notification>>> {
        async move {
            let found = sqlx::query_as::<_, Notification>(queries::SELECT_NOTIFICATION)
                .bind(notification_id)
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(found)
        }
        .boxed()
    }

    fn list_for_recipient(
        &self,
        organization_id: Uuid,
        recipient_id: Uuid,
        query: NotificationQuery,
    ) -> BoxFuture<'_, Result<Vec<Notification>>> {
        async move {
            let rows = sqlx::query_as::<_, Notification>(queries::LIST_NOTIFICATIONS_FOR_RECIPIENT)
                .bind(organization_id)
                .bind(recipient_id)
                .bind(query.unread_only)
                .bind(query.limit())
                .bind(query.offset())
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
        .boxed()
    }

    fn unread_count(&self, organization_id: Uuid, recipient_id: Uuid) -> BoxFuture<'_, Result<i64>> {
        async move {
            let count = sqlx::query_scalar::<_, i64>(queries::COUNT_UNREAD_NOTIFICATIONS)
                .bind(organization_id)
                .bind(recipient_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(count)
        }
        .boxed()
    }

    fn mark_read(
        &self,
        organization_id: Uuid,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Notification>>> {
        async move {
            let updated = sqlx::query_as::<_, Notification>(queries::MARK_NOTIFICATION_READ)
                .bind(notification_id)
                .bind(organization_id)
                .bind(recipient_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(updated)
        }
        .boxed()
    }

    fn mark_all_read(
        &self,
        organization_id: Uuid,
        recipient_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<Notification>>> {
        async move {
            let updated = sqlx::query_as::<_, Notification>(queries::MARK_ALL_NOTIFICATIONS_READ)
                .bind(organization_id)
                .bind(recipient_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(updated)
        }
        .boxed()
    }
}
