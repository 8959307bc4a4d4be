use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BusStarted,
    BusNearStudent,
    BusArrivedSchool,
    BusNearPickup,
    TripCompleted,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::BusStarted => "bus_started",
            NotificationType::BusNearStudent => "bus_near_student",
            NotificationType::BusArrivedSchool => "bus_arrived_school",
            NotificationType::BusNearPickup => "bus_near_pickup",
            NotificationType::TripCompleted => "trip_completed",
        }
    }

    /// Kinds guarded by the (trip_id, type, student_id) uniqueness constraint.
    pub fn is_deduplicated(&self) -> bool {
        matches!(
            self,
            NotificationType::BusNearStudent | NotificationType::BusArrivedSchool
        )
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Notification {
    pub notification_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub organization_id: Uuid,
    pub bus_id: Uuid,
    pub route_id: Uuid,
    pub trip_id: Uuid,
    pub student_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub data: Json<Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Notification content before it has been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub organization_id: Uuid,
    pub bus_id: Uuid,
    pub route_id: Uuid,
    pub trip_id: Uuid,
    pub student_id: Option<Uuid>,
    pub recipient_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub data: Value,
}

impl NewNotification {
    pub fn into_notification(self, notification_id: Uuid, created_at: DateTime<Utc>) -> Notification {
        Notification {
            notification_id,
            notification_type: self.notification_type,
            organization_id: self.organization_id,
            bus_id: self.bus_id,
            route_id: self.route_id,
            trip_id: self.trip_id,
            student_id: self.student_id,
            recipient_id: self.recipient_id,
            title: self.title,
            message: self.message,
            data: Json(self.data),
            read: false,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl NotificationQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
