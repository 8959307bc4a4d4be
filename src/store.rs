//! Storage seams consumed by the trip and notification services.
//!
//! Each trait is object-safe (`BoxFuture` returns) so services can hold
//! `Arc<dyn ...>` handles: Postgres in production, `memory` in tests.
//! Every lookup is scoped by organization id.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Bus, LocationFix, NewNotification, NewTrip, Notification, NotificationQuery,
    NotificationType, Route, Stop, Student, Trip, TripFilter, TripPoint,
};

pub trait TripRepository: Send + Sync {
    /// Inserts an in-progress trip.
    ///
    /// Fails with `Error::Conflict` when the bus already has an in-progress trip.
    fn insert(&self, trip: NewTrip) -> BoxFuture<'_, Result<Trip>>;

    fn find(&self, organization_id: Uuid, trip_id: Uuid) -> BoxFuture<'_, Result<Option<Trip>>>;

    fn find_active_for_bus(
        &self,
        organization_id: Uuid,
        bus_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Trip>>>;

    /// Writes telemetry and appends a history point, only if the trip is still
    /// in progress. Returns `None` when no in-progress trip matched.
    fn record_location(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
        fix: LocationFix,
        distance_increment: f64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Trip>>>;

    /// Moves an in-progress trip to completed. Returns `None` when no
    /// in-progress trip matched.
    fn complete(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Trip>>>;

    /// Deletes a trip that is not in progress, with its telemetry history.
    /// Returns false when nothing was deleted.
    fn delete(&self, organization_id: Uuid, trip_id: Uuid) -> BoxFuture<'_, Result<bool>>;

    /// Trips matching the filter, most recent start first.
    fn list(&self, organization_id: Uuid, filter: TripFilter) -> BoxFuture<'_, Result<Vec<Trip>>>;

    /// Telemetry history of a trip, oldest first.
    fn points(&self, organization_id: Uuid, trip_id: Uuid)
        -> BoxFuture<'_, Result<Vec<TripPoint>>>;
}

pub trait NotificationRepository: Send + Sync {
    /// Inserts a notification. Returns `None` when a deduplicated kind already
    /// has a row for the same (trip_id, type, student_id).
    fn insert(&self, notification: NewNotification) -> BoxFuture<'_, Result<Option<Notification>>>;

    /// With `student_id = None`, matches any notification of that type on the trip.
    fn exists_for_trip_type_student(
        &self,
        trip_id: Uuid,
        notification_type: NotificationType,
        student_id: Option<Uuid>,
    ) -> BoxFuture<'_, Result<bool>>;

    fn find(
        &self,
        organization_id: Uuid,
        notification_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Notification>>>;

    /// Most recent first.
    fn list_for_recipient(
        &self,
        organization_id: Uuid,
        recipient_id: Uuid,
        query: NotificationQuery,
    ) -> BoxFuture<'_, Result<Vec<Notification>>>;

    fn unread_count(&self, organization_id: Uuid, recipient_id: Uuid) -> BoxFuture<'_, Result<i64>>;

    /// Returns the updated row, or `None` if it is not addressed to the recipient.
    fn mark_read(
        &self,
        organization_id: Uuid,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Notification>>>;

    /// Returns the rows that flipped from unread to read.
    fn mark_all_read(
        &self,
        organization_id: Uuid,
        recipient_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<Notification>>>;
}

/// Read-only lookups into entities owned by the CRUD layer.
pub trait FleetDirectory: Send + Sync {
    fn bus(&self, organization_id: Uuid, bus_id: Uuid) -> BoxFuture<'_, Result<Option<Bus>>>;

    fn route(&self, organization_id: Uuid, route_id: Uuid) -> BoxFuture<'_, Result<Option<Route>>>;

    /// Stops ordered by order index.
    fn route_stops(&self, organization_id: Uuid, route_id: Uuid) -> BoxFuture<'_, Result<Vec<Stop>>>;

    fn students_on_bus(&self, organization_id: Uuid, bus_id: Uuid)
        -> BoxFuture<'_, Result<Vec<Student>>>;

    /// Whether the user is an active member of the organization.
    fn recipient_exists(&self, organization_id: Uuid, user_id: Uuid) -> BoxFuture<'_, Result<bool>>;
}
