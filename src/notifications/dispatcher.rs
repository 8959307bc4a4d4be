use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{NotificationStore, PersistOutcome};
use crate::error::Result;
use crate::models::{NewNotification, Notification, NotificationType, Stop, Student};
use crate::pubsub::PubSubFanout;

/// Identity and display names shared by every notification of one trip.
#[derive(Debug, Clone, PartialEq)]
pub struct TripContext {
    pub organization_id: Uuid,
    pub trip_id: Uuid,
    pub bus_id: Uuid,
    pub route_id: Uuid,
    pub bus_number: String,
    pub route_name: String,
}

/// Builds notification content, persists it, then fans it out.
///
/// Persistence errors propagate; publish failures never do. A notification
/// whose dedup key already exists is neither stored again nor published.
pub struct NotificationDispatcher {
    store: Arc<NotificationStore>,
    fanout: PubSubFanout,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<NotificationStore>, fanout: PubSubFanout) -> Self {
        Self { store, fanout }
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// One notification per student with a parent, addressed to that parent.
    pub async fn create_for_bus_started(
        &self,
        ctx: &TripContext,
        students: &[Student],
    ) -> Result<Vec<Notification>> {
        let mut created = Vec::new();
        for student in students.iter().filter(|s| s.parent_id.is_some()) {
            let new = self.base(ctx, NotificationType::BusStarted, Some(student)).content(
                format!("Bus {} has started", ctx.bus_number),
                format!(
                    "Bus {} on route {} has started its trip.",
                    ctx.bus_number, ctx.route_name
                ),
                json!({
                    "bus_number": ctx.bus_number,
                    "route_name": ctx.route_name,
                    "student_name": student.name,
                }),
            );
            created.extend(self.dispatch(new).await?);
        }
        info!(trip_id = %ctx.trip_id, "Dispatched {} bus started notifications", created.len());
        Ok(created)
    }

    /// Bus is within the pickup geofence of one student's stop.
    pub async fn create_for_near_pickup(
        &self,
        ctx: &TripContext,
        student: &Student,
        stop: &Stop,
        distance_meters: f64,
        eta_minutes: u32,
    ) -> Result<Option<Notification>> {
        let distance = distance_meters.round() as i64;
        let new = self.base(ctx, NotificationType::BusNearStudent, Some(student)).content(
            format!("Bus {} is approaching", ctx.bus_number),
            format!(
                "Bus {} is {} m from {}'s stop ({}). Estimated arrival in {} min.",
                ctx.bus_number, distance, student.name, stop.name, eta_minutes
            ),
            json!({
                "bus_number": ctx.bus_number,
                "route_name": ctx.route_name,
                "student_name": student.name,
                "stop_id": stop.stop_id,
                "stop_name": stop.name,
                "distance_meters": distance,
                "eta_minutes": eta_minutes,
            }),
        );
        self.dispatch(new).await
    }

    /// One notification per student on the bus.
    pub async fn create_for_arrived_school(
        &self,
        ctx: &TripContext,
        destination: &Stop,
        students: &[Student],
    ) -> Result<Vec<Notification>> {
        let mut created = Vec::new();
        for student in students {
            let new = self
                .base(ctx, NotificationType::BusArrivedSchool, Some(student))
                .content(
                    format!("Bus {} arrived at school", ctx.bus_number),
                    format!(
                        "Bus {} has arrived at {} with {}.",
                        ctx.bus_number, destination.name, student.name
                    ),
                    json!({
                        "bus_number": ctx.bus_number,
                        "route_name": ctx.route_name,
                        "student_name": student.name,
                        "stop_id": destination.stop_id,
                        "stop_name": destination.name,
                    }),
                );
            created.extend(self.dispatch(new).await?);
        }
        info!(trip_id = %ctx.trip_id, "Dispatched {} arrived at school notifications", created.len());
        Ok(created)
    }

    /// One notification per student with a parent.
    pub async fn create_for_trip_completed(
        &self,
        ctx: &TripContext,
        students: &[Student],
    ) -> Result<Vec<Notification>> {
        let mut created = Vec::new();
        for student in students.iter().filter(|s| s.parent_id.is_some()) {
            let new = self.base(ctx, NotificationType::TripCompleted, Some(student)).content(
                format!("Bus {} completed its trip", ctx.bus_number),
                format!(
                    "Bus {} has completed route {}.",
                    ctx.bus_number, ctx.route_name
                ),
                json!({
                    "bus_number": ctx.bus_number,
                    "route_name": ctx.route_name,
                    "student_name": student.name,
                }),
            );
            created.extend(self.dispatch(new).await?);
        }
        Ok(created)
    }

    fn base(
        &self,
        ctx: &TripContext,
        notification_type: NotificationType,
        student: Option<&Student>,
    ) -> Draft {
        Draft {
            notification_type,
            organization_id: ctx.organization_id,
            bus_id: ctx.bus_id,
            route_id: ctx.route_id,
            trip_id: ctx.trip_id,
            student_id: student.map(|s| s.student_id),
            recipient_id: student.and_then(|s| s.parent_id),
        }
    }

    async fn dispatch(&self, new: NewNotification) -> Result<Option<Notification>> {
        let kind = new.notification_type;
        match self.store.persist(new).await? {
            PersistOutcome::Created(notification) => {
                let outcome = self.fanout.publish(&notification);
                debug!(
                    notification_id = %notification.notification_id,
                    "Published {} to {} subscribers", kind, outcome.reached()
                );
                Ok(Some(notification))
            }
            PersistOutcome::AlreadyExists => {
                debug!("Skipped duplicate {} notification", kind);
                Ok(None)
            }
        }
    }
}

struct Draft {
    notification_type: NotificationType,
    organization_id: Uuid,
    bus_id: Uuid,
    route_id: Uuid,
    trip_id: Uuid,
    student_id: Option<Uuid>,
    recipient_id: Option<Uuid>,
}

impl Draft {
    fn content(self, title: String, message: String, data: serde_json::Value) -> NewNotification {
        NewNotification {
            notification_type: self.notification_type,
            organization_id: self.organization_id,
            bus_id: self.bus_id,
            route_id: self.route_id,
            trip_id: self.trip_id,
            student_id: self.student_id,
            recipient_id: self.recipient_id,
            title,
            message,
            data,
        }
    }
}
