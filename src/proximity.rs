//! Geofence decisions for bus positions.
//!
//! `evaluate` is pure: it turns a position, the route's stops and the bus's
//! students into candidate events. `ProximityMonitor` runs it on each
//! location update, drops candidates already notified for the trip, and hands
//! the rest to the dispatcher.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::geo::{eta_minutes, haversine_distance};
use crate::models::fleet::destination;
use crate::models::{NotificationType, Stop, Student, Trip};
use crate::notifications::{NotificationDispatcher, NotificationStore, TripContext};

/// Radius around the destination stop that counts as arrived.
pub const NEAR_DESTINATION_METERS: f64 = 200.0;

/// Radius around a student's pickup stop that triggers an approach alert.
pub const NEAR_PICKUP_METERS: f64 = 500.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ProximityEvent {
    ArrivedDestination {
        stop: Stop,
        distance_meters: f64,
        students: Vec<Student>,
    },
    NearPickup {
        student: Student,
        stop: Stop,
        distance_meters: f64,
        eta_minutes: u32,
    },
}

/// Candidate events for a bus at (`latitude`, `longitude`).
///
/// Reaching the destination takes priority: when inside its geofence and no
/// arrival has been sent yet, the single arrival event is returned and no
/// pickup checks run.
pub fn evaluate(
    latitude: f64,
    longitude: f64,
    stops: &[Stop],
    students: &[Student],
    arrival_already_sent: bool,
) -> Vec<ProximityEvent> {
    if let Some(school) = destination(stops) {
        let distance = haversine_distance(latitude, longitude, school.latitude, school.longitude);
        if distance <= NEAR_DESTINATION_METERS && !arrival_already_sent {
            return vec![ProximityEvent::ArrivedDestination {
                stop: school.clone(),
                distance_meters: distance,
                students: students.to_vec(),
            }];
        }
    }

    students
        .iter()
        .filter_map(|student| {
            let stop_id = student.pickup_stop_id?;
            let stop = stops.iter().find(|s| s.stop_id == stop_id)?;
            let distance = haversine_distance(latitude, longitude, stop.latitude, stop.longitude);
            (distance <= NEAR_PICKUP_METERS).then(|| ProximityEvent::NearPickup {
                student: student.clone(),
                stop: stop.clone(),
                distance_meters: distance,
                eta_minutes: eta_minutes(distance),
            })
        })
        .collect()
}

/// Applies `evaluate` to live trips and dispatches what is new.
pub struct ProximityMonitor {
    store: Arc<NotificationStore>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl ProximityMonitor {
    pub fn new(dispatcher: Arc<NotificationDispatcher>) -> Self {
        Self {
            store: Arc::clone(dispatcher.store()),
            dispatcher,
        }
    }

    /// Returns the number of notifications created.
    pub async fn check(
        &self,
        trip: &Trip,
        ctx: &TripContext,
        stops: &[Stop],
        students: &[Student],
    ) -> Result<usize> {
        let Some((latitude, longitude)) = trip.position() else {
            return Ok(0);
        };

        let arrival_already_sent = self
            .store
            .exists_for_trip_type_student(trip.trip_id, NotificationType::BusArrivedSchool, None)
            .await?;

        let mut created = 0;
        for event in evaluate(latitude, longitude, stops, students, arrival_already_sent) {
            // one failing event must not hold back the others
            match self.dispatch_event(trip, ctx, event).await {
                Ok(n) => created += n,
                Err(e) => warn!(trip_id = %trip.trip_id, "Proximity notification failed: {}", e),
            }
        }
        Ok(created)
    }

    async fn dispatch_event(
        &self,
        trip: &Trip,
        ctx: &TripContext,
        event: ProximityEvent,
    ) -> Result<usize> {
        match event {
            ProximityEvent::ArrivedDestination { stop, distance_meters, students } => {
                debug!(trip_id = %trip.trip_id, "Bus within {:.0} m of {}", distance_meters, stop.name);
                let created = self
                    .dispatcher
                    .create_for_arrived_school(ctx, &stop, &students)
                    .await?;
                Ok(created.len())
            }
            ProximityEvent::NearPickup { student, stop, distance_meters, eta_minutes } => {
                let already_notified = self
                    .store
                    .exists_for_trip_type_student(
                        trip.trip_id,
                        NotificationType::BusNearStudent,
                        Some(student.student_id),
                    )
                    .await?;
                if already_notified {
                    return Ok(0);
                }
                // a concurrent update may still win the insert; the
                // dedup constraint turns ours into AlreadyExists
                let created = self
                    .dispatcher
                    .create_for_near_pickup(ctx, &student, &stop, distance_meters, eta_minutes)
                    .await?;
                Ok(usize::from(created.is_some()))
            }
        }
    }
}
