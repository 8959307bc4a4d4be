//! In-memory storage backends with the same contracts as the Postgres ones.
//!
//! Used by the test suites; each check-and-write happens under one lock so the
//! uniqueness guarantees match the database constraints.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Bus, LocationFix, NewNotification, NewTrip, Notification, NotificationQuery,
    NotificationType, Route, Stop, Student, Trip, TripFilter, TripPoint, TripStatus,
};
use crate::store::{FleetDirectory, NotificationRepository, TripRepository};

#[derive(Default)]
struct TripTables {
    trips: HashMap<Uuid, Trip>,
    points: Vec<TripPoint>,
    next_point_id: i64,
}

#[derive(Default)]
pub struct MemoryTripRepository {
    inner: Mutex<TripTables>,
}

impl MemoryTripRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites a trip row as-is; lets tests stage arbitrary states.
    pub fn put(&self, trip: Trip) {
        self.inner.lock().trips.insert(trip.trip_id, trip);
    }
}

impl TripRepository for MemoryTripRepository {
    fn insert(&self, trip: NewTrip) -> BoxFuture<'_, Result<Trip>> {
        let mut tables = self.inner.lock();
        let duplicate = tables.trips.values().any(|t| {
            t.organization_id == trip.organization_id
                && t.bus_id == trip.bus_id
                && t.status == TripStatus::InProgress
        });
        let result = if duplicate {
            Err(Error::Conflict(format!(
                "bus {} already has an active trip",
                trip.bus_id
            )))
        } else {
            let trip = trip.into_trip();
            tables.trips.insert(trip.trip_id, trip.clone());
            Ok(trip)
        };
        future::ready(result).boxed()
    }

    fn find(&self, organization_id: Uuid, trip_id: Uuid) -> BoxFuture<'_, Result<Option<Trip>>> {
        let trip = self
            .inner
            .lock()
            .trips
            .get(&trip_id)
            .filter(|t| t.organization_id == organization_id)
            .cloned();
        future::ready(Ok(trip)).boxed()
    }

    fn find_active_for_bus(
        &self,
        organization_id: Uuid,
        bus_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Trip>>> {
        let trip = self
            .inner
            .lock()
            .trips
            .values()
            .find(|t| {
                t.organization_id == organization_id && t.bus_id == bus_id && t.is_active()
            })
            .cloned();
        future::ready(Ok(trip)).boxed()
    }

    fn record_location(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
        fix: LocationFix,
        distance_increment: f64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Trip>>> {
        let mut tables = self.inner.lock();
        let updated = match tables.trips.get_mut(&trip_id) {
            Some(trip) if trip.organization_id == organization_id && trip.is_active() => {
                trip.current_lat = Some(fix.latitude);
                trip.current_lng = Some(fix.longitude);
                trip.speed_kmh = fix.speed_kmh;
                trip.heading = fix.heading;
                trip.accuracy = fix.accuracy;
                trip.distance_meters += distance_increment;
                trip.last_update = Some(at);
                Some(trip.clone())
            }
            _ => None,
        };

        if updated.is_some() {
            tables.next_point_id += 1;
            let point_id = tables.next_point_id;
            tables.points.push(TripPoint {
                point_id,
                trip_id,
                timestamp: at,
                lat: fix.latitude,
                lng: fix.longitude,
                speed: fix.speed_kmh,
                heading: fix.heading,
                accuracy: fix.accuracy,
            });
        }
        future::ready(Ok(updated)).boxed()
    }

    fn complete(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Trip>>> {
        let mut tables = self.inner.lock();
        let completed = match tables.trips.get_mut(&trip_id) {
            Some(trip) if trip.organization_id == organization_id && trip.is_active() => {
                trip.status = TripStatus::Completed;
                trip.end_time = Some(at);
                Some(trip.clone())
            }
            _ => None,
        };
        future::ready(Ok(completed)).boxed()
    }

    fn delete(&self, organization_id: Uuid, trip_id: Uuid) -> BoxFuture<'_, Result<bool>> {
        let mut tables = self.inner.lock();
        let deletable = tables
            .trips
            .get(&trip_id)
            .is_some_and(|t| t.organization_id == organization_id && !t.is_active());
        if deletable {
            tables.trips.remove(&trip_id);
            tables.points.retain(|p| p.trip_id != trip_id);
        }
        future::ready(Ok(deletable)).boxed()
    }

    fn list(&self, organization_id: Uuid, filter: TripFilter) -> BoxFuture<'_, Result<Vec<Trip>>> {
        let tables = self.inner.lock();
        let mut trips: Vec<Trip> = tables
            .trips
            .values()
            .filter(|t| t.organization_id == organization_id && filter.matches(t))
            .cloned()
            .collect();
        trips.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        let trips = trips
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect();
        future::ready(Ok(trips)).boxed()
    }

    fn points(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<TripPoint>>> {
        let tables = self.inner.lock();
        let owned = tables
            .trips
            .get(&trip_id)
            .is_some_and(|t| t.organization_id == organization_id);
        let points = if owned {
            tables
                .points
                .iter()
                .filter(|p| p.trip_id == trip_id)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        future::ready(Ok(points)).boxed()
    }
}

#[derive(Default)]
pub struct MemoryNotificationRepository {
    rows: Mutex<Vec<Notification>>,
    failure: Mutex<InsertFailure>,
}

/// Which inserts a `MemoryNotificationRepository` refuses, as a storage
/// outage would.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertFailure {
    #[default]
    Never,
    Always,
    ForStudent(Uuid),
}

impl InsertFailure {
    fn applies_to(&self, notification: &NewNotification) -> bool {
        match self {
            InsertFailure::Never => false,
            InsertFailure::Always => true,
            InsertFailure::ForStudent(id) => notification.student_id == Some(*id),
        }
    }
}

impl MemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts(&self, failure: InsertFailure) {
        *self.failure.lock() = failure;
    }

    /// Every stored notification, in insertion order.
    pub fn all(&self) -> Vec<Notification> {
        self.rows.lock().clone()
    }

    pub fn count_of(&self, trip_id: Uuid, notification_type: NotificationType) -> usize {
        self.rows
            .lock()
            .iter()
            .filter(|n| n.trip_id == trip_id && n.notification_type == notification_type)
            .count()
    }
}

impl NotificationRepository for MemoryNotificationRepository {
    fn insert(&self, notification: NewNotification) -> BoxFuture<'_, Result<Option<Notification>>> {
        if self.failure.lock().applies_to(&notification) {
            return future::ready(Err(Error::Database(sqlx::Error::PoolTimedOut))).boxed();
        }

        let mut rows = self.rows.lock();
        let duplicate = notification.notification_type.is_deduplicated()
            && notification.student_id.is_some()
            && rows.iter().any(|n| {
                n.trip_id == notification.trip_id
                    && n.notification_type == notification.notification_type
                    && n.student_id == notification.student_id
            });
        let stored = if duplicate {
            None
        } else {
            let stored = notification.into_notification(Uuid::new_v4(), Utc::now());
            rows.push(stored.clone());
            Some(stored)
        };
        future::ready(Ok(stored)).boxed()
    }

    fn exists_for_trip_type_student(
        &self,
        trip_id: Uuid,
        notification_type: NotificationType,
        student_id: Option<Uuid>,
    ) -> BoxFuture<'_, Result<bool>> {
        let exists = self.rows.lock().iter().any(|n| {
            n.trip_id == trip_id
                && n.notification_type == notification_type
                && student_id.map_or(true, |id| n.student_id == Some(id))
        });
        future::ready(Ok(exists)).boxed()
    }

    fn find(
        &self,
        organization_id: Uuid,
        notification_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Notification>>> {
        let found = self
            .rows
            .lock()
            .iter()
            .find(|n| n.notification_id == notification_id && n.organization_id == organization_id)
            .cloned();
        future::ready(Ok(found)).boxed()
    }

    fn list_for_recipient(
        &self,
        organization_id: Uuid,
        recipient_id: Uuid,
        query: NotificationQuery,
    ) -> BoxFuture<'_, Result<Vec<Notification>>> {
        let rows = self.rows.lock();
        // newest rows were pushed last
        let page = rows
            .iter()
            .rev()
            .filter(|n| {
                n.organization_id == organization_id
                    && n.recipient_id == Some(recipient_id)
                    && (!query.unread_only || !n.read)
            })
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect();
        future::ready(Ok(page)).boxed()
    }

    fn unread_count(&self, organization_id: Uuid, recipient_id: Uuid) -> BoxFuture<'_, Result<i64>> {
        let count = self
            .rows
            .lock()
            .iter()
            .filter(|n| {
                n.organization_id == organization_id
                    && n.recipient_id == Some(recipient_id)
                    && !n.read
            })
            .count() as i64;
        future::ready(Ok(count)).boxed()
    }

    fn mark_read(
        &self,
        organization_id: Uuid,
        notification_id: Uuid,
        recipient_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Notification>>> {
        let mut rows = self.rows.lock();
        let updated = rows
            .iter_mut()
            .find(|n| {
                n.notification_id == notification_id
                    && n.organization_id == organization_id
                    && n.recipient_id == Some(recipient_id)
            })
            .map(|n| {
                n.read = true;
                n.clone()
            });
        future::ready(Ok(updated)).boxed()
    }

    fn mark_all_read(
        &self,
        organization_id: Uuid,
        recipient_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<Notification>>> {
        let mut rows = self.rows.lock();
        let updated = rows
            .iter_mut()
            .filter(|n| {
                n.organization_id == organization_id
                    && n.recipient_id == Some(recipient_id)
                    && !n.read
            })
            .map(|n| {
                n.read = true;
                n.clone()
            })
            .collect();
        future::ready(Ok(updated)).boxed()
    }
}

#[derive(Default)]
struct FleetTables {
    buses: HashMap<Uuid, Bus>,
    routes: HashMap<Uuid, Route>,
    stops: Vec<Stop>,
    assignments: Vec<(Uuid, Student)>,
    users: Vec<(Uuid, Uuid)>,
}

#[derive(Default)]
pub struct MemoryFleetDirectory {
    inner: Mutex<FleetTables>,
}

impl MemoryFleetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bus(&self, bus: Bus) {
        self.inner.lock().buses.insert(bus.bus_id, bus);
    }

    pub fn add_route(&self, route: Route, stops: Vec<Stop>) {
        let mut tables = self.inner.lock();
        tables.stops.retain(|s| s.route_id != route.route_id);
        tables.stops.extend(stops);
        tables.routes.insert(route.route_id, route);
    }

    /// Assigns a student to a bus; the parent, if any, becomes a known user.
    pub fn assign_student(&self, organization_id: Uuid, bus_id: Uuid, student: Student) {
        let mut tables = self.inner.lock();
        if let Some(parent_id) = student.parent_id {
            tables.users.push((organization_id, parent_id));
        }
        tables.assignments.push((bus_id, student));
    }

    pub fn add_user(&self, organization_id: Uuid, user_id: Uuid) {
        self.inner.lock().users.push((organization_id, user_id));
    }
}

impl FleetDirectory for MemoryFleetDirectory {
    fn bus(&self, organization_id: Uuid, bus_id: Uuid) -> BoxFuture<'_, Result<Option<Bus>>> {
        let bus = self
            .inner
            .lock()
            .buses
            .get(&bus_id)
            .filter(|b| b.organization_id == organization_id)
            .cloned();
        future::ready(Ok(bus)).boxed()
    }

    fn route(&self, organization_id: Uuid, route_id: Uuid) -> BoxFuture<'_, Result<Option<Route>>> {
        let route = self
            .inner
            .lock()
            .routes
            .get(&route_id)
            .filter(|r| r.organization_id == organization_id)
            .cloned();
        future::ready(Ok(route)).boxed()
    }

    fn route_stops(&self, organization_id: Uuid, route_id: Uuid) -> BoxFuture<'_, Result<Vec<Stop>>> {
        let tables = self.inner.lock();
        let owned = tables
            .routes
            .get(&route_id)
            .is_some_and(|r| r.organization_id == organization_id);
        let mut stops: Vec<Stop> = if owned {
            tables
                .stops
                .iter()
                .filter(|s| s.route_id == route_id)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        stops.sort_by_key(|s| s.order_index);
        future::ready(Ok(stops)).boxed()
    }

    fn students_on_bus(
        &self,
        organization_id: Uuid,
        bus_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<Student>>> {
        let tables = self.inner.lock();
        let owned = tables
            .buses
            .get(&bus_id)
            .is_some_and(|b| b.organization_id == organization_id);
        let students = if owned {
            tables
                .assignments
                .iter()
                .filter(|(bus, _)| *bus == bus_id)
                .map(|(_, student)| student.clone())
                .collect()
        } else {
            Vec::new()
        };
        future::ready(Ok(students)).boxed()
    }

    fn recipient_exists(&self, organization_id: Uuid, user_id: Uuid) -> BoxFuture<'_, Result<bool>> {
        let exists = self
            .inner
            .lock()
            .users
            .iter()
            .any(|(org, user)| *org == organization_id && *user == user_id);
        future::ready(Ok(exists)).boxed()
    }
}
