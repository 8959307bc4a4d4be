//! Trip state machine.
//!
//! ```text
//! (no row) --start--> in_progress --end--> completed
//!                         |  ^
//!                         +--+ update_location
//! ```
//!
//! Trip persistence is the primary contract of every transition. Notifications
//! raised along the way are secondary: their failures are logged and never
//! fail the transition that triggered them.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{Principal, Role, PERM_TRIPS_DELETE, PERM_TRIPS_READ};
use crate::error::{Error, Result};
use crate::geo::{haversine_distance, is_valid_coordinate};
use crate::models::{Bus, LocationFix, NewTrip, Route, Trip, TripFilter, TripPoint, TripStatus};
use crate::notifications::{NotificationDispatcher, TripContext};
use crate::proximity::ProximityMonitor;
use crate::store::{FleetDirectory, TripRepository};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StartTrip {
    pub bus_id: Uuid,
    pub route_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
}

pub struct TripLifecycleManager {
    trips: Arc<dyn TripRepository>,
    fleet: Arc<dyn FleetDirectory>,
    dispatcher: Arc<NotificationDispatcher>,
    proximity: ProximityMonitor,
}

impl TripLifecycleManager {
    pub fn new(
        trips: Arc<dyn TripRepository>,
        fleet: Arc<dyn FleetDirectory>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            proximity: ProximityMonitor::new(Arc::clone(&dispatcher)),
            trips,
            fleet,
            dispatcher,
        }
    }

    /// Opens a trip for `driver_id` on the bus they are assigned to.
    pub async fn start(
        &self,
        organization_id: Uuid,
        driver_id: Uuid,
        request: StartTrip,
    ) -> Result<Trip> {
        ensure_valid_coordinate(request.latitude, request.longitude)?;

        let bus = self.bus(organization_id, request.bus_id).await?;
        let route = self.route(organization_id, request.route_id).await?;

        if bus.driver_id != Some(driver_id) {
            return Err(Error::Forbidden(format!(
                "driver {} is not assigned to bus {}",
                driver_id, bus.bus_number
            )));
        }

        if let Some(active) = self
            .trips
            .find_active_for_bus(organization_id, bus.bus_id)
            .await?
        {
            return Err(Error::Conflict(format!(
                "bus {} already has active trip {}",
                bus.bus_number, active.trip_id
            )));
        }

        let students = self.fleet.students_on_bus(organization_id, bus.bus_id).await?;

        // the store's uniqueness check decides concurrent starts
        let trip = self
            .trips
            .insert(NewTrip {
                trip_id: Uuid::new_v4(),
                organization_id,
                bus_id: bus.bus_id,
                route_id: route.route_id,
                driver_id,
                latitude: request.latitude,
                longitude: request.longitude,
                passenger_count: students.len() as i32,
                start_time: Utc::now(),
            })
            .await?;

        info!(
            "Started trip {} for bus {} on route {}",
            trip.trip_id, bus.bus_number, route.name
        );

        let ctx = trip_context(&trip, &bus, &route);
        if let Err(e) = self.dispatcher.create_for_bus_started(&ctx, &students).await {
            error!(trip_id = %trip.trip_id, "Failed to dispatch bus started notifications: {}", e);
        }

        Ok(trip)
    }

    /// Location update sent by an API caller. Only the trip's own driver, or
    /// an admin, may move a bus.
    pub async fn report_location(
        &self,
        principal: &Principal,
        trip_id: Uuid,
        fix: LocationFix,
    ) -> Result<Trip> {
        let driver_id = match principal.role {
            Role::Driver => Some(principal.user_id),
            Role::Admin => None,
            Role::SchoolStaff | Role::Parent => {
                return Err(Error::Forbidden(
                    "only the trip's driver can report its location".to_string(),
                ))
            }
        };
        self.update_location(principal.organization_id, trip_id, driver_id, fix)
            .await
    }

    /// Records a GPS fix on an in-progress trip, then runs proximity checks.
    ///
    /// When `driver_id` is given it must be the trip's driver. The fix is
    /// stamped with its device time, capped at the server clock.
    pub async fn update_location(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
        driver_id: Option<Uuid>,
        fix: LocationFix,
    ) -> Result<Trip> {
        ensure_valid_coordinate(fix.latitude, fix.longitude)?;

        let current = self.trip(organization_id, trip_id).await?;
        if let Some(driver_id) = driver_id {
            if driver_id != current.driver_id {
                return Err(Error::Forbidden(format!(
                    "trip {} belongs to another driver",
                    trip_id
                )));
            }
        }
        ensure_in_progress(&current)?;

        let increment = current
            .position()
            .map(|(lat, lng)| haversine_distance(lat, lng, fix.latitude, fix.longitude))
            .unwrap_or(0.0);

        let now = Utc::now();
        let at = fix.recorded_at.map_or(now, |t| t.min(now));

        let trip = match self
            .trips
            .record_location(organization_id, trip_id, fix, increment, at)
            .await?
        {
            Some(trip) => trip,
            // ended or deleted between our read and the write
            None => return Err(self.not_in_progress(organization_id, trip_id).await),
        };

        if let Err(e) = self.check_proximity(&trip).await {
            warn!(trip_id = %trip.trip_id, "Proximity check failed: {}", e);
        }

        Ok(trip)
    }

    /// Completes an in-progress trip and tells parents it is over.
    pub async fn end(&self, organization_id: Uuid, trip_id: Uuid) -> Result<Trip> {
        let current = self.trip(organization_id, trip_id).await?;
        ensure_in_progress(&current)?;

        let trip = match self
            .trips
            .complete(organization_id, trip_id, Utc::now())
            .await?
        {
            Some(trip) => trip,
            None => return Err(self.not_in_progress(organization_id, trip_id).await),
        };

        info!("Ended trip {} for bus {}", trip.trip_id, trip.bus_id);

        if let Err(e) = self.notify_completed(&trip).await {
            error!(trip_id = %trip.trip_id, "Failed to dispatch trip completed notifications: {}", e);
        }

        Ok(trip)
    }

    /// Deletes a trip that is not in progress, with its telemetry history.
    pub async fn delete(&self, principal: &Principal, trip_id: Uuid) -> Result<()> {
        if !principal.can(PERM_TRIPS_DELETE) {
            return Err(Error::Forbidden("missing permission trips:delete".to_string()));
        }

        let organization_id = principal.organization_id;
        let trip = self.trip(organization_id, trip_id).await?;
        if trip.is_active() {
            return Err(Error::InvalidState(format!(
                "trip {} is still in progress",
                trip_id
            )));
        }

        if !self.trips.delete(organization_id, trip_id).await? {
            return Err(self.not_in_progress_or_missing(organization_id, trip_id).await);
        }

        info!("Deleted trip {}", trip_id);
        Ok(())
    }

    pub async fn get(&self, principal: &Principal, trip_id: Uuid) -> Result<Trip> {
        let trip = self.trip(principal.organization_id, trip_id).await?;
        ensure_can_read(principal, &trip)?;
        Ok(trip)
    }

    /// Trips visible to the principal; drivers only ever see their own.
    pub async fn list(&self, principal: &Principal, mut filter: TripFilter) -> Result<Vec<Trip>> {
        if principal.is_driver() {
            filter.driver_id = Some(principal.user_id);
        } else if !principal.can(PERM_TRIPS_READ) {
            return Err(Error::Forbidden("missing permission trips:read".to_string()));
        }
        self.trips.list(principal.organization_id, filter).await
    }

    pub async fn active(&self, principal: &Principal) -> Result<Vec<Trip>> {
        self.list(
            principal,
            TripFilter {
                status: Some(TripStatus::InProgress),
                ..Default::default()
            },
        )
        .await
    }

    /// Raw telemetry points of a trip, oldest first.
    pub async fn history(&self, principal: &Principal, trip_id: Uuid) -> Result<Vec<TripPoint>> {
        let trip = self.get(principal, trip_id).await?;
        self.trips.points(trip.organization_id, trip.trip_id).await
    }

    async fn check_proximity(&self, trip: &Trip) -> Result<usize> {
        let (bus, route) = self.trip_fleet(trip).await?;
        let stops = self.fleet.route_stops(trip.organization_id, trip.route_id).await?;
        let students = self.fleet.students_on_bus(trip.organization_id, trip.bus_id).await?;

        let ctx = trip_context(trip, &bus, &route);
        self.proximity.check(trip, &ctx, &stops, &students).await
    }

    async fn notify_completed(&self, trip: &Trip) -> Result<()> {
        let (bus, route) = self.trip_fleet(trip).await?;
        let students = self.fleet.students_on_bus(trip.organization_id, trip.bus_id).await?;
        let ctx = trip_context(trip, &bus, &route);
        self.dispatcher.create_for_trip_completed(&ctx, &students).await?;
        Ok(())
    }

    async fn trip_fleet(&self, trip: &Trip) -> Result<(Bus, Route)> {
        let bus = self.bus(trip.organization_id, trip.bus_id).await?;
        let route = self.route(trip.organization_id, trip.route_id).await?;
        Ok((bus, route))
    }

    async fn trip(&self, organization_id: Uuid, trip_id: Uuid) -> Result<Trip> {
        self.trips
            .find(organization_id, trip_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("trip {}", trip_id)))
    }

    async fn bus(&self, organization_id: Uuid, bus_id: Uuid) -> Result<Bus> {
        self.fleet
            .bus(organization_id, bus_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("bus {}", bus_id)))
    }

    async fn route(&self, organization_id: Uuid, route_id: Uuid) -> Result<Route> {
        self.fleet
            .route(organization_id, route_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("route {}", route_id)))
    }

    /// Classifies a conditional write that matched no in-progress row.
    async fn not_in_progress(&self, organization_id: Uuid, trip_id: Uuid) -> Error {
        match self.trips.find(organization_id, trip_id).await {
            Ok(Some(trip)) => invalid_state(&trip),
            Ok(None) => Error::not_found(format!("trip {}", trip_id)),
            Err(e) => e,
        }
    }

    async fn not_in_progress_or_missing(&self, organization_id: Uuid, trip_id: Uuid) -> Error {
        match self.trips.find(organization_id, trip_id).await {
            Ok(Some(_)) => Error::InvalidState(format!("trip {} is still in progress", trip_id)),
            Ok(None) => Error::not_found(format!("trip {}", trip_id)),
            Err(e) => e,
        }
    }
}

fn trip_context(trip: &Trip, bus: &Bus, route: &Route) -> TripContext {
    TripContext {
        organization_id: trip.organization_id,
        trip_id: trip.trip_id,
        bus_id: trip.bus_id,
        route_id: trip.route_id,
        bus_number: bus.bus_number.clone(),
        route_name: route.name.clone(),
    }
}

fn ensure_in_progress(trip: &Trip) -> Result<()> {
    if trip.is_active() {
        Ok(())
    } else {
        Err(invalid_state(trip))
    }
}

fn invalid_state(trip: &Trip) -> Error {
    Error::InvalidState(format!(
        "trip {} is {}, not in_progress",
        trip.trip_id, trip.status
    ))
}

fn ensure_valid_coordinate(latitude: f64, longitude: f64) -> Result<()> {
    if is_valid_coordinate(latitude, longitude) {
        Ok(())
    } else {
        Err(Error::BadRequest(format!(
            "invalid coordinate ({}, {})",
            latitude, longitude
        )))
    }
}

fn ensure_can_read(principal: &Principal, trip: &Trip) -> Result<()> {
    if principal.is_driver() {
        if trip.driver_id == principal.user_id {
            return Ok(());
        }
        return Err(Error::Forbidden("drivers can only see their own trips".to_string()));
    }
    if principal.can(PERM_TRIPS_READ) {
        Ok(())
    } else {
        Err(Error::Forbidden("missing permission trips:read".to_string()))
    }
}

#[cfg(test)]
mod tests;
