use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use super::{is_unique_violation, queries, DbPool};
use crate::error::{Error, Result};
use crate::models::{LocationFix, NewTrip, Trip, TripFilter, TripPoint};
use crate::store::TripRepository;

#[derive(Clone)]
pub struct PgTripRepository {
    pool: DbPool,
}

impl PgTripRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl TripRepository for PgTripRepository {
    fn insert(&self, trip: NewTrip) -> BoxFuture<'_, Result<Trip>> {
        async move {
            let result = sqlx::query_as::<_, Trip>(queries::INSERT_TRIP)
                .bind(trip.trip_id)
                .bind(trip.organization_id)
                .bind(trip.bus_id)
                .bind(trip.route_id)
                .bind(trip.driver_id)
                .bind(trip.latitude)
                .bind(trip.longitude)
                .bind(trip.start_time)
                .bind(trip.passenger_count)
                .fetch_one(&self.pool)
                .await;

            match result {
                Ok(row) => Ok(row),
                Err(e) if is_unique_violation(&e) => Err(Error::Conflict(format!(
                    "bus {} already has an active trip",
                    trip.bus_id
                ))),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn find(&self, organization_id: Uuid, trip_id: Uuid) -> BoxFuture<'_, Result<Option<Trip>>> {
        async move {
            let trip = sqlx::query_as::<_, Trip>(queries::SELECT_TRIP)
                .bind(trip_id)
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(trip)
        }
        .boxed()
    }

    fn find_active_for_bus(
        &self,
        organization_id: Uuid,
        bus_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<Trip>>> {
        async move {
            let trip = sqlx::query_as::<_, Trip>(queries::SELECT_ACTIVE_TRIP_FOR_BUS)
                .bind(organization_id)
                .bind(bus_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(trip)
        }
        .boxed()
    }

    fn record_location(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
        fix: LocationFix,
        distance_increment: f64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Trip>>> {
        async move {
            let mut tx = self.pool.begin().await?;

            let updated = sqlx::query_as::<_, Trip>(queries::UPDATE_TRIP_LOCATION)
                .bind(trip_id)
                .bind(organization_id)
                .bind(fix.latitude)
                .bind(fix.longitude)
                .bind(fix.speed_kmh)
                .bind(fix.heading)
                .bind(fix.accuracy)
                .bind(distance_increment)
                .bind(at)
                .fetch_optional(&mut *tx)
                .await?;

            let Some(trip) = updated else {
                tx.rollback().await?;
                return Ok(None);
            };

            sqlx::query(queries::INSERT_TRIP_POINT)
                .bind(trip_id)
                .bind(at)
                .bind(fix.latitude)
                .bind(fix.longitude)
                .bind(fix.speed_kmh)
                .bind(fix.heading)
                .bind(fix.accuracy)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(Some(trip))
        }
        .boxed()
    }

    fn complete(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Option<Trip>>> {
        async move {
            let trip = sqlx::query_as::<_, Trip>(queries::UPDATE_TRIP_END)
                .bind(trip_id)
                .bind(organization_id)
                .bind(at)
                .fetch_optional(&self.pool)
                .await?;
            Ok(trip)
        }
        .boxed()
    }

    fn delete(&self, organization_id: Uuid, trip_id: Uuid) -> BoxFuture<'_, Result<bool>> {
        async move {
            // trip_points rows go with it (ON DELETE CASCADE)
            let result = sqlx::query(queries::DELETE_TRIP)
                .bind(trip_id)
                .bind(organization_id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() > 0)
        }
        .boxed()
    }

    fn list(&self, organization_id: Uuid, filter: TripFilter) -> BoxFuture<'_, Result<Vec<Trip>>> {
        async move {
            let trips = sqlx::query_as::<_, Trip>(queries::LIST_TRIPS)
                .bind(organization_id)
                .bind(filter.status)
                .bind(filter.bus_id)
                .bind(filter.route_id)
                .bind(filter.driver_id)
                .bind(filter.limit())
                .bind(filter.offset())
                .fetch_all(&self.pool)
                .await?;
            Ok(trips)
        }
        .boxed()
    }

    fn points(
        &self,
        organization_id: Uuid,
        trip_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<TripPoint>>> {
        async move {
            let points = sqlx::query_as::<_, TripPoint>(queries::SELECT_TRIP_POINTS)
                .bind(trip_id)
                .bind(organization_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(points)
        }
        .boxed()
    }
}
