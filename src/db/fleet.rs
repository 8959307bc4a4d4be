use futures::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use super::{queries, DbPool};
use crate::error::Result;
use crate::models::{Bus, Route, Stop, Student};
use crate::store::FleetDirectory;

/// Lookups against the buses, routes, stops, students and users tables.
#[derive(Clone)]
pub struct PgFleetDirectory {
    pool: DbPool,
}

impl PgFleetDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl FleetDirectory for PgFleetDirectory {
    fn bus(&self, organization_id: Uuid, bus_id: Uuid) -> BoxFuture<'_, Result<Option<Bus>>> {
        async move {
            let bus = sqlx::query_as::<_, Bus>(queries::SELECT_BUS)
                .bind(bus_id)
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(bus)
        }
        .boxed()
    }

    fn route(&self, organization_id: Uuid, route_id: Uuid) -> BoxFuture<'_, Result<Option<Route>>> {
        async move {
            let route = sqlx::query_as::<_, Route>(queries::SELECT_ROUTE)
                .bind(route_id)
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(route)
        }
        .boxed()
    }

    fn route_stops(&self, organization_id: Uuid, route_id: Uuid) -> BoxFuture<'_, Result<Vec<Stop>>> {
        async move {
            let stops = sqlx::query_as::<_, Stop>(queries::SELECT_ROUTE_STOPS)
                .bind(route_id)
                .bind(organization_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(stops)
        }
        .boxed()
    }

    fn students_on_bus(
        &self,
        organization_id: Uuid,
        bus_id: Uuid,
    ) -> BoxFuture<'_, Result<Vec<Student>>> {
        async move {
            let students = sqlx::query_as::<_, Student>(queries::SELECT_STUDENTS_ON_BUS)
                .bind(bus_id)
                .bind(organization_id)
                .fetch_all(&self.pool)
                .await?;
            Ok(students)
        }
        .boxed()
    }

    fn recipient_exists(&self, organization_id: Uuid, user_id: Uuid) -> BoxFuture<'_, Result<bool>> {
        async move {
            let exists = sqlx::query_scalar::<_, bool>(queries::EXISTS_RECIPIENT)
                .bind(user_id)
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(exists)
        }
        .boxed()
    }
}
