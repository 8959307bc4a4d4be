//! Read-only views of the fleet entities owned by the CRUD layer.

use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Bus {
    pub bus_id: Uuid,
    pub organization_id: Uuid,
    pub bus_number: String,
    pub driver_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Route {
    pub route_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Stop {
    pub stop_id: Uuid,
    pub route_id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub order_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Student {
    pub student_id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub pickup_stop_id: Option<Uuid>,
}

/// The last stop by order index, treated as the school.
pub fn destination(stops: &[Stop]) -> Option<&Stop> {
    stops.iter().max_by_key(|s| s.order_index)
}
