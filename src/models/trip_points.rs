use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Raw telemetry history row, one per accepted location update.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TripPoint {
    pub point_id: i64, // bigserial
    pub trip_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
}
