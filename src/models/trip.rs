use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "trip_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    NotStarted,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::NotStarted => "not_started",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TripStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Trip {
    pub trip_id: Uuid,
    pub organization_id: Uuid,
    pub bus_id: Uuid,
    pub route_id: Uuid,
    pub driver_id: Uuid,
    pub status: TripStatus,
    pub current_lat: Option<f64>,
    pub current_lng: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub passenger_count: i32,
    pub distance_meters: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn is_active(&self) -> bool {
        self.status == TripStatus::InProgress
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.current_lat.zip(self.current_lng)
    }
}

/// Values needed to open a trip; the store assigns status and timestamps.
#[derive(Debug, Clone)]
pub struct NewTrip {
    pub trip_id: Uuid,
    pub organization_id: Uuid,
    pub bus_id: Uuid,
    pub route_id: Uuid,
    pub driver_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub passenger_count: i32,
    pub start_time: DateTime<Utc>,
}

impl NewTrip {
    pub fn into_trip(self) -> Trip {
        Trip {
            trip_id: self.trip_id,
            organization_id: self.organization_id,
            bus_id: self.bus_id,
            route_id: self.route_id,
            driver_id: self.driver_id,
            status: TripStatus::InProgress,
            current_lat: Some(self.latitude),
            current_lng: Some(self.longitude),
            speed_kmh: None,
            heading: None,
            accuracy: None,
            last_update: Some(self.start_time),
            passenger_count: self.passenger_count,
            distance_meters: 0.0,
            start_time: self.start_time,
            end_time: None,
        }
    }
}

/// A single GPS report applied to an in-progress trip.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed_kmh: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    /// Device clock; the server clock is used when absent.
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl LocationFix {
    pub fn at(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed_kmh: None,
            heading: None,
            accuracy: None,
            recorded_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripFilter {
    pub status: Option<TripStatus>,
    pub bus_id: Option<Uuid>,
    pub route_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TripFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, trip: &Trip) -> bool {
        self.status.map_or(true, |s| s == trip.status)
            && self.bus_id.map_or(true, |id| id == trip.bus_id)
            && self.route_id.map_or(true, |id| id == trip.route_id)
            && self.driver_id.map_or(true, |id| id == trip.driver_id)
    }
}
