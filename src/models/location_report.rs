use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use super::trip::LocationFix;

/// A GPS report as published by driver devices onto the telemetry topic.
#[derive(Debug, Deserialize)]
pub struct LocationReport {
    pub trip_id: Uuid,
    pub organization_id: Uuid,
    #[serde(default)]
    pub driver_id: Option<Uuid>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub speed_kmh: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub accuracy: Option<f64>,
    pub recorded_at: Option<String>,
}

impl LocationReport {
    /// The fix carried by this report, if both coordinates are present.
    pub fn fix(&self) -> Option<LocationFix> {
        Some(LocationFix {
            latitude: self.latitude?,
            longitude: self.longitude?,
            speed_kmh: self.speed_kmh,
            heading: self.heading,
            accuracy: self.accuracy,
            recorded_at: self.recorded_at(),
        })
    }

    /// Device timestamp; accepts RFC 3339 or naive `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.recorded_at.as_deref()?.trim();
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .ok()
            .map(|t| t.and_utc())
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}
