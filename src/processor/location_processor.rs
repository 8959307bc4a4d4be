use tracing::{debug, warn};

use crate::error::Error;
use crate::models::LocationReport;
use crate::trips::TripLifecycleManager;

/// What became of one telemetry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Applied,
    Malformed,
    Rejected,
}

/// Applies one location report from the telemetry topic.
///
/// Bad payloads and rejected updates are logged and dropped; only storage
/// failures are returned to the consumer loop.
pub async fn process_report(
    manager: &TripLifecycleManager,
    payload: &[u8],
) -> anyhow::Result<ReportOutcome> {
    let report: LocationReport = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => {
            warn!("Failed to parse location report: {}", e);
            return Ok(ReportOutcome::Malformed);
        }
    };

    let Some(fix) = report.fix() else {
        warn!(trip_id = %report.trip_id, "Location report missing coordinates, skipping");
        return Ok(ReportOutcome::Malformed);
    };

    if fix.recorded_at.is_none() {
        if let Some(raw) = report.recorded_at.as_deref() {
            warn!(trip_id = %report.trip_id, "Unparseable recorded_at '{}', using server time", raw);
        }
    }

    match manager
        .update_location(report.organization_id, report.trip_id, report.driver_id, fix)
        .await
    {
        Ok(trip) => {
            debug!(trip_id = %trip.trip_id, "Applied location report at {:?}", trip.last_update);
            Ok(ReportOutcome::Applied)
        }
        Err(e @ Error::Database(_)) => Err(e.into()),
        Err(e) => {
            warn!(trip_id = %report.trip_id, "Location report rejected: {}", e);
            Ok(ReportOutcome::Rejected)
        }
    }
}
