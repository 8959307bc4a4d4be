use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use super::location_processor;
use crate::trips::TripLifecycleManager;

/// How long a trip's lane waits for another report before it is retired.
pub const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TripKey {
    trip_id: Uuid,
}

struct Lane {
    sender: mpsc::UnboundedSender<Vec<u8>>,
    generation: u64,
}

/// Runs location reports off the consumer loop while keeping each trip's
/// reports in arrival order.
///
/// Every trip gets its own lane: a task draining an unbounded queue. Reports
/// for different trips proceed concurrently; reports for the same trip are
/// applied one after another, so a stale fix never overwrites a newer one.
#[derive(Clone)]
pub struct ReportSequencer {
    manager: Arc<TripLifecycleManager>,
    lanes: Arc<DashMap<Uuid, Lane>>,
    idle: Duration,
    next_generation: Arc<AtomicU64>,
}

impl ReportSequencer {
    pub fn new(manager: Arc<TripLifecycleManager>) -> Self {
        Self::with_idle(manager, DEFAULT_LANE_IDLE)
    }

    pub fn with_idle(manager: Arc<TripLifecycleManager>, idle: Duration) -> Self {
        Self {
            manager,
            lanes: Arc::new(DashMap::new()),
            idle,
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queues one raw payload behind the earlier reports of the same trip.
    pub fn submit(&self, payload: Vec<u8>) {
        let trip_id = match serde_json::from_slice::<TripKey>(&payload) {
            Ok(key) => key.trip_id,
            Err(_) => {
                // no lane to join; the processor logs why it is dropped
                let manager = Arc::clone(&self.manager);
                tokio::spawn(async move { run(&manager, &payload).await });
                return;
            }
        };

        // the entry guard holds the shard lock, so a retiring lane cannot
        // drop out from under this send
        let mut lane = self
            .lanes
            .entry(trip_id)
            .or_insert_with(|| self.open_lane(trip_id));

        if let Err(mpsc::error::SendError(payload)) = lane.sender.send(payload) {
            *lane = self.open_lane(trip_id);
            if lane.sender.send(payload).is_err() {
                error!(trip_id = %trip_id, "Location lane closed, report dropped");
            }
        }
    }

    /// Trips with a live lane.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    fn open_lane(&self, trip_id: Uuid) -> Lane {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Vec<u8>>();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let manager = Arc::clone(&self.manager);
        let lanes = Arc::clone(&self.lanes);
        let idle = self.idle;

        debug!(trip_id = %trip_id, "Opening location lane");
        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(idle, receiver.recv()).await {
                    Ok(Some(payload)) => run(&manager, &payload).await,
                    Ok(None) => break,
                    Err(_) => {
                        // a report may land between the timeout and the removal
                        let mut pending = None;
                        let retired = lanes.remove_if(&trip_id, |_, lane| {
                            if lane.generation != generation {
                                return false;
                            }
                            match receiver.try_recv() {
                                Ok(payload) => {
                                    pending = Some(payload);
                                    false
                                }
                                Err(_) => true,
                            }
                        });
                        if retired.is_some() {
                            break;
                        }
                        match pending {
                            Some(payload) => run(&manager, &payload).await,
                            None => break,
                        }
                    }
                }
            }
            debug!(trip_id = %trip_id, "Location lane retired");
        });

        Lane { sender, generation }
    }
}

async fn run(manager: &TripLifecycleManager, payload: &[u8]) {
    if let Err(e) = location_processor::process_report(manager, payload).await {
        error!("Error processing location report: {}", e);
    }
}
