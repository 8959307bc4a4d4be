use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;

use super::*;
use crate::auth::Role;
use crate::memory::{
    InsertFailure, MemoryFleetDirectory, MemoryNotificationRepository, MemoryTripRepository,
};
use crate::models::{NotificationType, Stop, Student};
use crate::notifications::store::DEFAULT_CACHE_TTL;
use crate::notifications::NotificationStore;
use crate::pubsub::{ChannelHub, PubSubFanout};

const DEPOT: (f64, f64) = (20.5500, -100.4000);
const PICKUP_A: (f64, f64) = (20.5800, -100.4000);
const PICKUP_B: (f64, f64) = (20.5900, -100.4000);
const SCHOOL: (f64, f64) = (20.6000, -100.4000);

struct Fixture {
    org: Uuid,
    driver: Uuid,
    bus: Uuid,
    route: Uuid,
    students: Vec<Student>,
    trips: Arc<MemoryTripRepository>,
    notifications: Arc<MemoryNotificationRepository>,
    fleet: Arc<MemoryFleetDirectory>,
    dispatcher: Arc<NotificationDispatcher>,
    manager: Arc<TripLifecycleManager>,
}

impl Fixture {
    fn new() -> Self {
        let org = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let bus = Uuid::new_v4();
        let route = Uuid::new_v4();

        let stop = |order_index: i32, name: &str, (latitude, longitude): (f64, f64)| Stop {
            stop_id: Uuid::new_v4(),
            route_id: route,
            name: name.to_string(),
            latitude,
            longitude,
            order_index,
        };
        let stops = vec![
            stop(1, "Av. Universidad", PICKUP_A),
            stop(2, "Jardín Guerrero", PICKUP_B),
            stop(3, "Colegio Fray Luis", SCHOOL),
        ];
        let students = vec![
            Student {
                student_id: Uuid::new_v4(),
                name: "Ana".to_string(),
                parent_id: Some(Uuid::new_v4()),
                pickup_stop_id: Some(stops[0].stop_id),
            },
            Student {
                student_id: Uuid::new_v4(),
                name: "Mateo".to_string(),
                parent_id: Some(Uuid::new_v4()),
                pickup_stop_id: Some(stops[1].stop_id),
            },
        ];

        let fleet = Arc::new(MemoryFleetDirectory::new());
        fleet.add_bus(Bus {
            bus_id: bus,
            organization_id: org,
            bus_number: "12".to_string(),
            driver_id: Some(driver),
        });
        fleet.add_route(
            Route {
                route_id: route,
                organization_id: org,
                name: "Norte".to_string(),
            },
            stops,
        );
        for student in &students {
            fleet.assign_student(org, bus, student.clone());
        }

        let trips = Arc::new(MemoryTripRepository::new());
        let notifications = Arc::new(MemoryNotificationRepository::new());
        let store = Arc::new(NotificationStore::new(
            notifications.clone(),
            DEFAULT_CACHE_TTL,
            1_000,
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store,
            PubSubFanout::new(ChannelHub::new(64)),
        ));
        let manager = Arc::new(TripLifecycleManager::new(
            trips.clone(),
            fleet.clone(),
            Arc::clone(&dispatcher),
        ));

        Self {
            org,
            driver,
            bus,
            route,
            students,
            trips,
            notifications,
            fleet,
            dispatcher,
            manager,
        }
    }

    fn start_request(&self) -> StartTrip {
        StartTrip {
            bus_id: self.bus,
            route_id: self.route,
            latitude: DEPOT.0,
            longitude: DEPOT.1,
        }
    }

    async fn start(&self) -> Trip {
        self.manager
            .start(self.org, self.driver, self.start_request())
            .await
            .unwrap()
    }

    async fn move_to(&self, trip: &Trip, (lat, lng): (f64, f64)) -> Result<Trip> {
        self.manager
            .update_location(self.org, trip.trip_id, None, LocationFix::at(lat, lng))
            .await
    }

    async fn move_fix(&self, trip: &Trip, fix: LocationFix) -> Result<Trip> {
        self.manager
            .update_location(self.org, trip.trip_id, Some(self.driver), fix)
            .await
    }

    fn count(&self, trip: &Trip, kind: NotificationType) -> usize {
        self.notifications.count_of(trip.trip_id, kind)
    }

    fn admin(&self) -> Principal {
        Principal::new(Uuid::new_v4(), self.org, Role::Admin)
    }
}

#[tokio::test]
async fn test_start_notifies_each_parent() {
    let f = Fixture::new();
    let trip = f.start().await;

    assert_eq!(trip.status, TripStatus::InProgress);
    assert_eq!(trip.passenger_count, 2);
    assert_eq!(trip.position(), Some(DEPOT));
    assert!(trip.end_time.is_none());

    let started: Vec<_> = f
        .notifications
        .all()
        .into_iter()
        .filter(|n| n.notification_type == NotificationType::BusStarted)
        .collect();
    assert_eq!(started.len(), 2);
    assert!(started.iter().all(|n| n.trip_id == trip.trip_id));

    let mut recipients: Vec<_> = started.iter().filter_map(|n| n.recipient_id).collect();
    let mut parents: Vec<_> = f.students.iter().filter_map(|s| s.parent_id).collect();
    recipients.sort();
    parents.sort();
    assert_eq!(recipients, parents);
}

#[tokio::test]
async fn test_start_preconditions() {
    let f = Fixture::new();

    let mut missing_bus = f.start_request();
    missing_bus.bus_id = Uuid::new_v4();
    assert!(matches!(
        f.manager.start(f.org, f.driver, missing_bus).await,
        Err(Error::NotFound(_))
    ));

    let mut missing_route = f.start_request();
    missing_route.route_id = Uuid::new_v4();
    assert!(matches!(
        f.manager.start(f.org, f.driver, missing_route).await,
        Err(Error::NotFound(_))
    ));

    assert!(matches!(
        f.manager.start(f.org, Uuid::new_v4(), f.start_request()).await,
        Err(Error::Forbidden(_))
    ));

    // another organization cannot see this bus
    assert!(matches!(
        f.manager.start(Uuid::new_v4(), f.driver, f.start_request()).await,
        Err(Error::NotFound(_))
    ));

    let mut bad_coordinate = f.start_request();
    bad_coordinate.latitude = 123.0;
    assert!(matches!(
        f.manager.start(f.org, f.driver, bad_coordinate).await,
        Err(Error::BadRequest(_))
    ));

    f.start().await;
    assert!(matches!(
        f.manager.start(f.org, f.driver, f.start_request()).await,
        Err(Error::Conflict(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_exactly_one() {
    let f = Fixture::new();

    let attempts = (0..16).map(|_| {
        let manager = Arc::clone(&f.manager);
        let (org, driver, request) = (f.org, f.driver, f.start_request());
        tokio::spawn(async move { manager.start(org, driver, request).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let started = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(Error::Conflict(_))))
        .count();
    assert_eq!(started, 1);
    assert_eq!(conflicts, 15);

    let active = f.manager.active(&f.admin()).await.unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_restart_after_end_is_allowed() {
    let f = Fixture::new();
    let first = f.start().await;
    f.manager.end(f.org, first.trip_id).await.unwrap();

    let second = f.start().await;
    assert_ne!(first.trip_id, second.trip_id);
}

#[tokio::test]
async fn test_update_location_records_telemetry() {
    let f = Fixture::new();
    let trip = f.start().await;

    let fix = LocationFix {
        latitude: 20.5600,
        longitude: -100.4000,
        speed_kmh: Some(28.0),
        heading: Some(0.0),
        accuracy: Some(5.0),
        recorded_at: None,
    };
    let updated = f
        .manager
        .update_location(f.org, trip.trip_id, Some(f.driver), fix)
        .await
        .unwrap();

    assert_eq!(updated.position(), Some((20.5600, -100.4000)));
    assert_eq!(updated.speed_kmh, Some(28.0));
    assert!(updated.last_update >= trip.last_update);
    // 0.01 degrees of latitude
    assert!((updated.distance_meters - 1_111.95).abs() < 1.0);

    let points = f.manager.history(&f.admin(), trip.trip_id).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].accuracy, Some(5.0));
}

#[tokio::test]
async fn test_update_location_rejections() {
    let f = Fixture::new();
    let trip = f.start().await;

    assert!(matches!(
        f.manager
            .update_location(f.org, Uuid::new_v4(), None, LocationFix::at(20.0, -100.0))
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        f.manager
            .update_location(f.org, trip.trip_id, Some(Uuid::new_v4()), LocationFix::at(20.0, -100.0))
            .await,
        Err(Error::Forbidden(_))
    ));
    assert!(matches!(
        f.move_to(&trip, (f64::NAN, -100.0)).await,
        Err(Error::BadRequest(_))
    ));
}

#[tokio::test]
async fn test_update_after_end_is_invalid_state() {
    let f = Fixture::new();
    let trip = f.start().await;
    let ended = f.manager.end(f.org, trip.trip_id).await.unwrap();

    let err = f.move_to(&trip, PICKUP_A).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    let stored = f.manager.get(&f.admin(), trip.trip_id).await.unwrap();
    assert_eq!(stored, ended);
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 0);
}

#[tokio::test]
async fn test_near_pickup_notifies_once() {
    let f = Fixture::new();
    let trip = f.start().await;
    let near_a = (PICKUP_A.0 - 0.004, PICKUP_A.1);

    f.move_to(&trip, near_a).await.unwrap();
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 1);

    f.move_to(&trip, near_a).await.unwrap();
    f.move_to(&trip, (PICKUP_A.0 - 0.002, PICKUP_A.1)).await.unwrap();
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 1);

    let near: Vec<_> = f
        .notifications
        .all()
        .into_iter()
        .filter(|n| n.notification_type == NotificationType::BusNearStudent)
        .collect();
    assert_eq!(near[0].student_id, Some(f.students[0].student_id));
    assert_eq!(near[0].recipient_id, f.students[0].parent_id);
    assert_eq!(near[0].data.0["eta_minutes"], 1);
}

#[tokio::test]
async fn test_leaving_and_reentering_geofence_does_not_renotify() {
    let f = Fixture::new();
    let trip = f.start().await;

    f.move_to(&trip, PICKUP_A).await.unwrap();
    f.move_to(&trip, DEPOT).await.unwrap();
    f.move_to(&trip, PICKUP_A).await.unwrap();

    // Ana once; Mateo's stop is 1.1 km from A, outside the geofence
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 1);
}

#[tokio::test]
async fn test_arrival_notifies_every_student_once() {
    let f = Fixture::new();
    let trip = f.start().await;
    let at_school = (SCHOOL.0 - 0.001, SCHOOL.1);

    f.move_to(&trip, at_school).await.unwrap();
    assert_eq!(f.count(&trip, NotificationType::BusArrivedSchool), 2);
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 0);

    f.move_to(&trip, at_school).await.unwrap();
    assert_eq!(f.count(&trip, NotificationType::BusArrivedSchool), 2);
}

#[tokio::test]
async fn test_proximity_failure_does_not_fail_update() {
    let f = Fixture::new();
    let trip = f.start().await;

    // stage a trip whose route vanished from the directory
    let mut orphan = trip.clone();
    orphan.trip_id = Uuid::new_v4();
    orphan.bus_id = Uuid::new_v4();
    orphan.route_id = Uuid::new_v4();
    f.trips.put(orphan.clone());

    let updated = f.move_to(&orphan, PICKUP_A).await.unwrap();
    assert_eq!(updated.position(), Some(PICKUP_A));
}

#[tokio::test]
async fn test_end_completes_and_notifies() {
    let f = Fixture::new();
    let trip = f.start().await;

    let ended = f.manager.end(f.org, trip.trip_id).await.unwrap();
    assert_eq!(ended.status, TripStatus::Completed);
    assert!(ended.end_time.is_some());
    assert_eq!(f.count(&trip, NotificationType::TripCompleted), 2);
}

#[tokio::test]
async fn test_end_requires_in_progress() {
    let f = Fixture::new();
    let trip = f.start().await;
    let ended = f.manager.end(f.org, trip.trip_id).await.unwrap();

    let err = f.manager.end(f.org, trip.trip_id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
    assert_eq!(f.manager.get(&f.admin(), trip.trip_id).await.unwrap(), ended);

    let mut cancelled = ended.clone();
    cancelled.trip_id = Uuid::new_v4();
    cancelled.status = TripStatus::Cancelled;
    f.trips.put(cancelled.clone());
    assert!(matches!(
        f.manager.end(f.org, cancelled.trip_id).await,
        Err(Error::InvalidState(_))
    ));
    assert_eq!(
        f.manager.get(&f.admin(), cancelled.trip_id).await.unwrap(),
        cancelled
    );

    assert!(matches!(
        f.manager.end(f.org, Uuid::new_v4()).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_only_when_not_in_progress() {
    let f = Fixture::new();
    let admin = f.admin();
    let trip = f.start().await;
    f.move_to(&trip, PICKUP_B).await.unwrap();

    assert!(matches!(
        f.manager.delete(&admin, trip.trip_id).await,
        Err(Error::InvalidState(_))
    ));

    let driver = Principal::new(f.driver, f.org, Role::Driver);
    f.manager.end(f.org, trip.trip_id).await.unwrap();
    assert!(matches!(
        f.manager.delete(&driver, trip.trip_id).await,
        Err(Error::Forbidden(_))
    ));

    f.manager.delete(&admin, trip.trip_id).await.unwrap();
    assert!(matches!(
        f.manager.get(&admin, trip.trip_id).await,
        Err(Error::NotFound(_))
    ));
    assert!(f.trips.points(f.org, trip.trip_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reads_are_role_scoped() {
    let f = Fixture::new();
    let trip = f.start().await;

    let other_driver = Uuid::new_v4();
    let other_bus = Uuid::new_v4();
    f.fleet.add_bus(Bus {
        bus_id: other_bus,
        organization_id: f.org,
        bus_number: "7".to_string(),
        driver_id: Some(other_driver),
    });
    let other_trip = f
        .manager
        .start(
            f.org,
            other_driver,
            StartTrip {
                bus_id: other_bus,
                ..f.start_request()
            },
        )
        .await
        .unwrap();

    let driver = Principal::new(f.driver, f.org, Role::Driver);
    let own = f.manager.list(&driver, TripFilter::default()).await.unwrap();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].trip_id, trip.trip_id);

    // a driver cannot widen the filter to someone else
    let widened = f
        .manager
        .list(
            &driver,
            TripFilter {
                driver_id: Some(other_driver),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(widened.iter().all(|t| t.driver_id == f.driver));

    assert!(matches!(
        f.manager.get(&driver, other_trip.trip_id).await,
        Err(Error::Forbidden(_))
    ));

    let staff = Principal::new(Uuid::new_v4(), f.org, Role::SchoolStaff).with_permission("trips:read");
    assert_eq!(f.manager.active(&staff).await.unwrap().len(), 2);

    let parent = Principal::new(Uuid::new_v4(), f.org, Role::Parent);
    assert!(matches!(
        f.manager.list(&parent, TripFilter::default()).await,
        Err(Error::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_only_the_trip_driver_or_admin_reports_location() {
    let f = Fixture::new();
    let trip = f.start().await;
    let near_a = LocationFix::at(PICKUP_A.0 - 0.004, PICKUP_A.1);

    let parent = Principal::new(f.students[0].parent_id.unwrap(), f.org, Role::Parent);
    let staff = Principal::new(Uuid::new_v4(), f.org, Role::SchoolStaff).with_permission("trips:read");
    let other_driver = Principal::new(Uuid::new_v4(), f.org, Role::Driver);
    for principal in [&parent, &staff, &other_driver] {
        assert!(matches!(
            f.manager.report_location(principal, trip.trip_id, near_a).await,
            Err(Error::Forbidden(_))
        ));
    }
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 0);
    assert!(f.trips.points(f.org, trip.trip_id).await.unwrap().is_empty());

    let driver = Principal::new(f.driver, f.org, Role::Driver);
    f.manager.report_location(&driver, trip.trip_id, near_a).await.unwrap();
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 1);

    let admin_fix = LocationFix::at(PICKUP_A.0, PICKUP_A.1);
    let moved = f.manager.report_location(&f.admin(), trip.trip_id, admin_fix).await.unwrap();
    assert_eq!(moved.position(), Some(PICKUP_A));
}

#[tokio::test]
async fn test_device_time_stamps_the_point() {
    let f = Fixture::new();
    let trip = f.start().await;

    let recorded = Utc::now() - chrono::Duration::minutes(3);
    let fix = LocationFix {
        recorded_at: Some(recorded),
        ..LocationFix::at(20.5600, -100.4000)
    };
    let updated = f.move_fix(&trip, fix).await.unwrap();
    assert_eq!(updated.last_update, Some(recorded));

    // a device clock ahead of the server is capped
    let ahead = Utc::now() + chrono::Duration::hours(2);
    let fix = LocationFix {
        recorded_at: Some(ahead),
        ..LocationFix::at(20.5610, -100.4000)
    };
    let updated = f.move_fix(&trip, fix).await.unwrap();
    assert!(updated.last_update.unwrap() < ahead);

    let unstamped = f.move_to(&trip, (20.5620, -100.4000)).await.unwrap();
    assert!(unstamped.last_update.unwrap() > recorded);

    let points = f.manager.history(&f.admin(), trip.trip_id).await.unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0].timestamp, recorded);
    assert!(points[1].timestamp < ahead);
}

#[tokio::test]
async fn test_notification_store_outage_keeps_telemetry() {
    let f = Fixture::new();
    let trip = f.start().await;
    f.notifications.fail_inserts(InsertFailure::Always);

    // the dispatcher surfaces the storage error to its caller
    let ctx = TripContext {
        organization_id: f.org,
        trip_id: trip.trip_id,
        bus_id: f.bus,
        route_id: f.route,
        bus_number: "12".to_string(),
        route_name: "Norte".to_string(),
    };
    let stops = f.fleet.route_stops(f.org, f.route).await.unwrap();
    let result = f
        .dispatcher
        .create_for_near_pickup(&ctx, &f.students[0], &stops[0], 445.0, 1)
        .await;
    assert!(matches!(result, Err(Error::Database(_))));

    // while the location update that triggered it still succeeds
    let near_a = (PICKUP_A.0 - 0.004, PICKUP_A.1);
    let updated = f.move_to(&trip, near_a).await.unwrap();
    assert_eq!(updated.position(), Some(near_a));
    assert_eq!(f.trips.points(f.org, trip.trip_id).await.unwrap().len(), 1);
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 0);

    // once storage recovers the student is still notified
    f.notifications.fail_inserts(InsertFailure::Never);
    f.move_to(&trip, near_a).await.unwrap();
    assert_eq!(f.count(&trip, NotificationType::BusNearStudent), 1);
}
