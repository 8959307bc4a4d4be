#![allow(dead_code)]

use std::sync::Arc;

use schoolbus_trips::auth::{Principal, Role};
use schoolbus_trips::http::AppState;
use schoolbus_trips::memory::{MemoryFleetDirectory, MemoryNotificationRepository, MemoryTripRepository};
use schoolbus_trips::models::{Bus, Route, Stop, Student};
use schoolbus_trips::notifications::store::DEFAULT_CACHE_TTL;
use schoolbus_trips::notifications::{NotificationDispatcher, NotificationStore};
use schoolbus_trips::pubsub::{ChannelHub, PubSubFanout};
use schoolbus_trips::stream::{StreamGateway, DEFAULT_KEEPALIVE};
use schoolbus_trips::trips::{StartTrip, TripLifecycleManager};
use uuid::Uuid;

pub const DEPOT: (f64, f64) = (20.5500, -100.4000);
pub const PICKUP_1: (f64, f64) = (20.5800, -100.4000);
pub const PICKUP_2: (f64, f64) = (20.5900, -100.4000);
pub const SCHOOL: (f64, f64) = (20.6000, -100.4000);

/// The full service graph over in-memory stores: one organization, one bus
/// with its driver, a three-stop route and two students with parents.
pub struct World {
    pub org: Uuid,
    pub driver: Uuid,
    pub bus: Uuid,
    pub route: Uuid,
    pub students: Vec<Student>,
    pub hub: ChannelHub,
    pub trips: Arc<MemoryTripRepository>,
    pub notifications: Arc<MemoryNotificationRepository>,
    pub fleet: Arc<MemoryFleetDirectory>,
    pub state: AppState,
}

impl World {
    pub fn new() -> Self {
        let org = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let bus = Uuid::new_v4();
        let route = Uuid::new_v4();

        let stops: Vec<Stop> = [("Plaza de Armas", PICKUP_1), ("Alameda", PICKUP_2), ("Instituto Queretano", SCHOOL)]
            .into_iter()
            .enumerate()
            .map(|(i, (name, (latitude, longitude)))| Stop {
                stop_id: Uuid::new_v4(),
                route_id: route,
                name: name.to_string(),
                latitude,
                longitude,
                order_index: i as i32 + 1,
            })
            .collect();

        let students = vec![
            Student {
                student_id: Uuid::new_v4(),
                name: "Lucía".to_string(),
                parent_id: Some(Uuid::new_v4()),
                pickup_stop_id: Some(stops[0].stop_id),
            },
            Student {
                student_id: Uuid::new_v4(),
                name: "Diego".to_string(),
                parent_id: Some(Uuid::new_v4()),
                pickup_stop_id: Some(stops[1].stop_id),
            },
        ];

        let fleet = Arc::new(MemoryFleetDirectory::new());
        fleet.add_bus(Bus {
            bus_id: bus,
            organization_id: org,
            bus_number: "21".to_string(),
            driver_id: Some(driver),
        });
        fleet.add_route(
            Route {
                route_id: route,
                organization_id: org,
                name: "Centro".to_string(),
            },
            stops,
        );
        for student in &students {
            fleet.assign_student(org, bus, student.clone());
        }

        let hub = ChannelHub::new(64);
        let trips = Arc::new(MemoryTripRepository::new());
        let notifications = Arc::new(MemoryNotificationRepository::new());

        let store = Arc::new(NotificationStore::new(
            notifications.clone(),
            DEFAULT_CACHE_TTL,
            1_000,
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::clone(&store),
            PubSubFanout::new(hub.clone()),
        ));
        let manager = Arc::new(TripLifecycleManager::new(
            trips.clone(),
            fleet.clone(),
            dispatcher,
        ));
        let gateway = Arc::new(StreamGateway::new(hub.clone(), fleet.clone(), DEFAULT_KEEPALIVE));

        Self {
            org,
            driver,
            bus,
            route,
            students,
            hub,
            trips,
            notifications,
            fleet,
            state: AppState {
                trips: manager,
                notifications: store,
                gateway,
            },
        }
    }

    pub fn manager(&self) -> &TripLifecycleManager {
        &self.state.trips
    }

    pub fn start_request(&self) -> StartTrip {
        StartTrip {
            bus_id: self.bus,
            route_id: self.route,
            latitude: DEPOT.0,
            longitude: DEPOT.1,
        }
    }

    pub fn parent(&self, index: usize) -> Principal {
        let parent_id = self.students[index].parent_id.unwrap_or_default();
        Principal::new(parent_id, self.org, Role::Parent)
    }

    pub fn driver(&self) -> Principal {
        Principal::new(self.driver, self.org, Role::Driver)
    }

    pub fn admin(&self) -> Principal {
        Principal::new(Uuid::new_v4(), self.org, Role::Admin)
    }
}
