pub const INSERT_TRIP: &str = r#"
INSERT INTO trips (trip_id, organization_id, bus_id, route_id, driver_id, status,
                   current_lat, current_lng, last_update, passenger_count, start_time)
VALUES ($1, $2, $3, $4, $5, 'in_progress', $6, $7, $8, $9, $8)
RETURNING *;
"#;

pub const SELECT_TRIP: &str = r#"
SELECT * FROM trips WHERE trip_id = $1 AND organization_id = $2;
"#;

pub const SELECT_ACTIVE_TRIP_FOR_BUS: &str = r#"
SELECT * FROM trips
WHERE organization_id = $1 AND bus_id = $2 AND status = 'in_progress'
LIMIT 1;
"#;

pub const UPDATE_TRIP_LOCATION: &str = r#"
UPDATE trips
SET current_lat = $3,
    current_lng = $4,
    speed_kmh = $5,
    heading = $6,
    accuracy = $7,
    distance_meters = distance_meters + $8,
    last_update = $9
WHERE trip_id = $1 AND organization_id = $2 AND status = 'in_progress'
RETURNING *;
"#;

pub const INSERT_TRIP_POINT: &str = r#"
INSERT INTO trip_points (trip_id, timestamp, lat, lng, speed, heading, accuracy)
VALUES ($1, $2, $3, $4, $5, $6, $7);
"#;

pub const UPDATE_TRIP_END: &str = r#"
UPDATE trips
SET status = 'completed',
    end_time = $3
WHERE trip_id = $1 AND organization_id = $2 AND status = 'in_progress'
RETURNING *;
"#;

pub const DELETE_TRIP: &str = r#"
DELETE FROM trips WHERE trip_id = $1 AND organization_id = $2 AND status <> 'in_progress';
"#;

pub const LIST_TRIPS: &str = r#"
SELECT * FROM trips
WHERE organization_id = $1
  AND ($2::trip_status IS NULL OR status = $2)
  AND ($3::uuid IS NULL OR bus_id = $3)
  AND ($4::uuid IS NULL OR route_id = $4)
  AND ($5::uuid IS NULL OR driver_id = $5)
ORDER BY start_time DESC
LIMIT $6 OFFSET $7;
"#;

pub const SELECT_TRIP_POINTS: &str = r#"
SELECT p.point_id, p.trip_id, p.timestamp, p.lat, p.lng, p.speed, p.heading, p.accuracy
FROM trip_points p
JOIN trips t ON t.trip_id = p.trip_id
WHERE p.trip_id = $1 AND t.organization_id = $2
ORDER BY p.timestamp ASC, p.point_id ASC;
"#;

pub const INSERT_NOTIFICATION: &str = r#"
INSERT INTO notifications (
    notification_id, notification_type, organization_id, bus_id, route_id, trip_id,
    student_id, recipient_id, title, message, data, read, created_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, false, $12)
ON CONFLICT (trip_id, notification_type, student_id)
    WHERE notification_type IN ('bus_near_student', 'bus_arrived_school')
DO NOTHING
RETURNING *;
"#;

pub const EXISTS_NOTIFICATION_FOR_STUDENT: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM notifications
    WHERE trip_id = $1 AND notification_type = $2 AND student_id = $3
);
"#;

pub const EXISTS_NOTIFICATION_FOR_TRIP: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM notifications
    WHERE trip_id = $1 AND notification_type = $2
);
"#;

pub const SELECT_NOTIFICATION: &str = r#"
SELECT * FROM notifications WHERE notification_id = $1 AND organization_id = $2;
"#;

pub const LIST_NOTIFICATIONS_FOR_RECIPIENT: &str = r#"
SELECT * FROM notifications
WHERE organization_id = $1
  AND recipient_id = $2
  AND (NOT $3 OR read = false)
ORDER BY created_at DESC
LIMIT $4 OFFSET $5;
"#;

pub const COUNT_UNREAD_NOTIFICATIONS: &str = r#"
SELECT COUNT(*) FROM notifications
WHERE organization_id = $1 AND recipient_id = $2 AND read = false;
"#;

pub const MARK_NOTIFICATION_READ: &str = r#"
UPDATE notifications
SET read = true
WHERE notification_id = $1 AND organization_id = $2 AND recipient_id = $3
RETURNING *;
"#;

pub const MARK_ALL_NOTIFICATIONS_READ: &str = r#"
UPDATE notifications
SET read = true
WHERE organization_id = $1 AND recipient_id = $2 AND read = false
RETURNING *;
"#;

pub const SELECT_BUS: &str = r#"
SELECT id AS bus_id, organization_id, bus_number, driver_id
FROM buses
WHERE id = $1 AND organization_id = $2;
"#;

pub const SELECT_ROUTE: &str = r#"
SELECT id AS route_id, organization_id, name
FROM routes
WHERE id = $1 AND organization_id = $2;
"#;

pub const SELECT_ROUTE_STOPS: &str = r#"
SELECT s.id AS stop_id, s.route_id, s.name, s.latitude, s.longitude, s.order_index
FROM stops s
JOIN routes r ON r.id = s.route_id
WHERE s.route_id = $1 AND r.organization_id = $2
ORDER BY s.order_index ASC;
"#;

pub const SELECT_STUDENTS_ON_BUS: &str = r#"
SELECT id AS student_id, name, parent_id, pickup_stop_id
FROM students
WHERE bus_id = $1 AND organization_id = $2 AND is_active = true;
"#;

pub const EXISTS_RECIPIENT: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM users WHERE id = $1 AND organization_id = $2 AND is_active = true
);
"#;
