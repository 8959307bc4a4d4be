pub mod fleet;
pub mod location_report;
pub mod notification;
pub mod trip;
pub mod trip_points;

pub use fleet::{Bus, Route, Stop, Student};
pub use location_report::LocationReport;
pub use notification::{NewNotification, Notification, NotificationQuery, NotificationType};
pub use trip::{LocationFix, NewTrip, Trip, TripFilter, TripStatus};
pub use trip_points::TripPoint;
