pub mod dispatcher;
pub mod store;

pub use dispatcher::{NotificationDispatcher, TripContext};
pub use store::{NotificationStore, PersistOutcome};
