//! School bus trip lifecycle and proximity notification service.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod http;
pub mod kafka;
pub mod memory;
pub mod models;
pub mod notifications;
pub mod processor;
pub mod proximity;
pub mod pubsub;
pub mod store;
pub mod stream;
pub mod trips;

pub use error::{Error, Result};
