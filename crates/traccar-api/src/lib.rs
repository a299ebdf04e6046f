// traccar-api: Async Rust client for the Traccar server API (REST + WebSocket)

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod subscription;
mod transport;

pub use client::{ApiClient, EventsQuery};
pub use config::{ClientConfig, Credential};
pub use error::Error;
pub use models::{
    Device, Geofence, Position, ReportsEvent, Server, SubscriptionStatus, SubscriptionUpdate,
};
pub use subscription::HandlerError;
