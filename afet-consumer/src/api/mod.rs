//! HTTP surface of the consumer (health and metrics only)

pub mod health;

pub use health::health_routes;
