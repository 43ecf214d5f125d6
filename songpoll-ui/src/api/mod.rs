//! HTTP API handlers for songpoll-ui

pub mod cache;
pub mod dashboard;
pub mod feedback;
pub mod health;

pub use cache::{cache_stats, invalidate_cache};
pub use dashboard::{get_dashboard, list_years};
pub use feedback::submit_feedback;
pub use health::health_routes;
