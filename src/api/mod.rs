//! API layer - HTTP endpoint handlers.

mod handlers;
mod routes;

pub use handlers::{health, publish_notification, stats, PublishRequest, PublishResponse};
pub use routes::api_routes;
