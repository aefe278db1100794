// Domain layer
pub mod broker;
pub mod event;

// Application layer
pub mod api;
pub mod server;
pub mod sse;

// Supporting modules
pub mod auth;
pub mod config;
pub mod error;
