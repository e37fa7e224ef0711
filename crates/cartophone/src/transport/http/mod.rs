//! HTTP transport: axum routes and server.

mod routes;
mod server;

pub use routes::{
    AlarmPatchRequest, AssociateRequest, HealthCheckResponse, QueueAddRequest, routes,
};
pub use server::{ServerConfig, serve, serve_on};
