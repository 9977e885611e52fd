//! HTTP surface for the poetry search service.

pub mod handlers;
pub mod openapi;
pub mod server;

pub use server::{build_router, init_tracing, serve, ServerConfig};
