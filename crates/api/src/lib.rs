//! HTTP API: import submission, poll status and health.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
