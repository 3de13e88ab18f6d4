//! metron-server: receives metric reports over HTTP, stores them in memory
//! or SQL and serves them back as text, JSON and an HTML dashboard.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod service;
pub mod shutdown;
pub mod state;
