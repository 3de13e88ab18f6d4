//! The metron agent: two samplers feeding a shared snapshot and a shipper
//! reporting it to `metron-server` over HTTP.

pub mod config;
pub mod shipper;
