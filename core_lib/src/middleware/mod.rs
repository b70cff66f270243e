//! Middleware components for the HTTP surface

pub mod cors;
pub mod logging;
