//! Metrics Module
//! 
//! Prometheus metrics for the database connection lifecycle and HTTP traffic.

pub mod collector;

pub use collector::Metrics;
