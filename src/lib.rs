//! Wallet Guard: wallet version tracking and alert aggregation.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod storage;
pub mod alerts;
pub mod telemetry;
pub mod engine;
pub mod dashboard;
