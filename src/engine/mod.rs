//! Core engine: version checking, record aggregation and the dashboard
//! session workflow built on top of them.

pub mod aggregator;
pub mod session;
pub mod version_check;
