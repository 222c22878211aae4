//! Integration tests: the full refresh cycle over real components.

mod mock_sources;
mod refresh_cycle;
