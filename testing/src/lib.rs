//! Shared test fixtures for the roster sync workspace.
//!
//! Provides one PostgreSQL testcontainer per test process, lazily started on
//! first use. Every accessor returns `None` when Docker is unavailable so the
//! calling test can skip itself.

mod fixtures;

pub use fixtures::*;
