//! SQLite storage backend.

pub mod backend;
pub mod query_builder;
pub mod schema;
pub mod storage;

pub use backend::{SqliteBackend, SqliteBackendConfig};
