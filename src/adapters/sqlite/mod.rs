//! SQLite persistence adapters.

pub mod connection;
pub mod migrations;

pub(crate) mod agent_repository;
pub(crate) mod log_repository;
pub(crate) mod ralph_repository;
pub(crate) mod spec_repository;
pub(crate) mod task_repository;

pub use connection::{create_memory_pool, create_pool, ConnectionError};
pub use migrations::{all_embedded_migrations, Migration, Migrator};
