pub mod config;
pub mod db;
pub mod error;
pub mod schema;

// Re-export main components for easier use
pub use db::migrations::{MigrationDefinition, MigrationReport, MigrationRunner, RunState};
pub use db::{DocumentStore, Filter, MemoryStore, PgDocumentStore, Update, UpdateResult};
pub use error::Error;
