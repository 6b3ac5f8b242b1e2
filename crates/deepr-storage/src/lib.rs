// SQLite storage layer with sqlx (WAL mode, embedded)

pub mod artifacts;
pub mod models;
pub mod repositories;

pub use artifacts::ArtifactStore;
pub use models::*;
pub use repositories::Database;
