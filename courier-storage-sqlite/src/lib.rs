//! SQLite storage backend for courier.
//!
//! [`SqliteRepositoryProvider`] implements every repository trait from
//! `courier-core` on top of a single [`SqlitePool`].
//!
//! ```no_run
//! use courier_core::repositories::RepositoryProvider;
//! use courier_storage_sqlite::SqliteRepositoryProvider;
//!
//! # async fn run() -> Result<(), courier_core::Error> {
//! let provider = SqliteRepositoryProvider::connect("sqlite://courier.db").await?;
//! provider.migrate().await?;
//! # Ok(())
//! # }
//! ```
pub mod migrations;
pub mod repositories;

pub use migrations::SqliteMigrationManager;
pub use repositories::{
    SqliteAttemptRepository, SqliteMailingRepository, SqliteRecipientRepository,
    SqliteRepositoryProvider, SqliteTemplateRepository,
};
pub use sqlx::SqlitePool;
