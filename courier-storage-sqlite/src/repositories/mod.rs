//! Repository implementations for SQLite storage

pub mod attempt;
pub mod mailing;
pub mod recipient;
pub mod template;

pub use attempt::SqliteAttemptRepository;
pub use mailing::SqliteMailingRepository;
pub use recipient::SqliteRecipientRepository;
pub use template::SqliteTemplateRepository;

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    Error,
    error::StorageError,
    repositories::{
        AttemptRepositoryProvider, MailingRepositoryProvider, RecipientRepositoryProvider,
        RepositoryProvider, TemplateRepositoryProvider,
    },
};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// Repository provider implementation for SQLite
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    recipient: Arc<SqliteRecipientRepository>,
    template: Arc<SqliteTemplateRepository>,
    mailing: Arc<SqliteMailingRepository>,
    attempt: Arc<SqliteAttemptRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let recipient = Arc::new(SqliteRecipientRepository::new(pool.clone()));
        let template = Arc::new(SqliteTemplateRepository::new(pool.clone()));
        let mailing = Arc::new(SqliteMailingRepository::new(pool.clone()));
        let attempt = Arc::new(SqliteAttemptRepository::new(pool.clone()));

        Self {
            pool,
            recipient,
            template,
            mailing,
            attempt,
        }
    }

    /// Open a pool for `url`, creating the database file if needed.
    ///
    /// In-memory databases get a single connection, since every connection
    /// to `sqlite::memory:` would otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 8 })
            .connect_with(options)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url, "Failed to open SQLite database");
                Error::Storage(StorageError::Connection(e.to_string()))
            })?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Implement individual provider traits

impl RecipientRepositoryProvider for SqliteRepositoryProvider {
    type RecipientRepo = SqliteRecipientRepository;

    fn recipient(&self) -> &Self::RecipientRepo {
        &self.recipient
    }
}

impl TemplateRepositoryProvider for SqliteRepositoryProvider {
    type TemplateRepo = SqliteTemplateRepository;

    fn template(&self) -> &Self::TemplateRepo {
        &self.template
    }
}

impl MailingRepositoryProvider for SqliteRepositoryProvider {
    type MailingRepo = SqliteMailingRepository;

    fn mailing(&self) -> &Self::MailingRepo {
        &self.mailing
    }
}

impl AttemptRepositoryProvider for SqliteRepositoryProvider {
    type AttemptRepo = SqliteAttemptRepository;

    fn attempt(&self) -> &Self::AttemptRepo {
        &self.attempt
    }
}

// Implement the unified RepositoryProvider trait

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        use crate::migrations::{self, SqliteMigrationManager};
        use courier_migration::MigrationManager;

        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        let migrations = migrations::all();
        manager.up(&migrations).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?;
        Ok(())
    }
}

/// Map a driver error onto the storage error categories.
///
/// Key and foreign-key violations surface as [`StorageError::Constraint`] so
/// callers can tell "already exists" and "still referenced" from outages.
pub(crate) fn storage_error(e: sqlx::Error) -> Error {
    let storage = match &e {
        sqlx::Error::Database(db)
            if db.is_unique_violation()
                || db.is_foreign_key_violation()
                || db.is_check_violation() =>
        {
            StorageError::Constraint(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            tracing::error!(error = %e, "Lost connection to SQLite");
            StorageError::Connection(e.to_string())
        }
        _ => {
            tracing::error!(error = %e, "SQLite query failed");
            StorageError::Database(e.to_string())
        }
    };
    Error::Storage(storage)
}

/// A stored value that no longer parses.
pub(crate) fn corrupt(column: &str, e: impl Display) -> Error {
    Error::Storage(StorageError::Database(format!("invalid {column}: {e}")))
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
