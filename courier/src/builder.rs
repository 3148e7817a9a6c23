//! Type-state builder for [`Courier`].
//!
//! A builder without storage has no `build` method, so forgetting to pick a
//! backend is a compile error rather than a runtime one.
//!
//! # Example
//!
//! ```rust,no_run
//! use courier::{CourierBuilder, MailerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let courier = CourierBuilder::new()
//!         .with_sqlite("sqlite://courier.db")
//!         .await?
//!         .with_mailer(MailerConfig::default())
//!         .with_concurrency(8)
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     courier.health_check().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use courier_core::repositories::RepositoryProvider;
use courier_core::services::{DispatchConfig, SchedulerConfig};
use courier_mailer::{MailerConfig, Transport};

use crate::{Courier, StatsCache, cache::DEFAULT_STATS_TTL};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CourierBuilderError {
    #[error("Could not open storage: {0}")]
    StorageConnection(String),

    #[error("Could not apply migrations: {0}")]
    Migration(String),

    /// A setting is out of range or a required piece is missing
    #[error("Invalid courier settings: {0}")]
    InvalidConfiguration(String),

    #[error("Could not set up the delivery transport: {0}")]
    MailerConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Starting state: no repositories chosen.
pub struct NoStorage;

/// Repositories chosen; [`CourierBuilder::build`] becomes available.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Courier`] instances.
///
/// Storage must be configured before anything else; the remaining settings
/// are optional except for a delivery transport, which comes either from
/// [`CourierBuilder::with_transport`] or from a [`MailerConfig`].
///
pub struct CourierBuilder<Storage> {
    storage: Storage,
    transport: Option<Arc<dyn Transport>>,
    mailer_config: Option<MailerConfig>,
    dispatch_config: DispatchConfig,
    scheduler_config: SchedulerConfig,
    stats_ttl: Duration,
    apply_migrations: bool,
}

impl Default for CourierBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl CourierBuilder<NoStorage> {
    /// Defaults: 4 concurrent sends with a 30s send timeout and a 5 minute
    /// reservation lease, a 60s scheduler tick that resumes interrupted
    /// mailings, a 60s statistics TTL, no transport and no migrations.
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            transport: None,
            mailer_config: None,
            dispatch_config: DispatchConfig::default(),
            scheduler_config: SchedulerConfig::default(),
            stats_ttl: DEFAULT_STATS_TTL,
            apply_migrations: false,
        }
    }

    /// Use an existing repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> CourierBuilder<WithStorage<R>> {
        CourierBuilder {
            storage: WithStorage { repositories },
            transport: self.transport,
            mailer_config: self.mailer_config,
            dispatch_config: self.dispatch_config,
            scheduler_config: self.scheduler_config,
            stats_ttl: self.stats_ttl,
            apply_migrations: self.apply_migrations,
        }
    }
}

// ============================================================================
// Backends
// ============================================================================

#[cfg(feature = "sqlite")]
impl CourierBuilder<NoStorage> {
    /// Open (or create) the SQLite database at `url`, e.g. `sqlite::memory:`
    /// or `sqlite://courier.db`.
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<CourierBuilder<WithStorage<crate::SqliteRepositoryProvider>>, CourierBuilderError>
    {
        let provider = crate::SqliteRepositoryProvider::connect(url)
            .await
            .map_err(|e| CourierBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_repositories(Arc::new(provider)))
    }

    /// Share a pool the application already owns.
    pub fn with_sqlite_pool(
        self,
        pool: crate::SqlitePool,
    ) -> CourierBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(crate::SqliteRepositoryProvider::new(pool)))
    }
}

// ============================================================================
// Configuration Methods (WithStorage)
// ============================================================================

impl<R: RepositoryProvider> CourierBuilder<WithStorage<R>> {
    /// Deliver through the given transport.
    ///
    /// Takes precedence over [`Self::with_mailer`].
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the transport from a mailer configuration.
    ///
    /// The configured sender address replaces the dispatch default.
    pub fn with_mailer(mut self, config: MailerConfig) -> Self {
        self.mailer_config = Some(config);
        self
    }

    /// Configure the mailer from environment variables.
    ///
    /// See [`MailerConfig::from_env`] for the variables read.
    pub fn with_mailer_from_env(mut self) -> Result<Self, CourierBuilderError> {
        let config = MailerConfig::from_env()
            .map_err(|e| CourierBuilderError::MailerConfiguration(e.to_string()))?;
        self.mailer_config = Some(config);
        Ok(self)
    }

    pub fn with_dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch_config = config;
        self
    }

    /// Maximum number of sends in flight for one mailing
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.dispatch_config.concurrency = concurrency;
        self
    }

    /// Bound on a single send
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_config.send_timeout = timeout;
        self
    }

    /// How long a worker's claim on one recipient holds. Must exceed the
    /// send timeout.
    pub fn with_reservation_lease(mut self, lease: chrono::Duration) -> Self {
        self.dispatch_config.reservation_lease = lease;
        self
    }

    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// How long owner statistics are served from the cache
    pub fn with_stats_ttl(mut self, ttl: Duration) -> Self {
        self.stats_ttl = ttl;
        self
    }

    /// Run migrations as part of [`Self::build`].
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }

    /// Build the Courier instance.
    ///
    /// If `apply_migrations(true)` was called, migrations are applied before
    /// returning.
    pub async fn build(self) -> Result<Courier<R>, CourierBuilderError> {
        self.dispatch_config
            .validate()
            .map_err(|e| CourierBuilderError::InvalidConfiguration(e.to_string()))?;

        let mut dispatch_config = self.dispatch_config;
        let transport = match (self.transport, &self.mailer_config) {
            (Some(transport), _) => transport,
            (None, Some(config)) => {
                dispatch_config.from_address = config.get_from_address();
                config
                    .build_transport()
                    .map_err(|e| CourierBuilderError::MailerConfiguration(e.to_string()))?
            }
            (None, None) => {
                return Err(CourierBuilderError::InvalidConfiguration(
                    "no delivery transport configured".to_string(),
                ));
            }
        };

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| CourierBuilderError::Migration(e.to_string()))?;
        }

        Ok(Courier::from_parts(
            self.storage.repositories,
            transport,
            dispatch_config,
            self.scheduler_config,
            StatsCache::new(self.stats_ttl),
        ))
    }
}
