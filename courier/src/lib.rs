//! # Courier
//!
//! Courier dispatches scheduled email campaigns. A mailing sends one message
//! template to a set of recipients inside a time window, exactly once per
//! recipient, and keeps an append-only history of every delivery attempt.
//!
//! The [`Courier`] handle ties the pieces together:
//! - recipient directory and template store
//! - mailing lifecycle (create, schedule, reschedule, force-finish)
//! - the dispatch engine and the campaign scheduler
//! - per-owner delivery statistics behind a short-lived cache
//!
//! ## Storage Support
//!
//! Courier currently supports the following storage backends:
//! - SQLite
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use courier::{CourierBuilder, MockTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let courier = CourierBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_transport(Arc::new(MockTransport::new()))
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let report = courier.run_due().await?;
//!     println!("executed {} mailings", report.executed.len());
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::repositories::{
    AttemptRepositoryAdapter, MailingRepositoryAdapter, RecipientRepositoryAdapter,
    RepositoryProvider, TemplateRepositoryAdapter,
};
use courier_core::services::{
    DispatchService, MailingService, RecipientService, SchedulerService, StatisticsService,
    TemplateService,
};

pub mod builder;
pub mod cache;

pub use builder::{CourierBuilder, CourierBuilderError, NoStorage, WithStorage};
pub use cache::{DEFAULT_STATS_TTL, StatsCache};

/// Re-export core types from courier_core
///
/// These types are commonly used when working with the Courier API.
pub use courier_core::{
    Attempt, AttemptOutcome, DispatchError, Error, ExecutionResult, FailureKind, FailureReason,
    FinalStatus, Mailing, MailingId, MailingStatus, MailingUpdate, MessageTemplate, NewMailing, NewRecipient,
    NewTemplate, OwnerId, Recipient, RecipientId, TemplateId,
    services::{
        DispatchConfig, MailingOverview, MailingReport, OwnerSummary, RecipientUpdate,
        SchedulerConfig, TickReport,
    },
};

/// Re-export delivery transports
pub use courier_mailer::{
    FileTransport, MailerConfig, MailerError, MockTransport, SmtpTransport, Transport,
    TransportError,
};

/// Re-export storage backends
///
/// These storage implementations are available when the corresponding feature is enabled.
#[cfg(feature = "sqlite")]
pub use courier_storage_sqlite::{SqlitePool, SqliteRepositoryProvider};

pub type Recipients<R> = RecipientRepositoryAdapter<R>;
pub type Templates<R> = TemplateRepositoryAdapter<R>;
pub type Mailings<R> = MailingRepositoryAdapter<R>;
pub type Attempts<R> = AttemptRepositoryAdapter<R>;

/// Dispatch engine over a repository provider
pub type Dispatch<R> = DispatchService<Mailings<R>, Attempts<R>, Recipients<R>, Templates<R>>;
/// Campaign scheduler over a repository provider
pub type Scheduler<R> = SchedulerService<Mailings<R>, Attempts<R>, Recipients<R>, Templates<R>>;
/// Mailing lifecycle over a repository provider
pub type MailingLifecycle<R> =
    MailingService<Mailings<R>, Attempts<R>, Recipients<R>, Templates<R>>;
/// Statistics aggregator over a repository provider
pub type Statistics<R> = StatisticsService<Mailings<R>, Attempts<R>, Recipients<R>>;

/// The main coordinator that owns storage, services and the transport.
///
/// Commands that change what [`Courier::stats`] reports drop the affected
/// owner's cached summary; reads through the service accessors never touch
/// the cache.
pub struct Courier<R: RepositoryProvider> {
    repositories: Arc<R>,
    recipients: Arc<RecipientService<Recipients<R>>>,
    templates: Arc<TemplateService<Templates<R>>>,
    mailings: Arc<MailingLifecycle<R>>,
    dispatch: Arc<Dispatch<R>>,
    scheduler: Scheduler<R>,
    statistics: Arc<Statistics<R>>,
    stats_cache: Arc<StatsCache>,
}

impl<R: RepositoryProvider> Courier<R> {
    /// Create a Courier with default dispatch, scheduler and cache settings
    pub fn new(repositories: Arc<R>, transport: Arc<dyn Transport>) -> Self {
        Self::from_parts(
            repositories,
            transport,
            DispatchConfig::default(),
            SchedulerConfig::default(),
            StatsCache::default(),
        )
    }

    pub(crate) fn from_parts(
        repositories: Arc<R>,
        transport: Arc<dyn Transport>,
        dispatch_config: DispatchConfig,
        scheduler_config: SchedulerConfig,
        stats_cache: StatsCache,
    ) -> Self {
        // Create repository adapters
        let recipient_repo = Arc::new(RecipientRepositoryAdapter::new(repositories.clone()));
        let template_repo = Arc::new(TemplateRepositoryAdapter::new(repositories.clone()));
        let mailing_repo = Arc::new(MailingRepositoryAdapter::new(repositories.clone()));
        let attempt_repo = Arc::new(AttemptRepositoryAdapter::new(repositories.clone()));

        let dispatch = Arc::new(DispatchService::with_config(
            mailing_repo.clone(),
            attempt_repo.clone(),
            recipient_repo.clone(),
            template_repo.clone(),
            transport,
            dispatch_config,
        ));

        Self {
            repositories,
            recipients: Arc::new(RecipientService::new(recipient_repo.clone())),
            templates: Arc::new(TemplateService::new(template_repo.clone())),
            mailings: Arc::new(MailingService::new(
                mailing_repo.clone(),
                attempt_repo.clone(),
                recipient_repo.clone(),
                template_repo,
            )),
            scheduler: SchedulerService::with_config(
                mailing_repo.clone(),
                dispatch.clone(),
                scheduler_config,
            ),
            statistics: Arc::new(StatisticsService::new(
                mailing_repo,
                attempt_repo,
                recipient_repo,
            )),
            dispatch,
            stats_cache: Arc::new(stats_cache),
        }
    }

    /// Run migrations for all repositories
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    /// Health check for all repositories
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    pub fn recipients(&self) -> &RecipientService<Recipients<R>> {
        &self.recipients
    }

    pub fn templates(&self) -> &TemplateService<Templates<R>> {
        &self.templates
    }

    pub fn mailings(&self) -> &MailingLifecycle<R> {
        &self.mailings
    }

    pub fn dispatch(&self) -> &Dispatch<R> {
        &self.dispatch
    }

    pub fn scheduler(&self) -> &Scheduler<R> {
        &self.scheduler
    }

    pub fn statistics(&self) -> &Statistics<R> {
        &self.statistics
    }

    pub fn stats_cache(&self) -> &StatsCache {
        &self.stats_cache
    }

    /// Add a recipient to an owner's directory
    pub async fn create_recipient(&self, recipient: NewRecipient) -> Result<Recipient, Error> {
        let owner_id = recipient.owner_id.clone();
        let created = self.recipients.create_recipient(recipient).await?;
        self.stats_cache.invalidate(&owner_id);
        Ok(created)
    }

    pub async fn create_template(&self, template: NewTemplate) -> Result<MessageTemplate, Error> {
        self.templates.create_template(template).await
    }

    /// Create a mailing in `Created` status
    pub async fn create_mailing(&self, mailing: NewMailing) -> Result<Mailing, Error> {
        let created = self.mailings.create_mailing(mailing).await?;
        self.stats_cache.invalidate(&created.owner_id);
        Ok(created)
    }

    /// Move a mailing from `Created` to `Scheduled`
    pub async fn schedule(&self, id: &MailingId) -> Result<Mailing, Error> {
        self.mailings.schedule(id).await
    }

    /// Give a `Failed` mailing a new window and schedule it again
    pub async fn reschedule(
        &self,
        id: &MailingId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Mailing, Error> {
        self.mailings.reschedule(id, start, end).await
    }

    /// Execute one mailing now
    ///
    /// See [`DispatchService::execute`] for the exact semantics.
    pub async fn execute(&self, id: &MailingId) -> Result<ExecutionResult, Error> {
        let result = self.dispatch.execute(id).await;
        self.invalidate_mailing_owner(id).await;
        result
    }

    /// Manual trigger: execute only if the mailing's window has opened.
    ///
    /// A `Scheduled` mailing whose start lies in the future is refused with
    /// `InvalidMailingState` and left untouched. Other statuses behave as in
    /// [`Courier::execute`].
    pub async fn execute_in_window(&self, id: &MailingId) -> Result<ExecutionResult, Error> {
        if let Some(mailing) = self.mailings.get_mailing(id).await? {
            let now = Utc::now();
            if mailing.status == MailingStatus::Scheduled && mailing.scheduled_start > now {
                return Err(DispatchError::InvalidMailingState(format!(
                    "mailing {id} opens at {}",
                    mailing.scheduled_start
                ))
                .into());
            }
        }
        self.execute(id).await
    }

    /// One scheduler tick at the current time
    pub async fn run_due(&self) -> Result<TickReport, Error> {
        self.run_due_at(Utc::now()).await
    }

    pub async fn run_due_at(&self, now: DateTime<Utc>) -> Result<TickReport, Error> {
        let report = self.scheduler.tick(now).await;
        // A tick can touch any owner.
        self.stats_cache.clear();
        report
    }

    /// Administrative override to `Completed` or `Failed`
    pub async fn force_finish(
        &self,
        id: &MailingId,
        status: FinalStatus,
    ) -> Result<Mailing, Error> {
        let mailing = self.mailings.force_finish(id, status).await?;
        self.stats_cache.invalidate(&mailing.owner_id);
        Ok(mailing)
    }

    /// A mailing with the counts of its latest execution
    pub async fn status(&self, id: &MailingId) -> Result<MailingOverview, Error> {
        self.mailings.status(id).await
    }

    pub async fn delete_mailing(&self, id: &MailingId) -> Result<(), Error> {
        let owner_id = self
            .mailings
            .get_mailing(id)
            .await?
            .map(|mailing| mailing.owner_id);
        self.mailings.delete_mailing(id).await?;
        if let Some(owner_id) = owner_id {
            self.stats_cache.invalidate(&owner_id);
        }
        Ok(())
    }

    /// Owner statistics, served from the cache while fresh
    pub async fn stats(&self, owner_id: &OwnerId) -> Result<OwnerSummary, Error> {
        self.stats_cache
            .get_or_load(owner_id, || self.statistics.summarize(owner_id))
            .await
    }

    /// Attempt history of one mailing, always read from storage
    pub async fn mailing_report(&self, id: &MailingId) -> Result<MailingReport, Error> {
        self.statistics.mailing_report(id).await
    }

    /// Start the periodic scheduler task
    ///
    /// Ticks every `tick_interval` until `shutdown` changes. Cached statistics
    /// are not invalidated by background ticks; they age out with the TTL.
    pub fn start_scheduler(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        self.scheduler.start_periodic_task(shutdown)
    }

    async fn invalidate_mailing_owner(&self, id: &MailingId) {
        match self.mailings.get_mailing(id).await {
            Ok(Some(mailing)) => self.stats_cache.invalidate(&mailing.owner_id),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(mailing_id = %id, error = %e, "Clearing statistics cache");
                self.stats_cache.clear();
            }
        }
    }
}
