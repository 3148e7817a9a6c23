//! Campaign scheduler.
//!
//! The scheduler decides what should run; it holds no timer of its own.
//! [`SchedulerService::tick`] is the unit of work a trigger source (the
//! periodic task below, a cron job, an operator) performs: sweep expired
//! mailings, then execute everything that is due.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    Error, ExecutionResult, FailureReason, MailingId, MailingStatus,
    repositories::{
        AttemptRepository, MailingRepository, RecipientRepository, StatusChange,
        TemplateRepository,
    },
    services::DispatchService,
};

/// Configuration for the campaign scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between ticks of [`SchedulerService::start_periodic_task`]
    pub tick_interval: Duration,
    /// Whether a tick also resumes mailings left `InProgress` by a crashed run
    pub resume_in_progress: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            resume_in_progress: true,
        }
    }
}

/// Due mailing IDs in dispatch order.
///
/// Reflects storage at the moment [`SchedulerService::due_mailings`] was
/// called; ask again for a fresh view.
#[derive(Debug)]
pub struct DueMailings {
    ids: std::vec::IntoIter<MailingId>,
}

impl Iterator for DueMailings {
    type Item = MailingId;

    fn next(&mut self) -> Option<Self::Item> {
        self.ids.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for DueMailings {}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Mailings whose window closed before they started, now `Failed`
    pub expired: Vec<MailingId>,
    /// Results of mailings that were executed or resumed
    pub executed: Vec<ExecutionResult>,
    /// Mailings whose execution returned an error, with the error text
    pub errors: Vec<(MailingId, String)>,
}

pub struct SchedulerService<M, A, R, T>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
    T: TemplateRepository,
{
    mailings: Arc<M>,
    dispatch: Arc<DispatchService<M, A, R, T>>,
    config: SchedulerConfig,
}

impl<M, A, R, T> Clone for SchedulerService<M, A, R, T>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
    T: TemplateRepository,
{
    fn clone(&self) -> Self {
        Self {
            mailings: Arc::clone(&self.mailings),
            dispatch: Arc::clone(&self.dispatch),
            config: self.config.clone(),
        }
    }
}

impl<M, A, R, T> SchedulerService<M, A, R, T>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
    T: TemplateRepository,
{
    pub fn new(mailings: Arc<M>, dispatch: Arc<DispatchService<M, A, R, T>>) -> Self {
        Self::with_config(mailings, dispatch, SchedulerConfig::default())
    }

    pub fn with_config(
        mailings: Arc<M>,
        dispatch: Arc<DispatchService<M, A, R, T>>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            mailings,
            dispatch,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// `Scheduled` mailings whose window contains `now`, ordered by scheduled
    /// start with ties broken by mailing ID.
    pub async fn due_mailings(&self, now: DateTime<Utc>) -> Result<DueMailings, Error> {
        let ids = self.mailings.find_due(now).await?;
        Ok(DueMailings {
            ids: ids.into_iter(),
        })
    }

    /// Fail every `Scheduled` mailing whose window ended before `now`.
    ///
    /// Returns the IDs this call moved to `Failed` with
    /// [`FailureReason::WindowMissed`].
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        let mut expired = Vec::new();
        for id in self.mailings.find_expired(now).await? {
            let change = StatusChange::failed(FailureReason::WindowMissed, now);
            if self
                .mailings
                .transition(&id, MailingStatus::Scheduled, change)
                .await?
                .is_some()
            {
                tracing::info!(mailing_id = %id, "Mailing window missed");
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Swept expired mailings");
        }
        Ok(expired)
    }

    /// Sweep expired mailings, execute due ones in order, then resume
    /// interrupted ones.
    ///
    /// One mailing's failure is reported in the [`TickReport`] and does not
    /// stop the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, Error> {
        let mut report = TickReport {
            expired: self.sweep_expired(now).await?,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for id in self.due_mailings(now).await? {
            seen.insert(id.clone());
            self.run_one(&id, &mut report).await;
        }

        if self.config.resume_in_progress {
            for id in self.mailings.find_by_status(MailingStatus::InProgress).await? {
                if seen.insert(id.clone()) {
                    self.run_one(&id, &mut report).await;
                }
            }
        }

        tracing::debug!(
            expired = report.expired.len(),
            executed = report.executed.len(),
            errors = report.errors.len(),
            "Scheduler tick finished"
        );
        Ok(report)
    }

    async fn run_one(&self, id: &MailingId, report: &mut TickReport) {
        match self.dispatch.execute(id).await {
            Ok(result) => report.executed.push(result),
            Err(e) => {
                tracing::warn!(mailing_id = %id, error = %e, "Mailing execution failed");
                report.errors.push((id.clone(), e.to_string()));
            }
        }
    }

    /// Run [`Self::tick`] every `tick_interval` until `shutdown` changes.
    pub fn start_periodic_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(scheduler.config.tick_interval);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        if let Err(e) = scheduler.tick(Utc::now()).await {
                            tracing::warn!(error = %e, "Scheduler tick failed");
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down campaign scheduler task");
                        break;
                    }
                }
            }
        })
    }
}
