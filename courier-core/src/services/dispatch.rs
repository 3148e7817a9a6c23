//! The dispatch engine.
//!
//! [`DispatchService::execute`] sends one mailing to its recipient set:
//!
//! 1. Completed mailings are a no-op that reports the latest execution.
//! 2. The transport is checked; if it is down the mailing fails with
//!    [`FailureReason::TransportUnavailable`] before anything is sent.
//! 3. A `Scheduled` mailing is claimed (`Scheduled -> InProgress`) with an
//!    atomic compare-and-set. A caller that loses the race, or that finds the
//!    mailing already `InProgress`, joins the running execution cooperatively.
//! 4. Every recipient without an attempt for the current execution is handed
//!    to a bounded worker pool. A worker reserves the recipient, sends with a
//!    timeout and records exactly one attempt. Per-recipient failures become
//!    failed attempts and never stop the other recipients.
//! 5. Once every recipient has an attempt the mailing moves to `Completed`.
//!
//! An execution that dies halfway leaves the mailing `InProgress`; calling
//! `execute` again picks up the recipients that are still missing.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use courier_mailer::{Email, FailureKind, Transport, TransportError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::{
    Attempt, Error, ExecutionResult, FailureReason, Mailing, MailingId, MailingStatus,
    MessageTemplate, NewAttempt, Recipient, RecipientId, Reservation,
    error::{DispatchError, StorageError, ValidationError},
    id::generate_prefixed_id,
    repositories::{
        AttemptRepository, MailingRepository, RecipientRepository, StatusChange,
        TemplateRepository,
    },
};

/// Configuration for the dispatch engine
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of sends in flight for one execution
    pub concurrency: usize,
    /// Bound on a single send; a timeout is recorded as a transient failure
    pub send_timeout: StdDuration,
    /// How long a recipient reservation blocks other workers. Must exceed
    /// `send_timeout`, otherwise a slow send can be taken over; see
    /// [`DispatchConfig::validate`].
    pub reservation_lease: Duration,
    /// Sender address on every message
    pub from_address: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            send_timeout: StdDuration::from_secs(30),
            reservation_lease: Duration::minutes(5),
            from_address: "noreply@example.com".to_string(),
        }
    }
}

impl DispatchConfig {
    /// Reject settings under which a recipient could be sent to twice.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency == 0 {
            return Err(ValidationError::InvalidField(
                "dispatch concurrency must be at least 1".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(ValidationError::InvalidField(
                "send timeout must be greater than zero".to_string(),
            ));
        }
        if !self.lease_outlives_send() {
            return Err(ValidationError::InvalidField(format!(
                "reservation lease ({}ms) must exceed the send timeout ({}ms)",
                self.reservation_lease.num_milliseconds(),
                self.send_timeout.as_millis()
            )));
        }
        Ok(())
    }

    fn lease_outlives_send(&self) -> bool {
        self.reservation_lease
            .to_std()
            .is_ok_and(|lease| lease > self.send_timeout)
    }
}

/// Service that executes mailings against a delivery transport
pub struct DispatchService<M, A, R, T>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
    T: TemplateRepository,
{
    mailings: Arc<M>,
    attempts: Arc<A>,
    recipients: Arc<R>,
    templates: Arc<T>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl<M, A, R, T> DispatchService<M, A, R, T>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
    T: TemplateRepository,
{
    pub fn new(
        mailings: Arc<M>,
        attempts: Arc<A>,
        recipients: Arc<R>,
        templates: Arc<T>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::with_config(
            mailings,
            attempts,
            recipients,
            templates,
            transport,
            DispatchConfig::default(),
        )
    }

    pub fn with_config(
        mailings: Arc<M>,
        attempts: Arc<A>,
        recipients: Arc<R>,
        templates: Arc<T>,
        transport: Arc<dyn Transport>,
        mut config: DispatchConfig,
    ) -> Self {
        if !config.lease_outlives_send() {
            let lease = Duration::from_std(config.send_timeout.saturating_mul(2))
                .unwrap_or_else(|_| Duration::days(365));
            tracing::warn!(
                configured_ms = config.reservation_lease.num_milliseconds(),
                extended_ms = lease.num_milliseconds(),
                "Reservation lease shorter than send timeout, extending it"
            );
            config.reservation_lease = lease;
        }

        Self {
            mailings,
            attempts,
            recipients,
            templates,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Send a mailing to every recipient that has no outcome yet.
    ///
    /// Returns the counts of the mailing's current execution. The returned
    /// status is `InProgress` when other workers (or an expired lease) still
    /// own some recipients; re-invoking `execute` later finishes the job.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidMailingState`] if the mailing does not exist,
    ///   has no recipients or template, or is `Created`/`Failed`. Status is
    ///   left unchanged.
    /// - [`DispatchError::WindowMissed`] if a `Scheduled` mailing's window
    ///   closed before it started. The mailing is marked `Failed`.
    /// - [`DispatchError::TransportUnavailable`] if the transport cannot be
    ///   reached. The mailing is marked `Failed` and can be rescheduled.
    pub async fn execute(&self, id: &MailingId) -> Result<ExecutionResult, Error> {
        let now = Utc::now();
        let mailing = self.mailings.find_by_id(id).await?.ok_or_else(|| {
            DispatchError::InvalidMailingState(format!("mailing {id} does not exist"))
        })?;

        match mailing.status {
            MailingStatus::Completed => {
                tracing::debug!(mailing_id = %id, "Mailing already completed");
                return self.current_result(&mailing).await;
            }
            MailingStatus::Created | MailingStatus::Failed => {
                return Err(DispatchError::InvalidMailingState(format!(
                    "mailing {id} is {}, expected scheduled or in_progress",
                    mailing.status
                ))
                .into());
            }
            MailingStatus::Scheduled | MailingStatus::InProgress => {}
        }

        if mailing.recipient_ids.is_empty() {
            return Err(DispatchError::InvalidMailingState(format!(
                "mailing {id} has no recipients"
            ))
            .into());
        }

        // Fail early on a dangling template; the claimed mailing's template is
        // loaded again below.
        self.load_template(&mailing).await?;

        if mailing.is_expired(now) {
            if self
                .mailings
                .transition(
                    id,
                    MailingStatus::Scheduled,
                    StatusChange::failed(FailureReason::WindowMissed, now),
                )
                .await?
                .is_some()
            {
                tracing::info!(mailing_id = %id, "Mailing window missed");
            }
            return Err(DispatchError::WindowMissed(id.to_string()).into());
        }

        if let Err(e) = self.transport.check().await {
            tracing::warn!(mailing_id = %id, error = %e, "Transport pre-flight check failed");
            self.fail_unavailable(&mailing).await?;
            return Err(DispatchError::TransportUnavailable(e.detail().to_string()).into());
        }

        let mailing = match mailing.status {
            MailingStatus::Scheduled => match self.mailings.claim(id, now).await? {
                Some(claimed) => {
                    tracing::info!(
                        mailing_id = %id,
                        execution = claimed.execution,
                        recipients = claimed.recipient_ids.len(),
                        "Mailing claimed"
                    );
                    claimed
                }
                None => {
                    let current = self
                        .mailings
                        .find_by_id(id)
                        .await?
                        .ok_or(StorageError::NotFound)?;
                    match current.status {
                        MailingStatus::InProgress => {
                            tracing::debug!(mailing_id = %id, "Lost claim race, joining execution");
                            current
                        }
                        MailingStatus::Completed => return self.current_result(&current).await,
                        status => {
                            return Err(DispatchError::InvalidMailingState(format!(
                                "mailing {id} became {status} while claiming"
                            ))
                            .into());
                        }
                    }
                }
            },
            _ => {
                tracing::info!(mailing_id = %id, execution = mailing.execution, "Resuming mailing");
                mailing
            }
        };

        // Template or recipients may have been edited between the first read
        // and the claim. Send what the claimed mailing says.
        let template = self.load_template(&mailing).await?;

        self.run(&mailing, &template).await
    }

    async fn load_template(&self, mailing: &Mailing) -> Result<MessageTemplate, Error> {
        let template = self.templates.find_by_id(&mailing.template_id).await?;
        template.ok_or_else(|| {
            DispatchError::InvalidMailingState(format!(
                "template {} of mailing {} does not exist",
                mailing.template_id, mailing.id
            ))
            .into()
        })
    }

    async fn run(
        &self,
        mailing: &Mailing,
        template: &MessageTemplate,
    ) -> Result<ExecutionResult, Error> {
        let id = &mailing.id;
        let done: HashSet<RecipientId> = self
            .attempts
            .find_by_execution(id, mailing.execution)
            .await?
            .into_iter()
            .map(|attempt| attempt.recipient_id)
            .collect();

        let pending = self.pending_recipients(mailing, &done).await?;
        tracing::debug!(mailing_id = %id, pending = pending.len(), "Dispatching recipients");

        let holder = generate_prefixed_id("wrk");
        let outage = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers = JoinSet::new();

        for recipient in pending {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            if outage.load(Ordering::SeqCst) {
                break;
            }
            if self.mailings.status_of(id).await? != Some(MailingStatus::InProgress) {
                tracing::info!(mailing_id = %id, "Mailing no longer in progress, stopping sends");
                break;
            }

            let job = SendJob {
                attempts: Arc::clone(&self.attempts),
                transport: Arc::clone(&self.transport),
                outage: Arc::clone(&outage),
                mailing_id: id.clone(),
                execution: mailing.execution,
                holder: holder.clone(),
                lease: self.config.reservation_lease,
                send_timeout: self.config.send_timeout,
                email: recipient.map(|r| Email {
                    from: self.config.from_address.clone(),
                    to: r.email,
                    subject: template.subject.clone(),
                    body: template.body.clone(),
                }),
            };
            workers.spawn(async move {
                let _permit = permit;
                job.run().await
            });
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(mailing_id = %id, error = %e, "Recording attempt failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(mailing_id = %id, error = %e, "Send worker panicked");
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        self.finish(mailing, outage.load(Ordering::SeqCst)).await
    }

    /// Recipients of the mailing still lacking an attempt, as send targets.
    ///
    /// A recipient that no longer exists becomes a `Missing` target so it still
    /// receives an outcome.
    async fn pending_recipients(
        &self,
        mailing: &Mailing,
        done: &HashSet<RecipientId>,
    ) -> Result<Vec<Target<Recipient>>, Error> {
        let wanted: Vec<RecipientId> = mailing
            .recipient_ids
            .iter()
            .filter(|id| !done.contains(*id))
            .cloned()
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut found = self.recipients.find_by_ids(&wanted).await?;
        found.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(wanted
            .into_iter()
            .map(|id| match found.binary_search_by(|r| r.id.cmp(&id)) {
                Ok(index) => Target::Found(found[index].clone()),
                Err(_) => Target::Missing(id),
            })
            .collect())
    }

    /// Decide the mailing's status after the worker pool drained.
    async fn finish(&self, mailing: &Mailing, outage: bool) -> Result<ExecutionResult, Error> {
        let id = &mailing.id;
        let attempts = self
            .attempts
            .find_by_execution(id, mailing.execution)
            .await?;
        let now = Utc::now();

        let all_unavailable =
            !attempts.is_empty() && attempts.iter().all(Attempt::is_unavailable_failure);
        if outage || all_unavailable {
            self.fail_unavailable(mailing).await?;
            return Err(DispatchError::TransportUnavailable(format!(
                "transport went down while sending mailing {id}"
            ))
            .into());
        }

        let reached: HashSet<&RecipientId> = attempts.iter().map(|a| &a.recipient_id).collect();
        if mailing.recipient_ids.iter().all(|r| reached.contains(r)) {
            let finished_at = attempts.iter().map(|a| a.created_at).max().unwrap_or(now);
            if let Some(completed) = self
                .mailings
                .transition(
                    id,
                    MailingStatus::InProgress,
                    StatusChange::completed(finished_at),
                )
                .await?
            {
                let result = ExecutionResult::from_attempts(&completed, &attempts);
                tracing::info!(
                    mailing_id = %id,
                    execution = result.execution,
                    succeeded = result.succeeded,
                    failed = result.failed,
                    "Mailing completed"
                );
                return Ok(result);
            }
        }

        let current = self
            .mailings
            .find_by_id(id)
            .await?
            .ok_or(StorageError::NotFound)?;
        Ok(ExecutionResult::from_attempts(&current, &attempts))
    }

    async fn fail_unavailable(&self, mailing: &Mailing) -> Result<(), Error> {
        let change = StatusChange::failed(FailureReason::TransportUnavailable, Utc::now());
        let from = match mailing.status {
            MailingStatus::Scheduled => MailingStatus::Scheduled,
            _ => MailingStatus::InProgress,
        };

        match self.mailings.transition(&mailing.id, from, change).await? {
            Some(_) => tracing::info!(mailing_id = %mailing.id, "Mailing failed: transport unavailable"),
            None => tracing::warn!(mailing_id = %mailing.id, "Mailing changed status before it could be failed"),
        }
        Ok(())
    }

    /// Counts for the latest execution of `mailing`.
    pub async fn current_result(&self, mailing: &Mailing) -> Result<ExecutionResult, Error> {
        let attempts = self
            .attempts
            .find_by_execution(&mailing.id, mailing.execution)
            .await?;
        Ok(ExecutionResult::from_attempts(mailing, &attempts))
    }
}

enum Target<T> {
    Found(T),
    Missing(RecipientId),
}

impl Target<Recipient> {
    fn map<F: FnOnce(Recipient) -> Email>(self, f: F) -> Target<(RecipientId, Email)> {
        match self {
            Target::Found(recipient) => {
                let id = recipient.id.clone();
                Target::Found((id, f(recipient)))
            }
            Target::Missing(id) => Target::Missing(id),
        }
    }
}

/// One recipient's send, run on the worker pool.
struct SendJob<A: AttemptRepository> {
    attempts: Arc<A>,
    transport: Arc<dyn Transport>,
    outage: Arc<AtomicBool>,
    mailing_id: MailingId,
    execution: u32,
    holder: String,
    lease: Duration,
    send_timeout: StdDuration,
    email: Target<(RecipientId, Email)>,
}

impl<A: AttemptRepository> SendJob<A> {
    async fn run(self) -> Result<(), Error> {
        let recipient_id = match &self.email {
            Target::Found((id, _)) => id.clone(),
            Target::Missing(id) => id.clone(),
        };

        if self.outage.load(Ordering::SeqCst) {
            return Ok(());
        }

        let now = Utc::now();
        let reservation = Reservation {
            mailing_id: self.mailing_id.clone(),
            recipient_id: recipient_id.clone(),
            execution: self.execution,
            holder: self.holder.clone(),
            reserved_at: now,
            lease_until: now + self.lease,
        };
        if !self.attempts.reserve(&reservation).await? {
            tracing::debug!(
                mailing_id = %self.mailing_id,
                recipient_id = %recipient_id,
                "Recipient reserved by another worker"
            );
            return Ok(());
        }

        let attempt = match &self.email {
            Target::Missing(_) => NewAttempt::failure(
                self.mailing_id.clone(),
                recipient_id.clone(),
                String::new(),
                self.execution,
                FailureKind::AddressRejected,
                "recipient no longer exists".to_string(),
            ),
            Target::Found((_, email)) => {
                tracing::debug!(mailing_id = %self.mailing_id, to = %email.to, "Sending");
                match self.send(email).await {
                    Ok(response) => NewAttempt::success(
                        self.mailing_id.clone(),
                        recipient_id.clone(),
                        email.to.clone(),
                        self.execution,
                        response,
                    ),
                    Err(error) => {
                        tracing::warn!(
                            mailing_id = %self.mailing_id,
                            to = %email.to,
                            kind = %error.kind(),
                            error = %error,
                            "Delivery failed"
                        );
                        if error.is_unavailable() && self.transport.check().await.is_err() {
                            self.outage.store(true, Ordering::SeqCst);
                        }
                        NewAttempt::failure(
                            self.mailing_id.clone(),
                            recipient_id.clone(),
                            email.to.clone(),
                            self.execution,
                            error.kind(),
                            error.to_string(),
                        )
                    }
                }
            }
        };

        if self.attempts.record(attempt).await?.is_none() {
            tracing::warn!(
                mailing_id = %self.mailing_id,
                recipient_id = %recipient_id,
                "Attempt already recorded by another worker"
            );
        }
        Ok(())
    }

    async fn send(&self, email: &Email) -> Result<String, TransportError> {
        match tokio::time::timeout(self.send_timeout, self.transport.send(email)).await {
            Ok(Ok(receipt)) => Ok(receipt.response),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(TransportError::Transient(format!(
                "send timed out after {}s",
                self.send_timeout.as_secs_f64()
            ))),
        }
    }
}
