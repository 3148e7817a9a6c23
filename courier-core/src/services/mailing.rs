use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    Error, ExecutionResult, FailureReason, FinalStatus, Mailing, MailingId, MailingStatus,
    MailingUpdate, NewMailing, OwnerId, RecipientId, TemplateId,
    error::{StorageError, ValidationError},
    repositories::{
        AttemptRepository, MailingRepository, RecipientRepository, StatusChange,
        TemplateRepository,
    },
    validation::validate_window,
};

/// A mailing together with the counts of its latest execution.
#[derive(Debug, Clone)]
pub struct MailingOverview {
    pub mailing: Mailing,
    pub latest: ExecutionResult,
}

/// Service for the mailing lifecycle outside of dispatch itself
pub struct MailingService<M, A, R, T>
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
}

impl<M, A, R, T> MailingService<M, A, R, T>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
    T: TemplateRepository,
{
    pub fn new(mailings: Arc<M>, attempts: Arc<A>, recipients: Arc<R>, templates: Arc<T>) -> Self {
        Self {
            mailings,
            attempts,
            recipients,
            templates,
        }
    }

    /// Create a mailing in `Created` status
    ///
    /// The template and every recipient must exist and belong to the
    /// mailing's owner.
    pub async fn create_mailing(&self, mailing: NewMailing) -> Result<Mailing, Error> {
        validate_window(mailing.scheduled_start, mailing.scheduled_end)?;
        self.check_ownership(&mailing.owner_id, &mailing.template_id, &mailing.recipient_ids)
            .await?;

        let created = self.mailings.create(mailing).await?;
        tracing::info!(
            mailing_id = %created.id,
            owner_id = %created.owner_id,
            recipients = created.recipient_ids.len(),
            "Mailing created"
        );
        Ok(created)
    }

    pub async fn get_mailing(&self, id: &MailingId) -> Result<Option<Mailing>, Error> {
        self.mailings.find_by_id(id).await
    }

    pub async fn list_mailings(&self, owner_id: &OwnerId) -> Result<Vec<Mailing>, Error> {
        self.mailings.find_by_owner(owner_id).await
    }

    /// Accept a `Created` mailing for dispatch (`Created -> Scheduled`).
    pub async fn schedule(&self, id: &MailingId) -> Result<Mailing, Error> {
        let mailing = self.require(id).await?;
        if mailing.scheduled_end < Utc::now() {
            return Err(ValidationError::InvalidSchedule(format!(
                "window of mailing {id} already closed at {}",
                mailing.scheduled_end
            ))
            .into());
        }

        self.move_status(&mailing, MailingStatus::Scheduled, StatusChange::to(MailingStatus::Scheduled))
            .await
    }

    /// Give a `Failed` mailing a fresh window and schedule it again.
    ///
    /// The next claim starts a new execution; attempts of earlier executions
    /// stay in the history.
    pub async fn reschedule(
        &self,
        id: &MailingId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Mailing, Error> {
        validate_window(start, end)?;
        if end < Utc::now() {
            return Err(ValidationError::InvalidSchedule(
                "new window must end in the future".to_string(),
            )
            .into());
        }

        let mut mailing = self.require(id).await?;
        if mailing.status != MailingStatus::Failed {
            return Err(invalid_transition(&mailing, MailingStatus::Scheduled));
        }

        mailing.scheduled_start = start;
        mailing.scheduled_end = end;
        let mailing = self
            .mailings
            .update_definition(&mailing)
            .await?
            .ok_or_else(|| invalid_transition(&mailing, MailingStatus::Scheduled))?;

        let rescheduled = self
            .move_status(&mailing, MailingStatus::Scheduled, StatusChange::to(MailingStatus::Scheduled))
            .await?;
        tracing::info!(mailing_id = %id, start = %start, end = %end, "Mailing rescheduled");
        Ok(rescheduled)
    }

    /// Change template, recipients or window.
    ///
    /// Only allowed while the mailing is `Created`, `Scheduled` or `Failed`;
    /// a mailing that is sending or has been sent keeps its definition.
    pub async fn update_mailing(
        &self,
        id: &MailingId,
        update: MailingUpdate,
    ) -> Result<Mailing, Error> {
        let mut mailing = self.require(id).await?;
        if !mailing.status.is_editable() {
            return Err(ValidationError::InvalidTransition(format!(
                "mailing {id} cannot be edited while {}",
                mailing.status
            ))
            .into());
        }

        update.apply_to(&mut mailing)?;
        self.check_ownership(&mailing.owner_id, &mailing.template_id, &mailing.recipient_ids)
            .await?;

        self.mailings
            .update_definition(&mailing)
            .await?
            .ok_or_else(|| {
                ValidationError::InvalidTransition(format!(
                    "mailing {id} started sending while being edited"
                ))
                .into()
            })
    }

    /// Administrative override: end a mailing now, even mid-execution.
    ///
    /// Workers of a running execution notice between sends and stop. A forced
    /// `Failed` carries [`FailureReason::Cancelled`].
    pub async fn force_finish(&self, id: &MailingId, target: FinalStatus) -> Result<Mailing, Error> {
        let target_status = MailingStatus::from(target);

        loop {
            let mailing = self.require(id).await?;
            if !mailing.status.can_transition_to(target_status) || mailing.status.is_terminal() {
                return Err(invalid_transition(&mailing, target_status));
            }

            let now = Utc::now();
            let change = match target {
                FinalStatus::Completed => StatusChange::completed(now),
                FinalStatus::Failed => StatusChange::failed(FailureReason::Cancelled, now),
            };

            if let Some(finished) = self.mailings.transition(id, mailing.status, change).await? {
                tracing::info!(
                    mailing_id = %id,
                    from = %mailing.status,
                    to = %target_status,
                    "Mailing force-finished"
                );
                return Ok(finished);
            }
            // Status moved underneath us; look again.
        }
    }

    /// The mailing and the counts of its latest execution.
    pub async fn status(&self, id: &MailingId) -> Result<MailingOverview, Error> {
        let mailing = self.require(id).await?;
        let attempts = self
            .attempts
            .find_by_execution(id, mailing.execution)
            .await?;
        let latest = ExecutionResult::from_attempts(&mailing, &attempts);
        Ok(MailingOverview { mailing, latest })
    }

    /// Delete a mailing and its attempt history. Refused while `InProgress`.
    pub async fn delete_mailing(&self, id: &MailingId) -> Result<(), Error> {
        let mailing = self.require(id).await?;
        if mailing.status == MailingStatus::InProgress || !self.mailings.delete(id).await? {
            return Err(ValidationError::InvalidTransition(format!(
                "mailing {id} cannot be deleted while in progress"
            ))
            .into());
        }

        tracing::info!(mailing_id = %id, "Mailing deleted");
        Ok(())
    }

    async fn require(&self, id: &MailingId) -> Result<Mailing, Error> {
        self.mailings
            .find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::NotFound.into())
    }

    async fn move_status(
        &self,
        mailing: &Mailing,
        to: MailingStatus,
        change: StatusChange,
    ) -> Result<Mailing, Error> {
        if !mailing.status.can_transition_to(to) {
            return Err(invalid_transition(mailing, to));
        }

        self.mailings
            .transition(&mailing.id, mailing.status, change)
            .await?
            .ok_or_else(|| invalid_transition(mailing, to))
    }

    async fn check_ownership(
        &self,
        owner_id: &OwnerId,
        template_id: &TemplateId,
        recipient_ids: &[RecipientId],
    ) -> Result<(), Error> {
        let template = self
            .templates
            .find_by_id(template_id)
            .await?
            .ok_or_else(|| {
                ValidationError::InvalidField(format!("template {template_id} does not exist"))
            })?;
        if &template.owner_id != owner_id {
            return Err(ValidationError::InvalidField(format!(
                "template {template_id} belongs to another owner"
            ))
            .into());
        }

        let recipients = self.recipients.find_by_ids(recipient_ids).await?;
        if recipients.len() != recipient_ids.len() {
            return Err(ValidationError::InvalidField(
                "mailing references unknown recipients".to_string(),
            )
            .into());
        }
        if let Some(foreign) = recipients.iter().find(|r| &r.owner_id != owner_id) {
            return Err(ValidationError::InvalidField(format!(
                "recipient {} belongs to another owner",
                foreign.id
            ))
            .into());
        }

        Ok(())
    }
}

fn invalid_transition(mailing: &Mailing, to: MailingStatus) -> Error {
    ValidationError::InvalidTransition(format!(
        "mailing {} cannot move from {} to {to}",
        mailing.id, mailing.status
    ))
    .into()
}
