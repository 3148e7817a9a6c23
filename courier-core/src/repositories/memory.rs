//! In-memory repositories for service tests.
//!
//! A single mutex-guarded state mirrors the constraints the SQL backends
//! enforce: unique recipient email, restricted deletes of referenced rows,
//! compare-and-set status writes and unique attempts per execution.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Attempt, Error, Mailing, MailingId, MailingStatus, MessageTemplate, NewAttempt, NewMailing,
    NewRecipient, NewTemplate, OwnerId, Recipient, RecipientId, Reservation, TemplateId,
    error::StorageError,
    repositories::{
        AttemptRepository, AttemptRepositoryProvider, MailingRepository,
        MailingRepositoryProvider, RecipientRepository, RecipientRepositoryProvider,
        RepositoryProvider, StatusChange, TemplateRepository, TemplateRepositoryProvider,
    },
};

type ReservationKey = (MailingId, RecipientId, u32);

#[derive(Default)]
struct State {
    recipients: BTreeMap<RecipientId, Recipient>,
    templates: BTreeMap<TemplateId, MessageTemplate>,
    mailings: BTreeMap<MailingId, Mailing>,
    attempts: Vec<Attempt>,
    reservations: HashMap<ReservationKey, Reservation>,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Overwrite a stored mailing as-is, bypassing every guard.
    pub(crate) fn put_mailing(&self, mailing: Mailing) {
        self.state().mailings.insert(mailing.id.clone(), mailing);
    }
}

#[async_trait]
impl RecipientRepository for MemoryStore {
    async fn create(&self, recipient: NewRecipient) -> Result<Recipient, Error> {
        let mut state = self.state();
        if state.recipients.values().any(|r| r.email == recipient.email) {
            return Err(StorageError::Constraint(format!(
                "recipient email already exists: {}",
                recipient.email
            ))
            .into());
        }

        let now = Utc::now();
        let created = Recipient {
            id: recipient.id,
            email: recipient.email,
            display_name: recipient.display_name,
            owner_id: recipient.owner_id,
            note: recipient.note,
            created_at: now,
            updated_at: now,
        };
        state.recipients.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: &RecipientId) -> Result<Option<Recipient>, Error> {
        Ok(self.state().recipients.get(id).cloned())
    }

    async fn find_by_ids(&self, ids: &[RecipientId]) -> Result<Vec<Recipient>, Error> {
        let state = self.state();
        Ok(ids
            .iter()
            .filter_map(|id| state.recipients.get(id).cloned())
            .collect())
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Recipient>, Error> {
        let mut recipients: Vec<_> = self
            .state()
            .recipients
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .cloned()
            .collect();
        recipients.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(recipients)
    }

    async fn update(&self, recipient: &Recipient) -> Result<Recipient, Error> {
        let mut state = self.state();
        if state
            .recipients
            .values()
            .any(|r| r.email == recipient.email && r.id != recipient.id)
        {
            return Err(StorageError::Constraint(format!(
                "recipient email already exists: {}",
                recipient.email
            ))
            .into());
        }

        let stored = state
            .recipients
            .get_mut(&recipient.id)
            .ok_or(StorageError::NotFound)?;
        stored.email = recipient.email.clone();
        stored.display_name = recipient.display_name.clone();
        stored.note = recipient.note.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete(&self, id: &RecipientId) -> Result<(), Error> {
        let mut state = self.state();
        if state
            .mailings
            .values()
            .any(|m| m.recipient_ids.contains(id))
        {
            return Err(
                StorageError::Constraint(format!("recipient {id} is used by a mailing")).into(),
            );
        }
        state.recipients.remove(id);
        Ok(())
    }

    async fn count_by_owner(&self, owner_id: &OwnerId) -> Result<u64, Error> {
        Ok(self
            .state()
            .recipients
            .values()
            .filter(|r| &r.owner_id == owner_id)
            .count() as u64)
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn create(&self, template: NewTemplate) -> Result<MessageTemplate, Error> {
        let now = Utc::now();
        let created = MessageTemplate {
            id: template.id,
            subject: template.subject,
            body: template.body,
            owner_id: template.owner_id,
            created_at: now,
            updated_at: now,
        };
        self.state()
            .templates
            .insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: &TemplateId) -> Result<Option<MessageTemplate>, Error> {
        Ok(self.state().templates.get(id).cloned())
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<MessageTemplate>, Error> {
        let mut templates: Vec<_> = self
            .state()
            .templates
            .values()
            .filter(|t| &t.owner_id == owner_id)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.subject.cmp(&b.subject));
        Ok(templates)
    }

    async fn update(&self, template: &MessageTemplate) -> Result<MessageTemplate, Error> {
        let mut state = self.state();
        let stored = state
            .templates
            .get_mut(&template.id)
            .ok_or(StorageError::NotFound)?;
        stored.subject = template.subject.clone();
        stored.body = template.body.clone();
        stored.updated_at = Utc::now();
        Ok(stored.clone())
    }

    async fn delete(&self, id: &TemplateId) -> Result<(), Error> {
        let mut state = self.state();
        if state.mailings.values().any(|m| &m.template_id == id) {
            return Err(
                StorageError::Constraint(format!("template {id} is used by a mailing")).into(),
            );
        }
        state.templates.remove(id);
        Ok(())
    }
}

#[async_trait]
impl MailingRepository for MemoryStore {
    async fn create(&self, mailing: NewMailing) -> Result<Mailing, Error> {
        let mut state = self.state();
        if !state.templates.contains_key(&mailing.template_id) {
            return Err(StorageError::Constraint("unknown template".to_string()).into());
        }
        if mailing
            .recipient_ids
            .iter()
            .any(|id| !state.recipients.contains_key(id))
        {
            return Err(StorageError::Constraint("unknown recipient".to_string()).into());
        }

        let now = Utc::now();
        let created = Mailing {
            id: mailing.id,
            template_id: mailing.template_id,
            recipient_ids: mailing.recipient_ids,
            owner_id: mailing.owner_id,
            scheduled_start: mailing.scheduled_start,
            scheduled_end: mailing.scheduled_end,
            status: MailingStatus::Created,
            failure_reason: None,
            execution: 0,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        state.mailings.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: &MailingId) -> Result<Option<Mailing>, Error> {
        Ok(self.state().mailings.get(id).cloned())
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Mailing>, Error> {
        Ok(self
            .state()
            .mailings
            .values()
            .filter(|m| &m.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn find_by_status(&self, status: MailingStatus) -> Result<Vec<MailingId>, Error> {
        let mut found: Vec<_> = self
            .state()
            .mailings
            .values()
            .filter(|m| m.status == status)
            .map(|m| (m.scheduled_start, m.id.clone()))
            .collect();
        found.sort();
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        let mut due: Vec<_> = self
            .state()
            .mailings
            .values()
            .filter(|m| m.is_due(now))
            .map(|m| (m.scheduled_start, m.id.clone()))
            .collect();
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        Ok(self
            .state()
            .mailings
            .values()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id.clone())
            .collect())
    }

    async fn status_of(&self, id: &MailingId) -> Result<Option<MailingStatus>, Error> {
        Ok(self.state().mailings.get(id).map(|m| m.status))
    }

    async fn update_definition(&self, mailing: &Mailing) -> Result<Option<Mailing>, Error> {
        let mut state = self.state();
        let Some(stored) = state.mailings.get_mut(&mailing.id) else {
            return Ok(None);
        };
        if !stored.status.is_editable() {
            return Ok(None);
        }

        stored.template_id = mailing.template_id.clone();
        stored.recipient_ids = mailing.recipient_ids.clone();
        stored.scheduled_start = mailing.scheduled_start;
        stored.scheduled_end = mailing.scheduled_end;
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn claim(&self, id: &MailingId, now: DateTime<Utc>) -> Result<Option<Mailing>, Error> {
        let mut state = self.state();
        match state.mailings.get_mut(id) {
            Some(stored) if stored.status == MailingStatus::Scheduled => {
                stored.status = MailingStatus::InProgress;
                stored.execution += 1;
                stored.started_at = Some(now);
                stored.finished_at = None;
                stored.failure_reason = None;
                stored.updated_at = now;
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn transition(
        &self,
        id: &MailingId,
        from: MailingStatus,
        change: StatusChange,
    ) -> Result<Option<Mailing>, Error> {
        let mut state = self.state();
        match state.mailings.get_mut(id) {
            Some(stored) if stored.status == from => {
                stored.status = change.status;
                stored.failure_reason = change.failure_reason;
                if change.finished_at.is_some() {
                    stored.finished_at = change.finished_at;
                }
                stored.updated_at = Utc::now();
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: &MailingId) -> Result<bool, Error> {
        let mut state = self.state();
        let deletable = state
            .mailings
            .get(id)
            .is_some_and(|m| m.status != MailingStatus::InProgress);
        if !deletable {
            return Ok(false);
        }

        state.mailings.remove(id);
        state.attempts.retain(|a| &a.mailing_id != id);
        state.reservations.retain(|(m, _, _), _| m != id);
        Ok(true)
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn reserve(&self, reservation: &Reservation) -> Result<bool, Error> {
        let mut state = self.state();
        let key = (
            reservation.mailing_id.clone(),
            reservation.recipient_id.clone(),
            reservation.execution,
        );

        let attempted = state.attempts.iter().any(|a| {
            a.mailing_id == key.0 && a.recipient_id == key.1 && a.execution == key.2
        });
        if attempted {
            return Ok(false);
        }

        let available = match state.reservations.get(&key) {
            None => true,
            Some(existing) => {
                existing.holder == reservation.holder
                    || existing.lease_until < reservation.reserved_at
            }
        };
        if available {
            state.reservations.insert(key, reservation.clone());
        }
        Ok(available)
    }

    async fn record(&self, attempt: NewAttempt) -> Result<Option<Attempt>, Error> {
        let mut state = self.state();
        let duplicate = state.attempts.iter().any(|a| {
            a.mailing_id == attempt.mailing_id
                && a.recipient_id == attempt.recipient_id
                && a.execution == attempt.execution
        });
        if duplicate {
            return Ok(None);
        }

        let recorded = Attempt {
            id: attempt.id,
            mailing_id: attempt.mailing_id,
            recipient_id: attempt.recipient_id,
            recipient_email: attempt.recipient_email,
            execution: attempt.execution,
            outcome: attempt.outcome,
            failure_kind: attempt.failure_kind,
            detail: attempt.detail,
            created_at: attempt.created_at,
        };
        state.attempts.push(recorded.clone());
        Ok(Some(recorded))
    }

    async fn find_by_execution(
        &self,
        mailing_id: &MailingId,
        execution: u32,
    ) -> Result<Vec<Attempt>, Error> {
        Ok(self
            .state()
            .attempts
            .iter()
            .filter(|a| &a.mailing_id == mailing_id && a.execution == execution)
            .cloned()
            .collect())
    }

    async fn find_by_mailing(&self, mailing_id: &MailingId) -> Result<Vec<Attempt>, Error> {
        Ok(self
            .state()
            .attempts
            .iter()
            .filter(|a| &a.mailing_id == mailing_id)
            .cloned()
            .collect())
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Attempt>, Error> {
        let state = self.state();
        Ok(state
            .attempts
            .iter()
            .filter(|a| {
                state
                    .mailings
                    .get(&a.mailing_id)
                    .is_some_and(|m| &m.owner_id == owner_id)
            })
            .cloned()
            .collect())
    }
}

impl RecipientRepositoryProvider for MemoryStore {
    type RecipientRepo = Self;

    fn recipient(&self) -> &Self::RecipientRepo {
        self
    }
}

impl TemplateRepositoryProvider for MemoryStore {
    type TemplateRepo = Self;

    fn template(&self) -> &Self::TemplateRepo {
        self
    }
}

impl MailingRepositoryProvider for MemoryStore {
    type MailingRepo = Self;

    fn mailing(&self) -> &Self::MailingRepo {
        self
    }
}

impl AttemptRepositoryProvider for MemoryStore {
    type AttemptRepo = Self;

    fn attempt(&self) -> &Self::AttemptRepo {
        self
    }
}

#[async_trait]
impl RepositoryProvider for MemoryStore {
    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
