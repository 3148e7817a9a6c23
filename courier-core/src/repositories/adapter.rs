use crate::{
    Attempt, Error, Mailing, MailingId, MailingStatus, MessageTemplate, NewAttempt, NewMailing,
    NewRecipient, NewTemplate, OwnerId, Recipient, RecipientId, Reservation, TemplateId,
    repositories::{
        AttemptRepository, MailingRepository, RecipientRepository, RepositoryProvider,
        StatusChange, TemplateRepository,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Adapter that wraps a RepositoryProvider and implements RecipientRepository
pub struct RecipientRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> RecipientRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> RecipientRepository for RecipientRepositoryAdapter<R> {
    async fn create(&self, recipient: NewRecipient) -> Result<Recipient, Error> {
        self.provider.recipient().create(recipient).await
    }

    async fn find_by_id(&self, id: &RecipientId) -> Result<Option<Recipient>, Error> {
        self.provider.recipient().find_by_id(id).await
    }

    async fn find_by_ids(&self, ids: &[RecipientId]) -> Result<Vec<Recipient>, Error> {
        self.provider.recipient().find_by_ids(ids).await
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Recipient>, Error> {
        self.provider.recipient().find_by_owner(owner_id).await
    }

    async fn update(&self, recipient: &Recipient) -> Result<Recipient, Error> {
        self.provider.recipient().update(recipient).await
    }

    async fn delete(&self, id: &RecipientId) -> Result<(), Error> {
        self.provider.recipient().delete(id).await
    }

    async fn count_by_owner(&self, owner_id: &OwnerId) -> Result<u64, Error> {
        self.provider.recipient().count_by_owner(owner_id).await
    }
}

pub struct TemplateRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> TemplateRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> TemplateRepository for TemplateRepositoryAdapter<R> {
    async fn create(&self, template: NewTemplate) -> Result<MessageTemplate, Error> {
        self.provider.template().create(template).await
    }

    async fn find_by_id(&self, id: &TemplateId) -> Result<Option<MessageTemplate>, Error> {
        self.provider.template().find_by_id(id).await
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<MessageTemplate>, Error> {
        self.provider.template().find_by_owner(owner_id).await
    }

    async fn update(&self, template: &MessageTemplate) -> Result<MessageTemplate, Error> {
        self.provider.template().update(template).await
    }

    async fn delete(&self, id: &TemplateId) -> Result<(), Error> {
        self.provider.template().delete(id).await
    }
}

pub struct MailingRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> MailingRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> MailingRepository for MailingRepositoryAdapter<R> {
    async fn create(&self, mailing: NewMailing) -> Result<Mailing, Error> {
        self.provider.mailing().create(mailing).await
    }

    async fn find_by_id(&self, id: &MailingId) -> Result<Option<Mailing>, Error> {
        self.provider.mailing().find_by_id(id).await
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Mailing>, Error> {
        self.provider.mailing().find_by_owner(owner_id).await
    }

    async fn find_by_status(&self, status: MailingStatus) -> Result<Vec<MailingId>, Error> {
        self.provider.mailing().find_by_status(status).await
    }

    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        self.provider.mailing().find_due(now).await
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error> {
        self.provider.mailing().find_expired(now).await
    }

    async fn status_of(&self, id: &MailingId) -> Result<Option<MailingStatus>, Error> {
        self.provider.mailing().status_of(id).await
    }

    async fn update_definition(&self, mailing: &Mailing) -> Result<Option<Mailing>, Error> {
        self.provider.mailing().update_definition(mailing).await
    }

    async fn claim(&self, id: &MailingId, now: DateTime<Utc>) -> Result<Option<Mailing>, Error> {
        self.provider.mailing().claim(id, now).await
    }

    async fn transition(
        &self,
        id: &MailingId,
        from: MailingStatus,
        change: StatusChange,
    ) -> Result<Option<Mailing>, Error> {
        self.provider.mailing().transition(id, from, change).await
    }

    async fn delete(&self, id: &MailingId) -> Result<bool, Error> {
        self.provider.mailing().delete(id).await
    }
}

pub struct AttemptRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AttemptRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AttemptRepository for AttemptRepositoryAdapter<R> {
    async fn reserve(&self, reservation: &Reservation) -> Result<bool, Error> {
        self.provider.attempt().reserve(reservation).await
    }

    async fn record(&self, attempt: NewAttempt) -> Result<Option<Attempt>, Error> {
        self.provider.attempt().record(attempt).await
    }

    async fn find_by_execution(
        &self,
        mailing_id: &MailingId,
        execution: u32,
    ) -> Result<Vec<Attempt>, Error> {
        self.provider
            .attempt()
            .find_by_execution(mailing_id, execution)
            .await
    }

    async fn find_by_mailing(&self, mailing_id: &MailingId) -> Result<Vec<Attempt>, Error> {
        self.provider.attempt().find_by_mailing(mailing_id).await
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Attempt>, Error> {
        self.provider.attempt().find_by_owner(owner_id).await
    }
}
