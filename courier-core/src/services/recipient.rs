use crate::{
    Error, NewRecipient, OwnerId, Recipient, RecipientId,
    error::StorageError,
    repositories::RecipientRepository,
    validation::{validate_display_name, validate_email},
};
use std::sync::Arc;

/// Fields an owner may change on a recipient. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct RecipientUpdate {
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// `Some(None)` clears the note.
    pub note: Option<Option<String>>,
}

/// Service for the recipient directory
pub struct RecipientService<R: RecipientRepository> {
    repository: Arc<R>,
}

impl<R: RecipientRepository> RecipientService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Add a recipient to an owner's directory
    pub async fn create_recipient(&self, recipient: NewRecipient) -> Result<Recipient, Error> {
        validate_email(&recipient.email)?;
        validate_display_name(&recipient.display_name)?;

        let created = self.repository.create(recipient).await?;
        tracing::debug!(recipient_id = %created.id, owner_id = %created.owner_id, "Recipient created");
        Ok(created)
    }

    pub async fn get_recipient(&self, id: &RecipientId) -> Result<Option<Recipient>, Error> {
        self.repository.find_by_id(id).await
    }

    /// All recipients of an owner, ordered by email
    pub async fn list_recipients(&self, owner_id: &OwnerId) -> Result<Vec<Recipient>, Error> {
        self.repository.find_by_owner(owner_id).await
    }

    pub async fn update_recipient(
        &self,
        id: &RecipientId,
        update: RecipientUpdate,
    ) -> Result<Recipient, Error> {
        let mut recipient = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(StorageError::NotFound)?;

        if let Some(email) = update.email {
            validate_email(&email)?;
            recipient.email = email;
        }
        if let Some(display_name) = update.display_name {
            validate_display_name(&display_name)?;
            recipient.display_name = display_name;
        }
        if let Some(note) = update.note {
            recipient.note = note.filter(|note| !note.trim().is_empty());
        }

        self.repository.update(&recipient).await
    }

    pub async fn delete_recipient(&self, id: &RecipientId) -> Result<(), Error> {
        self.repository.delete(id).await
    }

    pub async fn count_recipients(&self, owner_id: &OwnerId) -> Result<u64, Error> {
        self.repository.count_by_owner(owner_id).await
    }
}
