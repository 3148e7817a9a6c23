use crate::{Error, NewRecipient, OwnerId, Recipient, RecipientId};
use async_trait::async_trait;

/// Repository for recipient data access
#[async_trait]
pub trait RecipientRepository: Send + Sync + 'static {
    /// Create a new recipient. Fails with a constraint error if the email is taken.
    async fn create(&self, recipient: NewRecipient) -> Result<Recipient, Error>;

    /// Find a recipient by ID
    async fn find_by_id(&self, id: &RecipientId) -> Result<Option<Recipient>, Error>;

    /// Find several recipients at once; unknown IDs are skipped
    async fn find_by_ids(&self, ids: &[RecipientId]) -> Result<Vec<Recipient>, Error>;

    /// All recipients of an owner, ordered by email
    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Recipient>, Error>;

    /// Update email, display name and note of an existing recipient
    async fn update(&self, recipient: &Recipient) -> Result<Recipient, Error>;

    /// Delete a recipient. Fails with a constraint error while a mailing references it.
    async fn delete(&self, id: &RecipientId) -> Result<(), Error>;

    async fn count_by_owner(&self, owner_id: &OwnerId) -> Result<u64, Error>;
}
