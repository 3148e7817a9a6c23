use crate::{Error, MessageTemplate, NewTemplate, OwnerId, TemplateId};
use async_trait::async_trait;

/// Repository for message template data access
#[async_trait]
pub trait TemplateRepository: Send + Sync + 'static {
    async fn create(&self, template: NewTemplate) -> Result<MessageTemplate, Error>;

    async fn find_by_id(&self, id: &TemplateId) -> Result<Option<MessageTemplate>, Error>;

    /// All templates of an owner, ordered by subject
    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<MessageTemplate>, Error>;

    async fn update(&self, template: &MessageTemplate) -> Result<MessageTemplate, Error>;

    /// Delete a template. Fails with a constraint error while a mailing references it.
    async fn delete(&self, id: &TemplateId) -> Result<(), Error>;
}
