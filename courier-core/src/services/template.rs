use crate::{
    Error, MessageTemplate, NewTemplate, OwnerId, TemplateId,
    error::StorageError,
    repositories::TemplateRepository,
    validation::{validate_body, validate_subject},
};
use std::sync::Arc;

/// Service for the template store
pub struct TemplateService<R: TemplateRepository> {
    repository: Arc<R>,
}

impl<R: TemplateRepository> TemplateService<R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub async fn create_template(&self, template: NewTemplate) -> Result<MessageTemplate, Error> {
        validate_subject(&template.subject)?;
        validate_body(&template.body)?;

        self.repository.create(template).await
    }

    pub async fn get_template(&self, id: &TemplateId) -> Result<Option<MessageTemplate>, Error> {
        self.repository.find_by_id(id).await
    }

    /// All templates of an owner, ordered by subject
    pub async fn list_templates(&self, owner_id: &OwnerId) -> Result<Vec<MessageTemplate>, Error> {
        self.repository.find_by_owner(owner_id).await
    }

    /// Replace subject and body. Mailings already sent keep their attempt history.
    pub async fn update_template(
        &self,
        id: &TemplateId,
        subject: Option<String>,
        body: Option<String>,
    ) -> Result<MessageTemplate, Error> {
        let mut template = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(StorageError::NotFound)?;

        if let Some(subject) = subject {
            validate_subject(&subject)?;
            template.subject = subject;
        }
        if let Some(body) = body {
            validate_body(&body)?;
            template.body = body;
        }

        self.repository.update(&template).await
    }

    pub async fn delete_template(&self, id: &TemplateId) -> Result<(), Error> {
        self.repository.delete(id).await
    }
}
