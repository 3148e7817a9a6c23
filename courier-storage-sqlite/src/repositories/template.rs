use async_trait::async_trait;
use chrono::Utc;
use courier_core::{
    Error, MessageTemplate, NewTemplate, OwnerId, TemplateId, error::StorageError,
    repositories::TemplateRepository,
};
use sqlx::SqlitePool;

use super::{from_millis, storage_error};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SqliteTemplate {
    id: String,
    subject: String,
    body: String,
    owner_id: String,
    created_at: i64,
    updated_at: i64,
}

impl From<SqliteTemplate> for MessageTemplate {
    fn from(row: SqliteTemplate) -> Self {
        MessageTemplate {
            id: TemplateId::new(&row.id),
            subject: row.subject,
            body: row.body,
            owner_id: OwnerId::new(&row.owner_id),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

pub struct SqliteTemplateRepository {
    pool: SqlitePool,
}

impl SqliteTemplateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for SqliteTemplateRepository {
    async fn create(&self, template: NewTemplate) -> Result<MessageTemplate, Error> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query_as::<_, SqliteTemplate>(
            r#"
            INSERT INTO templates (id, subject, body, owner_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            RETURNING *
            "#,
        )
        .bind(template.id.as_str())
        .bind(&template.subject)
        .bind(&template.body)
        .bind(template.owner_id.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: &TemplateId) -> Result<Option<MessageTemplate>, Error> {
        let row = sqlx::query_as::<_, SqliteTemplate>("SELECT * FROM templates WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(row.map(MessageTemplate::from))
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<MessageTemplate>, Error> {
        let rows = sqlx::query_as::<_, SqliteTemplate>(
            "SELECT * FROM templates WHERE owner_id = ?1 ORDER BY subject",
        )
        .bind(owner_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(MessageTemplate::from).collect())
    }

    async fn update(&self, template: &MessageTemplate) -> Result<MessageTemplate, Error> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query_as::<_, SqliteTemplate>(
            r#"
            UPDATE templates
            SET subject = ?2, body = ?3, updated_at = ?4
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(template.id.as_str())
        .bind(&template.subject)
        .bind(&template.body)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(StorageError::NotFound)?;

        Ok(row.into())
    }

    async fn delete(&self, id: &TemplateId) -> Result<(), Error> {
        sqlx::query("DELETE FROM templates WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::testing;
    use chrono::Duration;
    use courier_core::NewMailing;
    use courier_core::repositories::{
        MailingRepository, MailingRepositoryProvider, TemplateRepositoryProvider,
    };

    #[tokio::test]
    async fn test_update_and_list() {
        let provider = testing::provider().await;
        let owner = OwnerId::new_random();
        let id = testing::template(&provider, &owner).await;
        provider
            .template()
            .create(NewTemplate::new(owner.clone(), "Autumn sale", "Leaves and prices fall"))
            .await
            .unwrap();

        let mut template = provider.template().find_by_id(&id).await.unwrap().unwrap();
        template.body = "Almost everything must go".to_string();
        let updated = provider.template().update(&template).await.unwrap();
        assert_eq!(updated.body, "Almost everything must go");
        assert_eq!(updated.created_at, template.created_at);

        let subjects: Vec<_> = provider
            .template()
            .find_by_owner(&owner)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.subject)
            .collect();
        assert_eq!(subjects, vec!["Autumn sale", "Spring sale"]);
    }

    #[tokio::test]
    async fn test_delete_refused_while_referenced() {
        let provider = testing::provider().await;
        let owner = OwnerId::new_random();
        let id = testing::template(&provider, &owner).await;
        let recipient = testing::recipient(&provider, &owner, "a@example.com").await;

        let now = Utc::now();
        let mailing = NewMailing::builder()
            .template_id(id.clone())
            .owner_id(owner)
            .recipient(recipient.id)
            .window(now, now + Duration::hours(1))
            .build()
            .unwrap();
        let mailing = provider.mailing().create(mailing).await.unwrap();

        let refused = provider.template().delete(&id).await;
        assert!(matches!(
            refused,
            Err(Error::Storage(StorageError::Constraint(_)))
        ));

        provider.mailing().delete(&mailing.id).await.unwrap();
        provider.template().delete(&id).await.unwrap();
        assert!(provider.template().find_by_id(&id).await.unwrap().is_none());
    }
}
