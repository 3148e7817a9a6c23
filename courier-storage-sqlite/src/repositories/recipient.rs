use async_trait::async_trait;
use chrono::Utc;
use courier_core::{
    Error, NewRecipient, OwnerId, Recipient, RecipientId, error::StorageError,
    repositories::RecipientRepository,
};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{from_millis, storage_error};

/// Upper bound on bound parameters per `IN (...)` query.
const MAX_BIND: usize = 500;

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SqliteRecipient {
    id: String,
    email: String,
    display_name: String,
    owner_id: String,
    note: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<SqliteRecipient> for Recipient {
    fn from(row: SqliteRecipient) -> Self {
        Recipient {
            id: RecipientId::new(&row.id),
            email: row.email,
            display_name: row.display_name,
            owner_id: OwnerId::new(&row.owner_id),
            note: row.note,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

pub struct SqliteRecipientRepository {
    pool: SqlitePool,
}

impl SqliteRecipientRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientRepository for SqliteRecipientRepository {
    async fn create(&self, recipient: NewRecipient) -> Result<Recipient, Error> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query_as::<_, SqliteRecipient>(
            r#"
            INSERT INTO recipients (id, email, display_name, owner_id, note, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            RETURNING *
            "#,
        )
        .bind(recipient.id.as_str())
        .bind(&recipient.email)
        .bind(&recipient.display_name)
        .bind(recipient.owner_id.as_str())
        .bind(&recipient.note)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: &RecipientId) -> Result<Option<Recipient>, Error> {
        let row = sqlx::query_as::<_, SqliteRecipient>("SELECT * FROM recipients WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(row.map(Recipient::from))
    }

    async fn find_by_ids(&self, ids: &[RecipientId]) -> Result<Vec<Recipient>, Error> {
        let mut recipients = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MAX_BIND) {
            let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM recipients WHERE id IN (");
            let mut separated = query.separated(", ");
            for id in chunk {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(") ORDER BY id");

            let rows = query
                .build_query_as::<SqliteRecipient>()
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;
            recipients.extend(rows.into_iter().map(Recipient::from));
        }

        Ok(recipients)
    }

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Recipient>, Error> {
        let rows = sqlx::query_as::<_, SqliteRecipient>(
            "SELECT * FROM recipients WHERE owner_id = ?1 ORDER BY email",
        )
        .bind(owner_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows.into_iter().map(Recipient::from).collect())
    }

    async fn update(&self, recipient: &Recipient) -> Result<Recipient, Error> {
        let now = Utc::now().timestamp_millis();

        let row = sqlx::query_as::<_, SqliteRecipient>(
            r#"
            UPDATE recipients
            SET email = ?2, display_name = ?3, note = ?4, updated_at = ?5
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(recipient.id.as_str())
        .bind(&recipient.email)
        .bind(&recipient.display_name)
        .bind(&recipient.note)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or(StorageError::NotFound)?;

        Ok(row.into())
    }

    async fn delete(&self, id: &RecipientId) -> Result<(), Error> {
        sqlx::query("DELETE FROM recipients WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(())
    }

    async fn count_by_owner(&self, owner_id: &OwnerId) -> Result<u64, Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recipients WHERE owner_id = ?1")
            .bind(owner_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(count as u64)
    }
}
